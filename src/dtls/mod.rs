//! DTLS 1.2 with `TLS_ECDHE_ECDSA_WITH_AES_128_CCM_8` and raw public keys.
//!
//! The engine is sans-IO, like the rest of the crate. A [`DtlsContext`]
//! tracks every peer by address, takes datagrams in and hands back
//! [`Output`]s: datagrams to send, decrypted application data and
//! connection [`Event`]s.
//!
//! ```text
//!  record.rs     framing, is_record()
//!  crypto/       PRF, AES-CCM-8, P-256
//!  message/      handshake messages (nom)
//!  peer.rs       epochs, replay window, reorder queue
//!  client.rs     client handshake
//!  server.rs     server handshake, cookies
//!  netq.rs       flight retransmission
//!  context.rs    the public endpoint
//! ```

mod alert;
mod client;
mod context;
pub(crate) mod crypto;
mod keystore;
pub(crate) mod message;
mod netq;
mod peer;
pub(crate) mod record;
mod server;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use context::{DtlsContext, Event, Output};
pub use crypto::Identity;
pub use keystore::KeyStore;
pub use record::is_record;
