//! LWM2M client: the state machine that bootstraps, registers and keeps a
//! device registered, and answers device management requests from servers.
//!
//! The context is sans-IO. Datagrams come in through
//! [`Lwm2mContext::handle_packet`] and go out through a [`Transport`], which
//! also owns sessions (plain UDP or DTLS) to the servers named in the
//! Security object.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use zeroize::Zeroizing;

use crate::objects::SecurityMode;
use crate::Error;

mod block1;
mod bootstrap;
mod context;
mod management;
mod observe;
mod registration;
mod server;
mod transaction;

pub use context::Lwm2mContext;
pub use observe::Attributes;
pub use server::ServerStatus;

/// Top level client state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Servers are (re)loaded from the Security and Server objects.
    Initial,
    BootstrapRequired,
    Bootstrapping,
    RegisterRequired,
    Registering,
    Ready,
    /// A server tore down our session. Everything is reloaded.
    Reset,
}

/// How to reach one server, taken from its Security object instance.
pub struct ServerSecurity {
    pub uri: String,
    pub mode: SecurityMode,
    /// Client public key (SPKI DER).
    pub public_key: Vec<u8>,
    /// Pinned server key (SPKI DER). Empty trusts the first key seen.
    pub server_public_key: Vec<u8>,
    pub secret_key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for ServerSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSecurity")
            .field("uri", &self.uri)
            .field("mode", &self.mode)
            .field("pinned", &!self.server_public_key.is_empty())
            .finish()
    }
}

/// Datagram plumbing the client needs from its environment.
///
/// Sessions are identified by the peer address `connect` returns.
pub trait Transport {
    /// Open (or reuse) a session to a server.
    fn connect(&mut self, now: Instant, security: &ServerSecurity) -> Result<SocketAddr, Error>;

    /// Send one CoAP message on a session.
    fn send(&mut self, now: Instant, session: SocketAddr, data: &[u8]) -> Result<(), Error>;

    /// Close a session. Best effort.
    fn disconnect(&mut self, session: SocketAddr);
}
