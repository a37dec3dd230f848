//! Cryptography for the one suite we speak, on RustCrypto.

pub(crate) mod ccm;
pub(crate) mod ecc;
pub(crate) mod prf;

pub use ecc::Identity;
