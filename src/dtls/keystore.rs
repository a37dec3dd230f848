//! Trust-on-first-use store of peer raw public keys.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::dtls::{Alert, AlertDescription};

#[derive(Debug, Default)]
pub struct KeyStore {
    keys: BTreeMap<SocketAddr, Vec<u8>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `key` for `peer`, replacing any earlier key.
    pub fn pin(&mut self, peer: SocketAddr, key: Vec<u8>) {
        self.keys.insert(peer, key);
    }

    pub fn get(&self, peer: &SocketAddr) -> Option<&[u8]> {
        self.keys.get(peer).map(|k| k.as_slice())
    }

    pub fn forget(&mut self, peer: &SocketAddr) {
        self.keys.remove(peer);
    }

    /// Accept `key` from `peer`. The first key seen is remembered; later
    /// handshakes must present the same one.
    pub fn check(&mut self, peer: SocketAddr, key: &[u8]) -> Result<(), Alert> {
        match self.keys.get(&peer) {
            Some(pinned) if pinned.as_slice() == key => Ok(()),
            Some(_) => {
                warn!("Public key of {} changed", peer);
                Err(Alert::fatal(AlertDescription::BadCertificate))
            }
            None => {
                debug!("Trusting first key of {}", peer);
                self.keys.insert(peer, key.to_vec());
                Ok(())
            }
        }
    }
}
