use std::net::SocketAddr;
use std::time::Instant;

use zeroize::Zeroizing;

use super::block1::Block1;
use super::ServerSecurity;
use crate::data::Value;
use crate::object::{ObjectRegistry, SECURITY_OBJECT_ID, SERVER_OBJECT_ID};
use crate::objects::ids::{security, server};
use crate::objects::SecurityMode;

/// Registration or bootstrap progress of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Deregistered,
    RegPending,
    Registered,
    RegFailed,
    RegUpdatePending,
    RegUpdateNeeded,
    RegFullUpdateNeeded,
    DeregPending,

    BsHoldOff,
    BsInitiated,
    BsPending,
    BsFinished,
    BsFailed,
}

impl ServerStatus {
    /// Registered as far as the server is concerned.
    pub fn is_registered(&self) -> bool {
        matches!(
            self,
            ServerStatus::Registered
                | ServerStatus::RegUpdatePending
                | ServerStatus::RegUpdateNeeded
                | ServerStatus::RegFullUpdateNeeded
        )
    }
}

/// A bootstrap or device management server known from the Security object.
#[derive(Debug)]
pub(crate) struct Server {
    pub short_id: u16,
    pub security_id: u16,
    pub lifetime: u32,
    pub binding: String,
    pub hold_off: u32,
    pub registered_at: Option<Instant>,
    pub session: Option<SocketAddr>,
    pub status: ServerStatus,
    pub location: Option<String>,
    pub block1: Block1,
    /// Bootstrap: when hold-off ends, or when a pending bootstrap gives up.
    pub deadline: Option<Instant>,
}

impl Server {
    fn new(short_id: u16, security_id: u16) -> Self {
        Server {
            short_id,
            security_id,
            lifetime: 0,
            binding: "U".to_string(),
            hold_off: 0,
            registered_at: None,
            session: None,
            status: ServerStatus::Deregistered,
            location: None,
            block1: Block1::default(),
            deadline: None,
        }
    }
}

/// Build server records from the Security and Server objects.
///
/// Returns the device management servers ordered by short id, and the
/// bootstrap server if one is configured. A Security instance without a
/// matching Server instance is skipped.
pub(crate) fn load_servers(registry: &mut ObjectRegistry) -> (Vec<Server>, Option<Server>) {
    let mut servers = Vec::new();
    let mut bootstrap = None;

    let security_ids = match registry.get_mut(SECURITY_OBJECT_ID) {
        Some(o) => o.instances(),
        None => return (servers, None),
    };
    let server_ids = match registry.get_mut(SERVER_OBJECT_ID) {
        Some(o) => o.instances(),
        None => Vec::new(),
    };

    for sec in security_ids {
        let is_bootstrap = registry
            .read_value(SECURITY_OBJECT_ID, sec, security::RES_BOOTSTRAP)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let short_id = registry
            .read_value(SECURITY_OBJECT_ID, sec, security::RES_SHORT_SERVER_ID)
            .and_then(|v| v.as_int())
            .and_then(|n| u16::try_from(n).ok())
            .unwrap_or(0);

        if is_bootstrap {
            let mut s = Server::new(short_id, sec);
            s.hold_off = registry
                .read_value(SECURITY_OBJECT_ID, sec, security::RES_HOLD_OFF)
                .and_then(|v| v.as_int())
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0);
            if bootstrap.is_some() {
                warn!("More than one bootstrap server, ignoring security instance {}", sec);
                continue;
            }
            bootstrap = Some(s);
            continue;
        }

        let matching = server_ids.iter().copied().find(|&inst| {
            registry
                .read_value(SERVER_OBJECT_ID, inst, server::RES_SHORT_SERVER_ID)
                .and_then(|v| v.as_int())
                == Some(short_id as i64)
        });
        let Some(inst) = matching else {
            debug!("No server instance for short id {}", short_id);
            continue;
        };

        let mut s = Server::new(short_id, sec);
        s.lifetime = registry
            .read_value(SERVER_OBJECT_ID, inst, server::RES_LIFETIME)
            .and_then(|v| v.as_int())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);
        if let Some(Value::String(b)) =
            registry.read_value(SERVER_OBJECT_ID, inst, server::RES_BINDING)
        {
            s.binding = b;
        }
        servers.push(s);
    }

    servers.sort_by_key(|s| s.short_id);
    (servers, bootstrap)
}

/// Connection parameters of Security instance `instance`.
pub(crate) fn security_of(registry: &mut ObjectRegistry, instance: u16) -> Option<ServerSecurity> {
    let bytes = |registry: &mut ObjectRegistry, res| {
        registry
            .read_value(SECURITY_OBJECT_ID, instance, res)
            .and_then(|v| v.as_bytes().map(|b| b.to_vec()))
            .unwrap_or_default()
    };

    let uri = registry
        .read_value(SECURITY_OBJECT_ID, instance, security::RES_SERVER_URI)
        .and_then(|v| v.as_str().map(|s| s.to_owned()))?;
    let mode = registry
        .read_value(SECURITY_OBJECT_ID, instance, security::RES_SECURITY_MODE)
        .and_then(|v| v.as_int())
        .and_then(SecurityMode::from_i64)
        .unwrap_or(SecurityMode::NoSec);

    Some(ServerSecurity {
        uri,
        mode,
        public_key: bytes(registry, security::RES_PUBLIC_KEY),
        server_public_key: bytes(registry, security::RES_SERVER_PUBLIC_KEY),
        secret_key: Zeroizing::new(bytes(registry, security::RES_SECRET_KEY)),
    })
}
