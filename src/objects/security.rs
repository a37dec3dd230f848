use std::any::Any;

use crate::coap::ResponseCode;
use crate::data::{Data, Value};
use crate::object::{requested_ids, Object, ObjectResult, SECURITY_OBJECT_ID};

pub const RES_SERVER_URI: u16 = 0;
pub const RES_BOOTSTRAP: u16 = 1;
pub const RES_SECURITY_MODE: u16 = 2;
pub const RES_PUBLIC_KEY: u16 = 3;
pub const RES_SERVER_PUBLIC_KEY: u16 = 4;
pub const RES_SECRET_KEY: u16 = 5;
pub const RES_SHORT_SERVER_ID: u16 = 10;
pub const RES_HOLD_OFF: u16 = 11;

const READABLE: [u16; 8] = [
    RES_SERVER_URI,
    RES_BOOTSTRAP,
    RES_SECURITY_MODE,
    RES_PUBLIC_KEY,
    RES_SERVER_PUBLIC_KEY,
    RES_SECRET_KEY,
    RES_SHORT_SERVER_ID,
    RES_HOLD_OFF,
];

/// Security mode resource values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    PreSharedKey,
    RawPublicKey,
    Certificate,
    NoSec,
}

impl SecurityMode {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(SecurityMode::PreSharedKey),
            1 => Some(SecurityMode::RawPublicKey),
            2 => Some(SecurityMode::Certificate),
            3 => Some(SecurityMode::NoSec),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            SecurityMode::PreSharedKey => 0,
            SecurityMode::RawPublicKey => 1,
            SecurityMode::Certificate => 2,
            SecurityMode::NoSec => 3,
        }
    }
}

/// One Security object instance: how to reach and authenticate one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityInstance {
    pub id: u16,
    pub server_uri: String,
    pub bootstrap: bool,
    pub mode: SecurityMode,
    /// Client public key (SPKI DER) or PSK identity.
    pub public_key: Vec<u8>,
    /// Pinned server public key (SPKI DER). Empty means trust on first use.
    pub server_public_key: Vec<u8>,
    /// Client private key (PKCS#8 DER or raw 32-byte scalar) or PSK.
    pub secret_key: Vec<u8>,
    pub short_server_id: u16,
    /// Seconds to wait before a client-initiated bootstrap.
    pub hold_off: u32,
}

impl SecurityInstance {
    pub fn new(id: u16, server_uri: impl Into<String>, short_server_id: u16) -> Self {
        SecurityInstance {
            id,
            server_uri: server_uri.into(),
            bootstrap: false,
            mode: SecurityMode::NoSec,
            public_key: Vec::new(),
            server_public_key: Vec::new(),
            secret_key: Vec::new(),
            short_server_id,
            hold_off: 0,
        }
    }

    fn apply(&mut self, data: &Data) -> ObjectResult {
        let bad = ResponseCode::BadRequest;
        match data.id {
            RES_SERVER_URI => self.server_uri = data.value.as_str().ok_or(bad)?.to_owned(),
            RES_BOOTSTRAP => self.bootstrap = data.value.as_bool().ok_or(bad)?,
            RES_SECURITY_MODE => {
                let mode = data.value.as_int().ok_or(bad)?;
                self.mode = SecurityMode::from_i64(mode).ok_or(bad)?;
            }
            RES_PUBLIC_KEY => self.public_key = data.value.as_bytes().ok_or(bad)?.to_vec(),
            RES_SERVER_PUBLIC_KEY => {
                self.server_public_key = data.value.as_bytes().ok_or(bad)?.to_vec()
            }
            RES_SECRET_KEY => self.secret_key = data.value.as_bytes().ok_or(bad)?.to_vec(),
            RES_SHORT_SERVER_ID => {
                let id = data.value.as_int().ok_or(bad)?;
                self.short_server_id = u16::try_from(id).map_err(|_| bad)?;
            }
            RES_HOLD_OFF => {
                let secs = data.value.as_int().ok_or(bad)?;
                self.hold_off = u32::try_from(secs).map_err(|_| bad)?;
            }
            // Resources this object does not keep are accepted and dropped.
            _ => {}
        }
        Ok(())
    }
}

/// LWM2M Security object (id 0).
///
/// Only the bootstrap server may change it; the dispatcher hides it from
/// device management servers.
#[derive(Debug, Default)]
pub struct SecurityObject {
    instances: Vec<SecurityInstance>,
}

impl SecurityObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(&mut self, instance: SecurityInstance) {
        self.instances.retain(|i| i.id != instance.id);
        self.instances.push(instance);
        self.instances.sort_by_key(|i| i.id);
    }

    pub fn instance(&self, id: u16) -> Option<&SecurityInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecurityInstance> {
        self.instances.iter()
    }

    fn instance_mut(&mut self, id: u16) -> Option<&mut SecurityInstance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }
}

impl Object for SecurityObject {
    fn id(&self) -> u16 {
        SECURITY_OBJECT_ID
    }

    fn instances(&self) -> Vec<u16> {
        self.instances.iter().map(|i| i.id).collect()
    }

    fn read(&mut self, instance: u16, data: &mut Vec<Data>) -> ObjectResult {
        let inst = self.instance(instance).ok_or(ResponseCode::NotFound)?;
        let ids = requested_ids(data, &READABLE);
        data.clear();
        for id in ids {
            let value = match id {
                RES_SERVER_URI => Value::String(inst.server_uri.clone()),
                RES_BOOTSTRAP => Value::Boolean(inst.bootstrap),
                RES_SECURITY_MODE => Value::Integer(inst.mode.as_i64()),
                RES_PUBLIC_KEY => Value::Opaque(inst.public_key.clone()),
                RES_SERVER_PUBLIC_KEY => Value::Opaque(inst.server_public_key.clone()),
                RES_SECRET_KEY => Value::Opaque(inst.secret_key.clone()),
                RES_SHORT_SERVER_ID => Value::Integer(inst.short_server_id as i64),
                RES_HOLD_OFF => Value::Integer(inst.hold_off as i64),
                _ => return Err(ResponseCode::NotFound),
            };
            data.push(Data::new(id, value));
        }
        Ok(())
    }

    fn write(&mut self, instance: u16, data: &[Data], _replace: bool) -> ObjectResult {
        let inst = self.instance_mut(instance).ok_or(ResponseCode::NotFound)?;
        // Validate on a copy so a bad resource leaves the instance untouched.
        let mut updated = inst.clone();
        for d in data {
            updated.apply(d)?;
        }
        *inst = updated;
        Ok(())
    }

    fn create(&mut self, instance: u16, data: &[Data]) -> ObjectResult {
        if self.instance(instance).is_some() {
            return Err(ResponseCode::BadRequest);
        }
        let mut inst = SecurityInstance::new(instance, "", 0);
        for d in data {
            inst.apply(d)?;
        }
        self.add_instance(inst);
        Ok(())
    }

    fn delete(&mut self, instance: u16) -> ObjectResult {
        let before = self.instances.len();
        self.instances.retain(|i| i.id != instance);
        if self.instances.len() == before {
            return Err(ResponseCode::NotFound);
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
