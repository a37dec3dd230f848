use std::any::Any;

use crate::coap::ResponseCode;
use crate::data::{Data, Value};
use crate::object::{requested_ids, Object, ObjectResult, SERVER_OBJECT_ID};

pub const RES_SHORT_SERVER_ID: u16 = 0;
pub const RES_LIFETIME: u16 = 1;
pub const RES_DEFAULT_PMIN: u16 = 2;
pub const RES_DEFAULT_PMAX: u16 = 3;
pub const RES_DISABLE: u16 = 4;
pub const RES_STORING: u16 = 6;
pub const RES_BINDING: u16 = 7;
pub const RES_UPDATE_TRIGGER: u16 = 8;

const READABLE: [u16; 6] = [
    RES_SHORT_SERVER_ID,
    RES_LIFETIME,
    RES_DEFAULT_PMIN,
    RES_DEFAULT_PMAX,
    RES_STORING,
    RES_BINDING,
];

/// One Server object instance: registration parameters for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInstance {
    pub id: u16,
    pub short_server_id: u16,
    pub lifetime: u32,
    pub default_pmin: Option<u32>,
    pub default_pmax: Option<u32>,
    pub storing: bool,
    pub binding: String,
}

impl ServerInstance {
    pub fn new(id: u16, short_server_id: u16, lifetime: u32) -> Self {
        ServerInstance {
            id,
            short_server_id,
            lifetime,
            default_pmin: None,
            default_pmax: None,
            storing: false,
            binding: "U".to_string(),
        }
    }

    fn apply(&mut self, data: &Data, bootstrap: bool) -> ObjectResult {
        let bad = ResponseCode::BadRequest;
        let uint = |v: &Value| {
            v.as_int()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or(bad)
        };
        match data.id {
            RES_SHORT_SERVER_ID if bootstrap => {
                let id = data.value.as_int().ok_or(bad)?;
                self.short_server_id = u16::try_from(id).map_err(|_| bad)?;
            }
            RES_SHORT_SERVER_ID => return Err(ResponseCode::MethodNotAllowed),
            RES_LIFETIME => self.lifetime = uint(&data.value)?,
            RES_DEFAULT_PMIN => self.default_pmin = Some(uint(&data.value)?),
            RES_DEFAULT_PMAX => self.default_pmax = Some(uint(&data.value)?),
            RES_STORING => self.storing = data.value.as_bool().ok_or(bad)?,
            RES_BINDING => {
                let binding = data.value.as_str().ok_or(bad)?;
                if !valid_binding(binding) {
                    return Err(bad);
                }
                self.binding = binding.to_owned();
            }
            RES_DISABLE | RES_UPDATE_TRIGGER => return Err(ResponseCode::MethodNotAllowed),
            _ if bootstrap => {}
            _ => return Err(ResponseCode::NotFound),
        }
        Ok(())
    }
}

/// Binding modes LWM2M 1.0 defines.
pub fn valid_binding(binding: &str) -> bool {
    matches!(binding, "U" | "UQ" | "S" | "SQ" | "US" | "UQS")
}

/// LWM2M Server object (id 1).
///
/// Execute on resource 8 (registration update trigger) succeeds here; the
/// client reacts to it by sending a registration update.
#[derive(Debug, Default)]
pub struct ServerObject {
    instances: Vec<ServerInstance>,
    bootstrap_writes: bool,
}

impl ServerObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(&mut self, instance: ServerInstance) {
        self.instances.retain(|i| i.id != instance.id);
        self.instances.push(instance);
        self.instances.sort_by_key(|i| i.id);
    }

    pub fn instance(&self, id: u16) -> Option<&ServerInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn by_short_id(&self, short_id: u16) -> Option<&ServerInstance> {
        self.instances.iter().find(|i| i.short_server_id == short_id)
    }

    /// While set, writes come from the bootstrap server and may touch the
    /// short server id and unknown resources.
    pub fn set_bootstrap_writes(&mut self, enabled: bool) {
        self.bootstrap_writes = enabled;
    }
}

impl Object for ServerObject {
    fn id(&self) -> u16 {
        SERVER_OBJECT_ID
    }

    fn instances(&self) -> Vec<u16> {
        self.instances.iter().map(|i| i.id).collect()
    }

    fn read(&mut self, instance: u16, data: &mut Vec<Data>) -> ObjectResult {
        let inst = self.instance(instance).ok_or(ResponseCode::NotFound)?;
        let ids = requested_ids(data, &READABLE);
        let whole = data.is_empty();
        data.clear();
        for id in ids {
            let value = match id {
                RES_SHORT_SERVER_ID => Value::Integer(inst.short_server_id as i64),
                RES_LIFETIME => Value::Integer(inst.lifetime as i64),
                RES_DEFAULT_PMIN => match inst.default_pmin {
                    Some(v) => Value::Integer(v as i64),
                    None if whole => continue,
                    None => return Err(ResponseCode::NotFound),
                },
                RES_DEFAULT_PMAX => match inst.default_pmax {
                    Some(v) => Value::Integer(v as i64),
                    None if whole => continue,
                    None => return Err(ResponseCode::NotFound),
                },
                RES_STORING => Value::Boolean(inst.storing),
                RES_BINDING => Value::String(inst.binding.clone()),
                RES_DISABLE | RES_UPDATE_TRIGGER => return Err(ResponseCode::MethodNotAllowed),
                _ => return Err(ResponseCode::NotFound),
            };
            data.push(Data::new(id, value));
        }
        Ok(())
    }

    fn write(&mut self, instance: u16, data: &[Data], _replace: bool) -> ObjectResult {
        let bootstrap = self.bootstrap_writes;
        let inst = self
            .instances
            .iter_mut()
            .find(|i| i.id == instance)
            .ok_or(ResponseCode::NotFound)?;
        let mut updated = inst.clone();
        for d in data {
            updated.apply(d, bootstrap)?;
        }
        *inst = updated;
        Ok(())
    }

    fn execute(&mut self, instance: u16, resource: u16, _args: &[u8]) -> ObjectResult {
        if self.instance(instance).is_none() {
            return Err(ResponseCode::NotFound);
        }
        match resource {
            RES_UPDATE_TRIGGER => Ok(()),
            RES_DISABLE => Err(ResponseCode::NotImplemented),
            _ => Err(ResponseCode::MethodNotAllowed),
        }
    }

    fn executable(&self, _instance: u16) -> Vec<u16> {
        vec![RES_DISABLE, RES_UPDATE_TRIGGER]
    }

    fn create(&mut self, instance: u16, data: &[Data]) -> ObjectResult {
        if self.instance(instance).is_some() {
            return Err(ResponseCode::BadRequest);
        }
        let mut inst = ServerInstance::new(instance, 0, 0);
        for d in data {
            inst.apply(d, true)?;
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
