use std::any::Any;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::coap::ResponseCode;
use crate::data::{Data, Value};
use crate::object::{requested_ids, Object, ObjectResult, DEVICE_OBJECT_ID};

pub const RES_MANUFACTURER: u16 = 0;
pub const RES_MODEL_NUMBER: u16 = 1;
pub const RES_SERIAL_NUMBER: u16 = 2;
pub const RES_FIRMWARE_VERSION: u16 = 3;
pub const RES_REBOOT: u16 = 4;
pub const RES_ERROR_CODE: u16 = 11;
pub const RES_CURRENT_TIME: u16 = 13;
pub const RES_UTC_OFFSET: u16 = 14;
pub const RES_TIMEZONE: u16 = 15;
pub const RES_BINDING_MODES: u16 = 16;

const READABLE: [u16; 9] = [
    RES_MANUFACTURER,
    RES_MODEL_NUMBER,
    RES_SERIAL_NUMBER,
    RES_FIRMWARE_VERSION,
    RES_ERROR_CODE,
    RES_CURRENT_TIME,
    RES_UTC_OFFSET,
    RES_TIMEZONE,
    RES_BINDING_MODES,
];

/// LWM2M Device object (id 3), single instance 0.
#[derive(Debug)]
pub struct DeviceObject {
    pub manufacturer: String,
    pub model_number: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub utc_offset: String,
    pub timezone: String,
    /// Seconds added to the system clock after a server wrote the time.
    time_offset: i64,
    reboot_requested: bool,
}

impl Default for DeviceObject {
    fn default() -> Self {
        DeviceObject {
            manufacturer: String::new(),
            model_number: String::new(),
            serial_number: String::new(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            utc_offset: "+00:00".to_string(),
            timezone: "UTC".to_string(),
            time_offset: 0,
            reboot_requested: false,
        }
    }
}

impl DeviceObject {
    pub fn new(manufacturer: impl Into<String>, model_number: impl Into<String>) -> Self {
        DeviceObject {
            manufacturer: manufacturer.into(),
            model_number: model_number.into(),
            ..Default::default()
        }
    }

    pub fn current_time(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        now + self.time_offset
    }

    /// Whether a server executed Reboot. Reading clears it.
    pub fn take_reboot_request(&mut self) -> bool {
        std::mem::take(&mut self.reboot_requested)
    }
}

impl Object for DeviceObject {
    fn id(&self) -> u16 {
        DEVICE_OBJECT_ID
    }

    fn instances(&self) -> Vec<u16> {
        vec![0]
    }

    fn read(&mut self, instance: u16, data: &mut Vec<Data>) -> ObjectResult {
        if instance != 0 {
            return Err(ResponseCode::NotFound);
        }
        let ids = requested_ids(data, &READABLE);
        data.clear();
        for id in ids {
            let value = match id {
                RES_MANUFACTURER => Value::String(self.manufacturer.clone()),
                RES_MODEL_NUMBER => Value::String(self.model_number.clone()),
                RES_SERIAL_NUMBER => Value::String(self.serial_number.clone()),
                RES_FIRMWARE_VERSION => Value::String(self.firmware_version.clone()),
                RES_ERROR_CODE => Value::MultiResource(vec![Data::int(0, 0)]),
                RES_CURRENT_TIME => Value::Integer(self.current_time()),
                RES_UTC_OFFSET => Value::String(self.utc_offset.clone()),
                RES_TIMEZONE => Value::String(self.timezone.clone()),
                RES_BINDING_MODES => Value::String("U".to_string()),
                RES_REBOOT => return Err(ResponseCode::MethodNotAllowed),
                _ => return Err(ResponseCode::NotFound),
            };
            data.push(Data::new(id, value));
        }
        Ok(())
    }

    fn write(&mut self, instance: u16, data: &[Data], _replace: bool) -> ObjectResult {
        if instance != 0 {
            return Err(ResponseCode::NotFound);
        }
        for d in data {
            match d.id {
                RES_CURRENT_TIME => {
                    let t = d.value.as_int().ok_or(ResponseCode::BadRequest)?;
                    self.time_offset = 0;
                    self.time_offset = t - self.current_time();
                }
                RES_UTC_OFFSET => {
                    self.utc_offset = d.value.as_str().ok_or(ResponseCode::BadRequest)?.to_owned()
                }
                RES_TIMEZONE => {
                    self.timezone = d.value.as_str().ok_or(ResponseCode::BadRequest)?.to_owned()
                }
                id if READABLE.contains(&id) || id == RES_REBOOT => {
                    return Err(ResponseCode::MethodNotAllowed)
                }
                _ => return Err(ResponseCode::NotFound),
            }
        }
        Ok(())
    }

    fn execute(&mut self, instance: u16, resource: u16, _args: &[u8]) -> ObjectResult {
        if instance != 0 {
            return Err(ResponseCode::NotFound);
        }
        match resource {
            RES_REBOOT => {
                info!("Reboot requested by server");
                self.reboot_requested = true;
                Ok(())
            }
            _ => Err(ResponseCode::MethodNotAllowed),
        }
    }

    fn executable(&self, _instance: u16) -> Vec<u16> {
        vec![RES_REBOOT]
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
