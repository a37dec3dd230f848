//! Stock objects: Security, Server, Device, and a generic holder for user
//! resources.

mod device;
mod resource;
mod security;
mod server;

pub use device::DeviceObject;
pub use resource::{Access, ExecuteCallback, Resource, ResourceObject, WriteCallback};
pub use security::{SecurityInstance, SecurityMode, SecurityObject};
pub use server::{valid_binding, ServerInstance, ServerObject};

pub mod ids {
    //! Resource ids of the stock objects.
    pub mod security {
        pub use super::super::security::{
            RES_BOOTSTRAP, RES_HOLD_OFF, RES_PUBLIC_KEY, RES_SECRET_KEY, RES_SECURITY_MODE,
            RES_SERVER_PUBLIC_KEY, RES_SERVER_URI, RES_SHORT_SERVER_ID,
        };
    }
    pub mod server {
        pub use super::super::server::{
            RES_BINDING, RES_DEFAULT_PMAX, RES_DEFAULT_PMIN, RES_DISABLE, RES_LIFETIME,
            RES_SHORT_SERVER_ID, RES_STORING, RES_UPDATE_TRIGGER,
        };
    }
    pub mod device {
        pub use super::super::device::{
            RES_BINDING_MODES, RES_CURRENT_TIME, RES_ERROR_CODE, RES_FIRMWARE_VERSION,
            RES_MANUFACTURER, RES_MODEL_NUMBER, RES_REBOOT, RES_SERIAL_NUMBER, RES_TIMEZONE,
            RES_UTC_OFFSET,
        };
    }
}
