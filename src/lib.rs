//! nbiot
//!
//! An LWM2M 1.0 client for constrained devices, speaking CoAP over UDP or
//! over DTLS 1.2 (`TLS_ECDHE_ECDSA_WITH_AES_128_CCM_8` with raw public keys).
//!
//! The protocol engines are sans-IO: [`Lwm2mContext`] and [`DtlsContext`]
//! take datagrams and an [`Instant`](std::time::Instant) in and hand work
//! back to the caller. [`Device`] wires both to a UDP socket for the common
//! case.
//!
//! ```text
//!            Device::step
//!                 |
//!      +----------+-----------+
//!      |                      |
//!  Lwm2mContext  <-- CoAP --> Link (Transport)
//!  objects, observe,          |           |
//!  registration           plain UDP   DtlsContext
//! ```
//!
//! # Objects
//!
//! The Security (0), Server (1) and Device (3) objects are built in. User
//! resources are added with [`Device::add_resource`] and changed with
//! [`Device::set_value`], which also triggers notifications to observers.
//!
//! # Example
//!
//! ```no_run
//! use std::time::{Duration, Instant};
//! use nbiot::{Access, Device, DeviceConfig, Resource, Uri, Value};
//!
//! let config = DeviceConfig::builder("dev1", "coap://127.0.0.1:5683")
//!     .lifetime(300)
//!     .build()?;
//! let mut device = Device::bind(config)?;
//! device.add_resource(Resource::new(3303, 0, 5700, Value::Float(21.5), Access::READ))?;
//! device.connect();
//!
//! loop {
//!     let wait = device.step(Instant::now())?;
//!     std::thread::sleep(wait.min(Duration::from_millis(50)));
//!     device.set_value(Uri::resource(3303, 0, 5700), Value::Float(22.0))?;
//! }
//! # Ok::<(), nbiot::Error>(())
//! ```
#![forbid(unsafe_code)]
#![warn(clippy::all)]
// #![deny(missing_docs)]

#[macro_use]
extern crate log;

mod buffer;
mod bytes;
mod rng;
mod time_tricks;
mod timer;
mod window;

mod error;
pub use error::Error;

mod config;
pub use config::{Config, ConfigBuilder, DeviceConfig, DeviceConfigBuilder};

pub mod coap;
pub mod tlv;

mod uri;
pub use uri::Uri;

mod data;
pub use data::{Data, Value};

mod object;
pub use object::{Object, ObjectRegistry, ObjectResult};
pub use object::{DEVICE_OBJECT_ID, SECURITY_OBJECT_ID, SERVER_OBJECT_ID};

pub mod objects;
pub use objects::{Access, DeviceObject, Resource, ResourceObject};
pub use objects::{SecurityInstance, SecurityMode, SecurityObject, ServerInstance, ServerObject};

pub mod dtls;
pub use dtls::{Alert, AlertDescription, AlertLevel, DtlsContext, Event, Identity, Output};

pub mod lwm2m;
pub use lwm2m::{ClientState, Lwm2mContext, ServerSecurity, Transport};

mod device;
pub use device::{parse_server_uri, Device, Socket, COAPS_PORT, COAP_PORT};

pub use buffer::Buf;
