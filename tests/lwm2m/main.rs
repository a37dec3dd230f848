mod bootstrap;
mod common;
mod device;
mod management;
mod registration;
