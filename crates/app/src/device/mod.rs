//! Host runtime of the glasses control core: configuration, telemetry, host
//! bindings for the collaborator traits, the status server, and the
//! supervisor that ties them together.

pub mod config;
mod console;
mod http;
mod network;
mod server;
mod supervisor;
pub(crate) mod telemetry;

pub use config::{DeviceCliArgs, DeviceConfig};
pub use supervisor::run;
