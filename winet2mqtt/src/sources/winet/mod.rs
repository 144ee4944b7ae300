pub mod client;
pub mod config;
pub mod device;
pub mod mapping;
pub mod messages;
pub mod properties;
pub mod scheduler;
pub mod session;
pub mod stages;
pub mod tls;
pub mod watchdog;

pub use client::{ClientError, WinetClient};
pub use config::WinetConfig;
pub use device::Device;
pub use properties::{fetch_properties, Properties, TextLookup};
