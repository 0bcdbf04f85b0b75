pub mod device;
pub mod gateway;
pub mod mqtt;
pub mod payload;

pub use device::{Device, DeviceRoster};
pub use gateway::GatewayEvent;
pub use payload::{DeviceAnswer, EventKind, Outcome};
