pub mod http;
pub mod traits;
pub mod types;

pub use http::HttpBackend;
pub use traits::{CommandSink, LoggingSink, OfflineBackend, SessionBackend};
pub use types::{DeviceCommand, TestMode};
