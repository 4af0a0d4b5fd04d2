pub mod config;
pub mod transport;

pub use config::{ConfigError, TransportConfig};
pub use transport::{HttpTransport, classify_transport_error};
