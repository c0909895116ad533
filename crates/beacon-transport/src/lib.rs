pub mod config;
pub mod frame;
pub mod mock;
pub mod phoenix;

pub use config::TransportConfig;
pub use mock::MockTransport;
pub use phoenix::PhoenixTransport;
