pub mod client;
pub mod manager;
pub mod notifiers;
pub mod ports;
pub mod server;
pub mod session;
pub mod sink;

pub use manager::{NotifierLifecycleManager, Relay};
pub use notifiers::{NotifierSet, NotifierState};
pub use ports::{Inbound, PageFlags, PortError, PortMessage};
pub use server::{start, start_with_telemetry, BridgeError, ServerConfig, ServerHandle};
pub use session::UiSession;
pub use sink::SignalSink;
