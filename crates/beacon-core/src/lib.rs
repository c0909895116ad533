pub mod errors;
pub mod events;
pub mod ids;
pub mod operation;
pub mod signals;
pub mod transport;

pub use errors::TransportError;
pub use events::{LifecycleEvent, NotifierEvent};
pub use ids::{NotifierId, SessionId};
pub use operation::{SubscriptionOperation, Variables};
pub use signals::UiSignal;
pub use transport::{Notifier, Observer, Transport};
