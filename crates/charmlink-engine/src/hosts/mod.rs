//! Thin adapters from each host's native callback shape to the shared
//! [`InboundDispatcher`](crate::dispatcher::InboundDispatcher).

pub mod background;
pub mod foreground;

pub use background::{BackgroundWorker, TransportEvent};
pub use foreground::{ForegroundEvent, ForegroundSession};
