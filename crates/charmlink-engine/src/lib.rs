//! Message delivery and pending-transfer reconciliation.
//!
//! One [`Engine`] is built per execution context and handed to a host
//! adapter: [`hosts::BackgroundWorker`] for the always-alive worker,
//! [`hosts::ForegroundSession`] for the application's view lifetime. Both
//! feed the same [`dispatcher::InboundDispatcher`] and the same database.

pub mod bus;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod hosts;
pub mod memory;
pub mod outbound;
pub mod poller;
pub mod presence;
pub mod store;
pub mod tracker;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, LedgerError, TransportError};
