//! Change propagation: publishes email batch notifications and consumes
//! them to dispatch new sends and keep the search index current.

#![warn(clippy::unwrap_used)]

pub mod handler;
pub mod notifier;
pub mod worker;

pub use handler::{CaptureSink, IndexSink, SyncHandler};
pub use notifier::{InProcessNotifier, NatsNotifier};
pub use worker::{connect, SyncWorker};
