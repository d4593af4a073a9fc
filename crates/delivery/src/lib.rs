//! Email delivery and tracking services.
//!
//! Send: validates drafts, attaches tracking, commits `is_sent` in chunked
//! batches and hands released sends to the provider dispatcher.
//! Track: reconciles tracker and provider webhooks into record state and
//! rolls records up into per-campaign analytics.

#![warn(clippy::unwrap_used)]

pub mod batch;
pub mod campaigns;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod limits;
pub mod sanitizer;
pub mod scheduling;
pub mod send;
pub mod store;
pub mod testing;
pub mod tracking;
pub mod webhook;

pub use batch::{commit_in_chunks, BatchCommitReport, ChunkFailure, ChunkPolicy};
pub use campaigns::CampaignAggregator;
pub use directory::MemorySenderDirectory;
pub use dispatch::{DispatchReport, Dispatcher};
pub use error::{DeliveryError, DeliveryResult, ErrorKind};
pub use limits::ProviderLimits;
pub use sanitizer::{AllowAllSanitizer, BasicHtmlSanitizer};
pub use scheduling::{BulkCancelOutcome, SchedulingService, SweepReport};
pub use send::{BulkSendOutcome, SendPipeline, SkippedEmail};
pub use store::MemoryEmailStore;
pub use tracking::TrackingRewriter;
pub use webhook::{ReconcileReport, TrackerEvent, WebhookReconciler};
