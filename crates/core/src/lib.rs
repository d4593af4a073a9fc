//! Core domain for outreach email delivery: the email record model, lifecycle
//! transitions, campaign keys, and the collaborator contracts (record store,
//! search index, cache, notifier, sender directory).

#![warn(clippy::unwrap_used)]

pub mod cache;
pub mod campaign_key;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod lifecycle;
pub mod provider;
pub mod search;
pub mod sender;
pub mod store;
pub mod types;

pub use cache::{invalidate_keys, CampaignCache, MemoryCampaignCache, NoopCampaignCache};
pub use campaign_key::{derive_key, descriptor_key};
pub use config::AppConfig;
pub use error::{OutreachError, OutreachResult};
pub use event_bus::{EmailBatchNotification, EmailTopic, Notifier};
pub use lifecycle::{CancelRejection, TransitionError};
pub use provider::ProviderGateway;
pub use search::{EmailFilter, EngagementFilter, PageRequest, SearchIndex, SearchPage};
pub use sender::{HtmlSanitizer, SenderDirectory, SenderProfile};
pub use store::RecordStore;
pub use types::*;
