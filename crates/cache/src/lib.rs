#![warn(clippy::unwrap_used)]

pub mod client;
pub mod local;

pub use client::RedisCampaignCache;
pub use local::LocalCache;
