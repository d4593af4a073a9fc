use async_trait::async_trait;
use dashmap::DashMap;
use outreach_core::error::OutreachResult;
use outreach_core::sender::{SenderDirectory, SenderProfile};
use outreach_core::types::UserId;

/// Sender profiles held in memory, keyed by user id.
#[derive(Default)]
pub struct MemorySenderDirectory {
    profiles: DashMap<UserId, SenderProfile>,
}

impl MemorySenderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: SenderProfile) {
        self.profiles.insert(profile.user_id, profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl SenderDirectory for MemorySenderDirectory {
    async fn sender(&self, user_id: UserId) -> OutreachResult<Option<SenderProfile>> {
        Ok(self.profiles.get(&user_id).map(|p| p.clone()))
    }
}
