use crate::models::ChannelState;
use crate::services::kv_store::{get_json, set_json, KvStore};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

pub const STATE_KEY: &str = "streamers:state";

pub type ChannelStates = HashMap<String, ChannelState>;

/// Hysteresis memory for every channel, read once and written once per pass.
///
/// Entries for channels removed from the roster are left in place.
#[derive(Clone)]
pub struct ChannelStateStore {
    store: Arc<dyn KvStore>,
}

impl ChannelStateStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        ChannelStateStore { store }
    }

    pub async fn load_all(&self) -> Result<ChannelStates> {
        Ok(get_json(self.store.as_ref(), STATE_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_all(&self, states: &ChannelStates) -> Result<()> {
        set_json(self.store.as_ref(), STATE_KEY, states, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv_store::MemoryKvStore;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn missing_record_is_empty() {
        let store = ChannelStateStore::new(Arc::new(MemoryKvStore::new()));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn saved_states_are_read_back() {
        let store = ChannelStateStore::new(Arc::new(MemoryKvStore::new()));
        let mut states = ChannelStates::new();
        states.insert(
            "UC1".to_string(),
            ChannelState {
                offline_polls: 2,
                last_active_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
                last_known_video_id: Some("V1".to_string()),
            },
        );
        store.save_all(&states).await.unwrap();
        assert_eq!(store.load_all().await.unwrap(), states);
    }
}
