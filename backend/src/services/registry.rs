use crate::models::{ChannelConfig, RosterConfig};
use crate::services::kv_store::{get_json, set_json, KvStore};
use anyhow::Result;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const ROSTER_KEY: &str = "streamers:config";

/// The roster of tracked channels, kept as a single record in the KV store.
#[derive(Clone)]
pub struct ChannelRegistry {
    store: Arc<dyn KvStore>,
    default_groups: Vec<String>,
    // Serializes read-modify-write cycles on the roster record.
    writes: Arc<Mutex<()>>,
}

impl ChannelRegistry {
    pub fn new(store: Arc<dyn KvStore>, default_groups: Vec<String>) -> Self {
        ChannelRegistry {
            store,
            default_groups,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Returns `None` when no roster has ever been written.
    pub async fn stored(&self) -> Result<Option<RosterConfig>> {
        get_json(self.store.as_ref(), ROSTER_KEY).await
    }

    pub async fn load(&self) -> Result<RosterConfig> {
        Ok(self.stored().await?.unwrap_or_else(|| RosterConfig {
            groups: self.default_groups.clone(),
            streamers: Vec::new(),
        }))
    }

    pub async fn list(&self) -> Result<Vec<ChannelConfig>> {
        Ok(self.load().await?.streamers)
    }

    /// Enabled channels in display order: explicit `order` first, then roster position.
    pub async fn list_enabled(&self) -> Result<Vec<ChannelConfig>> {
        let mut channels: Vec<ChannelConfig> = self
            .list()
            .await?
            .into_iter()
            .filter(|channel| channel.enabled)
            .collect();
        channels.sort_by_key(|channel| channel.order.unwrap_or(i64::MAX));
        Ok(channels)
    }

    pub async fn upsert(&self, config: ChannelConfig) -> Result<()> {
        let _write = self.writes.lock().await;
        let mut roster = self.load().await?;
        match roster.streamers.iter_mut().find(|c| c.id == config.id) {
            Some(existing) => *existing = config,
            None => {
                info!("Adding channel {} ({})", config.display_name, config.id);
                roster.streamers.push(config);
            }
        }
        self.save(&roster).await
    }

    /// Returns `false` when the channel was not in the roster.
    pub async fn remove(&self, channel_id: &str) -> Result<bool> {
        let _write = self.writes.lock().await;
        let mut roster = self.load().await?;
        let before = roster.streamers.len();
        roster.streamers.retain(|c| c.id != channel_id);
        if roster.streamers.len() == before {
            return Ok(false);
        }
        self.save(&roster).await?;
        info!("Removed channel {channel_id}");
        Ok(true)
    }

    /// Renames channels by id against the current roster. Ids no longer in
    /// the roster are skipped. Returns how many channels were renamed.
    pub async fn update_names(&self, names: &HashMap<String, String>) -> Result<usize> {
        if names.is_empty() {
            return Ok(0);
        }

        let _write = self.writes.lock().await;
        let mut roster = self.load().await?;
        let mut renamed = 0;
        for channel in roster.streamers.iter_mut() {
            if let Some(name) = names.get(&channel.id) {
                if *name != channel.display_name {
                    channel.display_name = name.clone();
                    renamed += 1;
                }
            }
        }
        if renamed > 0 {
            self.save(&roster).await?;
        }
        Ok(renamed)
    }

    async fn save(&self, roster: &RosterConfig) -> Result<()> {
        set_json(self.store.as_ref(), ROSTER_KEY, roster, None).await
    }
}
