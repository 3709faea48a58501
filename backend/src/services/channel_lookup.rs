use crate::models::RefreshSummary;
use crate::services::registry::ChannelRegistry;
use crate::utils::{parse_channel_reference, ChannelReference};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use log::{error, info};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;

const CHANNELS_URL: &str = "https://www.googleapis.com/youtube/v3/channels";

/// Channel metadata lookups used by the roster admin.
#[rocket::async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn channel_title(&self, channel_id: &str) -> Result<Option<String>>;
    /// Turns a channel id, channel URL or handle into a channel id.
    async fn resolve_channel_id(&self, input: &str) -> Result<String>;
}

pub struct YouTubeChannelDirectory {
    client: Client,
    api_key: String,
}

impl YouTubeChannelDirectory {
    pub fn new(client: Client, api_key: String) -> Self {
        YouTubeChannelDirectory { client, api_key }
    }

    async fn channels(&self, params: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .client
            .get(CHANNELS_URL)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(response)
    }
}

#[rocket::async_trait]
impl ChannelDirectory for YouTubeChannelDirectory {
    async fn channel_title(&self, channel_id: &str) -> Result<Option<String>> {
        let response = self
            .channels(&[("part", "snippet"), ("id", channel_id)])
            .await?;
        Ok(response["items"][0]["snippet"]["title"]
            .as_str()
            .map(String::from))
    }

    async fn resolve_channel_id(&self, input: &str) -> Result<String> {
        match parse_channel_reference(input) {
            Some(ChannelReference::Id(id)) => Ok(id),
            Some(ChannelReference::Handle(handle)) => {
                let response = self
                    .channels(&[("part", "id"), ("forHandle", handle.as_str())])
                    .await?;
                response["items"][0]["id"]
                    .as_str()
                    .map(String::from)
                    .ok_or_else(|| anyhow::anyhow!("No channel found for handle @{handle}"))
            }
            None => Err(anyhow::anyhow!("Invalid channel URL format")),
        }
    }
}

/// Re-reads every channel's title and applies the changed names to the
/// roster as it stands once the lookups finish.
pub async fn refresh_display_names(
    registry: &ChannelRegistry,
    directory: &dyn ChannelDirectory,
) -> Result<RefreshSummary> {
    let streamers = registry.list().await?;
    let total = streamers.len();

    let results: Vec<Result<Option<(String, String)>>> = stream::iter(streamers)
        .map(|channel| async move {
            match directory.channel_title(&channel.id).await {
                Ok(Some(title)) if title != channel.display_name => {
                    info!("Updated: {} -> {}", channel.display_name, title);
                    Ok(Some((channel.id, title)))
                }
                Ok(_) => Ok(None),
                Err(e) => {
                    error!("Failed to fetch name for {}: {e}", channel.id);
                    Err(e)
                }
            }
        })
        .buffered(4)
        .collect()
        .await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    let names: HashMap<String, String> = results.into_iter().flatten().flatten().collect();

    let updated = registry.update_names(&names).await?;
    Ok(RefreshSummary {
        updated,
        failed,
        total,
    })
}
