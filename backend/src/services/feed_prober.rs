use crate::utils::uploads_playlist_id;
use anyhow::Result;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;

lazy_static! {
    static ref FEED_VIDEO_ID_RE: Regex =
        Regex::new(r"<yt:videoId>\s*([a-zA-Z0-9_-]+)\s*</yt:videoId>").expect("valid regex");
}

const FEED_URL: &str = "https://www.youtube.com/feeds/videos.xml";
const PLAYLIST_ITEMS_URL: &str = "https://www.googleapis.com/youtube/v3/playlistItems";

/// Lists a channel's most recent uploads, newest first.
///
/// Never fails: any fetch or parse problem yields an empty list.
#[rocket::async_trait]
pub trait FeedProber: Send + Sync {
    async fn probe(&self, channel_id: &str, depth: usize) -> Vec<String>;
}

/// Extracts video ids from an Atom uploads feed, in document order.
pub fn feed_video_ids(xml: &str, depth: usize) -> Vec<String> {
    FEED_VIDEO_ID_RE
        .captures_iter(xml)
        .filter_map(|captures| captures.get(1).map(|m| m.as_str().to_string()))
        .take(depth)
        .collect()
}

/// Public uploads feed. Unauthenticated and unmetered, but lags behind new uploads.
pub struct RssFeedProber {
    client: Client,
}

impl RssFeedProber {
    pub fn new(client: Client) -> Self {
        RssFeedProber { client }
    }

    async fn fetch(&self, channel_id: &str, depth: usize) -> Result<Vec<String>> {
        let response = self
            .client
            .get(FEED_URL)
            .query(&[("channel_id", channel_id)])
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(feed_video_ids(&body, depth))
    }
}

#[rocket::async_trait]
impl FeedProber for RssFeedProber {
    async fn probe(&self, channel_id: &str, depth: usize) -> Vec<String> {
        self.fetch(channel_id, depth).await.unwrap_or_else(|e| {
            warn!("Feed probe failed for channel {channel_id}: {e}");
            Vec::new()
        })
    }
}

/// Uploads playlist through the Data API (one quota unit per call).
pub struct PlaylistFeedProber {
    client: Client,
    api_key: String,
}

impl PlaylistFeedProber {
    pub fn new(client: Client, api_key: String) -> Self {
        PlaylistFeedProber { client, api_key }
    }

    async fn fetch(&self, channel_id: &str, depth: usize) -> Result<Vec<String>> {
        // https://developers.google.com/youtube/v3/docs/playlistItems
        let playlist_id = uploads_playlist_id(channel_id);
        let max_results = depth.to_string();
        let response = self
            .client
            .get(PLAYLIST_ITEMS_URL)
            .query(&[
                ("part", "contentDetails"),
                ("playlistId", playlist_id.as_str()),
                ("maxResults", max_results.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        Ok(playlist_video_ids(&response, depth))
    }
}

pub fn playlist_video_ids(response: &Value, depth: usize) -> Vec<String> {
    response["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["contentDetails"]["videoId"].as_str())
                .map(String::from)
                .take(depth)
                .collect()
        })
        .unwrap_or_default()
}

#[rocket::async_trait]
impl FeedProber for PlaylistFeedProber {
    async fn probe(&self, channel_id: &str, depth: usize) -> Vec<String> {
        self.fetch(channel_id, depth).await.unwrap_or_else(|e| {
            warn!("Playlist probe failed for channel {channel_id}: {e}");
            Vec::new()
        })
    }
}
