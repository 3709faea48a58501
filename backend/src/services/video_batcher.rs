use crate::models::{VideoObservation, VideoStatus};
use crate::utils::parse_rfc3339;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use reqwest::Client;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Upper bound on ids per `videos.list` call.
pub const MAX_IDS_PER_CALL: usize = 50;

const VIDEOS_URL: &str = "https://www.googleapis.com/youtube/v3/videos";

/// Timing facts of one video's `liveStreamingDetails`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveStreamingFacts {
    pub video_id: String,
    pub actual_start_time: Option<String>,
    pub actual_end_time: Option<String>,
    pub scheduled_start_time: Option<String>,
    pub concurrent_viewers: Option<u64>,
}

/// The metered status endpoint. One call per batch of at most [`MAX_IDS_PER_CALL`] ids.
#[rocket::async_trait]
pub trait VideoStatusSource: Send + Sync {
    async fn fetch_batch(&self, video_ids: &[String]) -> Result<Vec<LiveStreamingFacts>>;
}

pub struct YouTubeVideosApi {
    client: Client,
    api_key: String,
}

impl YouTubeVideosApi {
    pub fn new(client: Client, api_key: String) -> Self {
        YouTubeVideosApi { client, api_key }
    }
}

#[rocket::async_trait]
impl VideoStatusSource for YouTubeVideosApi {
    async fn fetch_batch(&self, video_ids: &[String]) -> Result<Vec<LiveStreamingFacts>> {
        // Documentation: https://developers.google.com/youtube/v3/docs/videos
        let ids = video_ids.join(",");
        let response = self
            .client
            .get(VIDEOS_URL)
            .query(&[
                ("part", "liveStreamingDetails"),
                ("id", ids.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("YT API {status}: {text}"));
        }

        let body: Value = response.json().await?;
        Ok(parse_videos_response(&body))
    }
}

pub fn parse_videos_response(body: &Value) -> Vec<LiveStreamingFacts> {
    let Some(items) = body["items"].as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let video_id = item["id"].as_str()?.to_string();
            let details = &item["liveStreamingDetails"];
            let text = |field: &str| details[field].as_str().map(String::from);
            Some(LiveStreamingFacts {
                video_id,
                actual_start_time: text("actualStartTime"),
                actual_end_time: text("actualEndTime"),
                scheduled_start_time: text("scheduledStartTime"),
                // The API sends counts as decimal strings.
                concurrent_viewers: details["concurrentViewers"]
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .or_else(|| details["concurrentViewers"].as_u64()),
            })
        })
        .collect()
}

/// Live when started and not ended, scheduled when only a future start is known.
/// Anything else is not relevant and yields no observation.
pub fn classify_facts(facts: &LiveStreamingFacts, now: DateTime<Utc>) -> Option<VideoObservation> {
    let started = facts.actual_start_time.as_deref().is_some_and(|s| !s.is_empty());
    let ended = facts.actual_end_time.as_deref().is_some_and(|s| !s.is_empty());

    if started && !ended {
        return Some(VideoObservation {
            video_id: facts.video_id.clone(),
            status: VideoStatus::Live,
            concurrent_viewers: Some(facts.concurrent_viewers.unwrap_or(0)),
        });
    }

    if !started {
        let scheduled = facts.scheduled_start_time.as_deref().and_then(parse_rfc3339)?;
        if scheduled > now {
            return Some(VideoObservation {
                video_id: facts.video_id.clone(),
                status: VideoStatus::Scheduled,
                concurrent_viewers: None,
            });
        }
    }

    None
}

/// Splits id sets into bounded batches and classifies them. A failed batch only
/// loses its own ids.
#[derive(Clone)]
pub struct VideoStatusBatcher {
    source: Arc<dyn VideoStatusSource>,
    batch_size: usize,
    concurrency: usize,
}

impl VideoStatusBatcher {
    pub fn new(source: Arc<dyn VideoStatusSource>, batch_size: usize, concurrency: usize) -> Self {
        VideoStatusBatcher {
            source,
            batch_size: batch_size.clamp(1, MAX_IDS_PER_CALL),
            concurrency: concurrency.max(1),
        }
    }

    pub async fn classify<I>(
        &self,
        video_ids: I,
        now: DateTime<Utc>,
    ) -> HashMap<String, VideoObservation>
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = HashSet::new();
        let unique: Vec<String> = video_ids
            .into_iter()
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();

        if unique.is_empty() {
            return HashMap::new();
        }

        let chunks: Vec<Vec<String>> = unique
            .chunks(self.batch_size)
            .map(<[String]>::to_vec)
            .collect();

        let batches: Vec<Vec<LiveStreamingFacts>> = stream::iter(chunks)
            .map(|batch| async move {
                match self.source.fetch_batch(&batch).await {
                    Ok(facts) => facts,
                    Err(e) => {
                        warn!("Video status batch of {} ids failed: {e}", batch.len());
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let requested: HashSet<&String> = unique.iter().collect();
        let observations: HashMap<String, VideoObservation> = batches
            .iter()
            .flatten()
            .filter(|facts| requested.contains(&facts.video_id))
            .filter_map(|facts| classify_facts(facts, now))
            .map(|observation| (observation.video_id.clone(), observation))
            .collect();

        debug!(
            "Classified {} videos: {} live or scheduled",
            unique.len(),
            observations.len()
        );
        observations
    }
}
