use crate::models::HashtagResult;
use crate::services::kv_store::{get_json, set_json, KvStore};
use anyhow::Result;
use chrono::Duration;
use log::{error, warn};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";

/// Live videos tagged with one hashtag, cached in the KV store.
pub struct HashtagSearch {
    client: Client,
    api_key: String,
    store: Arc<dyn KvStore>,
    hashtag: String,
    ttl: Duration,
}

impl HashtagSearch {
    pub fn new(
        client: Client,
        api_key: String,
        store: Arc<dyn KvStore>,
        hashtag: String,
        ttl: Duration,
    ) -> Self {
        HashtagSearch {
            client,
            api_key,
            store,
            hashtag,
            ttl,
        }
    }

    pub fn cache_key(&self) -> String {
        format!("hashtag:search:{}", self.hashtag)
    }

    /// Cached results when present, otherwise a fresh search. Never fails.
    pub async fn live_results(&self) -> Vec<HashtagResult> {
        let key = self.cache_key();
        match get_json::<Vec<HashtagResult>>(self.store.as_ref(), &key).await {
            Ok(Some(cached)) => return cached,
            Ok(None) => {}
            Err(e) => warn!("Failed to read hashtag cache: {e:?}"),
        }

        let results = match self.search().await {
            Ok(results) => results,
            Err(e) => {
                error!("Hashtag search for #{} failed: {e}", self.hashtag);
                return Vec::new();
            }
        };

        if !results.is_empty() {
            if let Err(e) = set_json(self.store.as_ref(), &key, &results, Some(self.ttl)).await {
                warn!("Failed to cache hashtag results: {e:?}");
            }
        }
        results
    }

    async fn search(&self) -> Result<Vec<HashtagResult>> {
        let query = format!("#{}", self.hashtag);
        let response = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("part", "snippet"),
                ("q", query.as_str()),
                ("type", "video"),
                ("eventType", "live"),
                ("maxResults", "50"),
                ("order", "relevance"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(parse_search_response(&response))
    }
}

pub fn parse_search_response(response: &Value) -> Vec<HashtagResult> {
    let Some(items) = response["items"].as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let snippet = &item["snippet"];
            let text = |value: &Value| value.as_str().unwrap_or("").to_string();
            Some(HashtagResult {
                video_id: item["id"]["videoId"].as_str()?.to_string(),
                title: text(&snippet["title"]),
                channel_name: text(&snippet["channelTitle"]),
                channel_id: text(&snippet["channelId"]),
                thumbnail_url: snippet["thumbnails"]["medium"]["url"]
                    .as_str()
                    .or_else(|| snippet["thumbnails"]["default"]["url"].as_str())
                    .unwrap_or("")
                    .to_string(),
                viewer_count: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv_store::MemoryKvStore;
    use serde_json::json;

    #[test]
    fn parses_search_items() {
        let response = json!({
            "items": [
                {
                    "id": { "videoId": "V1" },
                    "snippet": {
                        "title": "RP night",
                        "channelTitle": "yb",
                        "channelId": "UC1",
                        "thumbnails": { "default": { "url": "https://i.ytimg.com/d.jpg" } }
                    }
                },
                { "id": { "channelId": "UC2" }, "snippet": {} }
            ]
        });
        let results = parse_search_response(&response);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].video_id, "V1");
        assert_eq!(results[0].thumbnail_url, "https://i.ytimg.com/d.jpg");
    }

    #[tokio::test]
    async fn serves_cached_results_without_searching() {
        let store = Arc::new(MemoryKvStore::new());
        let search = HashtagSearch::new(
            Client::new(),
            "unused".to_string(),
            store.clone(),
            "imeroleplay".to_string(),
            Duration::hours(2),
        );
        let cached = vec![HashtagResult {
            video_id: "V1".into(),
            title: "t".into(),
            channel_name: "c".into(),
            channel_id: "UC1".into(),
            thumbnail_url: String::new(),
            viewer_count: None,
        }];
        set_json(store.as_ref(), &search.cache_key(), &cached, None)
            .await
            .unwrap();

        assert_eq!(search.live_results().await, cached);
    }
}
