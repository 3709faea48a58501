use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use elasticsearch::{indices::IndicesCreateParts, Elasticsearch, GetParts, IndexParts};
use log::{error, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

pub const KV_INDEX: &str = "multiview_kv";

/// Durable key-value storage shared by the roster, channel state and hashtag cache.
///
/// Writes are last-writer-wins; readers never block each other.
#[rocket::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;
}

pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    store.set(key, serde_json::to_value(value)?, ttl).await
}

fn expiry(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.map(|ttl| Utc::now() + ttl)
}

#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, (Value, Option<DateTime<Utc>>)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).and_then(|(value, expires_at)| match expires_at {
            Some(at) if *at <= Utc::now() => None,
            _ => Some(value.clone()),
        }))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value, expiry(ttl)));
        Ok(())
    }
}

pub struct ElasticsearchKvStore {
    client: Elasticsearch,
}

impl ElasticsearchKvStore {
    pub fn new(client: Elasticsearch) -> Self {
        ElasticsearchKvStore { client }
    }

    pub async fn ensure_index(&self) {
        let create_index_body = json!({
            "mappings": {
                "properties": {
                    "value": { "type": "object", "enabled": false },
                    "expires_at": { "type": "date" }
                }
            }
        });

        match self
            .client
            .indices()
            .create(IndicesCreateParts::Index(KV_INDEX))
            .body(create_index_body)
            .send()
            .await
        {
            Ok(response) => {
                if response.status_code().is_success() {
                    info!("Elasticsearch index '{KV_INDEX}' created.");
                } else {
                    let response_text = response.text().await.unwrap_or_default();
                    if response_text.contains("resource_already_exists_exception") {
                        info!("Elasticsearch index '{KV_INDEX}' already exists.");
                    } else {
                        error!("Failed to create Elasticsearch index: {response_text}");
                    }
                }
            }
            Err(e) => {
                error!("Failed to connect to Elasticsearch to create index: {e:?}");
            }
        }
    }
}

#[rocket::async_trait]
impl KvStore for ElasticsearchKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(GetParts::IndexId(KV_INDEX, key))
            .send()
            .await?;

        if response.status_code().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status_code().is_success() {
            return Err(anyhow::anyhow!(
                "Elasticsearch get '{key}' failed with status: {}",
                response.status_code()
            ));
        }

        let json_response: Value = response.json().await?;
        let source = &json_response["_source"];
        let expired = source["expires_at"]
            .as_str()
            .and_then(crate::utils::parse_rfc3339)
            .is_some_and(|at| at <= Utc::now());

        if expired || source["value"].is_null() {
            return Ok(None);
        }
        Ok(Some(source["value"].clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = expiry(ttl).map(|at| at.to_rfc3339());
        let response = self
            .client
            .index(IndexParts::IndexId(KV_INDEX, key))
            .body(json!({ "value": value, "expires_at": expires_at }))
            .send()
            .await?;

        if !response.status_code().is_success() {
            return Err(anyhow::anyhow!(
                "Elasticsearch index '{key}' failed: {:?}",
                response.text().await
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_json() {
        let store = MemoryKvStore::new();
        set_json(&store, "k", &vec!["a", "b"], None).await.unwrap();
        let value: Option<Vec<String>> = get_json(&store, "k").await.unwrap();
        assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_hides_expired_entries() {
        let store = MemoryKvStore::new();
        store
            .set("gone", json!(1), Some(Duration::seconds(-1)))
            .await
            .unwrap();
        store
            .set("kept", json!(2), Some(Duration::hours(1)))
            .await
            .unwrap();
        assert!(store.get("gone").await.unwrap().is_none());
        assert_eq!(store.get("kept").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn later_write_wins() {
        let store = MemoryKvStore::new();
        store.set("k", json!("first"), None).await.unwrap();
        store.set("k", json!("second"), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!("second")));
    }
}
