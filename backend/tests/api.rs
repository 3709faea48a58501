use anyhow::Result;
use multiview_backend::config::{AppConfig, FeedKind, KvBackend};
use multiview_backend::models::{RefreshResponse, RosterConfig, StreamerSnapshot, StreamerStatus};
use multiview_backend::services::channel_lookup::ChannelDirectory;
use multiview_backend::services::feed_prober::FeedProber;
use multiview_backend::services::kv_store::MemoryKvStore;
use multiview_backend::services::resolver::ResolverSettings;
use multiview_backend::services::video_batcher::{LiveStreamingFacts, VideoStatusSource};
use multiview_backend::{build_app_state, build_rocket, AppState, Upstreams};
use rocket::http::{Header, Status};
use rocket::local::asynchronous::Client;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ADMIN: &str = "admin-secret";
const CRON: &str = "cron-secret";

/// Every channel's newest upload is `V-<channel id>`.
#[derive(Default)]
struct SlowFeed {
    probes: AtomicUsize,
}

#[rocket::async_trait]
impl FeedProber for SlowFeed {
    async fn probe(&self, channel_id: &str, _depth: usize) -> Vec<String> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        vec![format!("V-{channel_id}")]
    }
}

/// Every requested video is live with 120 viewers.
struct AllLive;

#[rocket::async_trait]
impl VideoStatusSource for AllLive {
    async fn fetch_batch(&self, video_ids: &[String]) -> Result<Vec<LiveStreamingFacts>> {
        Ok(video_ids
            .iter()
            .map(|id| LiveStreamingFacts {
                video_id: id.clone(),
                actual_start_time: Some("2024-05-01T11:00:00Z".to_string()),
                concurrent_viewers: Some(120),
                ..Default::default()
            })
            .collect())
    }
}

struct NamedDirectory;

#[rocket::async_trait]
impl ChannelDirectory for NamedDirectory {
    async fn channel_title(&self, channel_id: &str) -> Result<Option<String>> {
        Ok(Some(format!("Title of {channel_id}")))
    }

    async fn resolve_channel_id(&self, input: &str) -> Result<String> {
        Ok(input.trim_start_matches("https://www.youtube.com/channel/").to_string())
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        youtube_api_key: "unused".to_string(),
        admin_token: ADMIN.to_string(),
        cron_secret: Some(CRON.to_string()),
        kv_backend: KvBackend::Memory,
        elasticsearch_url: String::new(),
        feed_kind: FeedKind::Rss,
        resolver: ResolverSettings::default(),
        video_batch_size: 50,
        video_batch_concurrency: 1,
        http_timeout: Duration::from_secs(1),
        fast_ttl: Duration::from_secs(60),
        normal_ttl: Duration::from_secs(300),
        default_groups: vec!["A4A".to_string()],
        hashtag_query: "imeroleplay".to_string(),
        hashtag_ttl: chrono::Duration::hours(2),
        roster_refresh_schedule: "0 0 */6 * * *".to_string(),
        cors_origin: "http://localhost:8080".to_string(),
    }
}

fn test_state(feed: Arc<SlowFeed>) -> AppState {
    build_app_state(
        test_config(),
        Arc::new(MemoryKvStore::new()),
        Upstreams {
            prober: feed,
            videos: Arc::new(AllLive),
            directory: Arc::new(NamedDirectory),
            client: reqwest::Client::new(),
        },
    )
}

async fn client() -> Client {
    let state = test_state(Arc::new(SlowFeed::default()));
    Client::tracked(build_rocket(state, None))
        .await
        .expect("valid rocket instance")
}

fn admin() -> Header<'static> {
    Header::new("Authorization", format!("Bearer {ADMIN}"))
}

async fn live_status(client: &Client) -> Vec<StreamerSnapshot> {
    let response = client.get("/api/live-status").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    response.into_json().await.expect("snapshot json")
}

#[rocket::async_test]
async fn roster_changes_show_up_in_live_status() {
    let client = client().await;
    assert!(live_status(&client).await.is_empty());

    let response = client
        .post("/api/streamers")
        .header(admin())
        .json(&json!({ "channelId": "https://www.youtube.com/channel/UC1", "groups": ["A4A"] }))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let snapshot = live_status(&client).await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, "UC1");
    assert_eq!(snapshot[0].display_name, "Title of UC1");
    assert_eq!(snapshot[0].groups, vec!["A4A"]);
    assert_eq!(snapshot[0].status, StreamerStatus::Live);
    assert_eq!(snapshot[0].live_video_id.as_deref(), Some("V-UC1"));
    assert_eq!(snapshot[0].concurrent_viewers, Some(120));

    let response = client
        .delete("/api/streamers")
        .header(admin())
        .json(&json!({ "channelId": "UC1" }))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    assert!(live_status(&client).await.is_empty());
}

#[rocket::async_test]
async fn admin_routes_require_the_bearer_token() {
    let client = client().await;

    let response = client.get("/api/streamers").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = client
        .get("/api/streamers")
        .header(Header::new("Authorization", "Bearer wrong"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = client
        .post("/api/streamers")
        .json(&json!({ "channelId": "UC1" }))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = client.get("/api/streamers").header(admin()).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let roster: RosterConfig = response.into_json().await.expect("roster json");
    assert_eq!(roster.groups, vec!["A4A"]);
    assert!(roster.streamers.is_empty());
}

#[rocket::async_test]
async fn delete_validates_its_body() {
    let client = client().await;

    let response = client
        .delete("/api/streamers")
        .header(admin())
        .json(&json!({}))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);

    let response = client
        .delete("/api/streamers")
        .header(admin())
        .json(&json!({ "channelId": "UCmissing" }))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);
}

#[rocket::async_test]
async fn name_refresh_paths() {
    let client = client().await;

    let response = client.put("/api/streamers").header(admin()).dispatch().await;
    assert_eq!(response.status(), Status::NotFound);

    client
        .post("/api/streamers")
        .header(admin())
        .json(&json!({ "channelId": "UC1", "name": "old name" }))
        .dispatch()
        .await;

    let response = client.put("/api/streamers").header(admin()).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let summary: RefreshResponse = response.into_json().await.expect("summary json");
    assert_eq!((summary.updated, summary.failed, summary.total), (1, 0, 1));

    let response = client
        .get("/api/streamers?refresh=true&secret=nope")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = client
        .get(format!("/api/streamers?refresh=true&secret={CRON}"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: serde_json::Value = response.into_json().await.expect("ok json");
    assert_eq!(body, json!({ "ok": true, "refreshed": true }));
}

#[tokio::test]
async fn near_simultaneous_callers_trigger_one_resolution() {
    let feed = Arc::new(SlowFeed::default());
    let state = test_state(feed.clone());
    state
        .registry
        .upsert(multiview_backend::models::ChannelConfig {
            id: "UC1".to_string(),
            display_name: "one".to_string(),
            group_tags: Vec::new(),
            enabled: true,
            order: None,
        })
        .await
        .unwrap();

    let first = state.poll_cache.get_snapshot();
    let second = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        state.poll_cache.get_snapshot().await
    };
    let (a, b) = tokio::join!(first, second);

    assert_eq!(a, b);
    assert_eq!(feed.probes.load(Ordering::SeqCst), 1);
}
