#[macro_use]
extern crate rocket;

pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::channel_lookup::ChannelDirectory;
use crate::services::feed_prober::FeedProber;
use crate::services::hashtag_search::HashtagSearch;
use crate::services::kv_store::KvStore;
use crate::services::registry::ChannelRegistry;
use crate::services::resolver::LiveStatusResolver;
use crate::services::snapshot_cache::SnapshotCache;
use crate::services::state_store::ChannelStateStore;
use crate::services::video_batcher::{VideoStatusBatcher, VideoStatusSource};
use rocket::{Build, Rocket};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;

pub struct AppState {
    pub config: AppConfig,
    pub registry: ChannelRegistry,
    pub directory: Arc<dyn ChannelDirectory>,
    pub poll_cache: Arc<SnapshotCache>,
    pub hashtags: HashtagSearch,
    pub scheduler: Mutex<Option<JobScheduler>>,
}

/// Everything that talks to YouTube.
pub struct Upstreams {
    pub prober: Arc<dyn FeedProber>,
    pub videos: Arc<dyn VideoStatusSource>,
    pub directory: Arc<dyn ChannelDirectory>,
    pub client: reqwest::Client,
}

pub fn build_app_state(
    config: AppConfig,
    store: Arc<dyn KvStore>,
    upstreams: Upstreams,
) -> AppState {
    let registry = ChannelRegistry::new(store.clone(), config.default_groups.clone());
    let resolver = LiveStatusResolver::new(
        registry.clone(),
        ChannelStateStore::new(store.clone()),
        upstreams.prober,
        VideoStatusBatcher::new(
            upstreams.videos,
            config.video_batch_size,
            config.video_batch_concurrency,
        ),
        config.resolver.clone(),
    );
    let poll_cache = Arc::new(SnapshotCache::new(
        Arc::new(resolver),
        config.fast_ttl,
        config.normal_ttl,
    ));
    let hashtags = HashtagSearch::new(
        upstreams.client,
        config.youtube_api_key.clone(),
        store,
        config.hashtag_query.clone(),
        config.hashtag_ttl,
    );

    AppState {
        config,
        registry,
        directory: upstreams.directory,
        poll_cache,
        hashtags,
        scheduler: Mutex::new(None),
    }
}

pub fn build_rocket(state: AppState, cors: Option<rocket_cors::Cors>) -> Rocket<Build> {
    let rocket = rocket::build().manage(state).mount(
        "/api",
        routes![
            api::live_status,
            api::hashtag_search,
            api::get_streamers,
            api::upsert_streamer,
            api::refresh_streamers,
            api::delete_streamer,
        ],
    );

    match cors {
        Some(cors) => rocket.attach(cors),
        None => rocket,
    }
}
