use crate::models::AdminToken;
use crate::services::channel_lookup::{refresh_display_names, YouTubeChannelDirectory};
use crate::services::feed_prober::{FeedProber, PlaylistFeedProber, RssFeedProber};
use crate::services::kv_store::{ElasticsearchKvStore, KvStore, MemoryKvStore};
use crate::services::resolver::ResolverSettings;
use crate::services::video_batcher::{YouTubeVideosApi, MAX_IDS_PER_CALL};
use crate::{build_app_state, AppState, Upstreams};
use anyhow::Result;
use elasticsearch::{
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    Elasticsearch,
};
use env_logger::Builder;
use log::{error, info, LevelFilter};
use rocket::http::{Method, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::Request;
use rocket_cors::{AllowedHeaders, AllowedOrigins, CorsOptions};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvBackend {
    Elasticsearch,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Playlist,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub youtube_api_key: String,
    pub admin_token: String,
    pub cron_secret: Option<String>,
    pub kv_backend: KvBackend,
    pub elasticsearch_url: String,
    pub feed_kind: FeedKind,
    pub resolver: ResolverSettings,
    pub video_batch_size: usize,
    pub video_batch_concurrency: usize,
    pub http_timeout: Duration,
    pub fast_ttl: Duration,
    pub normal_ttl: Duration,
    pub default_groups: Vec<String>,
    pub hashtag_query: String,
    pub hashtag_ttl: chrono::Duration,
    pub roster_refresh_schedule: String,
    pub cors_origin: String,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| anyhow::anyhow!("{name} environment variable must be set"))
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let kv_backend = match env_string("KV_BACKEND", "elasticsearch").as_str() {
            "memory" => KvBackend::Memory,
            _ => KvBackend::Elasticsearch,
        };
        let feed_kind = match env_string("FEED_SOURCE", "rss").as_str() {
            "playlist" => FeedKind::Playlist,
            _ => FeedKind::Rss,
        };

        let defaults = ResolverSettings::default();
        let resolver = ResolverSettings {
            active_window: chrono::Duration::seconds(env_or("ACTIVE_WINDOW_SECS", 900)),
            rss_grace_window: chrono::Duration::seconds(env_or("RSS_GRACE_SECS", 120)),
            offline_confirm_polls: env_or("OFFLINE_CONFIRM_POLLS", defaults.offline_confirm_polls),
            probe_concurrency: env_or("PROBE_CONCURRENCY", defaults.probe_concurrency).max(1),
            ..defaults
        };

        Ok(AppConfig {
            youtube_api_key: required("YOUTUBE_API_KEY")?,
            admin_token: required("ADMIN_TOKEN")?,
            cron_secret: env::var("CRON_SECRET").ok().filter(|s| !s.is_empty()),
            kv_backend,
            elasticsearch_url: env_string("ELASTICSEARCH_URL", "http://localhost:9200"),
            feed_kind,
            resolver,
            video_batch_size: env_or("VIDEO_BATCH_SIZE", MAX_IDS_PER_CALL),
            video_batch_concurrency: env_or("VIDEO_BATCH_CONCURRENCY", 2),
            http_timeout: Duration::from_secs(env_or("HTTP_TIMEOUT_SECS", 10)),
            fast_ttl: Duration::from_secs(env_or("FAST_TTL_SECS", 60)),
            normal_ttl: Duration::from_secs(env_or("NORMAL_TTL_SECS", 300)),
            default_groups: env_string("DEFAULT_GROUPS", "")
                .split(',')
                .map(str::trim)
                .filter(|group| !group.is_empty())
                .map(String::from)
                .collect(),
            hashtag_query: env_string("HASHTAG_QUERY", "imeroleplay"),
            hashtag_ttl: chrono::Duration::seconds(env_or("HASHTAG_TTL_SECS", 7200)),
            roster_refresh_schedule: env_string("ROSTER_REFRESH_SCHEDULE", "0 0 */6 * * *"),
            cors_origin: env_string("CORS_ORIGIN", "http://localhost:8080"),
        })
    }
}

pub fn init_logger() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
    info!("Starting multiview backend...");
}

pub fn load_environment() {
    dotenv::dotenv().ok();
}

pub fn create_elasticsearch_client(es_url: &str, timeout: Duration) -> Result<Elasticsearch> {
    info!("Connecting to Elasticsearch at: {es_url}");

    let transport = TransportBuilder::new(SingleNodeConnectionPool::new(es_url.parse()?))
        .timeout(timeout)
        .build()?;

    Ok(Elasticsearch::new(transport))
}

pub fn create_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

pub async fn create_kv_store(config: &AppConfig) -> Result<Arc<dyn KvStore>> {
    match config.kv_backend {
        KvBackend::Memory => {
            info!("Using in-memory key-value store; state is lost on restart.");
            Ok(Arc::new(MemoryKvStore::new()))
        }
        KvBackend::Elasticsearch => {
            let store = ElasticsearchKvStore::new(create_elasticsearch_client(
                &config.elasticsearch_url,
                config.http_timeout,
            )?);
            store.ensure_index().await;
            Ok(Arc::new(store))
        }
    }
}

pub async fn setup_roster_scheduler(state: &AppState, schedule: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let registry = state.registry.clone();
    let directory = state.directory.clone();
    let poll_cache = state.poll_cache.clone();

    let refresh_job = Job::new_async(schedule, move |_uuid, _l| {
        let registry = registry.clone();
        let directory = directory.clone();
        let poll_cache = poll_cache.clone();
        Box::pin(async move {
            match refresh_display_names(&registry, directory.as_ref()).await {
                Ok(summary) => {
                    info!(
                        "Scheduled name refresh: {} updated, {} failed of {}",
                        summary.updated, summary.failed, summary.total
                    );
                    if summary.updated > 0 {
                        poll_cache.invalidate().await;
                    }
                }
                Err(e) => error!("Scheduled name refresh failed: {e:?}"),
            }
        })
    })?;

    scheduler.add(refresh_job).await?;
    scheduler.start().await?;
    info!("Roster refresh scheduler started ({schedule}).");

    Ok(scheduler)
}

pub async fn create_app_state() -> Result<AppState> {
    let config = AppConfig::from_env()?;
    let client = create_http_client(config.http_timeout)?;
    let store = create_kv_store(&config).await?;

    let prober: Arc<dyn FeedProber> = match config.feed_kind {
        FeedKind::Rss => Arc::new(RssFeedProber::new(client.clone())),
        FeedKind::Playlist => Arc::new(PlaylistFeedProber::new(
            client.clone(),
            config.youtube_api_key.clone(),
        )),
    };
    let upstreams = Upstreams {
        prober,
        videos: Arc::new(YouTubeVideosApi::new(
            client.clone(),
            config.youtube_api_key.clone(),
        )),
        directory: Arc::new(YouTubeChannelDirectory::new(
            client.clone(),
            config.youtube_api_key.clone(),
        )),
        client,
    };

    let schedule = config.roster_refresh_schedule.clone();
    let state = build_app_state(config, store, upstreams);
    let scheduler = setup_roster_scheduler(&state, &schedule).await?;
    *state.scheduler.lock().await = Some(scheduler);

    Ok(state)
}

pub fn create_cors(origin: &str) -> Result<rocket_cors::Cors> {
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::some_exact(&[origin]))
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Options,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allowed_headers(AllowedHeaders::some(&[
            "Authorization",
            "Accept",
            "Content-Type",
        ]))
        .allow_credentials(true)
        .to_cors()
        .map_err(|e| anyhow::anyhow!("Failed to create CORS options: {}", e))?;

    Ok(cors)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminToken {
    type Error = &'static str;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(state) = request.rocket().state::<AppState>() else {
            return Outcome::Error((Status::InternalServerError, "Missing app state"));
        };

        let token = request
            .headers()
            .get_one("Authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "));

        match token {
            Some(t) => {
                if t == state.config.admin_token {
                    Outcome::Success(AdminToken(t.to_string()))
                } else {
                    Outcome::Error((Status::Unauthorized, "Invalid token"))
                }
            }
            None => Outcome::Error((Status::Unauthorized, "Missing token")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_on_garbage() {
        env::set_var("MULTIVIEW_TEST_NUMBER", "not-a-number");
        assert_eq!(env_or("MULTIVIEW_TEST_NUMBER", 7u32), 7);
        env::set_var("MULTIVIEW_TEST_NUMBER", " 12 ");
        assert_eq!(env_or("MULTIVIEW_TEST_NUMBER", 7u32), 12);
        assert_eq!(env_or("MULTIVIEW_TEST_UNSET_NUMBER", 3usize), 3);
    }

    #[test]
    fn elasticsearch_client_takes_a_timeout() {
        let timeout = Duration::from_secs(2);
        assert!(create_elasticsearch_client("http://localhost:9200", timeout).is_ok());
        assert!(create_elasticsearch_client("not a url", timeout).is_err());
    }

    #[test]
    fn cors_accepts_configured_origin() {
        assert!(create_cors("http://localhost:8080").is_ok());
    }
}
