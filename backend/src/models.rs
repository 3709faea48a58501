use chrono::{DateTime, Utc};
use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::Responder;
use rocket::serde::{Deserialize, Serialize};
use rocket::{response, Response};
use std::io::Cursor;

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminToken(pub String);

/// A tracked channel as stored in the roster record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(rename = "channelId", alias = "id")]
    pub id: String,
    #[serde(rename = "name", alias = "displayName")]
    pub display_name: String,
    #[serde(rename = "groups", alias = "groupTags", default)]
    pub group_tags: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterConfig {
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub streamers: Vec<ChannelConfig>,
}

/// Per-channel memory carried between polls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub offline_polls: u32,
    pub last_active_at: Option<DateTime<Utc>>,
    pub last_known_video_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoStatus {
    Live,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoObservation {
    pub video_id: String,
    pub status: VideoStatus,
    pub concurrent_viewers: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamerStatus {
    Live,
    Waiting,
    Scheduled,
    Offline,
}

impl StreamerStatus {
    /// Live and waiting channels may change state at any moment.
    pub fn is_volatile(self) -> bool {
        matches!(self, StreamerStatus::Live | StreamerStatus::Waiting)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamerSnapshot {
    pub id: String,
    pub display_name: String,
    pub groups: Vec<String>,
    pub status: StreamerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent_viewers: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertStreamerRequest {
    pub channel_id: String,
    pub name: Option<String>,
    pub groups: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub order: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteStreamerRequest {
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refreshed: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub updated: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub ok: bool,
    pub updated: usize,
    pub failed: usize,
    pub total: usize,
    pub message: String,
}

impl From<RefreshSummary> for RefreshResponse {
    fn from(summary: RefreshSummary) -> Self {
        RefreshResponse {
            ok: true,
            message: format!(
                "Refreshed {} streamers. Updated: {}, Failed: {}",
                summary.total, summary.updated, summary.failed
            ),
            updated: summary.updated,
            failed: summary.failed,
            total: summary.total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashtagResult {
    pub video_id: String,
    pub title: String,
    pub channel_name: String,
    pub channel_id: String,
    pub thumbnail_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_count: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: Status,
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        ErrorResponse {
            status,
            error: status.reason().unwrap_or("Error").to_string(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Status::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Status::InternalServerError, message)
    }
}

impl<'r> Responder<'r, 'static> for ErrorResponse {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let json = serde_json::to_string(&self).map_err(|_| Status::InternalServerError)?;
        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}
