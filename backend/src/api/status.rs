use crate::models::{HashtagResult, StreamerSnapshot};
use crate::AppState;
use rocket::serde::json::Json;
use rocket::{get, State};

#[get("/live-status")]
pub async fn live_status(state: &State<AppState>) -> Json<Vec<StreamerSnapshot>> {
    let snapshot = state.poll_cache.get_snapshot().await;
    Json(snapshot.as_ref().clone())
}

#[get("/hashtag-search")]
pub async fn hashtag_search(state: &State<AppState>) -> Json<Vec<HashtagResult>> {
    Json(state.hashtags.live_results().await)
}
