use crate::models::{
    AdminToken, ChannelConfig, DeleteStreamerRequest, ErrorResponse, OkResponse, RefreshResponse,
    RosterConfig, UpsertStreamerRequest,
};
use crate::services::channel_lookup::refresh_display_names;
use crate::AppState;
use log::{error, info, warn};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, Responder, State};

#[derive(Responder)]
pub enum StreamersResponse {
    Roster(Json<RosterConfig>),
    Refreshed(Json<OkResponse>),
}

#[get("/streamers?<refresh>&<secret>")]
pub async fn get_streamers(
    token: Option<AdminToken>,
    refresh: Option<bool>,
    secret: Option<&str>,
    state: &State<AppState>,
) -> Result<StreamersResponse, Status> {
    if refresh == Some(true) {
        let authorized = match (&state.config.cron_secret, secret) {
            (Some(expected), Some(given)) => expected == given,
            _ => false,
        };
        if !authorized {
            return Err(Status::Unauthorized);
        }

        return match refresh_display_names(&state.registry, state.directory.as_ref()).await {
            Ok(summary) => {
                info!(
                    "Cron name refresh: {} updated, {} failed of {}",
                    summary.updated, summary.failed, summary.total
                );
                state.poll_cache.invalidate().await;
                Ok(StreamersResponse::Refreshed(Json(OkResponse {
                    ok: true,
                    refreshed: Some(true),
                })))
            }
            Err(e) => {
                error!("Cron name refresh failed: {e:?}");
                Err(Status::InternalServerError)
            }
        };
    }

    if token.is_none() {
        return Err(Status::Unauthorized);
    }

    match state.registry.load().await {
        Ok(roster) => Ok(StreamersResponse::Roster(Json(roster))),
        Err(e) => {
            error!("Failed to load roster: {e:?}");
            Err(Status::InternalServerError)
        }
    }
}

#[post("/streamers", data = "<request>")]
pub async fn upsert_streamer(
    _token: AdminToken,
    state: &State<AppState>,
    request: Json<UpsertStreamerRequest>,
) -> Result<Json<OkResponse>, ErrorResponse> {
    let request = request.into_inner();

    let channel_id = state
        .directory
        .resolve_channel_id(&request.channel_id)
        .await
        .map_err(|e| {
            warn!("Rejected channel input '{}': {e}", request.channel_id);
            ErrorResponse::bad_request(format!("Invalid channel: {e}"))
        })?;

    let display_name = match request.name.filter(|name| !name.trim().is_empty()) {
        Some(name) => name,
        None => match state.directory.channel_title(&channel_id).await {
            Ok(Some(title)) => title,
            Ok(None) => channel_id.clone(),
            Err(e) => {
                warn!("Failed to look up channel title for {channel_id}: {e}");
                channel_id.clone()
            }
        },
    };

    let config = ChannelConfig {
        id: channel_id,
        display_name,
        group_tags: request.groups.unwrap_or_default(),
        enabled: request.enabled.unwrap_or(true),
        order: request.order,
    };

    state.registry.upsert(config).await.map_err(|e| {
        error!("Failed to save streamer: {e:?}");
        ErrorResponse::internal("Failed to save streamer")
    })?;
    state.poll_cache.invalidate().await;

    Ok(Json(OkResponse {
        ok: true,
        refreshed: None,
    }))
}

#[put("/streamers")]
pub async fn refresh_streamers(
    _token: AdminToken,
    state: &State<AppState>,
) -> Result<Json<RefreshResponse>, ErrorResponse> {
    match state.registry.stored().await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(ErrorResponse::not_found("Config not found")),
        Err(e) => {
            error!("Failed to load roster: {e:?}");
            return Err(ErrorResponse::internal("Failed to load roster"));
        }
    }

    let summary = refresh_display_names(&state.registry, state.directory.as_ref())
        .await
        .map_err(|e| {
            error!("Name refresh failed: {e:?}");
            ErrorResponse::internal("Failed to refresh streamers")
        })?;
    state.poll_cache.invalidate().await;

    Ok(Json(RefreshResponse::from(summary)))
}

#[delete("/streamers", data = "<request>")]
pub async fn delete_streamer(
    _token: AdminToken,
    state: &State<AppState>,
    request: Json<DeleteStreamerRequest>,
) -> Result<Json<OkResponse>, ErrorResponse> {
    let channel_id = match request.into_inner().channel_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => return Err(ErrorResponse::bad_request("channelId required")),
    };

    match state.registry.remove(&channel_id).await {
        Ok(true) => {
            state.poll_cache.invalidate().await;
            Ok(Json(OkResponse {
                ok: true,
                refreshed: None,
            }))
        }
        Ok(false) => Err(ErrorResponse::not_found("Streamer not found")),
        Err(e) => {
            error!("Failed to remove streamer {channel_id}: {e:?}");
            Err(ErrorResponse::internal("Failed to remove streamer"))
        }
    }
}
