//! Download handlers: registration, progress and content streaming.

use crate::api::AppState;
use crate::api::auth::Identity;
use crate::api::error_response::expired_link_response;
use crate::downloader::{DownloadRequest, DownloadTicket};
use crate::error::{ApiError, Error};
use crate::progress::ProgressSubscription;
use crate::types::DescriptorId;
use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

/// Media type selecting newline-delimited JSON progress
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Request body for POST /downloads
///
/// Exactly one of `sourceUrl` and `movieId` is expected; `sourceUrl` wins
/// when both are given.
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateDownloadRequest {
    /// Remote page URL
    #[serde(default)]
    pub source_url: Option<String>,
    /// Catalog entry to resolve into a page URL
    #[serde(default)]
    pub movie_id: Option<String>,
    /// Format id, as listed by GET /formats
    pub format_id: String,
}

/// POST /downloads - Register a download
#[utoipa::path(
    post,
    path = "/downloads",
    tag = "downloads",
    request_body = CreateDownloadRequest,
    responses(
        (status = 201, description = "Download registered", body = DownloadTicket),
        (status = 400, description = "Invalid request or unresolvable movie id", body = ApiError),
        (status = 401, description = "Missing or invalid credentials", body = ApiError),
        (status = 404, description = "Source unavailable or format not found", body = ApiError),
        (status = 503, description = "Service is shutting down", body = ApiError)
    )
)]
pub async fn create_download(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateDownloadRequest>,
) -> Response {
    let source_url = match resolve_source(&state, &body).await {
        Ok(url) => url,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(ApiError::validation(message))).into_response();
        }
    };

    let request = DownloadRequest {
        source_url,
        format_id: body.format_id,
    };
    match state.downloader.create_download(&request).await {
        Ok(ticket) => {
            tracing::debug!(
                download_id = %ticket.download_id,
                subject = %identity.subject,
                "Download created over API"
            );
            (StatusCode::CREATED, Json(ticket)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn resolve_source(state: &AppState, body: &CreateDownloadRequest) -> Result<String, String> {
    if let Some(url) = body.source_url.as_deref().map(str::trim)
        && !url.is_empty()
    {
        return Ok(url.to_string());
    }

    let Some(movie_id) = body.movie_id.as_deref().map(str::trim).filter(|m| !m.is_empty()) else {
        return Err("Either sourceUrl or movieId is required".to_string());
    };
    let Some(catalog) = &state.catalog else {
        return Err("movieId is not supported: no catalog is configured".to_string());
    };
    catalog
        .resolve(movie_id)
        .await
        .ok_or_else(|| format!("Unknown movie id: {movie_id}"))
}

/// GET /downloads/:id/progress - Live progress of a download
///
/// Server-sent events by default, one `event:` per stage with the JSON
/// event as data. Clients sending `Accept: application/x-ndjson` receive one
/// JSON object per line instead. Both start with the handshake frame.
#[utoipa::path(
    get,
    path = "/downloads/{id}/progress",
    tag = "downloads",
    params(
        ("id" = String, Path, description = "Download id")
    ),
    responses(
        (status = 200, description = "Progress events (text/event-stream or application/x-ndjson)", body = crate::types::ProgressEvent),
        (status = 401, description = "Missing or invalid credentials", body = ApiError),
        (status = 404, description = "Download expired or not found", body = ApiError)
    )
)]
pub async fn download_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Ok(id) = id.parse::<DescriptorId>() else {
        return Error::DescriptorExpired { id }.into_response();
    };
    if let Err(e) = state.downloader.get_download(&id).await {
        return e.into_response();
    }

    let subscription = state.downloader.open_progress(&id);
    if wants_ndjson(&headers) {
        ndjson_response(subscription)
    } else {
        sse_response(subscription)
    }
}

fn wants_ndjson(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(NDJSON_CONTENT_TYPE))
}

fn sse_response(subscription: ProgressSubscription) -> Response {
    let events = subscription.filter_map(|event| {
        let frame = match serde_json::to_string(&event) {
            Ok(json) => Some(Ok::<_, Infallible>(
                SseEvent::default().event(event.stage.as_str()).data(json),
            )),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize progress event");
                None
            }
        };
        futures::future::ready(frame)
    });
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn ndjson_response(subscription: ProgressSubscription) -> Response {
    let lines = subscription.filter_map(|event| {
        let line = match serde_json::to_vec(&event) {
            Ok(mut json) => {
                json.push(b'\n');
                Some(Ok::<_, Infallible>(Bytes::from(json)))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize progress event");
                None
            }
        };
        futures::future::ready(line)
    });

    let mut response = Body::from_stream(lines).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(NDJSON_CONTENT_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// GET /downloads/:id/stream - Download the muxed media
///
/// Browsers cannot attach headers to plain links, so this endpoint is usually
/// authenticated through the `token` query parameter.
#[utoipa::path(
    get,
    path = "/downloads/{id}/stream",
    tag = "downloads",
    params(
        ("id" = String, Path, description = "Download id"),
        ("token" = Option<String>, Query, description = "Credentials when headers cannot be set")
    ),
    responses(
        (status = 200, description = "Media content as an attachment", content_type = "application/octet-stream"),
        (status = 401, description = "Missing or invalid credentials", body = ApiError),
        (status = 404, description = "Download link expired or not found"),
        (status = 502, description = "Extractor or muxer failed before the first byte", body = ApiError),
        (status = 503, description = "Service is shutting down", body = ApiError)
    )
)]
pub async fn download_stream(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<DescriptorId>() else {
        return expired_link_response();
    };

    let plan = match state.downloader.open_stream(&id).await {
        Ok(plan) => plan,
        Err(Error::DescriptorExpired { .. }) => return expired_link_response(),
        Err(e) => return e.into_response(),
    };

    match state.downloader.responder().build(plan) {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}
