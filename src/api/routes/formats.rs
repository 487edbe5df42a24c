//! Format listing handler.

use crate::api::AppState;
use crate::error::Error;
use crate::formats::FormatListing;
use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

/// Query parameters for GET /formats
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct FormatsQuery {
    /// Remote page URL
    pub source_url: String,
}

/// GET /formats - List the downloadable formats of a remote page
#[utoipa::path(
    get,
    path = "/formats",
    tag = "downloads",
    params(FormatsQuery),
    responses(
        (status = 200, description = "Title, duration and available formats", body = FormatListing),
        (status = 400, description = "Unsupported URL or unreadable metadata", body = crate::error::ApiError),
        (status = 401, description = "Missing or invalid credentials", body = crate::error::ApiError),
        (status = 404, description = "Source unavailable or private", body = crate::error::ApiError),
        (status = 429, description = "Remote site is rate limiting", body = crate::error::ApiError),
        (status = 500, description = "Extractor unavailable", body = crate::error::ApiError)
    )
)]
pub async fn list_formats(
    State(state): State<AppState>,
    Query(query): Query<FormatsQuery>,
) -> Result<Json<FormatListing>, Error> {
    let listing = state.downloader.list_formats(&query.source_url).await?;
    Ok(Json(listing))
}
