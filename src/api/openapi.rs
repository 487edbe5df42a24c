//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the remux-dl REST API
//! using utoipa for compile-time document generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the remux-dl REST API
///
/// The document is served at:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "remux-dl REST API",
        version = "0.1.0",
        description = "Fetch remote media through yt-dlp, mux it with ffmpeg on the fly and stream it to the client with live progress",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        // Downloads
        crate::api::routes::list_formats,
        crate::api::routes::create_download,
        crate::api::routes::download_progress,
        crate::api::routes::download_stream,

        // System
        crate::api::routes::get_capabilities,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::DescriptorId,
        crate::types::Stage,
        crate::types::ProgressEvent,
        crate::types::ExtractionFormat,
        crate::types::AudioEncoder,
        crate::types::Capabilities,
        crate::formats::FormatListing,

        // API request/response types
        crate::api::routes::CreateDownloadRequest,
        crate::downloader::DownloadTicket,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "downloads", description = "Format listing, download registration, live progress and streaming"),
        (name = "system", description = "System endpoints - Health checks, capabilities, OpenAPI document, events"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security addon describing the accepted credentials
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};

        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Api-Key"))),
            );
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
            components.add_security_scheme(
                "query_token",
                SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("token"))),
            );
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_has_paths() {
        let spec = ApiDoc::openapi();

        for path in [
            "/formats",
            "/downloads",
            "/downloads/{id}/progress",
            "/downloads/{id}/stream",
            "/health",
            "/capabilities",
            "/openapi.json",
            "/events",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing path {path}");
        }
    }

    #[test]
    fn test_openapi_spec_has_components() {
        let spec = ApiDoc::openapi();
        let components = spec.components.unwrap();

        for schema in ["ProgressEvent", "DownloadTicket", "CreateDownloadRequest", "ApiError"] {
            assert!(
                components.schemas.contains_key(schema),
                "missing schema {schema}"
            );
        }
    }

    #[test]
    fn test_openapi_spec_has_tags() {
        let spec = ApiDoc::openapi();
        let tags = spec.tags.unwrap();

        let tag_names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tag_names, ["downloads", "system"]);
    }

    #[test]
    fn test_openapi_spec_info() {
        let spec = ApiDoc::openapi();

        assert_eq!(spec.info.title, "remux-dl REST API");
        assert_eq!(spec.info.version, "0.1.0");
        assert!(spec.info.description.is_some());
    }

    #[test]
    fn test_openapi_spec_has_security_schemes() {
        let spec = ApiDoc::openapi();
        let components = spec.components.unwrap();

        for scheme in ["api_key", "bearer", "query_token"] {
            assert!(
                components.security_schemes.contains_key(scheme),
                "missing security scheme {scheme}"
            );
        }
    }

    #[test]
    fn test_create_download_documents_ticket_body() {
        let json = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let schema = &json["paths"]["/downloads"]["post"]["responses"]["201"]["content"]
            ["application/json"]["schema"]["$ref"];
        assert!(
            schema.as_str().unwrap().ends_with("/DownloadTicket"),
            "unexpected 201 body: {schema}"
        );
    }

    #[test]
    fn test_openapi_spec_serializes() {
        let json = serde_json::to_value(ApiDoc::openapi()).unwrap();
        assert!(json["openapi"].as_str().unwrap().starts_with("3."));
    }
}
