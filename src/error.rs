use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::{
    catalog::CatalogError,
    resolver::{ResolutionError, ResolutionErrorKind},
};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}

impl From<ResolutionError> for ApiError {
    fn from(value: ResolutionError) -> Self {
        let message = value.to_string();
        match value.kind() {
            ResolutionErrorKind::NotFound => Self::not_found("VIDEO_NOT_FOUND", message),
            ResolutionErrorKind::Restricted => Self::not_found("VIDEO_RESTRICTED", message),
            ResolutionErrorKind::NoEligibleFormat => Self::not_found("NO_ELIGIBLE_FORMAT", message),
            ResolutionErrorKind::Timeout => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "UPSTREAM_TIMEOUT",
                format!("Stream extraction failed: {message}"),
            ),
            ResolutionErrorKind::ToolMissing => {
                error!("{message}; install yt-dlp and restart the service");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "EXTRACTOR_MISSING",
                    "Stream extraction is not available on this server.",
                )
            }
            ResolutionErrorKind::Upstream => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "UPSTREAM_ERROR",
                format!("Stream extraction failed: {message}"),
            ),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(value: CatalogError) -> Self {
        if value.is_unavailable() {
            Self::unavailable("CATALOG_UNAVAILABLE", format!("Search failed: {value}"))
        } else {
            Self::internal(format!("Search failed: {value}"))
        }
    }
}
