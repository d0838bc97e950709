use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use pcb_inspect_core::shared::error::PipelineError;

/// JSON error body: `{"message", "status": "error", "details"}`.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    status: &'static str,
    details: &'a str,
}

/// A failed request, rendered as a JSON error response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: details.into(),
        }
    }

    pub fn internal(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details: details.into(),
        }
    }

    /// Maps a pipeline failure to 400 (bad media) or 500 (everything else).
    pub fn from_pipeline(message: &str, err: &PipelineError) -> Self {
        if err.is_client_error() {
            Self::bad_request(message, err.to_string())
        } else {
            Self::internal(message, err.to_string())
        }
    }

    pub fn from_multipart(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            message: "Invalid upload".into(),
            details: err.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!("{}: {}", self.message, self.details);
        } else {
            log::warn!("{}: {}", self.message, self.details);
        }
        let body = ErrorBody {
            message: &self.message,
            status: "error",
            details: &self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_invalid_input_maps_to_bad_request() {
        let err = PipelineError::invalid_input(Path::new("upload.mp4"), "moov atom not found");
        let api = ApiError::from_pipeline("Video prediction failed", &err);
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert!(api.details.contains("moov atom not found"));
    }

    #[test]
    fn test_annotation_failure_maps_to_internal_error() {
        let err = PipelineError::Annotation {
            frame_index: 5,
            source: "session poisoned".into(),
        };
        let api = ApiError::from_pipeline("Video prediction failed", &err);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(api.details.contains("frame 5"));
    }

    #[tokio::test]
    async fn test_response_body_shape() {
        let response = ApiError::bad_request("Invalid upload", "missing field").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Invalid upload");
        assert_eq!(json["status"], "error");
        assert_eq!(json["details"], "missing field");
    }
}
