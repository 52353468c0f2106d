use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::database::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Firebase not configured on backend")]
    NotConfigured,

    #[error("No data provided")]
    MissingPayload,

    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Document store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotConfigured | AppError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MissingPayload | AppError::MalformedPayload => StatusCode::BAD_REQUEST,
        };

        let message = match self {
            AppError::Store(err) => {
                error!("{err}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use reqwest::StatusCode as StoreStatus;

    use super::*;

    async fn render(err: AppError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn configuration_error_is_500_with_fixed_message() {
        assert_eq!(
            render(AppError::NotConfigured).await,
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"error":"Firebase not configured on backend"}"#.to_string()
            )
        );
    }

    #[tokio::test]
    async fn validation_errors_are_400() {
        assert_eq!(
            render(AppError::MissingPayload).await,
            (
                StatusCode::BAD_REQUEST,
                r#"{"error":"No data provided"}"#.to_string()
            )
        );
        assert_eq!(render(AppError::MalformedPayload).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn store_failures_do_not_leak_details() {
        let err = AppError::from(StoreError::Rejected {
            status: StoreStatus::FORBIDDEN,
            message: "PERMISSION_DENIED: secret project".to_string(),
        });

        assert_eq!(
            render(err).await,
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"error":"Internal server error"}"#.to_string()
            )
        );
    }
}
