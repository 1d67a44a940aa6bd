//! API error type and the JSON response envelope.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rxflow_core::db::DbError;
use rxflow_core::workflow::{ErrorKind, WorkflowError};
use serde::Serialize;

/// Successful response body.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
        message: None,
    })
}

pub fn ok_with_message<T: Serialize>(data: T, message: &'static str) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
        message: Some(message),
    })
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, ok(data))
}

/// Failed response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::UpgradeRequired => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::PlanLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Server => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

const INTERNAL_MESSAGE: &str = "An internal error occurred";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", message, None)
            }
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, ErrorKind::Validation.code(), message, None)
            }
            ApiError::Workflow(err) => match err.kind() {
                ErrorKind::Server => {
                    tracing::error!(error = %err, "Workflow failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorKind::Server.code(),
                        INTERNAL_MESSAGE.to_string(),
                        Some(err.to_string()),
                    )
                }
                kind => (status_of(kind), kind.code(), err.to_string(), None),
            },
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorKind::Server.code(),
                    INTERNAL_MESSAGE.to_string(),
                    Some(detail),
                )
            }
        };

        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code,
                message,
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiError::Workflow(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_returns_401() {
        let response = ApiError::Unauthorized("Missing x-user-id header".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn workflow_kinds_map_to_statuses() {
        let cases = [
            (WorkflowError::validation("bad"), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (WorkflowError::not_found("Patient"), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (WorkflowError::Conflict("taken".into()), StatusCode::CONFLICT, "CONFLICT"),
            (
                WorkflowError::UpgradeRequired("plan".into()),
                StatusCode::PAYMENT_REQUIRED,
                "UPGRADE_REQUIRED",
            ),
            (
                WorkflowError::PlanLimitExceeded("limit".into()),
                StatusCode::TOO_MANY_REQUESTS,
                "PLAN_LIMIT_EXCEEDED",
            ),
        ];
        for (err, status, code) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
            let json = body_json(response).await;
            assert_eq!(json["error"]["code"], code);
            assert!(json["error"].get("details").is_none());
        }
    }

    #[tokio::test]
    async fn server_errors_echo_the_cause_in_details() {
        let err: ApiError = DbError::Constraint("disk full".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "SERVER_ERROR");
        assert_eq!(json["error"]["message"], INTERNAL_MESSAGE);
        assert!(json["error"]["details"].as_str().unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn db_conflicts_stay_conflicts() {
        let err: ApiError = DbError::Conflict("changed".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn success_body_omits_empty_message() {
        let Json(body) = ok(42);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 42);
        assert!(json.get("message").is_none());
    }
}
