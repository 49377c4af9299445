//! Warden's `/api/v1` response envelope.
//!
//! Every reply carries `meta.api_version` and the moment it was rendered, so
//! a dashboard can tell a fresh snapshot from a cached one. Successful
//! replies wrap the payload in `data`; failures carry `error.code` (derived
//! from the HTTP status, e.g. `NOT_FOUND`) and a human-readable message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const API_VERSION: &str = "1";

#[derive(Debug, Serialize)]
pub struct Meta {
    pub api_version: &'static str,
    pub generated_at: DateTime<Utc>,
}

impl Meta {
    fn now() -> Self {
        Self {
            api_version: API_VERSION,
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DataBody<T: Serialize> {
    data: T,
    meta: Meta,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    meta: Meta,
}

/// 200 with `payload` as `data`
pub fn ok<T: Serialize>(payload: T) -> Response {
    reply(StatusCode::OK, payload)
}

/// 201 for a submission the loop accepted
pub fn created<T: Serialize>(payload: T) -> Response {
    reply(StatusCode::CREATED, payload)
}

fn reply<T: Serialize>(status: StatusCode, payload: T) -> Response {
    let body = DataBody {
        data: payload,
        meta: Meta::now(),
    };
    (status, Json(body)).into_response()
}

/// Error reply; the code is the status's canonical reason in SCREAMING_SNAKE
pub fn error(status: StatusCode, message: impl Into<String>) -> Response {
    let code = status
        .canonical_reason()
        .unwrap_or("ERROR")
        .to_ascii_uppercase()
        .replace(' ', "_");
    let body = ErrorBody {
        error: ErrorDetail {
            code,
            message: message.into(),
        },
        meta: Meta::now(),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn created_wraps_payload_with_meta() {
        let resp = created(serde_json::json!({"id": "action_1"}));
        assert_eq!(resp.status(), StatusCode::CREATED);
        let v = body_of(resp).await;
        assert_eq!(v["data"]["id"], "action_1");
        assert_eq!(v["meta"]["api_version"], API_VERSION);
        assert!(v["meta"]["generated_at"].is_string());
    }

    #[tokio::test]
    async fn error_code_follows_status() {
        for (status, code) in [
            (StatusCode::NOT_FOUND, "NOT_FOUND"),
            (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        ] {
            let v = body_of(error(status, "control loop stopped")).await;
            assert_eq!(v["error"]["code"], code);
            assert_eq!(v["error"]["message"], "control loop stopped");
            assert!(v.get("data").is_none());
        }
    }
}
