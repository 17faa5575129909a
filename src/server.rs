// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP front end exposing the ingest, trans and webhook handlers.

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::errors::{ServiceError, ServiceResult};
use crate::ingest::{upload_csv, StorageEvent, UploadOutcome};
use crate::pipeline::{run_trans, TransReport, TransRequest};
use crate::services::Services;
use crate::webhook::{dispatch, WebhookRequest, WebhookResponse};

#[derive(Clone)]
pub struct AppState {
    services: Arc<Mutex<Services>>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("request failed: {}", self);
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

/// Builds the router over a shared service bundle.
pub fn router(services: Services) -> Router {
    let state = AppState {
        services: Arc::new(Mutex::new(services)),
    };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/trans", post(trans))
        .route("/upload_csv", post(upload))
        .route("/webhook", post(webhook))
        .with_state(state)
}

/// Serves the router on `bind` until the process is stopped.
pub async fn serve(services: Services, bind: &str) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("listening on http://{}", addr);
    axum::serve(listener, router(services))
        .await
        .context("HTTP server failed")?;
    Ok(())
}

/// Runs a service call on the blocking pool with exclusive access to the services.
async fn with_services<T, F>(state: &AppState, f: F) -> ServiceResult<T>
where
    F: FnOnce(&mut Services) -> ServiceResult<T> + Send + 'static,
    T: Send + 'static,
{
    let services = Arc::clone(&state.services);
    tokio::task::spawn_blocking(move || {
        // a panicked handler leaves no open transaction behind, so the state is reusable
        let mut guard = match services.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("recovering service state after a panicked request");
                services.clear_poison();
                poisoned.into_inner()
            }
        };
        f(&mut *guard)
    })
    .await
    .map_err(|e| ServiceError::Unavailable(format!("worker task failed: {}", e)))?
}

async fn healthz() -> &'static str {
    "ok"
}

async fn trans(State(state): State<AppState>, body: Bytes) -> ServiceResult<Response> {
    // unparseable bodies behave like a request without a mode
    let request: TransRequest = serde_json::from_slice(&body).unwrap_or_default();
    info!("trans request: {:?}", request.mode);
    let report: TransReport = with_services(&state, move |services| {
        run_trans(services, &request, false).map_err(ServiceError::unavailable)
    })
    .await?;

    if report.is_empty() {
        return Ok("OK".into_response());
    }
    let mut body = serde_json::to_value(&report).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut body {
        map.insert("status".to_string(), json!("OK"));
    }
    Ok(Json(body).into_response())
}

fn parse_event(body: Value) -> ServiceResult<StorageEvent> {
    let payload = match body {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(payload)
        .map_err(|e| ServiceError::invalid(format!("Invalid storage event: {}", e)))
}

async fn upload(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ServiceResult<Json<UploadOutcome>> {
    let event = parse_event(body)?;
    info!("upload event for {}/{}", event.bucket, event.name);
    let outcome = with_services(&state, move |services| upload_csv(services, &event)).await?;
    Ok(Json(outcome))
}

async fn webhook(
    State(state): State<AppState>,
    Json(request): Json<WebhookRequest>,
) -> ServiceResult<Json<WebhookResponse>> {
    let response = with_services(&state, move |services| dispatch(services, &request)).await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{temp_services, POSTINGS_CSV};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes)
    }

    #[test]
    fn test_parse_event_accepts_wrapped_payload() {
        let event = parse_event(json!({"data": {"bucket": "b", "name": "t/a.csv", "size": "3"}}))
            .unwrap();
        assert_eq!(event.bucket, "b");
        let event = parse_event(json!({"bucket": "b", "name": "t/a.csv", "size": 3})).unwrap();
        assert_eq!(event.name, "t/a.csv");
        assert!(parse_event(json!({"name": "x"})).is_err());
    }

    #[tokio::test]
    async fn test_healthz() {
        let (_dir, services) = temp_services();
        let app = router(services);
        let request = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_trans_without_mode_answers_ok() {
        let (_dir, services) = temp_services();
        let app = router(services);
        let (status, body) = post_json(&app, "/trans", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"OK");

        let (status, body) = post_json(&app, "/trans", json!({"mode": "unknown"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_upload_then_trans() {
        let (dir, services) = temp_services();
        let object_dir = dir.path().join("drive/uploads/job_posts");
        std::fs::create_dir_all(&object_dir).unwrap();
        std::fs::write(object_dir.join("a.csv"), POSTINGS_CSV).unwrap();
        let app = router(services);

        let (status, body) = post_json(
            &app,
            "/upload_csv",
            json!({"data": {"bucket": "uploads", "name": "job_posts/a.csv", "size": "120"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let outcome: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(outcome["status"], "loaded");
        assert_eq!(outcome["total_rows"], 3);

        let (status, body) = post_json(&app, "/trans", json!({"mode": "all"})).await;
        assert_eq!(status, StatusCode::OK);
        let report: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["status"], "OK");
        assert_eq!(report["transform"]["postings"], 3);
        assert_eq!(report["index"]["jobs_indexed"], 3);
    }

    #[tokio::test]
    async fn test_panicked_call_does_not_wedge_services() {
        let (_dir, services) = temp_services();
        let state = AppState {
            services: Arc::new(Mutex::new(services)),
        };

        let failed: ServiceResult<()> = with_services(&state, |_| panic!("handler bug")).await;
        assert!(matches!(failed, Err(ServiceError::Unavailable(_))));
        assert!(state.services.is_poisoned());

        let count = with_services(&state, |services| {
            services.index.count().map_err(ServiceError::unavailable)
        })
        .await
        .unwrap();
        assert_eq!(count, 0);
        assert!(!state.services.is_poisoned());
    }

    #[tokio::test]
    async fn test_webhook_errors_map_to_status() {
        let (_dir, services) = temp_services();
        let app = router(services);

        let (status, body) = post_json(
            &app,
            "/webhook",
            json!({"fulfillmentInfo": {"tag": "export_matches"}, "sessionInfo": {"parameters": {}}}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: Value = serde_json::from_slice(&body).unwrap();
        assert!(error["message"].as_str().unwrap().contains("create_folder"));

        let (status, body) = post_json(
            &app,
            "/webhook",
            json!({"fulfillmentInfo": {"tag": "welcome"}, "sessionInfo": {"parameters": {"user_name": "Ada"}}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let response: Value = serde_json::from_slice(&body).unwrap();
        assert!(response["fulfillmentResponse"]["messages"][0]["text"]["text"][0]
            .as_str()
            .unwrap()
            .starts_with("Hi Ada!"));
    }
}
