use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{ServiceChannels, ServiceError};

mod referrals;
mod usage;

type HttpResponse = (StatusCode, Json<Value>);

fn internal_error(details: String) -> HttpResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Internal server error",
            "details": details
        })),
    )
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::InvalidInput(details) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Invalid request",
                "details": details
            })),
        ),
        other => internal_error(other.to_string()),
    }
}

/// Sends a request built around a fresh reply channel and waits for the answer.
async fn dispatch<R, T>(
    channel: &mpsc::Sender<R>,
    build: impl FnOnce(oneshot::Sender<T>) -> R,
) -> Result<T, HttpResponse> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(build(response_tx))
        .await
        .map_err(|e| internal_error(format!("Failed to process request: {}", e)))?;

    response_rx
        .await
        .map_err(|e| internal_error(format!("Failed to receive response: {}", e)))
}

pub fn router(channels: ServiceChannels) -> Router {
    Router::new()
        .route("/usage/{user_id}", get(usage::get_usage).delete(usage::archive_usage))
        .route("/usage/{user_id}/allowance", get(usage::get_allowance))
        .route("/usage/{user_id}/record", post(usage::record_usage))
        .route("/referrals", post(referrals::process_referral))
        .route("/referrals/{user_id}", get(referrals::get_referral_info))
        .route("/health", get(|| async { "OK" }))
        .with_state(channels)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(
    listen: &str,
    channels: ServiceChannels,
) -> Result<(), anyhow::Error> {
    let app = router(channels);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::usage::{MemoryUsageRepository, UsageStore};
    use crate::services::spawn_services;
    use crate::settings::{Http, Quota, Referral, Settings, Storage};
    use crate::utils::ManualClock;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(repository: &MemoryUsageRepository) -> Router {
        let settings = Settings {
            storage: Storage::default(),
            postgres: None,
            quota: Quota {
                base_free_allowance: 2,
                referral_reward: 1,
                history_limit: 10,
            },
            referral: Referral {
                base_url: "https://clinic.example".to_string(),
            },
            http: Http::default(),
        };
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).unwrap());

        router(spawn_services(
            Arc::new(repository.clone()),
            Arc::new(clock),
            &settings,
        ))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn usage_flow_over_http() {
        let repository = MemoryUsageRepository::new();
        let app = app(&repository);

        let (status, body) = call(&app, "GET", "/usage/patient-desk", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["monthly_usage_count"], 0);

        for _ in 0..2 {
            let (status, _) = call(&app, "POST", "/usage/patient-desk/record", None).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = call(&app, "GET", "/usage/patient-desk/allowance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"can_use": false, "remaining_count": 0}));
    }

    #[tokio::test]
    async fn referral_flow_over_http() {
        let repository = MemoryUsageRepository::new();
        let app = app(&repository);

        let (status, info) = call(&app, "GET", "/referrals/referrer", None).await;
        assert_eq!(status, StatusCode::OK);
        let code = info["referral_code"].as_str().unwrap().to_string();
        assert_eq!(
            info["referral_link"],
            format!("https://clinic.example/signup?ref={}", code)
        );

        let (status, body) = call(
            &app,
            "POST",
            "/referrals",
            Some(json!({"new_user_id": "new-user", "referral_code": code})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let (_, body) = call(
            &app,
            "POST",
            "/referrals",
            Some(json!({"new_user_id": "other", "referral_code": "NOPE"})),
        )
        .await;
        assert_eq!(body, json!({"success": false}));

        let (_, info) = call(&app, "GET", "/referrals/referrer", None).await;
        assert_eq!(info["referral_count"], 1);
        assert_eq!(info["referred_users"], json!(["new-user"]));
    }

    #[tokio::test]
    async fn archive_over_http() {
        let repository = MemoryUsageRepository::new();
        let app = app(&repository);

        let (status, _) = call(&app, "DELETE", "/usage/gone", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        call(&app, "GET", "/usage/gone", None).await;
        let (status, body) = call(&app, "DELETE", "/usage/gone", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"archived": true}));
        assert!(repository.get("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_user_id_is_a_bad_request() {
        let repository = MemoryUsageRepository::new();
        let app = app(&repository);

        let (status, body) = call(&app, "GET", "/usage/%20", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request");
    }

    #[tokio::test]
    async fn health() {
        let repository = MemoryUsageRepository::new();
        let app = app(&repository);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
