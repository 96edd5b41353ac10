use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{dispatch, service_error_response};
use crate::services::{usage::UsageRequest, ServiceChannels};

pub async fn get_usage(
    State(channels): State<ServiceChannels>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match dispatch(&channels.usage, |response| UsageRequest::GetUsage {
        user_id,
        response,
    })
    .await
    {
        Ok(Ok(record)) => (StatusCode::OK, Json(json!(record))),
        Ok(Err(service_error)) => service_error_response(service_error),
        Err(error_response) => error_response,
    }
}

pub async fn get_allowance(
    State(channels): State<ServiceChannels>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match dispatch(&channels.usage, |response| UsageRequest::CanUseAiSuggestion {
        user_id,
        response,
    })
    .await
    {
        Ok(Ok(allowance)) => (StatusCode::OK, Json(json!(allowance))),
        Ok(Err(service_error)) => service_error_response(service_error),
        Err(error_response) => error_response,
    }
}

pub async fn record_usage(
    State(channels): State<ServiceChannels>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match dispatch(&channels.usage, |response| UsageRequest::RecordAiUsage {
        user_id,
        response,
    })
    .await
    {
        Ok(Ok(record)) => (StatusCode::OK, Json(json!(record))),
        Ok(Err(service_error)) => service_error_response(service_error),
        Err(error_response) => error_response,
    }
}

pub async fn archive_usage(
    State(channels): State<ServiceChannels>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match dispatch(&channels.usage, |response| UsageRequest::ArchiveUsage {
        user_id,
        response,
    })
    .await
    {
        Ok(Ok(true)) => (StatusCode::OK, Json(json!({"archived": true}))),
        Ok(Ok(false)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Usage record not found"})),
        ),
        Ok(Err(service_error)) => service_error_response(service_error),
        Err(error_response) => error_response,
    }
}
