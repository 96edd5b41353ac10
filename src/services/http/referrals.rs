use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{dispatch, service_error_response};
use crate::models::referrals::NewReferral;
use crate::services::{referrals::ReferralRequest, usage::UsageRequest, ServiceChannels};

pub async fn get_referral_info(
    State(channels): State<ServiceChannels>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match dispatch(&channels.usage, |response| UsageRequest::GetReferralInfo {
        user_id,
        response,
    })
    .await
    {
        Ok(Ok(info)) => (StatusCode::OK, Json(json!(info))),
        Ok(Err(service_error)) => service_error_response(service_error),
        Err(error_response) => error_response,
    }
}

pub async fn process_referral(
    State(channels): State<ServiceChannels>,
    Json(req): Json<NewReferral>,
) -> impl IntoResponse {
    match dispatch(&channels.referrals, |response| {
        ReferralRequest::ProcessReferral {
            new_user_id: req.new_user_id,
            referral_code: req.referral_code,
            response,
        }
    })
    .await
    {
        Ok(success) => (StatusCode::OK, Json(json!({ "success": success }))),
        Err(error_response) => error_response,
    }
}
