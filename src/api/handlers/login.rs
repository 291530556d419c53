//! First-factor endpoint: password check and challenge issuance.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{client_descriptor, extract_client_ip};
use crate::flow::{AuthFlow, LoginOutcome};

#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Debug)]
pub struct ChallengeResponse {
    pub session_id: Uuid,
    pub message: String,
}

pub async fn login(
    headers: HeaderMap,
    flow: Extension<Arc<AuthFlow>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let source = extract_client_ip(&headers).unwrap_or_else(|| "unknown".to_string());
    let descriptor = client_descriptor(&headers);
    let password = SecretString::from(request.password);

    match flow.begin_login(&request.username, &password, &source, &descriptor) {
        LoginOutcome::ChallengeIssued { session_id } => (
            StatusCode::OK,
            Json(ChallengeResponse {
                session_id,
                message: "Verification code sent".to_string(),
            }),
        )
            .into_response(),
        LoginOutcome::RateLimited { message, .. } => {
            (StatusCode::TOO_MANY_REQUESTS, message).into_response()
        }
        LoginOutcome::BadCredentials => (
            StatusCode::UNAUTHORIZED,
            "Invalid username or password.".to_string(),
        )
            .into_response(),
        LoginOutcome::ContactMissing => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "An error occurred. Please try again.".to_string(),
        )
            .into_response(),
        LoginOutcome::DeliveryFailed { message } => {
            (StatusCode::SERVICE_UNAVAILABLE, message).into_response()
        }
    }
}
