//! Account-creation endpoint in front of the registrar.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::SecretString;
use serde::Deserialize;
use std::sync::Arc;

use super::extract_client_ip;
use crate::flow::{AuthFlow, RegisterOutcome};

#[derive(Deserialize, Debug)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub contact: String,
}

pub async fn register(
    headers: HeaderMap,
    flow: Extension<Arc<AuthFlow>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let source = extract_client_ip(&headers).unwrap_or_else(|| "unknown".to_string());
    let password = SecretString::from(request.password);

    match flow.register_account(&request.username, &password, &request.contact, &source) {
        RegisterOutcome::Registered => (
            StatusCode::CREATED,
            "User account created successfully.".to_string(),
        )
            .into_response(),
        RegisterOutcome::RateLimited { message, .. } => {
            (StatusCode::TOO_MANY_REQUESTS, message).into_response()
        }
        RegisterOutcome::Rejected { message } => {
            (StatusCode::BAD_REQUEST, message).into_response()
        }
        RegisterOutcome::Unsupported => (
            StatusCode::NOT_IMPLEMENTED,
            "Registration is not enabled.".to_string(),
        )
            .into_response(),
    }
}
