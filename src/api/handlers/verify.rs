//! Second-factor endpoint: OTP validation against the challenge session.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::extract_client_ip;
use crate::challenge::Verdict;
use crate::flow::{AuthFlow, VerifyOutcome};

#[derive(Deserialize, Debug)]
pub struct VerifyRequest {
    pub session_id: Uuid,
    pub code: String,
}

#[derive(Serialize, Debug)]
pub struct VerifiedResponse {
    pub identity: String,
    pub message: String,
}

pub async fn verify(
    headers: HeaderMap,
    flow: Extension<Arc<AuthFlow>>,
    payload: Option<Json<VerifyRequest>>,
) -> impl IntoResponse {
    let request: VerifyRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let source = extract_client_ip(&headers).unwrap_or_else(|| "unknown".to_string());

    match flow.verify_code(request.session_id, &request.code, &source) {
        VerifyOutcome::Verified { identity } => (
            StatusCode::OK,
            Json(VerifiedResponse {
                identity,
                message: Verdict::Validated.to_string(),
            }),
        )
            .into_response(),
        VerifyOutcome::RateLimited { message, .. } => {
            (StatusCode::TOO_MANY_REQUESTS, message).into_response()
        }
        VerifyOutcome::Rejected { verdict } => {
            let status = match verdict {
                Verdict::InvalidSession => StatusCode::NOT_FOUND,
                Verdict::Expired
                | Verdict::AlreadyUsed
                | Verdict::AttemptsExhausted
                | Verdict::Mismatch { .. } => StatusCode::UNAUTHORIZED,
                Verdict::Validated => StatusCode::OK,
            };
            (status, verdict.to_string()).into_response()
        }
    }
}
