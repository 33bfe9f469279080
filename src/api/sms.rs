//! Inbound SMS routing: carrier callback → deployed LLM endpoint → reply.

use axum::{extract::State, Form, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::api::error::ApiError;
use crate::db::Llm;
use crate::AppState;

/// The deployed endpoint can take a long time on a cold start.
const LLM_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
pub struct InboundSms {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Body")]
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SmsResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct LlmReply {
    message: String,
}

/// Ask the deployed LLM endpoint for a reply to an inbound message.
async fn respond(
    http: &reqwest::Client,
    llm: &Llm,
    message: &str,
) -> Result<String, reqwest::Error> {
    let url = format!("{}/hey", llm.modal_url.trim_end_matches('/'));
    let reply: LlmReply = http
        .post(&url)
        .timeout(LLM_TIMEOUT)
        .json(&serde_json::json!({ "message": message }))
        .send()
        .await?
        .json()
        .await?;
    Ok(reply.message)
}

/// Carrier callback for an inbound SMS. The `To` number identifies the LLM;
/// its reply is sent back to the sender.
pub async fn receive_sms(
    State(state): State<Arc<AppState>>,
    Form(inbound): Form<InboundSms>,
) -> Result<Json<SmsResponse>, ApiError> {
    let llm = Llm::find_by_phone_number(&state.db, &inbound.to)
        .await?
        .ok_or_else(|| ApiError::not_found("Unknown phone number."))?;

    let reply = respond(&state.http, &llm, &inbound.body)
        .await
        .map_err(|error| {
            tracing::error!(llm_id = %llm.id, error = %error, "LLM endpoint failed to respond");
            ApiError::internal("The LLM failed to respond.")
        })?;

    if let Err(error) = state
        .sms
        .send_message(&llm.phone_number, &inbound.from, &reply)
        .await
    {
        tracing::error!(llm_id = %llm.id, error = %error, "Failed to send SMS reply");
        return Err(ApiError::internal("Failed to send the reply."));
    }

    Ok(Json(SmsResponse {
        message: "🪶".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_phone_number_not_found() {
        let state = crate::testutil::test_state().await;
        let app = api::create_router(state);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v0/sms")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(axum::body::Body::from(
                        "From=%2B15555550000&To=%2B15555550999&Body=hello",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({"detail": "Unknown phone number."}));
    }
}
