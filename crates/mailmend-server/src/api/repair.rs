use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use mailmend_core::repair::{
    EmailMessage, RepairError, SessionContext, SessionLoadError, ToolCallRecord, UserProfile,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(run_repair))
}

#[derive(Debug, Deserialize)]
pub struct RepairRequest {
    pub user: UserProfile,
    /// The user's natural-language correction.
    pub correction: EmailMessage,
    /// The email whose handling is being complained about.
    pub original: EmailMessage,
    /// Name of the rule that matched the original email, if any.
    pub matched_rule_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RepairResponse {
    pub terminal_reply: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Run one repair session. Transport failures of the decision maker map to
/// a generic 502; end users never see raw validation or resolution payloads.
async fn run_repair(
    State(state): State<AppState>,
    Json(request): Json<RepairRequest>,
) -> Result<Json<RepairResponse>, (StatusCode, Json<ErrorResponse>)> {
    let session = SessionContext::load(
        &state.db,
        request.user,
        request.correction,
        request.original,
        request.matched_rule_name.as_deref(),
    )
    .await
    .map_err(|err| match err {
        SessionLoadError::MatchedRuleNotFound(name) => {
            warn!(rule = %name, "repair request referenced an unknown matched rule");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    error: "unknown matched rule".into(),
                }),
            )
        }
        other => {
            error!(error = %other, "failed to assemble repair session");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "failed to load rules".into(),
                }),
            )
        }
    })?;

    let outcome = state.agent.run(&session).await.map_err(|err| {
        let RepairError::Llm(source) = &err;
        error!(error = %source, "repair session failed");
        (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: "repair session failed".into(),
            }),
        )
    })?;

    Ok(Json(RepairResponse {
        terminal_reply: outcome.terminal_reply,
        tool_calls: outcome.tool_calls,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repair_request_deserializes_with_optional_matched_rule() {
        let request: RepairRequest = serde_json::from_value(json!({
            "user": {"id": 1, "email": "me@example.com", "about": null},
            "correction": {
                "from_email": "me@example.com",
                "subject": "Fix",
                "body_plain": "this should match",
                "body_html": null
            },
            "original": {
                "from_email": "news@sender.com",
                "subject": "Digest",
                "body_plain": "body",
                "body_html": null
            }
        }))
        .expect("deserialize");

        assert_eq!(request.user.email, "me@example.com");
        assert!(request.matched_rule_name.is_none());
    }

    #[test]
    fn error_response_serializes_generic_notice() {
        let body = serde_json::to_value(ErrorResponse {
            error: "repair session failed".into(),
        })
        .expect("serialize");
        assert_eq!(body, json!({"error": "repair session failed"}));
    }
}
