//! Agent trigger and approval decision routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use skein::autonomous::RunOutcome;
use skein::db::models::{ExecutionStatus, TriggerType};

use crate::app::AppState;
use crate::error::ApiError;

pub(crate) fn user_id_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::forbidden("missing x-user-id header"))
}

/// Manual agent trigger. Creates the execution row, dispatches in the
/// background, and returns 202 with the execution id.
pub async fn trigger_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
) -> Result<(axum::http::StatusCode, Json<Value>), ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let agent = state
        .db
        .get_agent_by_id(&agent_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("agent {agent_id} not found")))?;
    if agent.user_id != user_id {
        return Err(ApiError::forbidden("not the agent's owner"));
    }
    if !agent.enabled {
        return Err(ApiError::bad_request("agent is disabled"));
    }
    let user = state
        .db
        .get_user_by_id(&user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    let execution = state
        .db
        .create_execution(&agent.id, TriggerType::Manual, None)
        .await?;

    let executor = state.executor.clone();
    let db = state.db.clone();
    let execution_id = execution.id.clone();
    tokio::spawn(async move {
        let outcome = executor
            .clone()
            .execute(&agent, &user, TriggerType::Manual, &execution_id, &[], None)
            .await;
        let update = match &outcome {
            RunOutcome::Completed => Some((ExecutionStatus::Completed, None)),
            RunOutcome::WaitingApproval { .. } => None,
            RunOutcome::Failed(error) => Some((ExecutionStatus::Failed, Some(error.clone()))),
        };
        if let Some((status, error)) = update {
            if let Err(error) = db
                .update_execution(&execution_id, status, error.as_deref())
                .await
            {
                tracing::error!(%error, "failed to record manual execution outcome");
            }
        }
    });

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(json!({"execution_id": execution.id, "status": "running"})),
    ))
}

#[derive(Debug, Deserialize)]
pub struct DecideBody {
    pub approve: bool,
}

/// Approves or rejects a pending approval request. Resuming the agent is
/// a separate scheduled or manual run.
pub async fn decide_approval(
    State(state): State<Arc<AppState>>,
    Path(approval_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<DecideBody>,
) -> Result<Json<Value>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let approval = state
        .db
        .get_approval_request(&approval_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("approval {approval_id} not found")))?;
    if approval.user_id != user_id {
        return Err(ApiError::forbidden("not the approval's owner"));
    }

    let decided = state.db.decide_approval(&approval_id, body.approve).await?;
    if !decided {
        return Err(ApiError::bad_request("approval request already decided"));
    }
    Ok(Json(json!({
        "approval_id": approval_id,
        "status": if body.approve { "approved" } else { "rejected" },
    })))
}
