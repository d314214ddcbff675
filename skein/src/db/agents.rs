//! Agents, executions, and approval requests.

use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use crate::error::AgentError;

use super::models::{
    Agent, AgentExecution, ApprovalRequest, ApprovalStatus, ExecutionStatus, TriggerType,
};
use super::{fmt_ts, new_id, now_utc, parse_ts, Database};

/// Fields for one agent insert.
#[derive(Clone, Debug)]
pub struct NewAgent {
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    pub schedule: Option<String>,
    pub timezone: String,
    pub model: String,
    pub tool_permissions: Option<Vec<String>>,
    pub budget_limit: Option<f64>,
    pub conversation_id: String,
}

fn row_to_agent(row: &Row<'_>) -> Result<Agent, rusqlite::Error> {
    let permissions_json: Option<String> = row.get("tool_permissions_json")?;
    Ok(Agent {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        system_prompt: row.get("system_prompt")?,
        schedule: row.get("schedule")?,
        timezone: row.get("timezone")?,
        model: row.get("model")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        tool_permissions: permissions_json.and_then(|j| serde_json::from_str(&j).ok()),
        budget_limit: row.get("budget_limit")?,
        next_run_at: row
            .get::<_, Option<String>>("next_run_at")?
            .map(|s| parse_ts(&s)),
        last_run_at: row
            .get::<_, Option<String>>("last_run_at")?
            .map(|s| parse_ts(&s)),
        conversation_id: row.get("conversation_id")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
    })
}

fn row_to_execution(row: &Row<'_>) -> Result<AgentExecution, rusqlite::Error> {
    let trigger: String = row.get("trigger_type")?;
    let status: String = row.get("status")?;
    Ok(AgentExecution {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        trigger_type: TriggerType::parse(&trigger).unwrap_or(TriggerType::Manual),
        triggered_by_agent_id: row.get("triggered_by_agent_id")?,
        status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Failed),
        started_at: parse_ts(&row.get::<_, String>("started_at")?),
        error_message: row.get("error_message")?,
    })
}

fn row_to_approval(row: &Row<'_>) -> Result<ApprovalRequest, rusqlite::Error> {
    let status: String = row.get("status")?;
    let args_json: String = row.get("tool_args_json")?;
    Ok(ApprovalRequest {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        user_id: row.get("user_id")?,
        tool_name: row.get("tool_name")?,
        tool_args: serde_json::from_str(&args_json).unwrap_or(Value::Null),
        description: row.get("description")?,
        status: ApprovalStatus::parse(&status).unwrap_or(ApprovalStatus::Pending),
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        decided_at: row
            .get::<_, Option<String>>("decided_at")?
            .map(|s| parse_ts(&s)),
    })
}

impl Database {
    // Agents

    pub async fn create_agent(&self, new_agent: NewAgent) -> Result<Agent, AgentError> {
        self.with_conn(move |conn| {
            let id = new_id();
            let created_at = now_utc();
            let permissions_json = new_agent
                .tool_permissions
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            conn.execute(
                r#"
                INSERT INTO agents
                (id, user_id, name, description, system_prompt, schedule, timezone, model,
                 enabled, tool_permissions_json, budget_limit, conversation_id, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10, ?11, ?12)
                "#,
                params![
                    id,
                    new_agent.user_id,
                    new_agent.name,
                    new_agent.description,
                    new_agent.system_prompt,
                    new_agent.schedule,
                    new_agent.timezone,
                    new_agent.model,
                    permissions_json,
                    new_agent.budget_limit,
                    new_agent.conversation_id,
                    fmt_ts(created_at),
                ],
            )?;
            Ok(Agent {
                id,
                user_id: new_agent.user_id,
                name: new_agent.name,
                description: new_agent.description,
                system_prompt: new_agent.system_prompt,
                schedule: new_agent.schedule,
                timezone: new_agent.timezone,
                model: new_agent.model,
                enabled: true,
                tool_permissions: new_agent.tool_permissions,
                budget_limit: new_agent.budget_limit,
                next_run_at: None,
                last_run_at: None,
                conversation_id: new_agent.conversation_id,
                created_at,
            })
        })
        .await
    }

    pub async fn get_agent_by_id(&self, agent_id: &str) -> Result<Option<Agent>, AgentError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT * FROM agents WHERE id = ?1", params![agent_id], row_to_agent)
                .optional()?)
        })
        .await
    }

    /// Lookup by name within one user (names are unique per user).
    pub async fn get_agent_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<Agent>, AgentError> {
        let user_id = user_id.to_string();
        let name = name.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM agents WHERE user_id = ?1 AND name = ?2",
                    params![user_id, name],
                    row_to_agent,
                )
                .optional()?)
        })
        .await
    }

    /// Enabled agents with a schedule whose `next_run_at` is due.
    pub async fn get_due_agents(&self, now: NaiveDateTime) -> Result<Vec<Agent>, AgentError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM agents \
                 WHERE enabled = 1 AND schedule IS NOT NULL \
                   AND next_run_at IS NOT NULL AND next_run_at <= ?1 \
                 ORDER BY next_run_at",
            )?;
            let rows = stmt.query_map(params![fmt_ts(now)], row_to_agent)?;
            let mut agents = Vec::new();
            for row in rows {
                agents.push(row?);
            }
            Ok(agents)
        })
        .await
    }

    pub async fn update_agent_next_run(
        &self,
        agent_id: &str,
        next_run_at: NaiveDateTime,
    ) -> Result<(), AgentError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE agents SET next_run_at = ?1 WHERE id = ?2",
                params![fmt_ts(next_run_at), agent_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Records a completed run and the next occurrence in one update.
    pub async fn update_agent_last_run(
        &self,
        agent_id: &str,
        last_run_at: NaiveDateTime,
        next_run_at: Option<NaiveDateTime>,
    ) -> Result<(), AgentError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE agents SET last_run_at = ?1, next_run_at = ?2 WHERE id = ?3",
                params![
                    fmt_ts(last_run_at),
                    next_run_at.map(fmt_ts),
                    agent_id
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_agent_enabled(&self, agent_id: &str, enabled: bool) -> Result<(), AgentError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE agents SET enabled = ?1 WHERE id = ?2",
                params![enabled as i64, agent_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Deletes the agent and the conversation it owns (with its messages).
    pub async fn delete_agent(&self, agent_id: &str) -> Result<bool, AgentError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let conversation_id: Option<String> = tx
                .query_row(
                    "SELECT conversation_id FROM agents WHERE id = ?1",
                    params![agent_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(conversation_id) = conversation_id else {
                return Ok(false);
            };
            tx.execute(
                "DELETE FROM approval_requests WHERE agent_id = ?1",
                params![agent_id],
            )?;
            tx.execute(
                "DELETE FROM agent_executions WHERE agent_id = ?1",
                params![agent_id],
            )?;
            tx.execute("DELETE FROM agents WHERE id = ?1", params![agent_id])?;
            tx.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            tx.execute(
                "DELETE FROM conversations WHERE id = ?1",
                params![conversation_id],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    /// Replaces everything except the `keep_recent` newest messages with a
    /// single summary message, positioned before the kept ones. Returns
    /// how many messages were deleted.
    pub async fn compact_agent_conversation(
        &self,
        conversation_id: &str,
        summary: &str,
        keep_recent: usize,
    ) -> Result<usize, AgentError> {
        let conversation_id = conversation_id.to_string();
        let summary = summary.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let ids_and_times: Vec<(String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, created_at FROM messages WHERE conversation_id = ?1 \
                     ORDER BY created_at, id",
                )?;
                let rows = stmt.query_map(params![conversation_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                out
            };
            if ids_and_times.len() <= keep_recent {
                return Ok(0);
            }
            let cut = ids_and_times.len() - keep_recent;
            let earliest_created_at = ids_and_times[0].1.clone();
            for (id, _) in &ids_and_times[..cut] {
                tx.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
            }
            // The summary takes the earliest slot so it sorts before the
            // kept tail.
            tx.execute(
                r#"
                INSERT INTO messages (id, conversation_id, role, content, created_at)
                VALUES (?1, ?2, 'assistant', ?3, ?4)
                "#,
                params![new_id(), conversation_id, summary, earliest_created_at],
            )?;
            tx.commit()?;
            Ok(cut)
        })
        .await
    }

    // Executions

    /// Creates an execution row in `running` status. The check and insert
    /// share one transaction, so two schedulers racing on the same agent
    /// cannot both succeed.
    pub async fn create_execution(
        &self,
        agent_id: &str,
        trigger_type: TriggerType,
        triggered_by_agent_id: Option<&str>,
    ) -> Result<AgentExecution, AgentError> {
        let agent_id = agent_id.to_string();
        let triggered_by = triggered_by_agent_id.map(str::to_string);
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let running: i64 = tx.query_row(
                "SELECT COUNT(*) FROM agent_executions WHERE agent_id = ?1 AND status = 'running'",
                params![agent_id],
                |row| row.get(0),
            )?;
            if running > 0 {
                return Err(AgentError::Validation(format!(
                    "agent {agent_id} already has a running execution"
                )));
            }
            let id = new_id();
            let started_at = now_utc();
            tx.execute(
                r#"
                INSERT INTO agent_executions
                (id, agent_id, trigger_type, triggered_by_agent_id, status, started_at)
                VALUES (?1, ?2, ?3, ?4, 'running', ?5)
                "#,
                params![
                    id,
                    agent_id,
                    trigger_type.as_str(),
                    triggered_by,
                    fmt_ts(started_at)
                ],
            )?;
            tx.commit()?;
            Ok(AgentExecution {
                id,
                agent_id,
                trigger_type,
                triggered_by_agent_id: triggered_by,
                status: ExecutionStatus::Running,
                started_at,
                error_message: None,
            })
        })
        .await
    }

    pub async fn update_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<(), AgentError> {
        let execution_id = execution_id.to_string();
        let error_message = error_message.map(str::to_string);
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE agent_executions SET status = ?1, error_message = ?2 WHERE id = ?3",
                params![status.as_str(), error_message, execution_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<AgentExecution>, AgentError> {
        let execution_id = execution_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM agent_executions WHERE id = ?1",
                    params![execution_id],
                    row_to_execution,
                )
                .optional()?)
        })
        .await
    }

    pub async fn has_running_execution(&self, agent_id: &str) -> Result<bool, AgentError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM agent_executions WHERE agent_id = ?1 AND status = 'running'",
                params![agent_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    /// Marks stale `running` / `waiting_approval` executions failed.
    /// Returns how many were cleaned.
    pub async fn cleanup_zombie_executions(
        &self,
        stale_before: NaiveDateTime,
    ) -> Result<usize, AgentError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                r#"
                UPDATE agent_executions
                SET status = 'failed',
                    error_message = 'execution became stale (zombie recovery)'
                WHERE status IN ('running', 'waiting_approval') AND started_at < ?1
                "#,
                params![fmt_ts(stale_before)],
            )?;
            Ok(changed)
        })
        .await
    }

    // Approvals

    pub async fn create_approval_request(
        &self,
        agent_id: &str,
        user_id: &str,
        tool_name: &str,
        tool_args: Value,
        description: &str,
    ) -> Result<ApprovalRequest, AgentError> {
        let agent_id = agent_id.to_string();
        let user_id = user_id.to_string();
        let tool_name = tool_name.to_string();
        let description = description.to_string();
        self.with_conn(move |conn| {
            let id = new_id();
            let created_at = now_utc();
            conn.execute(
                r#"
                INSERT INTO approval_requests
                (id, agent_id, user_id, tool_name, tool_args_json, description, status, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)
                "#,
                params![
                    id,
                    agent_id,
                    user_id,
                    tool_name,
                    serde_json::to_string(&tool_args)?,
                    description,
                    fmt_ts(created_at)
                ],
            )?;
            Ok(ApprovalRequest {
                id,
                agent_id,
                user_id,
                tool_name,
                tool_args,
                description,
                status: ApprovalStatus::Pending,
                created_at,
                decided_at: None,
            })
        })
        .await
    }

    pub async fn get_approval_request(
        &self,
        approval_id: &str,
    ) -> Result<Option<ApprovalRequest>, AgentError> {
        let approval_id = approval_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM approval_requests WHERE id = ?1",
                    params![approval_id],
                    row_to_approval,
                )
                .optional()?)
        })
        .await
    }

    /// Sets the terminal state; only pending requests can be decided.
    pub async fn decide_approval(
        &self,
        approval_id: &str,
        approve: bool,
    ) -> Result<bool, AgentError> {
        let approval_id = approval_id.to_string();
        let status = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE approval_requests SET status = ?1, decided_at = ?2 \
                 WHERE id = ?3 AND status = 'pending'",
                params![status.as_str(), fmt_ts(now_utc()), approval_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn has_pending_approval(&self, agent_id: &str) -> Result<bool, AgentError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM approval_requests WHERE agent_id = ?1 AND status = 'pending'",
                params![agent_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }
}
