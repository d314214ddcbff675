//! Scheduler: one evaluation pass over due agents.
//!
//! `run_scheduled_agents` is pure with respect to process state: all
//! dependencies are constructor-injected, so it runs identically from the
//! dev background loop and from a one-shot binary. Within a tick, due
//! agents are processed serially, so two ticks of the same agent never
//! overlap in-process, and the execution-row insert guard covers the rest.

use std::sync::Arc;

use crate::cron_schedule::next_run_after;
use crate::db::models::{Agent, ExecutionStatus, TriggerType};
use crate::db::Database;
use crate::error::AgentError;

use super::executor::{AgentExecutor, RunOutcome};

/// Counts from one scheduler pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerResult {
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub waiting_approval: usize,
}

pub struct Scheduler {
    db: Database,
    executor: Arc<AgentExecutor>,
    zombie_stale_after: chrono::Duration,
}

impl Scheduler {
    pub fn new(
        db: Database,
        executor: Arc<AgentExecutor>,
        zombie_stale_after: std::time::Duration,
    ) -> Self {
        Self {
            db,
            executor,
            zombie_stale_after: chrono::Duration::from_std(zombie_stale_after)
                .unwrap_or_else(|_| chrono::Duration::hours(2)),
        }
    }

    /// Executes all agents that are due now.
    pub async fn run_scheduled_agents(&self) -> Result<SchedulerResult, AgentError> {
        let now = crate::db::now_utc();
        tracing::info!(%now, "scheduler evaluating agent schedules");

        let zombies = self
            .db
            .cleanup_zombie_executions(now - self.zombie_stale_after)
            .await?;
        if zombies > 0 {
            tracing::warn!(count = zombies, "scheduler cleaned up zombie executions");
        }

        let due_agents = self.db.get_due_agents(now).await?;
        tracing::info!(count = due_agents.len(), "scheduler found due agents");

        let mut result = SchedulerResult::default();
        for agent in due_agents {
            self.run_one(&agent, &mut result).await?;
        }

        tracing::info!(
            executed = result.executed,
            skipped = result.skipped,
            failed = result.failed,
            waiting_approval = result.waiting_approval,
            "scheduler completed"
        );
        Ok(result)
    }

    async fn run_one(
        &self,
        agent: &Agent,
        result: &mut SchedulerResult,
    ) -> Result<(), AgentError> {
        // Never race the user on a pending decision.
        if self.db.has_pending_approval(&agent.id).await? {
            tracing::debug!(agent_id = %agent.id, "skipping agent with pending approval");
            result.skipped += 1;
            return Ok(());
        }
        if self.db.has_running_execution(&agent.id).await? {
            tracing::debug!(agent_id = %agent.id, "skipping agent with running execution");
            result.skipped += 1;
            return Ok(());
        }

        let Some(user) = self.db.get_user_by_id(&agent.user_id).await? else {
            tracing::warn!(agent_id = %agent.id, user_id = %agent.user_id, "user not found");
            result.failed += 1;
            return Ok(());
        };

        let execution = match self
            .db
            .create_execution(&agent.id, TriggerType::Scheduled, None)
            .await
        {
            Ok(execution) => execution,
            // Lost the insert race to another run; treat as overlapping.
            Err(AgentError::Validation(_)) => {
                result.skipped += 1;
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        tracing::info!(agent_id = %agent.id, agent_name = %agent.name, "executing agent");
        let outcome = self
            .executor
            .clone()
            .execute(agent, &user, TriggerType::Scheduled, &execution.id, &[], None)
            .await;

        match outcome {
            RunOutcome::Completed => {
                self.db
                    .update_execution(&execution.id, ExecutionStatus::Completed, None)
                    .await?;
                result.executed += 1;
            }
            RunOutcome::WaitingApproval { .. } => {
                // The executor already set waiting_approval; leave it be.
                result.waiting_approval += 1;
            }
            RunOutcome::Failed(error) => {
                self.db
                    .update_execution(&execution.id, ExecutionStatus::Failed, Some(&error))
                    .await?;
                result.failed += 1;
                tracing::warn!(agent_id = %agent.id, %error, "agent execution failed");
                self.advance_next_run_on_failure(agent).await?;
            }
        }
        Ok(())
    }

    /// On success `update_agent_last_run` moves the schedule forward; on
    /// failure it must be advanced here, or the agent is re-selected on
    /// every tick and failures turn into a retry storm.
    async fn advance_next_run_on_failure(&self, agent: &Agent) -> Result<(), AgentError> {
        let Some(schedule) = &agent.schedule else {
            return Ok(());
        };
        match next_run_after(schedule, &agent.timezone, crate::db::now_utc()) {
            Ok(Some(next_run)) => {
                self.db.update_agent_next_run(&agent.id, next_run).await?;
                tracing::debug!(agent_id = %agent.id, %next_run, "advanced next_run_at after failure");
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(agent_id = %agent.id, %error, "could not advance schedule");
            }
        }
        Ok(())
    }

    /// Development loop: evaluates every `interval` until the task is
    /// aborted. Production invokes `run_scheduled_agents` from an external
    /// timer instead.
    pub fn spawn_dev_loop(
        self: Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(error) = self.run_scheduled_agents().await {
                    tracing::error!(%error, "scheduler pass failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_support::{seed_agent, seed_user, temp_db};
    use crate::llm::{MockImageGenerator, MockLlm};
    use crate::tool_buffer::ToolResultBuffer;
    use chrono::Duration as ChronoDuration;

    fn scheduler_with(db: &Database, reply: &str) -> Scheduler {
        let llm = Arc::new(MockLlm::with_no_tool_calls(reply));
        let factory: super::super::executor::LlmFactory = {
            let llm = llm.clone();
            Arc::new(move |_| llm.clone() as Arc<dyn crate::llm::LlmClient>)
        };
        let executor = Arc::new(AgentExecutor::new(
            db.clone(),
            ToolResultBuffer::new(std::time::Duration::from_secs(60)),
            factory,
            Arc::new(MockLlm::with_no_tool_calls("summary")),
            Arc::new(MockImageGenerator),
            Config::default(),
        ));
        Scheduler::new(db.clone(), executor, std::time::Duration::from_secs(2 * 3600))
    }

    async fn make_due(db: &Database, agent_id: &str) {
        db.update_agent_next_run(agent_id, crate::db::now_utc() - ChronoDuration::minutes(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn due_agent_executes_and_completes() {
        let (db, _dir) = temp_db().await;
        let user = seed_user(&db).await;
        let agent = seed_agent(&db, &user, "worker").await;
        make_due(&db, &agent.id).await;

        let scheduler = scheduler_with(&db, "All done for this scheduled run, see you next time.");
        let result = scheduler.run_scheduled_agents().await.unwrap();
        assert_eq!(result.executed, 1);
        assert_eq!(result.failed, 0);

        // next_run_at moved forward, so a second pass finds nothing due.
        let result = scheduler.run_scheduled_agents().await.unwrap();
        assert_eq!(result, SchedulerResult::default());
    }

    #[tokio::test]
    async fn pending_approval_skips_the_agent() {
        let (db, _dir) = temp_db().await;
        let user = seed_user(&db).await;
        let agent = seed_agent(&db, &user, "worker").await;
        make_due(&db, &agent.id).await;
        db.create_approval_request(&agent.id, &user.id, "email", serde_json::json!({}), "send")
            .await
            .unwrap();

        let scheduler = scheduler_with(&db, "never runs");
        let result = scheduler.run_scheduled_agents().await.unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.executed, 0);
    }

    #[tokio::test]
    async fn running_execution_skips_the_agent() {
        let (db, _dir) = temp_db().await;
        let user = seed_user(&db).await;
        let agent = seed_agent(&db, &user, "worker").await;
        make_due(&db, &agent.id).await;
        db.create_execution(&agent.id, TriggerType::Manual, None)
            .await
            .unwrap();

        let scheduler = scheduler_with(&db, "never runs");
        let result = scheduler.run_scheduled_agents().await.unwrap();
        assert_eq!(result.skipped, 1);
    }

    #[tokio::test]
    async fn failed_run_advances_next_run_to_prevent_retry_storms() {
        let (db, _dir) = temp_db().await;
        let user = seed_user(&db).await;
        let agent = seed_agent(&db, &user, "worker").await;
        make_due(&db, &agent.id).await;

        // Budget is already blown, so the executor fails immediately.
        db.save_message_cost("m1", &agent.conversation_id, &user.id, "m", 0, 0, 5.0, None)
            .await
            .unwrap();
        // seed_agent has no budget; set one at the row level.
        db.with_conn({
            let id = agent.id.clone();
            move |conn| {
                conn.execute(
                    "UPDATE agents SET budget_limit = 0.01 WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                Ok(())
            }
        })
        .await
        .unwrap();

        let scheduler = scheduler_with(&db, "never runs");
        let result = scheduler.run_scheduled_agents().await.unwrap();
        assert_eq!(result.failed, 1);

        let reloaded = db.get_agent_by_id(&agent.id).await.unwrap().unwrap();
        assert!(reloaded.next_run_at.unwrap() > crate::db::now_utc());
    }

    #[tokio::test]
    async fn zombie_executions_are_failed_on_the_next_pass() {
        let (db, _dir) = temp_db().await;
        let user = seed_user(&db).await;
        let agent = seed_agent(&db, &user, "worker").await;
        let execution = db
            .create_execution(&agent.id, TriggerType::Scheduled, None)
            .await
            .unwrap();
        // Backdate the execution past the staleness threshold.
        db.with_conn({
            let id = execution.id.clone();
            move |conn| {
                conn.execute(
                    "UPDATE agent_executions SET started_at = '2020-01-01T00:00:00.000000' \
                     WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                Ok(())
            }
        })
        .await
        .unwrap();

        let scheduler = scheduler_with(&db, "idle");
        scheduler.run_scheduled_agents().await.unwrap();
        let reloaded = db.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, ExecutionStatus::Failed);
    }
}
