//! One-shot scheduler invocation for production timers (cron/systemd).
//! Runs a single evaluation pass and exits non-zero on error.

use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use serve::AppState;
use skein::autonomous::Scheduler;
use skein::db::Database;
use skein::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let db = Database::open(&config.database_path).await?;
    let state = AppState::new(db.clone(), config.clone());
    let scheduler = Arc::new(Scheduler::new(
        db,
        state.executor.clone(),
        config.zombie_stale_after,
    ));

    let result = scheduler.run_scheduled_agents().await?;
    println!(
        "executed={} skipped={} failed={} waiting_approval={}",
        result.executed, result.skipped, result.failed, result.waiting_approval
    );
    Ok(())
}
