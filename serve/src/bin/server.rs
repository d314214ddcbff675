//! Server entry point: tracing, config validation, database, background
//! tasks (tool buffer janitor, optional dev scheduler loop), axum.

use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use serve::{router, AppState};
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
    let errors = config.validate();
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("config error: {error}");
        }
        std::process::exit(1);
    }

    let db = Database::open(&config.database_path).await?;
    let state = AppState::new(db.clone(), config.clone());

    let _janitor = state
        .buffer
        .spawn_janitor(config.tool_result_cleanup_interval);

    // Dev convenience: in production the scheduler runs from an external
    // timer via the run-scheduler binary instead.
    if std::env::var("SCHEDULER_DEV_LOOP")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        let scheduler = Arc::new(Scheduler::new(
            db,
            state.executor.clone(),
            config.zombie_stale_after,
        ));
        let _scheduler_loop = scheduler.spawn_dev_loop(config.scheduler_interval);
        tracing::info!("dev scheduler loop enabled");
    }

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
