//! Axum app: shared state and router.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use skein::autonomous::{AgentExecutor, LlmFactory};
use skein::llm::{GeminiChat, GeminiImage, ImageGenerator, LlmClient};
use skein::{Config, ToolResultBuffer};
use skein::db::Database;

use crate::routes;

/// Everything the handlers share. Cheap to clone behind an `Arc`.
pub struct AppState {
    pub db: Database,
    pub buffer: ToolResultBuffer,
    pub config: Config,
    pub llm_factory: LlmFactory,
    pub assist_llm: Arc<dyn LlmClient>,
    pub image_generator: Arc<dyn ImageGenerator>,
    pub executor: Arc<AgentExecutor>,
}

impl AppState {
    /// Production wiring: Gemini REST clients for chat, assist, and image
    /// generation, all sharing one config.
    pub fn new(db: Database, config: Config) -> Arc<Self> {
        let api_key = config.gemini_api_key.clone();
        let llm_factory: LlmFactory = {
            let api_key = api_key.clone();
            Arc::new(move |model: &str| {
                Arc::new(GeminiChat::new(api_key.clone(), model)) as Arc<dyn LlmClient>
            })
        };
        let assist_llm: Arc<dyn LlmClient> = Arc::new(
            GeminiChat::new(api_key.clone(), config.assist_model.clone()).with_temperature(0.3),
        );
        let image_generator: Arc<dyn ImageGenerator> =
            Arc::new(GeminiImage::new(api_key, config.image_model.clone()));
        Self::with_clients(db, config, llm_factory, assist_llm, image_generator)
    }

    /// Wiring with injected clients (tests, alternative vendors).
    pub fn with_clients(
        db: Database,
        config: Config,
        llm_factory: LlmFactory,
        assist_llm: Arc<dyn LlmClient>,
        image_generator: Arc<dyn ImageGenerator>,
    ) -> Arc<Self> {
        let buffer = ToolResultBuffer::new(config.tool_result_ttl);
        let executor = Arc::new(AgentExecutor::new(
            db.clone(),
            buffer.clone(),
            llm_factory.clone(),
            assist_llm.clone(),
            image_generator.clone(),
            config.clone(),
        ));
        Arc::new(Self {
            db,
            buffer,
            config,
            llm_factory,
            assist_llm,
            image_generator,
            executor,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/api/conversations/:conversation_id/chat",
            post(crate::chat_stream::chat_stream),
        )
        .route("/api/agents/:agent_id/trigger", post(routes::trigger_agent))
        .route(
            "/api/approvals/:approval_id/decide",
            post(routes::decide_approval),
        )
        .with_state(state)
}
