//! Environment-driven configuration.
//!
//! `Config::from_env()` reads `.env` (via dotenv) and process env once at
//! startup; every knob has a default so a bare environment still runs.
//! `validate()` returns human-readable errors instead of panicking.

use std::time::Duration;

/// All tunables for the core and the server, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// API key for the Gemini REST client.
    pub gemini_api_key: String,
    /// Default chat model.
    pub default_model: String,
    /// Cheap model for classification, titles, and compaction summaries.
    pub assist_model: String,
    /// Image generation model.
    pub image_model: String,

    /// Planning is only considered for user messages at least this long.
    pub planning_min_length: usize,
    /// Whether the plan node is enabled at all.
    pub planning_enabled: bool,
    /// Tool-failure retries the self-correction node allows per request.
    pub max_tool_retries: u32,
    /// Absolute cap on graph node visits per request.
    pub recursion_limit: u32,

    /// Tool result buffer entry lifetime.
    pub tool_result_ttl: Duration,
    /// Janitor wake interval.
    pub tool_result_cleanup_interval: Duration,

    /// Transient-error retries around LLM invocations.
    pub agent_max_retries: u32,
    pub agent_retry_base_delay: Duration,
    pub agent_retry_max_delay: Duration,

    /// Autonomous conversation compaction: trigger threshold and how many
    /// recent messages survive untouched.
    pub compaction_threshold: usize,
    pub compaction_keep_recent: usize,

    /// Scheduler tick interval (dev background loop).
    pub scheduler_interval: Duration,
    /// Executions stuck in running/waiting_approval longer than this are
    /// marked failed by zombie recovery.
    pub zombie_stale_after: Duration,

    /// Streaming cleanup: how long to wait for the producer, then how long
    /// to give the consumer before checking whether the message was saved.
    pub stream_cleanup_thread_timeout: Duration,
    pub stream_cleanup_wait_delay: Duration,
    /// Bounded event queue between producer and consumer.
    pub stream_queue_capacity: usize,
    /// Insert an empty assistant placeholder before streaming starts.
    pub stream_placeholder_enabled: bool,

    /// Conversation title generation limits.
    pub title_max_length: usize,
    pub title_context_max_length: usize,

    /// SQLite database path.
    pub database_path: String,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(key, default))
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            default_model: "gemini-3-flash-preview".into(),
            assist_model: "gemini-2.0-flash".into(),
            image_model: "gemini-3-pro-image-preview".into(),
            planning_min_length: 120,
            planning_enabled: true,
            max_tool_retries: 2,
            recursion_limit: 25,
            tool_result_ttl: Duration::from_secs(3600),
            tool_result_cleanup_interval: Duration::from_secs(300),
            agent_max_retries: 3,
            agent_retry_base_delay: Duration::from_secs(2),
            agent_retry_max_delay: Duration::from_secs(60),
            compaction_threshold: 50,
            compaction_keep_recent: 10,
            scheduler_interval: Duration::from_secs(60),
            zombie_stale_after: Duration::from_secs(2 * 3600),
            stream_cleanup_thread_timeout: Duration::from_secs(600),
            stream_cleanup_wait_delay: Duration::from_secs(1),
            stream_queue_capacity: 256,
            stream_placeholder_enabled: true,
            title_max_length: 60,
            title_context_max_length: 500,
            database_path: "skein.db".into(),
        }
    }
}

impl Config {
    /// Loads `.env` then builds the config from process environment.
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        let defaults = Config::default();
        Self {
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            default_model: env_string("DEFAULT_MODEL", &defaults.default_model),
            assist_model: env_string("ASSIST_MODEL", &defaults.assist_model),
            image_model: env_string("IMAGE_MODEL", &defaults.image_model),
            planning_min_length: env_parse("PLANNING_MIN_LENGTH", defaults.planning_min_length),
            planning_enabled: env_bool("PLANNING_ENABLED", defaults.planning_enabled),
            max_tool_retries: env_parse("MAX_TOOL_RETRIES", defaults.max_tool_retries),
            recursion_limit: env_parse("RECURSION_LIMIT", defaults.recursion_limit),
            tool_result_ttl: env_secs("TOOL_RESULT_TTL_SECONDS", 3600),
            tool_result_cleanup_interval: env_secs("TOOL_RESULT_CLEANUP_INTERVAL_SECONDS", 300),
            agent_max_retries: env_parse("AGENT_MAX_RETRIES", defaults.agent_max_retries),
            agent_retry_base_delay: env_secs("AGENT_RETRY_BASE_DELAY_SECONDS", 2),
            agent_retry_max_delay: env_secs("AGENT_RETRY_MAX_DELAY_SECONDS", 60),
            compaction_threshold: env_parse(
                "AGENT_COMPACTION_THRESHOLD",
                defaults.compaction_threshold,
            ),
            compaction_keep_recent: env_parse(
                "AGENT_COMPACTION_KEEP_RECENT",
                defaults.compaction_keep_recent,
            ),
            scheduler_interval: env_secs("SCHEDULER_INTERVAL_SECONDS", 60),
            zombie_stale_after: env_secs("ZOMBIE_EXECUTION_STALE_SECONDS", 2 * 3600),
            stream_cleanup_thread_timeout: env_secs("STREAM_CLEANUP_THREAD_TIMEOUT", 600),
            stream_cleanup_wait_delay: env_secs("STREAM_CLEANUP_WAIT_DELAY", 1),
            stream_queue_capacity: env_parse(
                "STREAM_QUEUE_CAPACITY",
                defaults.stream_queue_capacity,
            ),
            stream_placeholder_enabled: env_bool(
                "STREAM_PLACEHOLDER_ENABLED",
                defaults.stream_placeholder_enabled,
            ),
            title_max_length: env_parse("TITLE_MAX_LENGTH", defaults.title_max_length),
            title_context_max_length: env_parse(
                "TITLE_CONTEXT_MAX_LENGTH",
                defaults.title_context_max_length,
            ),
            database_path: env_string("DATABASE_PATH", &defaults.database_path),
        }
    }

    /// Validates required settings; returns clear guidance per problem.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.gemini_api_key.is_empty() {
            errors.push(
                "GEMINI_API_KEY is required. Get an API key and set it in .env".to_string(),
            );
        }
        if self.max_tool_retries > 10 {
            errors.push(format!(
                "MAX_TOOL_RETRIES must be at most 10, got {}",
                self.max_tool_retries
            ));
        }
        if self.recursion_limit == 0 {
            errors.push("RECURSION_LIMIT must be positive".to_string());
        }
        if self.compaction_keep_recent >= self.compaction_threshold {
            errors.push(format!(
                "AGENT_COMPACTION_KEEP_RECENT ({}) must be below AGENT_COMPACTION_THRESHOLD ({})",
                self.compaction_keep_recent, self.compaction_threshold
            ));
        }
        if self.stream_queue_capacity == 0 {
            errors.push("STREAM_QUEUE_CAPACITY must be positive".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_only_misses_api_key() {
        let cfg = Config::default();
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("GEMINI_API_KEY"));
    }

    #[test]
    fn keep_recent_must_stay_below_threshold() {
        let cfg = Config {
            gemini_api_key: "key".into(),
            compaction_threshold: 10,
            compaction_keep_recent: 10,
            ..Config::default()
        };
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("KEEP_RECENT")));
    }
}
