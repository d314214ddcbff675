//! HTTP server for skein.
//!
//! Routes: `POST /api/conversations/{id}/chat` (SSE), manual agent
//! trigger, approval decision, and `/healthz`. The streaming pipeline in
//! [`chat_stream`] guarantees exactly-one finalization per request:
//! assistant message saved, or placeholder deleted.

pub mod app;
pub mod chat_stream;
pub mod error;
pub mod routes;

pub use app::{router, AppState};
pub use chat_stream::{
    assistant_already_saved, cleanup_and_save, failure_cleanup, save_message, StreamSession,
};
pub use error::ApiError;
