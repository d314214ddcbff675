//! SSE stream event protocol: typed events + frame formatting.
//!
//! Wire shape for one chat/agent stream: line-delimited `data: {json}\n\n`
//! frames whose payloads are tagged [`ChatEvent`] values. This crate holds
//! only serde types and pure formatting; transport lives in `serve`.

mod event;
mod frame;

pub use event::{ChatEvent, ToolDisplayMeta, ToolIcon};
pub use frame::{write_sse_frame, SSE_FRAME_TERMINATOR};
