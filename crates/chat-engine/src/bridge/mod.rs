//! Runs async provider work on one dedicated event-loop thread and exposes it
//! to synchronous callers.

pub mod event_loop;
pub mod sse;
pub mod stream;

pub use event_loop::{shared, shutdown_shared, EventLoop, Submitted};
pub use sse::{DoneEvent, SseEvent};
pub use stream::{start_stream, SseStream, StreamOptions, StreamedReply};
