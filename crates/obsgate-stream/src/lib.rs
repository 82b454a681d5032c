//! Stream Channel (C8): frames a run's [`obsgate_orchestrator::RunEvent`]s
//! as a sequenced, heartbeating SSE stream with a back-pressure watchdog.

mod channel;

pub use channel::{sse_stream, StreamConfig};
