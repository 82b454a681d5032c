use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::response::sse::Event;
use futures::Stream;
use obsgate_orchestrator::RunEvent;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Heartbeat interval `H` and slow-consumer timeout `T` (`spec.md` §4.8).
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    pub heartbeat: Duration,
    pub slow_consumer_after: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(15),
            slow_consumer_after: Duration::from_secs(30),
        }
    }
}

struct RelayState {
    receiver: mpsc::Receiver<RunEvent>,
    capacity_probe: mpsc::Sender<RunEvent>,
    ticker: tokio::time::Interval,
    last_yield: Instant,
    config: StreamConfig,
}

/// Bridges a run's bounded [`RunEvent`] channel into a framed SSE stream,
/// grounded on the teacher's `sse_run_stream` (`tandem-server/src/http.rs`):
/// a leading synthetic frame followed by a mapped live stream, except here
/// the liveness signal is a periodic heartbeat rather than `KeepAlive`, so
/// the `H`/`T` timers named in `spec.md` §4.8 are enforced explicitly
/// instead of left to axum's generic keep-alive.
///
/// `capacity_probe` must be a clone of the same [`mpsc::Sender`] the
/// orchestrator emits into; its `capacity()` is polled (never sent through)
/// to detect a buffer that has stayed full for `slow_consumer_after`.
pub fn sse_stream(
    receiver: mpsc::Receiver<RunEvent>,
    capacity_probe: mpsc::Sender<RunEvent>,
    config: StreamConfig,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let mut ticker = interval(config.heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let state = RelayState {
        receiver,
        capacity_probe,
        ticker,
        last_yield: Instant::now(),
        config,
    };

    // Checked against `last_yield` (set whenever we last produced a frame)
    // rather than a running "became full at" timer: a Stream only runs when
    // polled, so if the consumer stops pulling for `slow_consumer_after`
    // while the buffer sits full, that gap shows up here the moment polling
    // resumes, regardless of how long it was actually idle.
    futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        if state.capacity_probe.capacity() == 0 && state.last_yield.elapsed() >= state.config.slow_consumer_after {
            return Some((Ok(slow_consumer_event()), None));
        }

        tokio::select! {
            biased;
            event = state.receiver.recv() => match event {
                Some(event) => {
                    state.last_yield = Instant::now();
                    // `done`/`error` are terminal: the run is over, so the
                    // stream ends here rather than waiting on every sender
                    // clone (including our own capacity probe) to drop.
                    let next_state = if is_terminal(&event) { None } else { Some(state) };
                    Some((Ok(to_sse_event(&event)), next_state))
                }
                None => None,
            },
            _ = state.ticker.tick() => {
                state.last_yield = Instant::now();
                Some((Ok(heartbeat_event()), Some(state)))
            }
        }
    })
}

fn to_sse_event(event: &RunEvent) -> Event {
    let (name, sequence) = event_name_and_sequence(event);
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).id(sequence.to_string()).data(data)
}

fn event_name_and_sequence(event: &RunEvent) -> (&'static str, u64) {
    match event {
        RunEvent::Token { sequence, .. } => ("token", *sequence),
        RunEvent::ToolCallStart { sequence, .. } => ("tool_call_start", *sequence),
        RunEvent::ToolCallEnd { sequence, .. } => ("tool_call_end", *sequence),
        RunEvent::Citation { sequence, .. } => ("citation", *sequence),
        RunEvent::Checkpoint { sequence, .. } => ("checkpoint", *sequence),
        RunEvent::TokenBudget { sequence, .. } => ("token_budget", *sequence),
        RunEvent::Error { sequence, .. } => ("error", *sequence),
        RunEvent::Done { sequence } => ("done", *sequence),
    }
}

fn is_terminal(event: &RunEvent) -> bool {
    matches!(event, RunEvent::Done { .. } | RunEvent::Error { .. })
}

fn heartbeat_event() -> Event {
    Event::default().event("ping").data("{}")
}

fn slow_consumer_event() -> Event {
    tracing::warn!("stream buffer stayed full past the slow-consumer timeout; closing");
    Event::default().event("error").data(r#"{"reason":"slow_consumer"}"#)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn forwards_events_as_named_sse_frames() {
        let (tx, rx) = mpsc::channel(8);
        let stream = sse_stream(rx, tx.clone(), StreamConfig::default());
        tx.send(RunEvent::Done { sequence: 1 }).await.unwrap();
        drop(tx);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
    }

    #[tokio::test]
    async fn emits_heartbeat_when_idle() {
        let (tx, rx) = mpsc::channel(8);
        let config = StreamConfig {
            heartbeat: Duration::from_millis(10),
            slow_consumer_after: Duration::from_secs(30),
        };
        let mut stream = Box::pin(sse_stream(rx, tx, config));
        let first = tokio::time::timeout(Duration::from_millis(500), stream.next())
            .await
            .expect("heartbeat should fire")
            .unwrap();
        assert!(first.is_ok());
    }

    #[tokio::test]
    async fn closes_after_buffer_stays_full_past_slow_consumer_timeout() {
        let (tx, rx) = mpsc::channel(1);
        tx.try_send(RunEvent::Done { sequence: 1 }).unwrap();
        let config = StreamConfig {
            heartbeat: Duration::from_secs(60),
            slow_consumer_after: Duration::from_millis(20),
        };
        let probe = tx.clone();
        let mut stream = Box::pin(sse_stream(rx, probe, config));

        // Simulate the consumer going quiet: wait past `slow_consumer_after`
        // before ever polling the stream. The queued item stays undrained.
        tokio::time::sleep(Duration::from_millis(40)).await;

        let frame = stream.next().await.expect("stream yields a closing frame");
        assert!(frame.is_ok());
        assert!(stream.next().await.is_none());
    }
}
