//! Byte-stream to event-stream plumbing.
//!
//! [`event_stream`] wraps any chunk source with a [`Reassembler`]. Source errors
//! come out as `Err` items so transport failures stay distinguishable from an
//! in-band [`StreamEvent::Error`]. [`pump_events`] forwards one exchange's
//! events to its [`ChatEventStream`](crate::ChatEventStream) until a terminal
//! event, exhaustion, failure or cancellation.

use std::fmt::Display;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::backend::{StreamEventMapped, StreamEventPayload};
use crate::ids::StreamTarget;
use crate::reassembler::{Reassembler, StreamEvent};

/// Lazily reassembles a chunk source into events.
///
/// The stream ends after a terminal event, after the first source error, or
/// after the source is exhausted and the residual buffer has been flushed.
pub fn event_stream<S, B, E>(chunks: S) -> impl Stream<Item = Result<StreamEvent, E>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Send + 'static,
{
    async_stream::stream! {
        let mut chunks = std::pin::pin!(chunks);
        let mut reassembler = Reassembler::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };

            for event in reassembler.push(chunk.as_ref()) {
                yield Ok(event);
            }

            if reassembler.is_finished() {
                return;
            }
        }

        for event in reassembler.finish() {
            yield Ok(event);
        }
    }
}

/// How a pumped exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// A `Done` or in-band `Error` event was forwarded.
    Terminal,
    /// The source ran dry without a terminal event; `Done` was forwarded.
    Exhausted,
    /// The source failed; `Failed` was forwarded.
    Failed,
    /// Cancellation was requested; nothing further was forwarded.
    Cancelled,
    /// The receiver went away.
    Abandoned,
}

impl StreamEvent {
    fn into_payload(self) -> StreamEventPayload {
        match self {
            Self::Delta { text } => StreamEventPayload::Delta(text),
            Self::Done => StreamEventPayload::Done,
            Self::Error { message } => StreamEventPayload::Error(message),
        }
    }
}

pub async fn pump_events<S, E>(
    target: StreamTarget,
    events: S,
    event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
    cancel_rx: &mut oneshot::Receiver<()>,
) -> PumpOutcome
where
    S: Stream<Item = Result<StreamEvent, E>>,
    E: Display,
{
    let mut events = std::pin::pin!(events);

    loop {
        tokio::select! {
            biased;
            _ = &mut *cancel_rx => {
                tracing::debug!(target = ?target, "chat stream cancelled");
                return PumpOutcome::Cancelled;
            }
            next_event = events.next() => {
                match next_event {
                    Some(Ok(event)) => {
                        let terminal = event.is_terminal();
                        let mapped = StreamEventMapped {
                            target,
                            payload: event.into_payload(),
                        };
                        if event_tx.send(mapped).is_err() {
                            return PumpOutcome::Abandoned;
                        }
                        if terminal {
                            return PumpOutcome::Terminal;
                        }
                    }
                    Some(Err(error)) => {
                        tracing::warn!(
                            target = ?target,
                            error = %error,
                            "chat stream transport failed"
                        );
                        let _ = event_tx.send(StreamEventMapped {
                            target,
                            payload: StreamEventPayload::Failed(error.to_string()),
                        });
                        return PumpOutcome::Failed;
                    }
                    None => {
                        tracing::debug!(target = ?target, "chat stream ended without completion marker");
                        let _ = event_tx.send(StreamEventMapped {
                            target,
                            payload: StreamEventPayload::Done,
                        });
                        return PumpOutcome::Exhausted;
                    }
                }
            }
        }
    }
}
