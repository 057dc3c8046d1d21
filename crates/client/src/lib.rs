//! Client side of the streaming chat protocol.
//!
//! The chat server answers `POST /chat` with a body of `data: <json>` lines.
//! [`Reassembler`] turns arbitrary body chunks back into [`StreamEvent`]s,
//! [`event_stream`] lifts that over an async byte source, and
//! [`HttpChatBackend`] wires it to reqwest behind the [`ChatBackend`] trait.

pub mod backend;
pub mod error;
pub mod http;
pub mod ids;
pub mod reassembler;
pub mod stream;
pub mod types;

pub use backend::{
    BoxFuture, ChatBackend, ChatEventStream, ChatRequest, ChatStreamHandle, ClientConfig,
    DEFAULT_BASE_URL, StreamEventMapped, StreamEventPayload, StreamWorker, make_event_stream,
};
pub use error::{ClientError, ClientResult};
pub use http::{HTTP_BACKEND_ID, HttpChatBackend};
pub use ids::{ExchangeId, MessageId, SessionId, StreamTarget};
pub use reassembler::{EVENT_MARKER, Reassembler, StreamEvent, parse_line};
pub use stream::{PumpOutcome, event_stream, pump_events};
pub use types::{DocumentStatus, HealthReport, StatusReport, UploadReport};
