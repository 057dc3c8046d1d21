use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::ids::StreamTarget;
use crate::types::{HealthReport, StatusReport, UploadReport};
use crate::ClientResult;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_CHAT_PATH: &str = "/chat";
pub const DEFAULT_UPLOAD_PATH: &str = "/upload";
pub const DEFAULT_STATUS_PATH: &str = "/status";
pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub chat_path: String,
    pub upload_path: String,
    pub status_path: String,
    pub health_path: String,
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            upload_path: DEFAULT_UPLOAD_PATH.to_string(),
            status_path: DEFAULT_STATUS_PATH.to_string(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
        }
    }

    pub fn with_chat_path(mut self, path: impl Into<String>) -> Self {
        self.chat_path = path.into();
        self
    }

    pub fn with_upload_path(mut self, path: impl Into<String>) -> Self {
        self.upload_path = path.into();
        self
    }

    pub fn with_status_path(mut self, path: impl Into<String>) -> Self {
        self.status_path = path.into();
        self
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// One query to stream an answer for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub target: StreamTarget,
    pub query: String,
}

impl ChatRequest {
    pub fn new(target: StreamTarget, query: impl Into<String>) -> Self {
        Self {
            target,
            query: query.into(),
        }
    }
}

/// Transport-agnostic payload forwarded by the stream worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Delta(String),
    Done,
    /// Application error reported inside the stream.
    Error(String),
    /// The request or the body read failed.
    Failed(String),
}

impl StreamEventPayload {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Delta(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type StreamWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Receiving half of one exchange.
///
/// Dropping it signals cancellation to the worker.
pub struct ChatEventStream {
    target: StreamTarget,
    events: mpsc::UnboundedReceiver<StreamEventMapped>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct ChatStreamHandle {
    pub stream: ChatEventStream,
    pub worker: StreamWorker,
}

impl ChatEventStream {
    pub(crate) fn new(
        target: StreamTarget,
        events: mpsc::UnboundedReceiver<StreamEventMapped>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            target,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub async fn recv(&mut self) -> Option<StreamEventMapped> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEventMapped> {
        self.events.try_recv().ok()
    }

    /// Asks the worker to stop; returns false if it already finished or was cancelled.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ChatEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Everything a chat session needs from the server.
pub trait ChatBackend: Send + Sync {
    fn id(&self) -> &str;
    fn stream_chat(&self, request: ChatRequest) -> ClientResult<ChatStreamHandle>;
    fn upload<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, ClientResult<UploadReport>>;
    fn status<'a>(&'a self) -> BoxFuture<'a, ClientResult<StatusReport>>;
    fn health<'a>(&'a self) -> BoxFuture<'a, ClientResult<HealthReport>>;
}

/// Creates the channel pair shared by a worker and its [`ChatEventStream`].
pub fn make_event_stream(
    target: StreamTarget,
) -> (
    mpsc::UnboundedSender<StreamEventMapped>,
    ChatEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ChatEventStream::new(target, event_rx, cancel_tx),
        cancel_rx,
    )
}
