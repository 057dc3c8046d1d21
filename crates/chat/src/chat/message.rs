pub use chatline_client::{ExchangeId, MessageId, SessionId, StreamTarget};

use crate::render::render_message;

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Streaming(ExchangeId),
    Done,
    Error(String),
    Cancelled,
}

/// One entry of the transcript.
///
/// `rendered_content` is derived from `content` and only exists for assistant
/// messages; every content mutation goes through methods that refresh it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    content: String,
    rendered_content: Option<String>,
    pub status: MessageStatus,
}

impl Message {
    /// Creates a message with explicit status.
    pub fn new(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        let mut message = Self {
            id,
            role,
            content: content.into(),
            rendered_content: None,
            status,
        };
        message.refresh_rendered();
        message
    }

    /// Creates a finished user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageId::new_v7(), Role::User, content, MessageStatus::Done)
    }

    /// Creates a finished assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(
            MessageId::new_v7(),
            Role::Assistant,
            content,
            MessageStatus::Done,
        )
    }

    /// Creates an empty assistant placeholder while streaming.
    pub fn assistant_streaming(exchange_id: ExchangeId) -> Self {
        Self::new(
            MessageId::new_v7(),
            Role::Assistant,
            String::new(),
            MessageStatus::Streaming(exchange_id),
        )
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn rendered_content(&self) -> Option<&str> {
        self.rendered_content.as_deref()
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.status, MessageStatus::Streaming(_))
    }

    /// Appends one delta; content only ever grows while streaming.
    pub fn append_delta(&mut self, delta: &str) {
        self.content.push_str(delta);
        self.refresh_rendered();
    }

    pub fn replace_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.refresh_rendered();
    }

    fn refresh_rendered(&mut self) {
        self.rendered_content = match self.role {
            Role::Assistant => Some(render_message(&self.content)),
            Role::User => None,
        };
    }
}

/// Transcript and stream state for one chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: SessionId,
    pub messages: Vec<Message>,
    pub stream_state: StreamState,
}

impl Conversation {
    /// Creates an empty conversation in idle state.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            messages: Vec::new(),
            stream_state: StreamState::Idle,
        }
    }

    /// Applies a deterministic stream transition.
    pub fn apply_stream_transition(
        &mut self,
        transition: StreamTransition,
    ) -> StreamTransitionResult {
        let next_state = self.stream_state.apply(transition)?;
        self.stream_state = next_state.clone();
        Ok(next_state)
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| message.id == id)
    }
}

/// Stream lifecycle of the conversation. `Streaming` doubles as the busy flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming(StreamTarget),
    Done(StreamTarget),
    Error {
        target: StreamTarget,
        message: String,
    },
    Cancelled(StreamTarget),
}

/// State transition input for stream lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Start(StreamTarget),
    Complete(StreamTarget),
    Fail {
        target: StreamTarget,
        message: String,
    },
    Cancel(StreamTarget),
}

/// Rejection reason for illegal stream transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

/// Result type for stream transition application.
pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// Returns active streaming target if and only if state is `Streaming`.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Streaming(target) => Some(*target),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }

    /// Returns true when incoming stream data matches the active exchange.
    pub fn accepts_stream_event(&self, target: StreamTarget) -> bool {
        matches!(self, Self::Streaming(active) if *active == target)
    }

    /// Applies one transition deterministically.
    ///
    /// Non-streaming states may start a new exchange directly. Any terminal
    /// transition (`Complete`/`Fail`/`Cancel`) must match the active exchange exactly.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Start(target) => self.apply_start(target),
            StreamTransition::Complete(target) => self.apply_terminal(target, Self::Done(target)),
            StreamTransition::Fail { target, message } => {
                self.apply_terminal(target, Self::Error { target, message })
            }
            StreamTransition::Cancel(target) => {
                self.apply_terminal(target, Self::Cancelled(target))
            }
        }
    }

    fn apply_start(&self, target: StreamTarget) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) if *active != target => {
                Err(StreamTransitionRejection::AlreadyStreaming {
                    active: *active,
                    attempted: target,
                })
            }
            Self::Streaming(_) => Ok(self.clone()),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Ok(Self::Streaming(target))
            }
        }
    }

    fn apply_terminal(&self, target: StreamTarget, next: Self) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) if *active == target => Ok(next),
            Self::Streaming(active) => Err(StreamTransitionRejection::SessionMismatch {
                active: *active,
                attempted: target,
            }),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }
}
