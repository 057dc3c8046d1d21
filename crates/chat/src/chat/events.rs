use chatline_client::StatusReport;
use tokio::sync::mpsc;

use crate::chat::message::{Message, MessageId, MessageStatus, StreamTarget, StreamTransition};
use crate::notification::Notification;

/// How one exchange ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The server finished the answer, or the body ended without a marker.
    Completed,
    /// The server reported an error inside the stream.
    Errored(String),
    /// The request or the body read failed.
    Failed(String),
    /// The user stopped the exchange.
    Cancelled,
}

impl ExchangeOutcome {
    /// Terminal stream transition for the exchange that ended this way.
    pub fn stream_transition(&self, target: StreamTarget) -> StreamTransition {
        match self {
            Self::Completed => StreamTransition::Complete(target),
            Self::Errored(message) | Self::Failed(message) => StreamTransition::Fail {
                target,
                message: message.clone(),
            },
            Self::Cancelled => StreamTransition::Cancel(target),
        }
    }

    /// Final status of the assistant placeholder.
    pub fn message_status(&self) -> MessageStatus {
        match self {
            Self::Completed => MessageStatus::Done,
            Self::Errored(message) | Self::Failed(message) => MessageStatus::Error(message.clone()),
            Self::Cancelled => MessageStatus::Cancelled,
        }
    }
}

/// State changes published by a [`ChatSession`](crate::chat::ChatSession).
///
/// Front ends render from these instead of polling the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    MessageAdded(Message),
    DeltaAppended {
        message_id: MessageId,
        delta: String,
    },
    /// A message changed other than by a delta: status or replaced content.
    MessageUpdated(Message),
    TypingChanged(bool),
    Notified(Notification),
    ExchangeFinished {
        target: StreamTarget,
        outcome: ExchangeOutcome,
    },
    StatusRefreshed(StatusReport),
    DraftChanged(String),
}

pub type UpdateSender = mpsc::UnboundedSender<SessionUpdate>;
pub type UpdateReceiver = mpsc::UnboundedReceiver<SessionUpdate>;
