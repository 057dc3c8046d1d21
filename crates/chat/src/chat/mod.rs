/// Updates published by a session and exchange outcomes.
pub mod events;
/// Domain entities and deterministic stream state boundaries.
pub mod message;
pub mod session;
pub mod suggestions;

pub use events::{ExchangeOutcome, SessionUpdate, UpdateReceiver, UpdateSender};
pub use message::{
    Conversation, ExchangeId, Message, MessageId, MessageStatus, Role, SessionId, StreamState,
    StreamTarget, StreamTransition, StreamTransitionRejection, StreamTransitionResult,
};
pub use session::{
    ChatSession, GENERIC_FAILURE_MESSAGE, SessionError, SessionResult, StopHandle,
};
pub use suggestions::{DEFAULT_SUGGESTIONS, default_suggestions, normalize_suggestions};
