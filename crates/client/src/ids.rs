use std::fmt;
use std::str::FromStr;

use snafu::ResultExt;
use uuid::Uuid;

use super::error::{ClientError, ClientResult, InvalidIdSnafu};

// All id wrappers share one shape so they stay interchangeable at the wire boundary.
macro_rules! define_chat_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> ClientResult<Self> {
                let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
                    stage: "parse-chat-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl FromStr for $name {
            type Err = ClientError;

            fn from_str(raw: &str) -> ClientResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_chat_id!(SessionId, "session-id");
define_chat_id!(ExchangeId, "exchange-id");
define_chat_id!(MessageId, "message-id");

/// Routing key for one exchange's events.
///
/// A fresh exchange id is minted for every send, so events from an abandoned
/// exchange never match the active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub session_id: SessionId,
    pub exchange_id: ExchangeId,
}

impl StreamTarget {
    pub const fn new(session_id: SessionId, exchange_id: ExchangeId) -> Self {
        Self {
            session_id,
            exchange_id,
        }
    }

    /// Starts a new exchange inside the given session.
    pub fn next_exchange(session_id: SessionId) -> Self {
        Self::new(session_id, ExchangeId::new_v7())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_display() {
        let id = MessageId::new_v7();
        let parsed: MessageId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        let error = SessionId::parse("not-a-uuid").unwrap_err();
        assert!(matches!(
            error,
            ClientError::InvalidId {
                id_type: "session-id",
                ..
            }
        ));
    }

    #[test]
    fn next_exchange_keeps_session() {
        let session_id = SessionId::new_v7();
        let first = StreamTarget::next_exchange(session_id);
        let second = StreamTarget::next_exchange(session_id);
        assert_eq!(first.session_id, second.session_id);
        assert_ne!(first, second);
    }
}
