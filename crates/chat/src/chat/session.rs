use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chatline_client::{
    ChatBackend, ChatRequest, ChatStreamHandle, ClientError, StatusReport, StreamEventMapped,
    StreamEventPayload,
};
use snafu::{ResultExt, Snafu, ensure};
use tokio::sync::{mpsc, watch};

use crate::chat::events::{ExchangeOutcome, SessionUpdate, UpdateReceiver, UpdateSender};
use crate::chat::message::{
    Conversation, Message, MessageId, MessageStatus, Role, SessionId, StreamState, StreamTarget,
    StreamTransition,
};
use crate::chat::suggestions::normalize_suggestions;
use crate::notification::{NotificationCenter, NotificationKind};
use crate::settings::ChatSettings;
use crate::upload::{UploadModal, UploadOutcome, run_upload};

/// Assistant text written when the exchange could not be completed.
pub const GENERIC_FAILURE_MESSAGE: &str = "Sorry, there was an error processing your request.";

const ENDED_EARLY_MESSAGE: &str = "chat stream ended before a terminal event";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("query is empty on `{stage}`"))]
    EmptyQuery { stage: &'static str },
    #[snafu(display("an answer is already streaming for {active:?} on `{stage}`"))]
    Busy {
        stage: &'static str,
        active: StreamTarget,
    },
    #[snafu(display("no suggestion at index {index} (have {available}) on `{stage}`"))]
    UnknownSuggestion {
        stage: &'static str,
        index: usize,
        available: usize,
    },
    #[snafu(display("backend request failed on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: ClientError,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Stops the in-flight exchange of a [`ChatSession`] from another task.
#[derive(Clone)]
pub struct StopHandle {
    stop_tx: Arc<watch::Sender<u64>>,
    busy: Arc<AtomicBool>,
}

impl StopHandle {
    /// Returns false when nothing was streaming.
    pub fn stop(&self) -> bool {
        if !self.busy.load(Ordering::Acquire) {
            return false;
        }

        self.stop_tx.send_modify(|generation| *generation = generation.wrapping_add(1));
        true
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveExchange {
    target: StreamTarget,
    assistant_message_id: MessageId,
}

/// One chat conversation against a [`ChatBackend`].
///
/// All state changes happen on the task that owns the session; the stream
/// worker only forwards events. Every change is also published as a
/// [`SessionUpdate`].
pub struct ChatSession {
    conversation: Conversation,
    backend: Arc<dyn ChatBackend>,
    draft: String,
    suggestions: Vec<String>,
    notifications: NotificationCenter,
    upload: UploadModal,
    updates: UpdateSender,
    stop_tx: Arc<watch::Sender<u64>>,
    busy: Arc<AtomicBool>,
    active: Option<ActiveExchange>,
    last_status: Option<StatusReport>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: &ChatSettings) -> (Self, UpdateReceiver) {
        let (updates, update_rx) = mpsc::unbounded_channel();
        let (stop_tx, _) = watch::channel(0);

        let session = Self {
            conversation: Conversation::new(SessionId::new_v7()),
            backend,
            draft: String::new(),
            suggestions: normalize_suggestions(settings.suggestions.clone()),
            notifications: NotificationCenter::new(settings.notification_ttl()),
            upload: UploadModal::default(),
            updates,
            stop_tx: Arc::new(stop_tx),
            busy: Arc::new(AtomicBool::new(false)),
            active: None,
            last_status: None,
        };
        (session, update_rx)
    }

    pub fn id(&self) -> SessionId {
        self.conversation.id
    }

    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }

    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.conversation.message(id)
    }

    pub fn stream_state(&self) -> &StreamState {
        &self.conversation.stream_state
    }

    /// True while an answer streams; the input should not accept another query.
    pub fn is_typing(&self) -> bool {
        self.conversation.stream_state.is_streaming()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
        self.emit(SessionUpdate::DraftChanged(self.draft.clone()));
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// Copies a suggestion into the draft without sending it.
    pub fn select_suggestion(&mut self, index: usize) -> SessionResult<&str> {
        let available = self.suggestions.len();
        let Some(suggestion) = self.suggestions.get(index).cloned() else {
            return UnknownSuggestionSnafu {
                stage: "select-suggestion",
                index,
                available,
            }
            .fail();
        };

        self.set_draft(suggestion);
        Ok(&self.draft)
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationCenter {
        &mut self.notifications
    }

    pub fn last_status(&self) -> Option<&StatusReport> {
        self.last_status.as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: Arc::clone(&self.stop_tx),
            busy: Arc::clone(&self.busy),
        }
    }

    /// Sends the trimmed draft; the draft is cleared even if sending fails.
    pub async fn submit_draft(&mut self) -> SessionResult<ExchangeOutcome> {
        let query = std::mem::take(&mut self.draft);
        self.emit(SessionUpdate::DraftChanged(String::new()));
        self.send(&query).await
    }

    /// Runs one exchange to its end and returns how it ended.
    pub async fn send(&mut self, query: &str) -> SessionResult<ExchangeOutcome> {
        // Subscribe before the busy flag flips so no stop request is missed.
        let mut stop_rx = self.stop_tx.subscribe();
        let active = self.begin_exchange(query)?;
        let request = ChatRequest::new(active.target, query.trim());

        tracing::info!(target = ?active.target, backend = self.backend.id(), "sending chat query");

        let outcome = match self.backend.stream_chat(request) {
            Ok(handle) => self.drive(handle, &mut stop_rx).await,
            Err(error) => {
                tracing::error!(target = ?active.target, error = %error, "failed to open chat stream");
                self.apply_event(StreamEventMapped {
                    target: active.target,
                    payload: StreamEventPayload::Failed(error.to_string()),
                })
                .unwrap_or_else(|| ExchangeOutcome::Failed(error.to_string()))
            }
        };

        self.finalize(active, outcome.clone());
        Ok(outcome)
    }

    /// Applies one event of the active exchange.
    ///
    /// Returns the outcome once the event ends the exchange. Events for any
    /// other exchange are dropped.
    pub fn apply_event(&mut self, event: StreamEventMapped) -> Option<ExchangeOutcome> {
        let Some(active) = self
            .active
            .filter(|active| active.target == event.target)
            .filter(|_| self.conversation.stream_state.accepts_stream_event(event.target))
        else {
            tracing::debug!(target = ?event.target, "ignoring event for inactive exchange");
            return None;
        };

        match event.payload {
            StreamEventPayload::Delta(delta) => {
                if let Some(message) = self.conversation.message_mut(active.assistant_message_id) {
                    message.append_delta(&delta);
                }
                self.emit(SessionUpdate::DeltaAppended {
                    message_id: active.assistant_message_id,
                    delta,
                });
                None
            }
            StreamEventPayload::Done => Some(ExchangeOutcome::Completed),
            StreamEventPayload::Error(message) => {
                tracing::warn!(target = ?active.target, error = %message, "server reported an error");
                if let Some(placeholder) = self.conversation.message_mut(active.assistant_message_id)
                {
                    placeholder.replace_content(format!("Error: {message}"));
                }
                Some(ExchangeOutcome::Errored(message))
            }
            StreamEventPayload::Failed(details) => {
                self.record_failure(active, &details);
                Some(ExchangeOutcome::Failed(details))
            }
        }
    }

    /// Uploads a document; chat state is left alone.
    pub async fn upload(&mut self, path: &Path) -> UploadOutcome {
        self.upload.open();
        self.upload.select(path);

        let outcome = run_upload(self.backend.as_ref(), &mut self.upload)
            .await
            .unwrap_or_else(|| UploadOutcome::Failed {
                file_name: path.display().to_string(),
                message: "another upload is in progress".to_string(),
            });
        self.upload.close();

        let kind = if outcome.is_success() {
            NotificationKind::Success
        } else {
            NotificationKind::Error
        };
        self.notify(kind, outcome.notification_text());
        outcome
    }

    pub async fn refresh_status(&mut self) -> SessionResult<StatusReport> {
        let status = self.backend.status().await.context(BackendSnafu {
            stage: "refresh-status",
        })?;

        self.last_status = Some(status.clone());
        self.emit(SessionUpdate::StatusRefreshed(status.clone()));
        Ok(status)
    }

    fn begin_exchange(&mut self, query: &str) -> SessionResult<ActiveExchange> {
        ensure!(
            !query.trim().is_empty(),
            EmptyQuerySnafu {
                stage: "begin-exchange",
            }
        );
        if let Some(active) = self.conversation.stream_state.active_target() {
            return BusySnafu {
                stage: "begin-exchange",
                active,
            }
            .fail();
        }

        let target = StreamTarget::next_exchange(self.conversation.id);
        if let Err(rejection) = self
            .conversation
            .apply_stream_transition(StreamTransition::Start(target))
        {
            tracing::warn!(target = ?target, rejection = ?rejection, "stream start rejected");
            return BusySnafu {
                stage: "start-stream",
                active: target,
            }
            .fail();
        }

        let user_message = Message::user(query.trim());
        let placeholder = Message::assistant_streaming(target.exchange_id);
        let active = ActiveExchange {
            target,
            assistant_message_id: placeholder.id,
        };

        self.push_message(user_message);
        self.push_message(placeholder);
        self.active = Some(active);
        self.busy.store(true, Ordering::Release);
        self.emit(SessionUpdate::TypingChanged(true));

        Ok(active)
    }

    async fn drive(
        &mut self,
        handle: ChatStreamHandle,
        stop_rx: &mut watch::Receiver<u64>,
    ) -> ExchangeOutcome {
        let ChatStreamHandle { mut stream, worker } = handle;
        let target = stream.target();
        let worker = tokio::spawn(worker);

        let outcome = loop {
            tokio::select! {
                biased;
                Ok(()) = stop_rx.changed() => {
                    tracing::info!(target = ?target, "chat stream stopped by user");
                    stream.cancel();
                    break ExchangeOutcome::Cancelled;
                }
                event = stream.recv() => {
                    let Some(event) = event else {
                        let ended = StreamEventMapped {
                            target,
                            payload: StreamEventPayload::Failed(ENDED_EARLY_MESSAGE.to_string()),
                        };
                        break self
                            .apply_event(ended)
                            .unwrap_or_else(|| ExchangeOutcome::Failed(ENDED_EARLY_MESSAGE.to_string()));
                    };
                    if let Some(outcome) = self.apply_event(event) {
                        break outcome;
                    }
                }
            }
        };

        // Dropping the stream releases the worker if it is still reading.
        drop(stream);
        if let Err(error) = worker.await {
            tracing::warn!(target = ?target, error = %error, "chat stream worker did not finish cleanly");
        }
        outcome
    }

    fn record_failure(&mut self, active: ActiveExchange, details: &str) {
        tracing::error!(target = ?active.target, error = %details, "chat exchange failed");

        let placeholder_is_empty = self
            .conversation
            .message(active.assistant_message_id)
            .is_some_and(|message| message.content().is_empty());

        if placeholder_is_empty {
            if let Some(placeholder) = self.conversation.message_mut(active.assistant_message_id)
            {
                placeholder.replace_content(GENERIC_FAILURE_MESSAGE);
            }
        } else {
            self.push_message(Message::new(
                MessageId::new_v7(),
                Role::Assistant,
                GENERIC_FAILURE_MESSAGE,
                MessageStatus::Error(details.to_string()),
            ));
        }

        self.notify(NotificationKind::Error, format!("Error: {details}"));
    }

    fn finalize(&mut self, active: ActiveExchange, outcome: ExchangeOutcome) {
        if let Err(rejection) = self
            .conversation
            .apply_stream_transition(outcome.stream_transition(active.target))
        {
            tracing::warn!(target = ?active.target, rejection = ?rejection, "terminal stream transition rejected");
        }

        if let Some(placeholder) = self.conversation.message_mut(active.assistant_message_id) {
            placeholder.status = outcome.message_status();
            let placeholder = placeholder.clone();
            self.emit(SessionUpdate::MessageUpdated(placeholder));
        }

        self.active = None;
        self.busy.store(false, Ordering::Release);
        self.emit(SessionUpdate::TypingChanged(false));
        self.emit(SessionUpdate::ExchangeFinished {
            target: active.target,
            outcome,
        });
    }

    fn push_message(&mut self, message: Message) {
        self.conversation.messages.push(message.clone());
        self.emit(SessionUpdate::MessageAdded(message));
    }

    fn notify(&mut self, kind: NotificationKind, message: impl Into<String>) {
        self.notify_at(kind, message, Instant::now());
    }

    /// Drops expired notifications before adding the new one.
    fn notify_at(&mut self, kind: NotificationKind, message: impl Into<String>, now: Instant) {
        let expired = self.notifications.prune(now);
        if expired > 0 {
            tracing::trace!(expired, "pruned expired notifications");
        }

        let notification = self.notifications.push_at(kind, message, now);
        self.emit(SessionUpdate::Notified(notification));
    }

    fn emit(&self, update: SessionUpdate) {
        if self.updates.send(update).is_err() {
            tracing::trace!("session update receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chatline_client::{BoxFuture, ClientResult, HealthReport, UploadReport};
    use tracing_test::traced_test;

    use super::*;

    struct IdleBackend;

    impl ChatBackend for IdleBackend {
        fn id(&self) -> &str {
            "idle"
        }

        fn stream_chat(&self, request: ChatRequest) -> ClientResult<ChatStreamHandle> {
            let (_event_tx, stream, _cancel_rx) = chatline_client::make_event_stream(request.target);
            Ok(ChatStreamHandle {
                stream,
                worker: Box::pin(async {}),
            })
        }

        fn upload<'a>(&'a self, _path: &'a Path) -> BoxFuture<'a, ClientResult<UploadReport>> {
            Box::pin(async { Ok(UploadReport::default()) })
        }

        fn status<'a>(&'a self) -> BoxFuture<'a, ClientResult<StatusReport>> {
            Box::pin(async { Ok(StatusReport::default()) })
        }

        fn health<'a>(&'a self) -> BoxFuture<'a, ClientResult<HealthReport>> {
            Box::pin(async {
                Ok(HealthReport {
                    status: "healthy".into(),
                })
            })
        }
    }

    fn session() -> (ChatSession, UpdateReceiver) {
        ChatSession::new(Arc::new(IdleBackend), &ChatSettings::default())
    }

    #[test]
    fn second_exchange_is_rejected_while_one_is_active() {
        let (mut session, _updates) = session();
        let first = session.begin_exchange("first").unwrap();
        assert!(session.is_typing());
        assert!(session.stop_handle().is_busy());

        let error = session.begin_exchange("second").unwrap_err();
        assert!(matches!(
            error,
            SessionError::Busy { active, .. } if active == first.target
        ));
        assert_eq!(session.messages().len(), 2);

        session.finalize(first, ExchangeOutcome::Completed);
        assert!(!session.is_typing());
        assert!(session.begin_exchange("second").is_ok());
    }

    #[test]
    fn deltas_after_a_terminal_outcome_are_dropped() {
        let (mut session, _updates) = session();
        let active = session.begin_exchange("hi").unwrap();
        session.finalize(active, ExchangeOutcome::Completed);

        let outcome = session.apply_event(StreamEventMapped {
            target: active.target,
            payload: StreamEventPayload::Delta("late".into()),
        });
        assert_eq!(outcome, None);
        assert_eq!(session.messages()[1].content(), "");
    }

    #[test]
    fn expired_notifications_are_dropped_on_the_next_notify() {
        let settings = ChatSettings {
            notification_ttl_ms: 1,
            ..ChatSettings::default()
        };
        let (mut session, _updates) = ChatSession::new(Arc::new(IdleBackend), &settings);
        let start = Instant::now();

        for step in 0..50u64 {
            let now = start + Duration::from_millis(step * 2);
            session.notify_at(NotificationKind::Success, "Uploaded notes.txt", now);
            assert_eq!(session.notifications().len(), 1);
        }

        let later = start + Duration::from_millis(200);
        assert_eq!(session.notifications().active(later).count(), 0);
    }

    #[test]
    fn live_notifications_are_kept() {
        let (mut session, _updates) = session();
        let start = Instant::now();
        session.notify_at(NotificationKind::Error, "Error: offline", start);
        session.notify_at(
            NotificationKind::Info,
            "retrying",
            start + Duration::from_millis(1000),
        );
        assert_eq!(session.notifications().len(), 2);

        session.notify_at(
            NotificationKind::Info,
            "still retrying",
            start + Duration::from_millis(3500),
        );
        assert_eq!(session.notifications().len(), 2);
    }

    #[traced_test]
    #[test]
    fn stale_events_are_logged() {
        let (mut session, _updates) = session();
        let stale = StreamTarget::next_exchange(session.id());
        session.apply_event(StreamEventMapped {
            target: stale,
            payload: StreamEventPayload::Done,
        });
        assert!(logs_contain("ignoring event for inactive exchange"));
    }
}
