use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;

use chatline_client::StatusReport;
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::{
    ChatSession, ExchangeOutcome, Message, MessageId, MessageStatus, Role, SessionError,
    SessionUpdate, UpdateReceiver,
};

pub const ASSISTANT_PREFIX: &str = "assistant: ";
const PROMPT: &str = "> ";

const HELP: &str = "\
commands:
  /suggest        list suggested questions
  /use <n>        copy suggestion <n> into the draft, then press Enter to send it
  /upload <path>  upload a document
  /status         show backend status
  /help           show this help
  /quit           leave
Ctrl-C stops an answer while it streams.";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("terminal io failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("{source}"))]
    Session {
        stage: &'static str,
        source: SessionError,
    },
}

pub type AppResult<T> = Result<T, AppError>;

/// One line of input in the interactive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Send(String),
    SendDraft,
    Help,
    Suggest,
    UseSuggestion(usize),
    Upload(PathBuf),
    Status,
    Quit,
    Invalid(String),
}

impl ChatCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::SendDraft;
        }

        let Some(command) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };

        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (command, ""),
        };

        match (name, argument) {
            ("help", _) => Self::Help,
            ("suggest", _) => Self::Suggest,
            ("status", _) => Self::Status,
            ("quit" | "exit", _) => Self::Quit,
            ("use", argument) => match argument.parse::<usize>() {
                Ok(number) if number > 0 => Self::UseSuggestion(number - 1),
                _ => Self::Invalid("usage: /use <n>".to_string()),
            },
            ("upload", "") => Self::Invalid("usage: /upload <path>".to_string()),
            ("upload", path) => Self::Upload(PathBuf::from(path)),
            _ => Self::Invalid(format!("unknown command `/{name}`, try /help")),
        }
    }
}

/// Writes session updates as plain text.
///
/// Assistant text goes to `out` as it streams; notifications go to `err`.
pub struct TranscriptPrinter<O: Write, E: Write> {
    out: O,
    err: E,
    printed: HashMap<MessageId, String>,
    open_line: Option<MessageId>,
}

impl TranscriptPrinter<io::Stdout, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> TranscriptPrinter<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            printed: HashMap::new(),
            open_line: None,
        }
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }

    pub fn apply(&mut self, update: &SessionUpdate) -> io::Result<()> {
        match update {
            SessionUpdate::MessageAdded(message) if message.role == Role::Assistant => {
                self.write_assistant(message)?;
            }
            SessionUpdate::MessageAdded(_) => {}
            SessionUpdate::DeltaAppended { message_id, delta } => {
                self.start_line(*message_id)?;
                self.out.write_all(delta.as_bytes())?;
                self.printed.entry(*message_id).or_default().push_str(delta);
            }
            SessionUpdate::MessageUpdated(message) if message.role == Role::Assistant => {
                self.write_assistant(message)?;
                if message.status == MessageStatus::Cancelled {
                    self.start_line(message.id)?;
                    self.out.write_all(b" [stopped]")?;
                }
            }
            SessionUpdate::MessageUpdated(_) => {}
            SessionUpdate::Notified(notification) => {
                writeln!(self.err, "[{}] {}", notification.kind, notification.message)?;
            }
            SessionUpdate::StatusRefreshed(report) => {
                self.close_line()?;
                writeln!(self.out, "{}", format_status(report))?;
            }
            SessionUpdate::ExchangeFinished { .. } => {
                // Every exchange ends on its own line.
                self.close_line()?;
            }
            SessionUpdate::TypingChanged(_) | SessionUpdate::DraftChanged(_) => {}
        }

        self.out.flush()
    }

    fn write_assistant(&mut self, message: &Message) -> io::Result<()> {
        // Only the part not yet on screen is written.
        let printed = self.printed.get(&message.id).cloned().unwrap_or_default();
        let content = message.content();

        match content.strip_prefix(printed.as_str()) {
            Some("") => {}
            Some(rest) => {
                self.start_line(message.id)?;
                self.out.write_all(rest.as_bytes())?;
            }
            None => {
                // Content was replaced; print it again on a fresh line.
                if self.open_line == Some(message.id) {
                    self.close_line()?;
                }
                self.start_line(message.id)?;
                self.out.write_all(content.as_bytes())?;
            }
        }

        // Keep a prefix on screen for the placeholder.
        if content.is_empty() {
            self.start_line(message.id)?;
        }
        self.printed.insert(message.id, content.to_string());
        Ok(())
    }

    fn start_line(&mut self, message_id: MessageId) -> io::Result<()> {
        if self.open_line == Some(message_id) {
            return Ok(());
        }

        self.close_line()?;
        self.out.write_all(ASSISTANT_PREFIX.as_bytes())?;
        self.open_line = Some(message_id);
        Ok(())
    }

    fn close_line(&mut self) -> io::Result<()> {
        if self.open_line.take().is_some() {
            self.out.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// One line summary of the backend status.
pub fn format_status(report: &StatusReport) -> String {
    let mut parts = vec![format!(
        "status: {}",
        report.app_status.as_deref().unwrap_or("unknown")
    )];

    if report.has_documents() {
        parts.push(format!("documents: {}", report.document_count()));
    } else {
        parts.push("documents: none".to_string());
    }
    if let Some(path) = &report.pdf_path {
        parts.push(format!("document: {path}"));
    }
    if let Some(configured) = report.openai_configured {
        parts.push(format!("model configured: {configured}"));
    }

    parts.join(", ")
}

pub fn format_suggestions(suggestions: &[String]) -> String {
    suggestions
        .iter()
        .enumerate()
        .map(|(index, suggestion)| format!("  {}. {suggestion}", index + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs one exchange while printing its updates.
pub async fn ask<O: Write, E: Write>(
    session: &mut ChatSession,
    updates: &mut UpdateReceiver,
    printer: &mut TranscriptPrinter<O, E>,
    query: &str,
) -> AppResult<ExchangeOutcome> {
    print_while(updates, printer, session.send(query))
        .await?
        .context(SessionSnafu { stage: "send-query" })
}

/// Sends the current draft, clearing it, while printing its updates.
pub async fn send_draft<O: Write, E: Write>(
    session: &mut ChatSession,
    updates: &mut UpdateReceiver,
    printer: &mut TranscriptPrinter<O, E>,
) -> AppResult<ExchangeOutcome> {
    print_while(updates, printer, session.submit_draft())
        .await?
        .context(SessionSnafu { stage: "send-draft" })
}

/// Drives `work` to completion, printing updates as they arrive.
async fn print_while<T, O: Write, E: Write>(
    updates: &mut UpdateReceiver,
    printer: &mut TranscriptPrinter<O, E>,
    work: impl Future<Output = T>,
) -> AppResult<T> {
    tokio::pin!(work);

    let output = loop {
        tokio::select! {
            output = &mut work => break output,
            Some(update) = updates.recv() => {
                printer.apply(&update).context(TerminalSnafu { stage: "print-update" })?;
            }
        }
    };

    // The last updates of an exchange are queued before the future resolves.
    drain_updates(updates, printer)?;
    Ok(output)
}

/// Prints every update already queued.
pub fn drain_updates<O: Write, E: Write>(
    updates: &mut UpdateReceiver,
    printer: &mut TranscriptPrinter<O, E>,
) -> AppResult<()> {
    while let Ok(update) = updates.try_recv() {
        printer
            .apply(&update)
            .context(TerminalSnafu { stage: "print-update" })?;
    }
    Ok(())
}

/// Interactive loop over stdin until `/quit` or end of input.
pub async fn run_chat(mut session: ChatSession, mut updates: UpdateReceiver) -> AppResult<()> {
    let mut printer = TranscriptPrinter::stdio();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // Ctrl-C has to reach the session while `ask` holds it mutably.
    spawn_interrupt_handler(&session);

    println!("Ask a question about your documents. /help lists commands.");
    println!("{}", format_suggestions(session.suggestions()));

    loop {
        print_prompt(session.draft())?;
        // End of input leaves the loop like `/quit`.
        let Some(line) = lines
            .next_line()
            .await
            .context(TerminalSnafu { stage: "read-input" })?
        else {
            break;
        };

        let result = match ChatCommand::parse(&line) {
            ChatCommand::Quit => break,
            ChatCommand::Send(query) => ask(&mut session, &mut updates, &mut printer, &query)
                .await
                .map(|_| ()),
            // A bare Enter with no draft just shows the prompt again.
            ChatCommand::SendDraft if session.draft().trim().is_empty() => Ok(()),
            ChatCommand::SendDraft => send_draft(&mut session, &mut updates, &mut printer)
                .await
                .map(|_| ()),
            ChatCommand::Help => {
                println!("{HELP}");
                Ok(())
            }
            ChatCommand::Suggest => {
                println!("{}", format_suggestions(session.suggestions()));
                Ok(())
            }
            ChatCommand::UseSuggestion(index) => session
                .select_suggestion(index)
                .map(|_| ())
                .context(SessionSnafu {
                    stage: "select-suggestion",
                }),
            ChatCommand::Upload(path) => {
                // The outcome reaches the user as a notification.
                session.upload(&path).await;
                Ok(())
            }
            ChatCommand::Status => session
                .refresh_status()
                .await
                .map(|_| ())
                .context(SessionSnafu {
                    stage: "refresh-status",
                }),
            ChatCommand::Invalid(message) => {
                eprintln!("{message}");
                Ok(())
            }
        };

        // Commands other than sends leave their updates queued.
        drain_updates(&mut updates, &mut printer)?;
        // Session errors are shown and the loop goes on; terminal errors end it.
        if let Err(error) = result {
            tracing::debug!(error = %error, "chat command failed");
            eprintln!("{error}");
        }
    }

    Ok(())
}

/// Ctrl-C stops a streaming answer; when idle it leaves the program.
fn spawn_interrupt_handler(session: &ChatSession) {
    let stop = session.stop_handle();
    tokio::spawn(async move {
        loop {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %error, "failed to listen for ctrl-c");
                return;
            }
            // Nothing was streaming, so treat it as a normal interrupt.
            if !stop.stop() {
                std::process::exit(130);
            }
        }
    });
}

fn print_prompt(draft: &str) -> AppResult<()> {
    let mut stdout = io::stdout();
    let written = if draft.is_empty() {
        write!(stdout, "{PROMPT}")
    } else {
        write!(stdout, "{PROMPT}[draft: {draft}] ")
    };

    written.and_then(|()| stdout.flush()).context(TerminalSnafu {
        stage: "write-prompt",
    })
}
