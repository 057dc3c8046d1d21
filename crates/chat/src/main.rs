use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chatline::app::{self, TranscriptPrinter, format_status, format_suggestions};
use chatline::chat::{ChatSession, ExchangeOutcome};
use chatline::settings::{ChatSettings, SETTINGS_KEYS, SettingsStore};
use chatline_client::{ChatBackend, HttpChatBackend};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "chatline",
    version,
    about = "Terminal client for a streaming document chat server."
)]
struct Cli {
    /// Settings file to use instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Chat server base URL, overrides the settings file
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat (default)
    Chat,
    /// Ask one question and print the streamed answer
    Ask {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Upload a document to the server
    Upload { path: PathBuf },
    /// Show backend status
    Status,
    /// Check that the server is up
    Health,
    /// List suggested questions
    Suggestions,
    /// Show or change saved settings
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the settings file path and the effective settings
    Show,
    /// Save one setting to the settings file
    Set { key: String, value: String },
    /// List the keys `set` accepts
    Keys,
}

fn main() -> ExitCode {
    init_tracing();

    match try_main() {
        Ok(code) => code,
        Err(message) => {
            let _ = writeln!(io::stderr(), "Error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    // Logs go to stderr so they never mix with streamed answers.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn try_main() -> Result<ExitCode, String> {
    let cli = Cli::parse();

    // Defaults, then the settings file, then `CHATLINE_` env.
    let store = match &cli.config {
        Some(path) => SettingsStore::new(path.clone()),
        None => SettingsStore::load(),
    };

    // Config edits work on the saved file, before any flag override.
    if let Some(Command::Config { command }) = cli.command {
        return run_config(&store, command);
    }

    let mut settings = ChatSettings::clone(&store.settings());
    // The flag wins for this run only; nothing is written back.
    if let Some(base_url) = &cli.base_url {
        settings = settings.with_base_url(base_url);
        store.override_with(settings.clone());
    }
    tracing::debug!(config = ?store.config_path(), base_url = %settings.base_url, "settings loaded");

    // Endpoint validation happens here, before any command runs.
    let backend = HttpChatBackend::new(settings.to_client_config()).map_err(|error| error.to_string())?;
    let backend: Arc<dyn ChatBackend> = Arc::new(backend);
    let (mut session, mut updates) = ChatSession::new(Arc::clone(&backend), &settings);

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            app::run_chat(session, updates)
                .await
                .map_err(|error| error.to_string())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Ask { query } => {
            let mut printer = TranscriptPrinter::stdio();
            let outcome = app::ask(&mut session, &mut updates, &mut printer, &query.join(" "))
                .await
                .map_err(|error| error.to_string())?;
            // 130 matches the shell convention for an interrupted command.
            Ok(match outcome {
                ExchangeOutcome::Completed => ExitCode::SUCCESS,
                ExchangeOutcome::Cancelled => ExitCode::from(130),
                ExchangeOutcome::Errored(_) | ExchangeOutcome::Failed(_) => ExitCode::FAILURE,
            })
        }
        Command::Upload { path } => {
            // Upload results are reported as notifications on stderr.
            let outcome = session.upload(&path).await;
            let mut printer = TranscriptPrinter::stdio();
            app::drain_updates(&mut updates, &mut printer).map_err(|error| error.to_string())?;
            Ok(if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Status => {
            let report = session
                .refresh_status()
                .await
                .map_err(|error| error.to_string())?;
            println!("{}", format_status(&report));
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => {
            let report = backend.health().await.map_err(|error| error.to_string())?;
            println!("{}", report.status);
            Ok(if report.is_healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Suggestions => {
            println!("{}", format_suggestions(session.suggestions()));
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { command } => run_config(&store, command),
    }
}

fn run_config(store: &SettingsStore, command: ConfigCommand) -> Result<ExitCode, String> {
    match command {
        ConfigCommand::Show => {
            let settings = store.settings();
            let json =
                serde_json::to_string_pretty(&*settings).map_err(|error| error.to_string())?;
            println!("# {}", store.config_path().display());
            println!("{json}");
        }
        ConfigCommand::Set { key, value } => {
            let mut settings = ChatSettings::clone(&store.settings());
            settings
                .set(&key, &value)
                .map_err(|error| error.to_string())?;
            store.update(settings).map_err(|error| error.to_string())?;
            tracing::info!(key = %key, "setting saved");
        }
        ConfigCommand::Keys => {
            for key in SETTINGS_KEYS {
                println!("{key}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
