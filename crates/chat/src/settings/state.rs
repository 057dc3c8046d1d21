use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chatline_client::ClientConfig;
use chatline_client::backend::{
    DEFAULT_BASE_URL, DEFAULT_CHAT_PATH, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEALTH_PATH,
    DEFAULT_STATUS_PATH, DEFAULT_UPLOAD_PATH,
};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::chat::suggestions::{default_suggestions, normalize_suggestions};
use crate::notification::DEFAULT_NOTIFICATION_TTL;

pub const SETTINGS_DIRECTORY_NAME: &str = "chatline";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "CHATLINE_";

/// Keys accepted by [`ChatSettings::set`].
pub const SETTINGS_KEYS: &[&str] = &[
    "base_url",
    "chat_path",
    "upload_path",
    "status_path",
    "health_path",
    "connect_timeout_secs",
    "notification_ttl_ms",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
    #[serde(default = "default_status_path")]
    pub status_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// `None` disables the connect timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default = "default_suggestions")]
    pub suggestions: Vec<String>,
    #[serde(default = "default_notification_ttl_ms")]
    pub notification_ttl_ms: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_path: default_chat_path(),
            upload_path: default_upload_path(),
            status_path: default_status_path(),
            health_path: default_health_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
            suggestions: default_suggestions(),
            notification_ttl_ms: default_notification_ttl_ms(),
        }
    }
}

impl ChatSettings {
    pub fn normalized(mut self) -> Self {
        self.base_url = non_blank_or(&self.base_url, default_base_url)
            .trim_end_matches('/')
            .to_string();
        self.chat_path = normalize_path(&self.chat_path, default_chat_path);
        self.upload_path = normalize_path(&self.upload_path, default_upload_path);
        self.status_path = normalize_path(&self.status_path, default_status_path);
        self.health_path = normalize_path(&self.health_path, default_health_path);
        self.suggestions = normalize_suggestions(self.suggestions);
        if self.notification_ttl_ms == 0 {
            self.notification_ttl_ms = default_notification_ttl_ms();
        }

        self
    }

    /// Sets one field from its text form; `connect_timeout_secs` also accepts `none`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let value = value.trim();
        match key {
            "base_url" => self.base_url = value.to_string(),
            "chat_path" => self.chat_path = value.to_string(),
            "upload_path" => self.upload_path = value.to_string(),
            "status_path" => self.status_path = value.to_string(),
            "health_path" => self.health_path = value.to_string(),
            "connect_timeout_secs" if value.eq_ignore_ascii_case("none") => {
                self.connect_timeout_secs = None;
            }
            "connect_timeout_secs" => {
                self.connect_timeout_secs = Some(value.parse().context(InvalidValueSnafu {
                    stage: "parse-connect-timeout",
                    key,
                    value,
                })?);
            }
            "notification_ttl_ms" => {
                self.notification_ttl_ms = value.parse().context(InvalidValueSnafu {
                    stage: "parse-notification-ttl",
                    key,
                    value,
                })?;
            }
            _ => {
                return UnknownKeySnafu {
                    stage: "set-setting",
                    key,
                }
                .fail();
            }
        }

        Ok(())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.normalized()
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.base_url)
            .with_chat_path(&self.chat_path)
            .with_upload_path(&self.upload_path)
            .with_status_path(&self.status_path)
            .with_health_path(&self.health_path)
            .with_connect_timeout(self.connect_timeout_secs.map(Duration::from_secs))
    }

    pub fn notification_ttl(&self) -> Duration {
        Duration::from_millis(self.notification_ttl_ms)
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".chatline"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ChatSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Replaces the live settings without touching the file.
    pub fn override_with(&self, settings: ChatSettings) {
        self.settings.store(Arc::new(settings.normalized()));
    }

    fn load_from_disk(path: &Path) -> ChatSettings {
        let mut figment = Figment::from(Serialized::defaults(ChatSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }
        let figment = figment.merge(Env::prefixed(SETTINGS_ENV_PREFIX));

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to parse settings, using defaults");
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display(
        "unknown setting `{key}` on `{stage}`, expected one of: {}",
        SETTINGS_KEYS.join(", ")
    ))]
    UnknownKey { stage: &'static str, key: String },
    #[snafu(display("invalid value `{value}` for `{key}` on `{stage}`: {source}"))]
    InvalidValue {
        stage: &'static str,
        key: String,
        value: String,
        source: std::num::ParseIntError,
    },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn non_blank_or(value: &str, fallback: fn() -> String) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback()
    } else {
        value.to_string()
    }
}

fn normalize_path(value: &str, fallback: fn() -> String) -> String {
    let path = non_blank_or(value, fallback);
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_chat_path() -> String {
    DEFAULT_CHAT_PATH.to_string()
}

fn default_upload_path() -> String {
    DEFAULT_UPLOAD_PATH.to_string()
}

fn default_status_path() -> String {
    DEFAULT_STATUS_PATH.to_string()
}

fn default_health_path() -> String {
    DEFAULT_HEALTH_PATH.to_string()
}

fn default_connect_timeout_secs() -> Option<u64> {
    Some(DEFAULT_CONNECT_TIMEOUT.as_secs())
}

fn default_notification_ttl_ms() -> u64 {
    DEFAULT_NOTIFICATION_TTL.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let settings = store.settings();

        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.suggestions.len(), 4);
        assert_eq!(settings.notification_ttl(), Duration::from_millis(3000));
    }

    #[test]
    fn partial_file_is_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "base_url": "http://docs.internal:8080/", "chat_path": "ask" }"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.base_url, "http://docs.internal:8080");
        assert_eq!(settings.chat_path, "/ask");
        assert_eq!(settings.upload_path, DEFAULT_UPLOAD_PATH);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(*SettingsStore::new(path).settings(), ChatSettings::default());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone());

        let settings = ChatSettings {
            suggestions: vec!["  What is a UPC?  ".into()],
            notification_ttl_ms: 0,
            ..ChatSettings::default()
        };
        store.update(settings).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = SettingsStore::new(path).settings();
        assert_eq!(reloaded.suggestions, vec!["What is a UPC?".to_string()]);
        assert_eq!(reloaded.notification_ttl_ms, 3000);
    }

    #[test]
    fn set_parses_values_and_rejects_unknown_keys() {
        let mut settings = ChatSettings::default();
        settings.set("connect_timeout_secs", "none").unwrap();
        settings.set("notification_ttl_ms", " 1500 ").unwrap();
        settings.set("chat_path", "ask").unwrap();
        assert_eq!(settings.connect_timeout_secs, None);
        assert_eq!(settings.notification_ttl_ms, 1500);
        assert_eq!(settings.normalized().chat_path, "/ask");

        let mut settings = ChatSettings::default();
        assert!(matches!(
            settings.set("notification_ttl_ms", "soon"),
            Err(SettingsError::InvalidValue { .. })
        ));
        assert!(matches!(
            settings.set("theme", "dark"),
            Err(SettingsError::UnknownKey { .. })
        ));
        assert_eq!(settings, ChatSettings::default());
    }

    #[test]
    fn set_then_update_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone());

        let mut settings = ChatSettings::clone(&store.settings());
        settings.set("base_url", "http://docs.internal:8080/").unwrap();
        store.update(settings).unwrap();

        assert_eq!(store.settings().base_url, "http://docs.internal:8080");
        assert_eq!(
            SettingsStore::new(path).settings().base_url,
            "http://docs.internal:8080"
        );
    }

    #[test]
    fn client_config_carries_paths_and_timeout() {
        let settings = ChatSettings {
            connect_timeout_secs: None,
            ..ChatSettings::default()
        }
        .with_base_url("http://localhost:9000/");

        let config = settings.to_client_config();
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.status_path, DEFAULT_STATUS_PATH);
        assert_eq!(config.connect_timeout, None);
    }
}
