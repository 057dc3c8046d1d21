/// Settings persistence.
pub mod state;

pub use state::{ChatSettings, SETTINGS_KEYS, SettingsError, SettingsStore};
