//! guichet-sync configuration.
//!
//! Loaded from `~/.config/guichet-sync/config.toml`, then overridden by
//! `GUICHET__*` environment variables (e.g. `GUICHET__PORTAL__PASSWORD`).

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{SyncError, SyncResult};
use crate::reconcile::ClearPolicy;

static DEFAULT_BASE_URL: &str = "https://inscription.uni.lu/Inscriptions/Student/GuichetEtudiant";
static DEFAULT_TIME_ZONE: &str = "Europe/Luxembourg";
const DEFAULT_REMINDER_MINUTES: u32 = 15;

/// Google batch requests are recommended to stay at 50 calls or fewer.
const DEFAULT_BATCH_SIZE: usize = 50;

const ENV_PREFIX: &str = "GUICHET";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub portal: PortalConfig,

    /// Course allow-list. Empty means every course is kept.
    #[serde(default)]
    pub courses: Vec<String>,

    #[serde(default)]
    pub calendar: CalendarConfig,

    #[serde(default)]
    pub google: GoogleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// NTLM domain used when the username is not `DOMAIN\user`.
    #[serde(default)]
    pub domain: String,

    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        PortalConfig {
            base_url: default_base_url(),
            domain: String::new(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    #[serde(default = "default_reminder_minutes")]
    pub reminder_minutes: u32,

    #[serde(default)]
    pub clear_from: ClearPolicy,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        CalendarConfig {
            time_zone: default_time_zone(),
            reminder_minutes: DEFAULT_REMINDER_MINUTES,
            clear_from: ClearPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl CalendarConfig {
    /// The institutional time zone events are localized in.
    pub fn tz(&self) -> SyncResult<Tz> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|e| SyncError::Config(format!("Unknown time zone '{}': {e}", self.time_zone)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleConfig {
    /// Account whose stored session is used when none is given on the command line.
    pub account: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_time_zone() -> String {
    DEFAULT_TIME_ZONE.to_string()
}

fn default_reminder_minutes() -> u32 {
    DEFAULT_REMINDER_MINUTES
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl SyncConfig {
    /// `~/.config/guichet-sync`
    pub fn config_dir() -> SyncResult<PathBuf> {
        Ok(dirs::config_dir()
            .ok_or_else(|| SyncError::Config("Could not determine config directory".into()))?
            .join("guichet-sync"))
    }

    pub fn config_path() -> SyncResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load the config file (created with commented defaults on first use)
    /// and apply environment overrides.
    pub fn load() -> SyncResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::build(File::from(config_path).required(false))
    }

    /// Parse a TOML document, still honouring environment overrides.
    pub fn from_toml(contents: &str) -> SyncResult<Self> {
        Self::build(File::from_str(contents, FileFormat::Toml))
    }

    fn build<S>(file: S) -> SyncResult<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: SyncConfig = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        if config.calendar.batch_size == 0 {
            return Err(SyncError::Config("calendar.batch_size must be at least 1".into()));
        }
        config.calendar.tz()?;

        Ok(config)
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> SyncResult<()> {
        let contents = format!(
            "\
# guichet-sync configuration

[portal]
# base_url = \"{DEFAULT_BASE_URL}\"
# domain = \"\"
# username = \"jdoe\"
# password is prompted for when absent (or set GUICHET__PORTAL__PASSWORD)

# Only sync these courses (empty = all):
# courses = [\"Math101\"]

[calendar]
# time_zone = \"{DEFAULT_TIME_ZONE}\"
# reminder_minutes = {DEFAULT_REMINDER_MINUTES}
# clear_from = \"midnight\"   # or \"now\"
# batch_size = {DEFAULT_BATCH_SIZE}

[google]
# account = \"you@gmail.com\"
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| SyncError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SyncConfig::from_toml("").unwrap();

        assert_eq!(config.portal.base_url, DEFAULT_BASE_URL);
        assert!(config.courses.is_empty());
        assert_eq!(config.calendar.reminder_minutes, 15);
        assert_eq!(config.calendar.clear_from, ClearPolicy::Midnight);
        assert_eq!(config.calendar.batch_size, 50);
        assert_eq!(config.calendar.tz().unwrap(), chrono_tz::Europe::Luxembourg);
    }

    #[test]
    fn test_parses_full_config() {
        let config = SyncConfig::from_toml(
            r#"
courses = ["Math101", "Phys201"]

[portal]
base_url = "https://portal.example/Student"
domain = "UNI"
username = "jdoe"

[calendar]
clear_from = "now"
batch_size = 10

[google]
account = "jdoe@example.com"
"#,
        )
        .unwrap();

        assert_eq!(config.portal.base_url, "https://portal.example/Student");
        assert_eq!(config.portal.domain, "UNI");
        assert_eq!(config.portal.username.as_deref(), Some("jdoe"));
        assert_eq!(config.courses, vec!["Math101", "Phys201"]);
        assert_eq!(config.calendar.clear_from, ClearPolicy::Now);
        assert_eq!(config.calendar.batch_size, 10);
        assert_eq!(config.google.account.as_deref(), Some("jdoe@example.com"));
    }

    #[test]
    fn test_rejects_unknown_time_zone() {
        let result = SyncConfig::from_toml("[calendar]\ntime_zone = \"Mars/Olympus\"\n");
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let result = SyncConfig::from_toml("[calendar]\nbatch_size = 0\n");
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
