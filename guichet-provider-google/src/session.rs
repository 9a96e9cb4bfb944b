//! Stored Google OAuth tokens, one file per account, refreshed when expired.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use google_calendar::{AccessToken, Client};
use serde::{Deserialize, Serialize};

use crate::app_config::{AppConfig, base_dir};

/// Refresh a little before Google actually rejects the token.
const EXPIRY_MARGIN_SECS: i64 = 60;

pub struct Session {
    account: String,
    data: SessionData,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct SessionData {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl From<&AccessToken> for SessionData {
    fn from(tokens: &AccessToken) -> Self {
        SessionData {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: Utc::now() + Duration::seconds(tokens.expires_in),
        }
    }
}

/// `~/.config/guichet-sync/google/session`
pub fn sessions_dir() -> Result<PathBuf> {
    Ok(base_dir()?.join("session"))
}

fn path_in(dir: &Path, account: &str) -> PathBuf {
    let slug = account.replace(['/', '\\', ':'], "_");
    dir.join(format!("{slug}.toml"))
}

/// Accounts with a stored session in `dir`, sorted.
pub fn accounts_in(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut accounts = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read sessions from {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                accounts.push(stem.to_string());
            }
        }
    }
    accounts.sort();

    Ok(accounts)
}

/// Pick the account to use: the explicit one, then the configured default,
/// then the only stored session.
pub fn resolve_account(
    explicit: Option<&str>,
    configured: Option<&str>,
    stored: &[String],
) -> Result<String> {
    if let Some(account) = explicit.or(configured) {
        return Ok(account.to_string());
    }

    match stored {
        [only] => Ok(only.clone()),
        [] => anyhow::bail!("No Google account connected. Run `guichet-sync auth` first."),
        _ => anyhow::bail!(
            "Several Google accounts are connected ({}). \
             Pick one with --account or set google.account in the config.",
            stored.join(", ")
        ),
    }
}

impl SessionData {
    pub fn from_tokens(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        SessionData {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(expires_in),
        }
    }
}

impl Session {
    pub fn new(account: &str, data: &SessionData) -> Self {
        Session {
            account: account.to_string(),
            data: data.clone(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn access_token(&self) -> &str {
        &self.data.access_token
    }

    /// Load a session and refresh it if expired.
    pub async fn load_valid(account: &str) -> Result<Self> {
        let mut session = Self::load_from(&sessions_dir()?, account)?;

        if session.is_expired(Utc::now()) {
            tracing::debug!(account, "Access token expired, refreshing");
            session.refresh().await?;
        }

        Ok(session)
    }

    fn load_from(dir: &Path, account: &str) -> Result<Self> {
        let path = path_in(dir, account);

        if !path.exists() {
            anyhow::bail!(
                "Google session for {} not found. Run `guichet-sync auth` first.",
                account
            );
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read Google session from {}", path.display()))?;

        let data: SessionData = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse Google session from {}", path.display()))?;

        Ok(Session {
            account: account.to_string(),
            data,
        })
    }

    pub fn save(&self) -> Result<()> {
        self.save_in(&sessions_dir()?)
    }

    fn save_in(&self, dir: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(&self.data).context("Failed to serialize session")?;
        let path = path_in(dir, &self.account);

        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;

        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write session to {}", path.display()))?;

        // Owner-only, the file holds OAuth tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
        }

        Ok(())
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.data.expires_at
    }

    async fn refresh(&mut self) -> Result<()> {
        let app_config = AppConfig::load()?;

        let client = Client::new(
            app_config.client_id,
            app_config.client_secret,
            String::new(),
            self.data.access_token.clone(),
            self.data.refresh_token.clone(),
        );

        let mut tokens = client
            .refresh_access_token()
            .await
            .context("Failed to refresh token")?;

        // Google typically doesn't return a new refresh_token on refresh
        if tokens.refresh_token.is_empty() {
            tokens.refresh_token = self.data.refresh_token.clone();
        }

        self.data = (&tokens).into();
        self.save()?;

        Ok(())
    }
}
