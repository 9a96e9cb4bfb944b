pub mod auth;
pub mod calendars;
pub mod events;
pub mod sync;

use anyhow::Result;
use guichet_core::config::SyncConfig;
use guichet_provider_google::session;

/// Google account for this run: `--account`, the configured default, or the
/// only connected account.
pub fn resolve_account(config: &SyncConfig, explicit: Option<&str>) -> Result<String> {
    let stored = session::accounts_in(&session::sessions_dir()?)?;
    session::resolve_account(explicit, config.google.account.as_deref(), &stored)
}
