//! Portal login from the config, prompting for the password when it is not set.

use anyhow::{Context, Result};
use guichet_core::config::{PortalConfig, SyncConfig};
use guichet_core::portal::Credentials;

pub fn portal_credentials(portal: &PortalConfig) -> Result<Credentials> {
    let username = portal.username.as_deref().with_context(|| {
        let path = SyncConfig::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "config.toml".to_string());
        format!(
            "No portal username configured.\n\n\
            Set [portal] username in {path}, or GUICHET__PORTAL__USERNAME."
        )
    })?;

    let password = match &portal.password {
        Some(password) => password.clone(),
        None => rpassword::prompt_password(format!("Portal password for {username}: "))
            .context("Failed to read password")?,
    };

    Ok(Credentials::new(username, &password, &portal.domain))
}
