use anyhow::Result;
use guichet_core::config::SyncConfig;
use guichet_provider_google::auth;

pub async fn run() -> Result<()> {
    println!("Authenticating with Google...");

    let account = auth::authenticate().await?;

    println!("Authenticated as: {account}\n");
    println!(
        "If you connect several accounts, pick the default with \
         [google] account = \"{account}\" in {}",
        SyncConfig::config_path()?.display()
    );
    println!("Run `guichet-sync calendars` to see its calendars.");

    Ok(())
}
