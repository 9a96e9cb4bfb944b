use anyhow::Result;
use guichet_core::calendar::all_calendars;
use guichet_core::config::SyncConfig;
use guichet_provider_google::GoogleCalendar;

use crate::render::Render;
use crate::utils::tui;

pub async fn run(config: &SyncConfig, account: Option<&str>) -> Result<()> {
    let account = super::resolve_account(config, account)?;
    let google = GoogleCalendar::for_account(&account).await?;

    let spinner = tui::create_spinner(format!("Fetching calendars for {account}"));
    let result = all_calendars(&google).await;
    spinner.finish_and_clear();

    let calendars = result?;
    if calendars.is_empty() {
        println!("No calendars found.");
        return Ok(());
    }

    for calendar in &calendars {
        println!("{}", calendar.render());
    }

    Ok(())
}
