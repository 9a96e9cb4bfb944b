use anyhow::Result;
use guichet_core::config::SyncConfig;
use guichet_core::date_range::SyncRange;
use guichet_core::schedule::retained_courses;
use guichet_core::sync::fetch_schedule;
use owo_colors::OwoColorize;

use crate::credentials::portal_credentials;
use crate::render::Render;
use crate::utils::tui;

pub async fn run(config: &SyncConfig, range: SyncRange, json: bool) -> Result<()> {
    let credentials = portal_credentials(&config.portal)?;

    let spinner = tui::create_spinner("Fetching schedule".to_string());
    let result = fetch_schedule(config, &credentials, &range).await;
    spinner.finish_and_clear();
    let events = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("{}", "No events in this period.".dimmed());
        return Ok(());
    }

    for event in &events {
        println!("{}", event.render());
    }

    let courses: Vec<String> = retained_courses(&events).into_iter().collect();
    println!("\n{} events, courses: {}", events.len(), courses.join(", "));

    Ok(())
}
