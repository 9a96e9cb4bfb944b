use std::collections::BTreeSet;

use anyhow::Result;
use guichet_core::calendar::CalendarTarget;
use guichet_core::config::SyncConfig;
use guichet_core::date_range::SyncRange;
use guichet_core::reconcile::ClearPolicy;
use guichet_core::schedule::Event;
use guichet_core::sync::{SyncObserver, SyncOrchestrator, SyncRequest, SyncStage};
use guichet_provider_google::GoogleCalendar;
use indicatif::ProgressBar;
use owo_colors::OwoColorize;

use crate::credentials::portal_credentials;
use crate::render::Render;
use crate::utils::tui;

/// Shows the current stage on a spinner and prints milestones above it.
struct SpinnerObserver {
    spinner: ProgressBar,
}

impl SyncObserver for SpinnerObserver {
    fn stage(&mut self, stage: SyncStage) {
        self.spinner.set_message(stage.to_string());
    }

    fn calendar(&mut self, target: &CalendarTarget) {
        self.spinner.println(target.render());
    }

    fn schedule(&mut self, events: &[Event], courses: &BTreeSet<String>) {
        let courses: Vec<&str> = courses.iter().map(String::as_str).collect();
        self.spinner.println(format!(
            "   {} events for {}",
            events.len(),
            if courses.is_empty() {
                "no courses".dimmed().to_string()
            } else {
                courses.join(", ")
            }
        ));
    }
}

pub async fn run(
    config: &SyncConfig,
    calendar_name: String,
    range: SyncRange,
    clear_policy: ClearPolicy,
    account: Option<&str>,
) -> Result<()> {
    let credentials = portal_credentials(&config.portal)?;
    let account = super::resolve_account(config, account)?;
    let google = GoogleCalendar::for_account(&account).await?;

    let request = SyncRequest {
        calendar_name,
        range,
        clear_policy,
    };

    let mut observer = SpinnerObserver {
        spinner: tui::create_spinner(SyncStage::Authenticating.to_string()),
    };
    let result = SyncOrchestrator::new(config, &google)
        .run(&credentials, &request, &mut observer)
        .await;
    observer.spinner.finish_and_clear();

    let report = result?;
    println!("{}", report.render());

    if !report.is_clean() {
        anyhow::bail!(
            "{} calendar change(s) failed; run the sync again to retry",
            report.failures.len()
        );
    }

    Ok(())
}
