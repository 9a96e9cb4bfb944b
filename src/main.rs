mod commands;
mod credentials;
mod render;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use guichet_core::config::SyncConfig;
use guichet_core::date_range::SyncRange;
use guichet_core::reconcile::ClearPolicy;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_LOG_FILTER: &str = "guichet_core=warn,guichet_provider_google=warn,guichet_sync=info";

#[derive(Parser)]
#[command(name = "guichet-sync")]
#[command(about = "Copy your Guichet Etudiant class schedule into a Google Calendar")]
#[command(
    after_help = "Do not run two syncs against the same calendar at the same time: \
    each run deletes and re-creates every event from its cutoff on."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the calendar's upcoming events with the portal schedule
    Sync {
        /// Display name of the target calendar
        calendar: String,

        /// Last day to fetch (YYYY-MM-DD)
        end_date: String,

        /// First day to fetch (YYYY-MM-DD, defaults to today)
        #[arg(short, long)]
        start_date: Option<String>,

        /// Delete events starting from "midnight" (today 00:00) or "now"
        #[arg(long)]
        clear_from: Option<ClearPolicy>,

        /// Google account to use
        #[arg(short, long)]
        account: Option<String>,
    },
    /// Fetch and print the schedule without touching any calendar
    Events {
        /// Last day to fetch (YYYY-MM-DD)
        end_date: String,

        /// First day to fetch (YYYY-MM-DD, defaults to today)
        #[arg(short, long)]
        start_date: Option<String>,

        /// Print the projected events as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the calendars of a Google account
    Calendars {
        /// Google account to use
        #[arg(short, long)]
        account: Option<String>,
    },
    /// Connect a Google account
    Auth,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = SyncConfig::load()?;

    match cli.command {
        Commands::Sync {
            calendar,
            end_date,
            start_date,
            clear_from,
            account,
        } => {
            let range = SyncRange::from_args(start_date.as_deref(), &end_date)?;
            let clear_policy = clear_from.unwrap_or(config.calendar.clear_from);
            commands::sync::run(&config, calendar, range, clear_policy, account.as_deref()).await
        }
        Commands::Events {
            end_date,
            start_date,
            json,
        } => {
            let range = SyncRange::from_args(start_date.as_deref(), &end_date)?;
            commands::events::run(&config, range, json).await
        }
        Commands::Calendars { account } => {
            commands::calendars::run(&config, account.as_deref()).await
        }
        Commands::Auth => commands::auth::run().await,
    }
}
