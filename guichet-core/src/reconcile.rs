//! Clear-then-insert reconciliation of the target calendar.
//!
//! Events carry no stable identity back to the portal, so the calendar is made
//! to match the fetched schedule by deleting every event from the cutoff on and
//! inserting the fresh ones. Per-event failures never abort the run; they end
//! up in the [`ReconcileReport`].

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::calendar::{
    CalendarService, EventDraft, EventTiming, MutationOutcome, Reminder, ReminderMethod,
    ReminderPolicy, RemoteMutationError,
};
use crate::config::CalendarConfig;
use crate::error::SyncResult;
use crate::schedule::Event;

/// Where clearing starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearPolicy {
    /// Today at 00:00 in the institution's time zone.
    #[default]
    Midnight,
    Now,
}

impl ClearPolicy {
    pub fn cutoff(self, now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        match self {
            ClearPolicy::Now => now,
            ClearPolicy::Midnight => {
                let midnight = now.with_timezone(&tz).date_naive().and_time(NaiveTime::MIN);
                localize(tz, midnight).with_timezone(&Utc)
            }
        }
    }
}

impl FromStr for ClearPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "midnight" => Ok(ClearPolicy::Midnight),
            "now" => Ok(ClearPolicy::Now),
            other => Err(format!("unknown clear policy '{other}' (expected 'midnight' or 'now')")),
        }
    }
}

impl std::fmt::Display for ClearPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClearPolicy::Midnight => write!(f, "midnight"),
            ClearPolicy::Now => write!(f, "now"),
        }
    }
}

/// Interpret a naive local time in `tz`. Ambiguous times take the earlier
/// instant; times skipped by a DST jump are read with the pre-jump offset.
pub fn localize(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let before = naive - Duration::hours(3);
            let offset = match tz.from_local_datetime(&before) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    dt.naive_local() - dt.naive_utc()
                }
                LocalResult::None => Duration::zero(),
            };
            tz.from_utc_datetime(&(naive - offset))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Delete,
    Insert,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKind::Delete => write!(f, "delete"),
            MutationKind::Insert => write!(f, "insert"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedMutation {
    pub kind: MutationKind,
    /// Event id for deletes, event title for inserts.
    pub target: String,
    pub error: RemoteMutationError,
}

/// Summary of a reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub deleted: usize,
    /// Deletes answered with 410: the event was already gone.
    pub already_gone: usize,
    pub created: usize,
    pub failures: Vec<FailedMutation>,
}

impl ReconcileReport {
    /// No mutation failed (already-gone deletes do not count).
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: ReconcileReport) {
        self.deleted += other.deleted;
        self.already_gone += other.already_gone;
        self.created += other.created;
        self.failures.extend(other.failures);
    }

    fn record(
        &mut self,
        kind: MutationKind,
        targets: Vec<String>,
        result: SyncResult<Vec<MutationOutcome>>,
    ) {
        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::warn!(%kind, count = targets.len(), error = %e, "Batch request failed");
                let message = e.to_string();
                targets
                    .iter()
                    .map(|_| Err(RemoteMutationError::new(None, message.clone())))
                    .collect()
            }
        };

        let mut outcomes = outcomes.into_iter();
        for target in targets {
            let outcome = outcomes
                .next()
                .unwrap_or_else(|| {
                    Err(RemoteMutationError::new(None, "No response for batch item"))
                });

            match outcome {
                Ok(()) => match kind {
                    MutationKind::Delete => self.deleted += 1,
                    MutationKind::Insert => self.created += 1,
                },
                Err(error) if error.is_gone() => {
                    tracing::debug!(%kind, %target, "Already gone");
                    self.already_gone += 1;
                }
                Err(error) => {
                    tracing::warn!(%kind, %target, %error, "Calendar mutation failed");
                    self.failures.push(FailedMutation { kind, target, error });
                }
            }
        }
    }
}

/// How fetched events are turned into calendar events.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub time_zone: Tz,
    pub reminder_minutes: u32,
    pub batch_size: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            time_zone: chrono_tz::Europe::Luxembourg,
            reminder_minutes: 15,
            batch_size: 50,
        }
    }
}

impl ReconcileOptions {
    pub fn from_config(config: &CalendarConfig) -> SyncResult<Self> {
        Ok(ReconcileOptions {
            time_zone: config.tz()?,
            reminder_minutes: config.reminder_minutes,
            batch_size: config.batch_size.max(1),
        })
    }
}

/// Replaces the future contents of one calendar.
pub struct CalendarReconciler<'a, C: CalendarService + ?Sized> {
    service: &'a C,
    calendar_id: &'a str,
    options: ReconcileOptions,
}

impl<'a, C: CalendarService + ?Sized> CalendarReconciler<'a, C> {
    pub fn new(service: &'a C, calendar_id: &'a str, options: ReconcileOptions) -> Self {
        CalendarReconciler {
            service,
            calendar_id,
            options,
        }
    }

    /// Ids of every event starting at or after `cutoff`, across all pages,
    /// without duplicates (first-seen order).
    pub async fn list_from(&self, cutoff: DateTime<Utc>) -> SyncResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .service
                .list_events(self.calendar_id, cutoff, page_token.as_deref())
                .await?;

            for event in page.items {
                if seen.insert(event.id.clone()) {
                    ids.push(event.id);
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(ids)
    }

    /// Delete every event from `cutoff` on. Listing errors are fatal; each
    /// delete is attempted regardless of the others.
    pub async fn clear_from(&self, cutoff: DateTime<Utc>) -> SyncResult<ReconcileReport> {
        let ids = self.list_from(cutoff).await?;
        let mut report = ReconcileReport::default();

        for chunk in ids.chunks(self.options.batch_size) {
            let result = self.service.delete_events(self.calendar_id, chunk).await;
            report.record(MutationKind::Delete, chunk.to_vec(), result);
        }

        Ok(report)
    }

    /// Map a fetched event to its calendar representation.
    pub fn draft(&self, event: &Event) -> EventDraft {
        let tz = self.options.time_zone;

        let (start, end) = if event.is_all_day {
            let start = event.start.date();
            let mut end = event.end.date();
            // All-day ends are exclusive; a span ending at 00:00 already is.
            if end <= start || event.end.time() != NaiveTime::MIN {
                end = end.max(start) + Duration::days(1);
            }
            (EventTiming::Date(start), EventTiming::Date(end))
        } else {
            (
                EventTiming::DateTime(localize(tz, event.start)),
                EventTiming::DateTime(localize(tz, event.end)),
            )
        };

        EventDraft {
            summary: event.title.clone(),
            location: event.location.clone(),
            start,
            end,
            time_zone: tz,
            reminders: ReminderPolicy {
                use_default: false,
                overrides: vec![Reminder {
                    method: ReminderMethod::Popup,
                    minutes: self.options.reminder_minutes,
                }],
            },
        }
    }

    /// Create every event. Failures are recorded, never retried or rolled back.
    pub async fn insert_all(&self, events: &[Event]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for chunk in events.chunks(self.options.batch_size) {
            let drafts: Vec<EventDraft> = chunk.iter().map(|e| self.draft(e)).collect();
            let titles = chunk.iter().map(|e| e.title.clone()).collect();
            let result = self.service.insert_events(self.calendar_id, &drafts).await;
            report.record(MutationKind::Insert, titles, result);
        }

        report
    }

    /// Clear from `cutoff`, then insert `events`. Every delete is issued
    /// before the first insert.
    pub async fn reconcile(
        &self,
        events: &[Event],
        cutoff: DateTime<Utc>,
    ) -> SyncResult<ReconcileReport> {
        let mut report = self.clear_from(cutoff).await?;
        report.merge(self.insert_all(events).await);
        Ok(report)
    }
}
