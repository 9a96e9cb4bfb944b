//! Contract with the external calendar service.
//!
//! Providers implement [`CalendarService`]; the reconciler and the sync
//! orchestrator only ever talk to this trait.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::error::{SyncError, SyncResult};

/// HTTP status of a mutation on an event that no longer exists.
pub const STATUS_GONE: u16 = 410;

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

/// A calendar from the user's calendar list.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEntry {
    pub id: String,
    pub summary: String,
    pub primary: bool,
}

/// The calendar a run writes to, resolved once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarTarget {
    pub name: String,
    pub id: String,
}

/// Handle on an event owned by the calendar service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteEvent {
    pub id: String,
}

/// Start or end of an event to create.
#[derive(Debug, Clone, PartialEq)]
pub enum EventTiming {
    DateTime(DateTime<Tz>),
    /// All-day boundary. End dates are exclusive.
    Date(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderMethod {
    Popup,
    Email,
}

impl ReminderMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderMethod::Popup => "popup",
            ReminderMethod::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reminder {
    pub method: ReminderMethod,
    pub minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPolicy {
    pub use_default: bool,
    pub overrides: Vec<Reminder>,
}

/// An event to create, in calendar terms.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub summary: String,
    pub location: String,
    pub start: EventTiming,
    pub end: EventTiming,
    pub time_zone: Tz,
    pub reminders: ReminderPolicy,
}

/// Failure of a single create or delete inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMutationError {
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteMutationError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        RemoteMutationError {
            status,
            message: message.into(),
        }
    }

    /// The event was already deleted. Expected and harmless.
    pub fn is_gone(&self) -> bool {
        self.status == Some(STATUS_GONE)
    }
}

impl std::fmt::Display for RemoteMutationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({})", self.message, status),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Outcome of one sub-operation of a batch.
pub type MutationOutcome = Result<(), RemoteMutationError>;

/// A remote calendar service.
///
/// Batch methods send every sub-operation in one transport call and return
/// one outcome per input, in input order. An `Err` from a batch method means
/// the transport call itself failed.
#[async_trait]
pub trait CalendarService: Send + Sync {
    async fn list_calendars(&self, page_token: Option<&str>) -> SyncResult<Page<CalendarEntry>>;

    /// Events of `calendar_id` whose start is at or after `time_min`.
    /// Events already under way at `time_min` are not listed.
    async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> SyncResult<Page<RemoteEvent>>;

    async fn delete_events(
        &self,
        calendar_id: &str,
        event_ids: &[String],
    ) -> SyncResult<Vec<MutationOutcome>>;

    async fn insert_events(
        &self,
        calendar_id: &str,
        events: &[EventDraft],
    ) -> SyncResult<Vec<MutationOutcome>>;
}

/// Every calendar of the user, across all pages.
pub async fn all_calendars<C: CalendarService + ?Sized>(
    service: &C,
) -> SyncResult<Vec<CalendarEntry>> {
    let mut calendars = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = service.list_calendars(page_token.as_deref()).await?;
        calendars.extend(page.items);

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    Ok(calendars)
}

/// First calendar whose display name is exactly `name`.
pub async fn find_calendar<C: CalendarService + ?Sized>(
    service: &C,
    name: &str,
) -> SyncResult<CalendarTarget> {
    let mut page_token: Option<String> = None;

    loop {
        let page = service.list_calendars(page_token.as_deref()).await?;

        if let Some(entry) = page.items.into_iter().find(|c| c.summary == name) {
            return Ok(CalendarTarget {
                name: entry.summary,
                id: entry.id,
            });
        }

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => return Err(SyncError::CalendarNotFound(name.to_string())),
        }
    }
}
