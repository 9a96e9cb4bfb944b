//! In-memory calendar service for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::calendar::{
    CalendarEntry, CalendarService, EventDraft, EventTiming, MutationOutcome, Page, RemoteEvent,
    RemoteMutationError,
};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    ListEvents,
    DeleteBatch(Vec<String>),
    InsertBatch(Vec<String>),
}

#[derive(Debug, Clone)]
pub(crate) struct StoredEvent {
    pub id: String,
    pub calendar_id: String,
    pub start: DateTime<Utc>,
    pub draft: Option<EventDraft>,
}

#[derive(Default)]
struct State {
    calendars: Vec<CalendarEntry>,
    events: Vec<StoredEvent>,
    next_id: usize,
    page_size: usize,
    calls: Vec<Call>,
    delete_failures: HashMap<String, RemoteMutationError>,
    insert_failures: HashMap<String, RemoteMutationError>,
    failing_delete_batches: usize,
    failing_listing: bool,
}

pub(crate) struct FakeCalendar {
    state: Mutex<State>,
}

impl FakeCalendar {
    pub fn with_calendars(names: &[&str]) -> Self {
        let calendars = names
            .iter()
            .enumerate()
            .map(|(i, name)| CalendarEntry {
                id: format!("cal-{i}"),
                summary: name.to_string(),
                primary: i == 0,
            })
            .collect();

        FakeCalendar {
            state: Mutex::new(State {
                calendars,
                page_size: 100,
                ..State::default()
            }),
        }
    }

    pub fn set_page_size(&self, size: usize) {
        self.state.lock().unwrap().page_size = size;
    }

    /// Store an existing event; the same id may be seeded twice.
    pub fn seed_event(&self, calendar_id: &str, id: &str, start: DateTime<Utc>) {
        self.state.lock().unwrap().events.push(StoredEvent {
            id: id.to_string(),
            calendar_id: calendar_id.to_string(),
            start,
            draft: None,
        });
    }

    pub fn fail_delete(&self, id: &str, status: u16, message: &str) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(id.to_string(), RemoteMutationError::new(Some(status), message));
    }

    pub fn fail_insert(&self, summary: &str, status: u16, message: &str) {
        self.state
            .lock()
            .unwrap()
            .insert_failures
            .insert(summary.to_string(), RemoteMutationError::new(Some(status), message));
    }

    /// Make the next `count` delete batches fail at the transport level.
    pub fn fail_delete_batches(&self, count: usize) {
        self.state.lock().unwrap().failing_delete_batches = count;
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().failing_listing = true;
    }

    pub fn events(&self, calendar_id: &str) -> Vec<StoredEvent> {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.calendar_id == calendar_id)
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }
}

fn paginate<T: Clone>(items: &[T], page_size: usize, page_token: Option<&str>) -> Page<T> {
    let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
    let end = (offset + page_size).min(items.len());
    Page {
        items: items[offset.min(end)..end].to_vec(),
        next_page_token: (end < items.len()).then(|| end.to_string()),
    }
}

fn timing_to_utc(timing: &EventTiming) -> DateTime<Utc> {
    match timing {
        EventTiming::DateTime(dt) => dt.with_timezone(&Utc),
        EventTiming::Date(d) => d.and_hms_opt(0, 0, 0).unwrap().and_utc(),
    }
}

#[async_trait]
impl CalendarService for FakeCalendar {
    async fn list_calendars(&self, page_token: Option<&str>) -> SyncResult<Page<CalendarEntry>> {
        let state = self.state.lock().unwrap();
        Ok(paginate(&state.calendars, state.page_size, page_token))
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> SyncResult<Page<RemoteEvent>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListEvents);
        if state.failing_listing {
            return Err(SyncError::Calendar("listing failed".to_string()));
        }

        let matching: Vec<RemoteEvent> = state
            .events
            .iter()
            .filter(|e| e.calendar_id == calendar_id && e.start >= time_min)
            .map(|e| RemoteEvent { id: e.id.clone() })
            .collect();

        Ok(paginate(&matching, state.page_size, page_token))
    }

    async fn delete_events(
        &self,
        calendar_id: &str,
        event_ids: &[String],
    ) -> SyncResult<Vec<MutationOutcome>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::DeleteBatch(event_ids.to_vec()));

        if state.failing_delete_batches > 0 {
            state.failing_delete_batches -= 1;
            return Err(SyncError::Calendar("batch transport failed".to_string()));
        }

        let outcomes = event_ids
            .iter()
            .map(|id| {
                if let Some(err) = state.delete_failures.get(id) {
                    return Err(err.clone());
                }
                let before = state.events.len();
                state
                    .events
                    .retain(|e| !(e.calendar_id == calendar_id && &e.id == id));
                if state.events.len() == before {
                    Err(RemoteMutationError::new(Some(410), "Resource has been deleted"))
                } else {
                    Ok(())
                }
            })
            .collect();

        Ok(outcomes)
    }

    async fn insert_events(
        &self,
        calendar_id: &str,
        events: &[EventDraft],
    ) -> SyncResult<Vec<MutationOutcome>> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::InsertBatch(events.iter().map(|e| e.summary.clone()).collect()));

        let outcomes = events
            .iter()
            .map(|draft| {
                if let Some(err) = state.insert_failures.get(&draft.summary) {
                    return Err(err.clone());
                }
                state.next_id += 1;
                let stored = StoredEvent {
                    id: format!("evt-{}", state.next_id),
                    calendar_id: calendar_id.to_string(),
                    start: timing_to_utc(&draft.start),
                    draft: Some(draft.clone()),
                };
                state.events.push(stored);
                Ok(())
            })
            .collect();

        Ok(outcomes)
    }
}
