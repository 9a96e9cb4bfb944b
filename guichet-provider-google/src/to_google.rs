//! Calendar drafts as `google_calendar` API types.

use chrono::Utc;
use google_calendar::types::{Event, EventDateTime, EventReminder, Reminders};
use guichet_core::calendar::{EventDraft, EventTiming, ReminderPolicy};

/// Convert to Google API types from guichet types
pub trait ToGoogle<T> {
    fn to_google(&self) -> T;
}

impl ToGoogle<Event> for EventDraft {
    fn to_google(&self) -> Event {
        let zone = self.time_zone.name();

        Event {
            summary: self.summary.clone(),
            location: self.location.clone(),
            start: Some(event_time_to_google(&self.start, zone)),
            end: Some(event_time_to_google(&self.end, zone)),
            reminders: Some(self.reminders.to_google()),
            ..Default::default()
        }
    }
}

impl ToGoogle<Reminders> for ReminderPolicy {
    fn to_google(&self) -> Reminders {
        Reminders {
            use_default: self.use_default,
            overrides: self
                .overrides
                .iter()
                .map(|r| EventReminder {
                    method: r.method.as_str().to_string(),
                    minutes: i64::from(r.minutes),
                })
                .collect(),
        }
    }
}

/// Timed boundaries go out as UTC instants tagged with the zone name, so
/// Google shows them in local time. All-day boundaries carry only the date.
fn event_time_to_google(time: &EventTiming, zone: &str) -> EventDateTime {
    match time {
        EventTiming::DateTime(dt) => EventDateTime {
            date: None,
            date_time: Some(dt.with_timezone(&Utc)),
            time_zone: zone.to_string(),
        },
        EventTiming::Date(d) => EventDateTime {
            date: Some(*d),
            date_time: None,
            time_zone: String::new(),
        },
    }
}
