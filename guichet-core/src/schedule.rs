//! Class schedule retrieval from the portal.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::courses::CourseFilter;
use crate::error::{SyncError, SyncResult};
use crate::portal::{Form, PortalSession};

const FORMATIONS_PATH: &str = "/getStudentFormation";
const EVENTS_PATH: &str = "/getEventInPeriode";

/// Range bounds are sent as local midnight, without a time zone.
const RANGE_DATE_FORMAT: &str = "%Y-%m-%dT00:00:00";

/// Portal fields kept when projecting a [`RawEvent`] to an [`Event`].
pub const PROJECTED_FIELDS: [&str; 9] = [
    "DateDebut",
    "DateFin",
    "Local",
    "Enseignant",
    "Cours",
    "Title",
    "LibelleType",
    "TypeCPE",
    "IsAllDay",
];

/// An event object exactly as the portal returns it.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(pub Map<String, Value>);

impl RawEvent {
    pub fn course_code(&self) -> Option<&str> {
        self.0.get("Cours").and_then(Value::as_str)
    }

    /// Keep only [`PROJECTED_FIELDS`]; everything else is dropped.
    pub fn project(mut self) -> SyncResult<Event> {
        self.0.retain(|key, _| PROJECTED_FIELDS.contains(&key.as_str()));

        serde_json::from_value(Value::Object(self.0))
            .map_err(|e| SyncError::MalformedResponse(format!("Unexpected event shape: {e}")))
    }
}

/// A scheduled class, as handed to the calendar reconciler.
///
/// Timestamps are naive local times in the institution's time zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "DateDebut", with = "portal_datetime")]
    pub start: NaiveDateTime,

    #[serde(rename = "DateFin", with = "portal_datetime")]
    pub end: NaiveDateTime,

    #[serde(rename = "Local", default, deserialize_with = "null_as_default")]
    pub location: String,

    #[serde(rename = "Enseignant", default, deserialize_with = "null_as_default")]
    pub teacher: String,

    #[serde(rename = "Cours", default, deserialize_with = "null_as_default")]
    pub course_code: String,

    #[serde(rename = "Title", default, deserialize_with = "null_as_default")]
    pub title: String,

    #[serde(rename = "LibelleType", default, deserialize_with = "null_as_default")]
    pub type_label: String,

    #[serde(rename = "TypeCPE", default, deserialize_with = "null_as_default")]
    pub type_code: String,

    #[serde(rename = "IsAllDay", default, deserialize_with = "null_as_default")]
    pub is_all_day: bool,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

mod portal_datetime {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y/%m/%d %H:%M";
    const FORMAT_WITH_SECONDS: &str = "%Y/%m/%d %H:%M:%S";

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(&s, FORMAT_WITH_SECONDS))
            .map_err(|e| serde::de::Error::custom(format!("invalid portal timestamp '{s}': {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct Formation {
    #[serde(rename = "idForm")]
    id_form: Value,
}

impl Formation {
    fn id(&self) -> SyncResult<String> {
        match &self.id_form {
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) if !s.is_empty() => Ok(s.clone()),
            other => Err(SyncError::MalformedResponse(format!(
                "Unexpected formation id: {other}"
            ))),
        }
    }
}

/// Fetches the schedule through an authenticated [`PortalSession`].
pub struct ScheduleClient<'a> {
    session: &'a PortalSession,
    courses: &'a CourseFilter,
}

impl<'a> ScheduleClient<'a> {
    pub fn new(session: &'a PortalSession, courses: &'a CourseFilter) -> Self {
        ScheduleClient { session, courses }
    }

    /// Enrollment identifiers of the logged-in student.
    pub async fn list_formations(&self) -> SyncResult<Vec<String>> {
        let body = self.session.request(FORMATIONS_PATH, Form::new()).await?;

        let formations: Vec<Formation> = serde_json::from_str(&body).map_err(|e| {
            SyncError::MalformedResponse(format!("Could not read student formations: {e}"))
        })?;

        formations.iter().map(Formation::id).collect()
    }

    /// Raw events of `formation_ids` between `start` and `end`. The range is
    /// passed through as is; the portal decides inclusivity.
    pub async fn fetch_events(
        &self,
        formation_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<Vec<RawEvent>> {
        let mut form: Form = vec![
            ("start".to_string(), start.format(RANGE_DATE_FORMAT).to_string()),
            ("end".to_string(), end.format(RANGE_DATE_FORMAT).to_string()),
        ];
        form.extend(
            formation_ids
                .iter()
                .map(|id| ("formations".to_string(), id.clone())),
        );
        form.push(("groupFilter".to_string(), "all".to_string()));

        let body = self.session.request(EVENTS_PATH, form).await?;

        serde_json::from_str(&body)
            .map_err(|e| SyncError::MalformedResponse(format!("Could not read events: {e}")))
    }

    /// Formations, then their events, filtered by the course allow-list and
    /// projected. Portal order is preserved.
    pub async fn get_events(&self, start: NaiveDate, end: NaiveDate) -> SyncResult<Vec<Event>> {
        let formation_ids = self.list_formations().await?;
        if formation_ids.is_empty() {
            tracing::warn!("Portal returned no formations for this student");
        }

        let raw_events = self.fetch_events(&formation_ids, start, end).await?;
        let events = filter_and_project(raw_events, self.courses)?;

        for course in retained_courses(&events) {
            tracing::info!(%course, "Course retained");
        }

        Ok(events)
    }
}

/// Drop events outside the allow-list, then project the rest.
pub fn filter_and_project(
    raw_events: Vec<RawEvent>,
    courses: &CourseFilter,
) -> SyncResult<Vec<Event>> {
    raw_events
        .into_iter()
        .filter(|raw| courses.is_empty() || raw.course_code().is_some_and(|c| courses.permits(c)))
        .map(RawEvent::project)
        .collect()
}

/// Distinct course codes present in `events`.
pub fn retained_courses(events: &[Event]) -> BTreeSet<String> {
    events.iter().map(|e| e.course_code.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortalConfig;
    use crate::portal::Credentials;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn raw(value: Value) -> RawEvent {
        serde_json::from_value(value).unwrap()
    }

    fn sample_event(course: &str) -> Value {
        json!({
            "DateDebut": "2024/02/05 09:00",
            "DateFin": "2024/02/05 10:30",
            "Local": "B01",
            "Enseignant": "Dr. X",
            "Cours": course,
            "Title": "Calculus",
            "LibelleType": "Lecture",
            "TypeCPE": "L",
            "IsAllDay": false,
            "IdEvent": 991,
            "Couleur": "#ff0000",
            "Groupes": ["A", "B"]
        })
    }

    #[test]
    fn test_project_keeps_exactly_the_fixed_fields() {
        let event = raw(sample_event("Math101")).project().unwrap();

        let projected = serde_json::to_value(&event).unwrap();
        let keys: BTreeSet<&str> = projected
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, PROJECTED_FIELDS.into_iter().collect::<BTreeSet<_>>());

        assert_eq!(
            event.start,
            NaiveDate::from_ymd_opt(2024, 2, 5).unwrap().and_hms_opt(9, 0, 0).unwrap()
        );
        assert_eq!(
            event.end,
            NaiveDate::from_ymd_opt(2024, 2, 5).unwrap().and_hms_opt(10, 30, 0).unwrap()
        );
        assert_eq!(event.location, "B01");
        assert_eq!(event.teacher, "Dr. X");
        assert_eq!(event.course_code, "Math101");
        assert_eq!(event.title, "Calculus");
        assert_eq!(event.type_label, "Lecture");
        assert_eq!(event.type_code, "L");
        assert!(!event.is_all_day);
    }

    #[test]
    fn test_project_roundtrips_portal_timestamp_format() {
        let event = raw(sample_event("Math101")).project().unwrap();
        let projected = serde_json::to_value(&event).unwrap();

        assert_eq!(projected["DateDebut"], "2024/02/05 09:00");
        assert_eq!(projected["DateFin"], "2024/02/05 10:30");
    }

    #[test]
    fn test_project_treats_null_strings_as_empty() {
        let event = raw(json!({
            "DateDebut": "2024/02/05 09:00",
            "DateFin": "2024/02/05 10:30",
            "Local": null,
            "Enseignant": null,
            "Cours": "Math101",
            "Title": "Calculus",
            "IsAllDay": null
        }))
        .project()
        .unwrap();

        assert_eq!(event.location, "");
        assert_eq!(event.teacher, "");
        assert_eq!(event.type_label, "");
        assert!(!event.is_all_day);
    }

    #[test]
    fn test_project_rejects_bad_timestamp() {
        let mut value = sample_event("Math101");
        value["DateDebut"] = json!("05.02.2024 09h");

        let err = raw(value).project().unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[test]
    fn test_allow_list_keeps_only_listed_courses() {
        let raw_events = vec![
            raw(sample_event("Math101")),
            raw(sample_event("Phys201")),
            raw(sample_event("Math101")),
        ];

        let events = filter_and_project(raw_events, &CourseFilter::new(["Math101"])).unwrap();

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.course_code == "Math101"));
    }

    #[test]
    fn test_empty_allow_list_keeps_everything() {
        let raw_events = vec![raw(sample_event("Math101")), raw(sample_event("Phys201"))];

        let events = filter_and_project(raw_events, &CourseFilter::default()).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(
            retained_courses(&events),
            BTreeSet::from(["Math101".to_string(), "Phys201".to_string()])
        );
    }

    #[test]
    fn test_filter_skips_events_without_course_before_projection() {
        let mut broken = sample_event("Math101");
        broken.as_object_mut().unwrap().remove("Cours");
        broken["DateDebut"] = json!("garbage");

        let raw_events = vec![raw(broken), raw(sample_event("Math101"))];
        let events = filter_and_project(raw_events, &CourseFilter::new(["Math101"])).unwrap();

        assert_eq!(events.len(), 1);
    }

    async fn portal() -> (MockServer, PortalSession) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Agenda"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<input name="__RequestVerificationToken" type="hidden" value="tok" />"#,
            ))
            .mount(&server)
            .await;

        let config = PortalConfig {
            base_url: server.uri(),
            ..PortalConfig::default()
        };
        let session = PortalSession::authenticate(&config, &Credentials::new("jdoe", "pw", ""))
            .await
            .unwrap();
        (server, session)
    }

    #[tokio::test]
    async fn test_list_formations_reads_ids() {
        let (server, session) = portal().await;
        Mock::given(method("POST"))
            .and(path("/getStudentFormation"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"idForm": 7, "Libelle": "BSc"}, {"idForm": "12"}])),
            )
            .mount(&server)
            .await;

        let courses = CourseFilter::default();
        let ids = ScheduleClient::new(&session, &courses).list_formations().await.unwrap();

        assert_eq!(ids, vec!["7", "12"]);
    }

    #[tokio::test]
    async fn test_list_formations_without_id_is_malformed() {
        let (server, session) = portal().await;
        Mock::given(method("POST"))
            .and(path("/getStudentFormation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"Libelle": "BSc"}])))
            .mount(&server)
            .await;

        let courses = CourseFilter::default();
        let err = ScheduleClient::new(&session, &courses)
            .list_formations()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_list_formations_html_body_is_malformed() {
        let (server, session) = portal().await;
        Mock::given(method("POST"))
            .and(path("/getStudentFormation"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>Error</html>"))
            .mount(&server)
            .await;

        let courses = CourseFilter::default();
        let err = ScheduleClient::new(&session, &courses)
            .list_formations()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_get_events_posts_range_and_formations() {
        let (server, session) = portal().await;
        Mock::given(method("POST"))
            .and(path("/getStudentFormation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"idForm": 7}])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/getEventInPeriode"))
            .and(body_string_contains("start=2024-01-30T00%3A00%3A00"))
            .and(body_string_contains("end=2024-03-30T00%3A00%3A00"))
            .and(body_string_contains("formations=7"))
            .and(body_string_contains("groupFilter=all"))
            .and(body_string_contains("__RequestVerificationToken=tok"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([sample_event("Math101"), sample_event("Phys201")])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let courses = CourseFilter::new(["Math101"]);
        let events = ScheduleClient::new(&session, &courses)
            .get_events(
                NaiveDate::from_ymd_opt(2024, 1, 30).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 30).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Calculus");
    }
}
