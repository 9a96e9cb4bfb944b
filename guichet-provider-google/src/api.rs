//! Google Calendar as a [`CalendarService`]: listings through the
//! `google-calendar` client, mutations through the multipart batch endpoint.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use google_calendar::types::{Event, MinAccessRole, OrderBy};
use google_calendar::{Client, ClientError};
use guichet_core::calendar::{
    CalendarEntry, CalendarService, EventDraft, MutationOutcome, Page, RemoteEvent, all_calendars,
};
use guichet_core::{SyncError, SyncResult};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode};
use url::Url;

use crate::batch::{self, BatchRequest};
use crate::session::Session;
use crate::to_google::ToGoogle;

pub const API_BASE: &str = "https://www.googleapis.com/calendar/v3";
pub const BATCH_URL: &str = "https://www.googleapis.com/batch/calendar/v3";

pub struct GoogleCalendar {
    client: Client,
    http: reqwest::Client,
    access_token: String,
    batch_url: Url,
}

impl GoogleCalendar {
    pub fn new(access_token: &str) -> SyncResult<Self> {
        Self::with_endpoints(access_token, API_BASE, BATCH_URL)
    }

    pub fn with_endpoints(access_token: &str, api_base: &str, batch_url: &str) -> SyncResult<Self> {
        let batch_url = Url::parse(batch_url)
            .map_err(|e| SyncError::Config(format!("Invalid Google endpoint '{batch_url}': {e}")))?;

        // Only the access token is needed; refreshing is the session's job.
        let mut client = Client::new(
            String::new(),
            String::new(),
            String::new(),
            access_token.to_string(),
            String::new(),
        );
        client.with_host_override(api_base.trim_end_matches('/'));

        Ok(GoogleCalendar {
            client,
            http: reqwest::Client::new(),
            access_token: access_token.to_string(),
            batch_url,
        })
    }

    /// Client for a connected account, refreshing its token when needed.
    pub async fn for_account(account: &str) -> anyhow::Result<Self> {
        let session = Session::load_valid(account).await?;
        Ok(Self::new(session.access_token())?)
    }

    /// Id of the primary calendar, which Google sets to the account's email.
    pub async fn primary_calendar_id(&self) -> SyncResult<Option<String>> {
        Ok(all_calendars(self)
            .await?
            .into_iter()
            .find(|c| c.primary)
            .map(|c| c.id))
    }

    /// Path of a sub-request inside a batch, e.g. `/calendar/v3/calendars/x/events`.
    fn batch_path(&self, segments: &[&str]) -> SyncResult<String> {
        let mut url = Url::parse(API_BASE)
            .map_err(|e| SyncError::Config(format!("Invalid Google endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::Config("Google endpoint cannot take a path".into()))?
            .extend(segments);
        Ok(url.path().to_string())
    }

    async fn send_batch(&self, request: BatchRequest) -> SyncResult<Vec<MutationOutcome>> {
        if request.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(parts = request.len(), "Sending batch request");
        let response = self
            .http
            .post(self.batch_url.clone())
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE, request.content_type())
            .body(request.encode())
            .send()
            .await?;
        let response = check(response).await?;

        let boundary = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(batch::boundary_from_content_type)
            .ok_or_else(|| SyncError::Calendar("Batch response is not multipart".into()))?;

        let body = response.text().await?;
        let parts = batch::decode(&body, &boundary)
            .map_err(|e| SyncError::Calendar(format!("Could not read batch response: {e:#}")))?;

        Ok(batch::outcomes(&parts, request.len()))
    }
}

fn rejected(status: StatusCode, message: &str) -> String {
    match status {
        StatusCode::UNAUTHORIZED => format!("Google rejected the access token: {message}"),
        _ => format!("Google Calendar answered {status}: {message}"),
    }
}

/// Turn a non-success status into [`SyncError::Calendar`] with Google's message.
async fn check(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = batch::error_message(&body).unwrap_or(body);

    Err(SyncError::Calendar(rejected(status, &message)))
}

fn client_error(context: &str, err: ClientError) -> SyncError {
    SyncError::Calendar(match err {
        ClientError::HttpError { status, error, .. } => {
            let message = batch::error_message(&error).unwrap_or(error);
            let status = StatusCode::from_u16(status.as_u16())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            format!("{context}: {}", rejected(status, &message))
        }
        other => format!("{context}: {other}"),
    })
}

/// Google's `timeMin` matches on end time, so events already running at
/// `time_min` come back too. Only events that start at or after it count.
fn starts_at_or_after(event: &Event, time_min: DateTime<Utc>) -> bool {
    let Some(start) = &event.start else {
        return false;
    };

    match (start.date_time, start.date) {
        (Some(dt), _) => dt >= time_min,
        (None, Some(d)) => d.and_time(NaiveTime::MIN).and_utc() >= time_min,
        (None, None) => false,
    }
}

#[async_trait]
impl CalendarService for GoogleCalendar {
    // list_all walks every page itself, so there is never a continuation token.
    async fn list_calendars(&self, _page_token: Option<&str>) -> SyncResult<Page<CalendarEntry>> {
        let response = self
            .client
            .calendar_list()
            .list_all(MinAccessRole::default(), false, false)
            .await
            .map_err(|e| client_error("Failed to fetch calendars", e))?;

        Ok(Page {
            items: response
                .body
                .into_iter()
                .filter(|c| !c.id.is_empty())
                .map(|c| CalendarEntry {
                    id: c.id,
                    summary: c.summary,
                    primary: c.primary,
                })
                .collect(),
            next_page_token: None,
        })
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        _page_token: Option<&str>,
    ) -> SyncResult<Page<RemoteEvent>> {
        let time_min_param = time_min.to_rfc3339_opts(SecondsFormat::Secs, true);
        let response = self
            .client
            .events()
            .list_all(
                calendar_id,
                "",
                0,
                OrderBy::default(),
                &[],
                "", // search query
                &[],
                false,
                false,
                false,
                "",
                &time_min_param,
                "",
                "",
            )
            .await
            .map_err(|e| client_error("Failed to fetch events", e))?;

        Ok(Page {
            items: response
                .body
                .into_iter()
                .filter(|e| !e.id.is_empty() && starts_at_or_after(e, time_min))
                .map(|e| RemoteEvent { id: e.id })
                .collect(),
            next_page_token: None,
        })
    }

    async fn delete_events(
        &self,
        calendar_id: &str,
        event_ids: &[String],
    ) -> SyncResult<Vec<MutationOutcome>> {
        let mut request = BatchRequest::new();
        for id in event_ids {
            request.delete(self.batch_path(&["calendars", calendar_id, "events", id])?);
        }

        self.send_batch(request).await
    }

    async fn insert_events(
        &self,
        calendar_id: &str,
        events: &[EventDraft],
    ) -> SyncResult<Vec<MutationOutcome>> {
        let path = self.batch_path(&["calendars", calendar_id, "events"])?;
        let mut request = BatchRequest::new();
        for event in events {
            let google_event: Event = event.to_google();
            let body = serde_json::to_string(&google_event)
                .map_err(|e| SyncError::Calendar(format!("Could not encode event: {e}")))?;
            request.post_json(path.clone(), body);
        }

        self.send_batch(request).await
    }
}
