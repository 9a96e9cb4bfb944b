//! One end-to-end sync run.
//!
//! Authenticate, resolve the target calendar, fetch the schedule, then clear
//! and re-insert. Nothing touches the calendar until the schedule has been
//! fetched successfully, so a portal failure leaves the calendar as it was.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::calendar::{CalendarService, CalendarTarget, find_calendar};
use crate::config::SyncConfig;
use crate::courses::CourseFilter;
use crate::date_range::SyncRange;
use crate::error::SyncResult;
use crate::portal::{Credentials, PortalSession};
use crate::reconcile::{CalendarReconciler, ClearPolicy, ReconcileOptions, ReconcileReport};
use crate::schedule::{Event, ScheduleClient, retained_courses};

#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// Display name of the target calendar.
    pub calendar_name: String,
    pub range: SyncRange,
    pub clear_policy: ClearPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Authenticating,
    ResolvingCalendar,
    FetchingSchedule,
    Clearing,
    Inserting,
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SyncStage::Authenticating => "Logging in to the portal",
            SyncStage::ResolvingCalendar => "Looking up calendar",
            SyncStage::FetchingSchedule => "Fetching schedule",
            SyncStage::Clearing => "Clearing calendar",
            SyncStage::Inserting => "Inserting events",
        };
        write!(f, "{label}")
    }
}

/// Progress callbacks for a sync run. Every method defaults to doing nothing.
pub trait SyncObserver {
    fn stage(&mut self, _stage: SyncStage) {}

    fn calendar(&mut self, _target: &CalendarTarget) {}

    /// Called once the schedule is fetched, with the distinct course codes kept.
    fn schedule(&mut self, _events: &[Event], _courses: &BTreeSet<String>) {}
}

/// Observer that ignores everything.
pub struct Silent;

impl SyncObserver for Silent {}

/// Log in and fetch the filtered schedule for `range`.
pub async fn fetch_schedule(
    config: &SyncConfig,
    credentials: &Credentials,
    range: &SyncRange,
) -> SyncResult<Vec<Event>> {
    let session = PortalSession::authenticate(&config.portal, credentials).await?;
    let courses = CourseFilter::new(&config.courses);

    ScheduleClient::new(&session, &courses)
        .get_events(range.start, range.end)
        .await
}

pub struct SyncOrchestrator<'a, C: CalendarService + ?Sized> {
    config: &'a SyncConfig,
    calendar: &'a C,
}

impl<'a, C: CalendarService + ?Sized> SyncOrchestrator<'a, C> {
    pub fn new(config: &'a SyncConfig, calendar: &'a C) -> Self {
        SyncOrchestrator { config, calendar }
    }

    pub async fn resolve_calendar(&self, name: &str) -> SyncResult<CalendarTarget> {
        find_calendar(self.calendar, name).await
    }

    pub async fn run(
        &self,
        credentials: &Credentials,
        request: &SyncRequest,
        observer: &mut dyn SyncObserver,
    ) -> SyncResult<ReconcileReport> {
        self.run_at(credentials, request, observer, Utc::now()).await
    }

    /// [`run`](Self::run) with an explicit "now" for the clear cutoff.
    pub async fn run_at(
        &self,
        credentials: &Credentials,
        request: &SyncRequest,
        observer: &mut dyn SyncObserver,
        now: DateTime<Utc>,
    ) -> SyncResult<ReconcileReport> {
        let options = ReconcileOptions::from_config(&self.config.calendar)?;

        observer.stage(SyncStage::Authenticating);
        let session = PortalSession::authenticate(&self.config.portal, credentials).await?;

        observer.stage(SyncStage::ResolvingCalendar);
        let target = self.resolve_calendar(&request.calendar_name).await?;
        tracing::info!(calendar = %target.name, id = %target.id, "Target calendar resolved");
        observer.calendar(&target);

        observer.stage(SyncStage::FetchingSchedule);
        let courses = CourseFilter::new(&self.config.courses);
        let events = ScheduleClient::new(&session, &courses)
            .get_events(request.range.start, request.range.end)
            .await?;
        observer.schedule(&events, &retained_courses(&events));

        let cutoff = request.clear_policy.cutoff(now, options.time_zone);
        let reconciler = CalendarReconciler::new(self.calendar, &target.id, options);

        observer.stage(SyncStage::Clearing);
        let mut report = reconciler.clear_from(cutoff).await?;

        observer.stage(SyncStage::Inserting);
        report.merge(reconciler.insert_all(&events).await);

        tracing::info!(
            deleted = report.deleted,
            already_gone = report.already_gone,
            created = report.created,
            failed = report.failures.len(),
            "Sync finished"
        );

        Ok(report)
    }
}
