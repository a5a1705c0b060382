//! In-memory calendar service shared by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use gcalsync_core::error::{CoreError, MissingKind, RemoteError, Result};
use gcalsync_core::sync::{
    DeleteOutcome, EngineContext, EventPage, EventSpec, EventStatus, EventTime, PatchOutcome,
    RemoteEvent, RetryPolicy, SyncWindow, TimeRange,
};
use gcalsync_core::{CalendarGateway, IndexStore};

pub const WORK: &str = "work@example.com";
pub const HOME: &str = "home@example.com";
pub const RATE: Duration = Duration::from_millis(400);

/// Fixed "now" for every run.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
}

/// A confirmed one-hour event starting `hours` after [`now`].
pub fn source_event(id: &str, title: &str, hours: i64) -> RemoteEvent {
    let start = now() + chrono::Duration::hours(hours);
    RemoteEvent {
        id: id.into(),
        title: Some(title.into()),
        html_link: Some(format!("https://calendar.google.com/event?eid={id}")),
        start: EventTime::At(start),
        end: EventTime::At(start + chrono::Duration::hours(1)),
        status: EventStatus::Confirmed,
        updated: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        transparent: false,
        declined: false,
        is_blocker: false,
    }
}

/// One recorded gateway call.
#[derive(Debug, Clone)]
pub struct Call {
    pub operation: &'static str,
    pub calendar_id: String,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event: RemoteEvent,
    /// What was written, for blockers this tool created.
    pub spec: Option<EventSpec>,
}

#[derive(Default)]
struct State {
    calendars: BTreeMap<String, BTreeMap<String, StoredEvent>>,
    deleted: BTreeSet<(String, String)>,
    next_id: u32,
    calls: Vec<Call>,
    failures: VecDeque<(&'static str, CoreError)>,
}

/// Fake Google Calendar. Single-threaded, like the engine.
pub struct FakeCalendars {
    state: RefCell<State>,
    page_size: usize,
}

impl Default for FakeCalendars {
    fn default() -> Self {
        Self {
            state: RefCell::new(State::default()),
            page_size: 2,
        }
    }
}

impl FakeCalendars {
    pub fn put_event(&self, calendar_id: &str, event: RemoteEvent) {
        self.state
            .borrow_mut()
            .calendars
            .entry(calendar_id.to_string())
            .or_default()
            .insert(event.id.clone(), StoredEvent { event, spec: None });
    }

    /// Edit an event in place, as a user would in the calendar UI.
    pub fn edit_event(&self, calendar_id: &str, event_id: &str, edit: impl FnOnce(&mut RemoteEvent)) {
        let mut state = self.state.borrow_mut();
        let stored = state
            .calendars
            .get_mut(calendar_id)
            .and_then(|c| c.get_mut(event_id))
            .expect("event exists");
        edit(&mut stored.event);
        stored.event.updated += chrono::Duration::minutes(1);
    }

    /// Remove an event without leaving a cancelled tombstone.
    pub fn remove_event(&self, calendar_id: &str, event_id: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(cal) = state.calendars.get_mut(calendar_id) {
            cal.remove(event_id);
        }
        state
            .deleted
            .insert((calendar_id.to_string(), event_id.to_string()));
    }

    /// Blockers present in `calendar_id`, by event id.
    pub fn blockers(&self, calendar_id: &str) -> BTreeMap<String, EventSpec> {
        self.state
            .borrow()
            .calendars
            .get(calendar_id)
            .map(|c| {
                c.iter()
                    .filter_map(|(id, e)| e.spec.clone().map(|s| (id.clone(), s)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn mutation_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.operation != "list_events")
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Make the next `operation` call fail with `error`.
    pub fn fail_next(&self, operation: &'static str, error: CoreError) {
        self.state.borrow_mut().failures.push_back((operation, error));
    }

    fn record(&self, operation: &'static str, calendar_id: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call {
            operation,
            calendar_id: calendar_id.to_string(),
            at: Instant::now(),
        });
        if state.failures.front().map(|(op, _)| *op) == Some(operation) {
            if let Some((_, err)) = state.failures.pop_front() {
                return Err(err);
            }
        }
        Ok(())
    }

    fn missing(&self, calendar_id: &str, event_id: &str) -> MissingKind {
        if self
            .state
            .borrow()
            .deleted
            .contains(&(calendar_id.to_string(), event_id.to_string()))
        {
            MissingKind::Gone
        } else {
            MissingKind::NotFound
        }
    }
}

fn blocker_event(id: &str, spec: &EventSpec) -> RemoteEvent {
    RemoteEvent {
        id: id.to_string(),
        title: Some(spec.title.clone()),
        html_link: None,
        start: spec.start,
        end: spec.end,
        status: EventStatus::Confirmed,
        updated: now(),
        transparent: false,
        declined: false,
        is_blocker: true,
    }
}

fn starts_in(time: &EventTime, range: &TimeRange) -> bool {
    let start = match time {
        EventTime::At(t) => *t,
        EventTime::AllDay(d) => Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).expect("midnight")),
    };
    start >= range.start && start < range.end
}

pub fn transient(operation: &str) -> CoreError {
    RemoteError::Transient {
        operation: operation.into(),
        status: "429".into(),
        message: "Rate Limit Exceeded".into(),
    }
    .into()
}

#[async_trait(?Send)]
impl CalendarGateway for FakeCalendars {
    async fn list_events_page(
        &self,
        _account: &str,
        calendar_id: &str,
        range: TimeRange,
        page_token: Option<&str>,
    ) -> Result<EventPage> {
        self.record("list_events", calendar_id)?;
        let state = self.state.borrow();
        let all: Vec<RemoteEvent> = state
            .calendars
            .get(calendar_id)
            .map(|c| {
                c.values()
                    .filter(|e| starts_in(&e.event.start, &range))
                    .map(|e| e.event.clone())
                    .collect()
            })
            .unwrap_or_default();

        let offset: usize = page_token.map(|t| t.parse().expect("page token")).unwrap_or(0);
        let events: Vec<RemoteEvent> = all.iter().skip(offset).take(self.page_size).cloned().collect();
        let next = offset + events.len();
        Ok(EventPage {
            events,
            next_page_token: (next < all.len()).then(|| next.to_string()),
        })
    }

    async fn insert_event(&self, _account: &str, calendar_id: &str, spec: &EventSpec) -> Result<String> {
        self.record("insert_event", calendar_id)?;
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = format!("blk{}", state.next_id);
        state
            .calendars
            .entry(calendar_id.to_string())
            .or_default()
            .insert(
                id.clone(),
                StoredEvent {
                    event: blocker_event(&id, spec),
                    spec: Some(spec.clone()),
                },
            );
        Ok(id)
    }

    async fn patch_event(
        &self,
        _account: &str,
        calendar_id: &str,
        event_id: &str,
        spec: &EventSpec,
    ) -> Result<PatchOutcome> {
        self.record("patch_event", calendar_id)?;
        let mut state = self.state.borrow_mut();
        match state.calendars.get_mut(calendar_id).and_then(|c| c.get_mut(event_id)) {
            Some(stored) => {
                stored.event = blocker_event(event_id, spec);
                stored.spec = Some(spec.clone());
                Ok(PatchOutcome::Patched)
            }
            None => Ok(PatchOutcome::Missing),
        }
    }

    async fn delete_event(&self, _account: &str, calendar_id: &str, event_id: &str) -> Result<DeleteOutcome> {
        self.record("delete_event", calendar_id)?;
        let removed = self
            .state
            .borrow_mut()
            .calendars
            .get_mut(calendar_id)
            .and_then(|c| c.remove(event_id));
        if removed.is_some() {
            self.state
                .borrow_mut()
                .deleted
                .insert((calendar_id.to_string(), event_id.to_string()));
            return Ok(DeleteOutcome::Deleted);
        }
        Ok(match self.missing(calendar_id, event_id) {
            MissingKind::Gone => DeleteOutcome::Gone,
            MissingKind::NotFound => DeleteOutcome::NotFound,
        })
    }
}

/// Index with the two test calendars registered.
pub fn store() -> IndexStore {
    let store = IndexStore::open_in_memory().unwrap();
    store.add_calendar("work", WORK).unwrap();
    store.add_calendar("home", HOME).unwrap();
    store
}

pub fn context<'a>(
    store: &'a IndexStore,
    gateway: &'a FakeCalendars,
    cancel: CancellationToken,
) -> EngineContext<'a, FakeCalendars> {
    EngineContext {
        store,
        gateway,
        rate_interval: RATE,
        retry: RetryPolicy::default(),
        window: SyncWindow::default(),
        cancel,
    }
}

/// Every index row matches a tagged remote blocker and vice versa.
pub fn assert_index_faithful(store: &IndexStore, fake: &FakeCalendars) {
    let calendars = store.calendars().unwrap();
    for cal in &calendars {
        let rows = store.blockers_in(&cal.calendar_id).unwrap();
        let remote = fake.blockers(&cal.calendar_id);
        let row_ids: BTreeSet<&str> = rows.iter().map(|r| r.event_id.as_str()).collect();
        let remote_ids: BTreeSet<&str> = remote.keys().map(String::as_str).collect();
        assert_eq!(row_ids, remote_ids, "index and remote disagree for {}", cal.calendar_id);

        for row in &rows {
            let spec = &remote[&row.event_id];
            assert_eq!(spec.origin_event_id, row.origin_event_id);
            assert_eq!(spec.origin_calendar_id, row.origin_calendar_id);
            assert_eq!(spec.origin_fingerprint, row.origin_fingerprint);
        }
    }
}
