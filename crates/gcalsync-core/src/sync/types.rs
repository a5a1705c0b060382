//! Core types for blocker projection.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Private extended property marking events this tool manages.
pub const BLOCKER_TAG: &str = "gcalsync_blocker";
/// Private extended property carrying the origin fingerprint.
pub const FINGERPRINT_PROP: &str = "origin_fingerprint";
pub const ORIGIN_CALENDAR_PROP: &str = "gcalsync_origin_calendar";
pub const ORIGIN_EVENT_PROP: &str = "gcalsync_origin_event";

/// Title used for blockers in pairs with a policy edge.
pub const BUSY_TITLE: &str = "Busy";

/// How much of the origin event a blocker reveals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMode {
    /// Policy edge present: the blocker reads "Busy" and nothing else.
    Busy,
    /// No policy edge: the blocker carries the origin title and a link.
    Detailed,
}

impl ProjectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionMode::Busy => "busy",
            ProjectionMode::Detailed => "detailed",
        }
    }
}

/// When an event starts or ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTime {
    /// A timed event boundary.
    At(DateTime<Utc>),
    /// An all-day event boundary (end is exclusive, as the API reports it).
    AllDay(NaiveDate),
}

impl EventTime {
    /// Stable text form used in fingerprints and logs.
    pub fn canonical(&self) -> String {
        match self {
            EventTime::At(dt) => dt.to_rfc3339(),
            EventTime::AllDay(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Lifecycle status reported by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Confirmed => "confirmed",
            EventStatus::Tentative => "tentative",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cancelled" => EventStatus::Cancelled,
            "tentative" => EventStatus::Tentative,
            _ => EventStatus::Confirmed,
        }
    }
}

/// An event as read from a source calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub id: String,
    pub title: Option<String>,
    pub html_link: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub status: EventStatus,
    pub updated: DateTime<Utc>,
    /// "Show as free".
    pub transparent: bool,
    /// The calendar owner declined the invitation.
    pub declined: bool,
    /// Carries the `gcalsync_blocker=1` tag, i.e. one of ours.
    pub is_blocker: bool,
}

impl RemoteEvent {
    /// Whether the event makes the owner busy and so needs a blocker.
    pub fn occupies_time(&self) -> bool {
        self.status != EventStatus::Cancelled && !self.transparent && !self.declined
    }
}

/// What gets written into a target calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSpec {
    pub start: EventTime,
    pub end: EventTime,
    pub title: String,
    pub description: Option<String>,
    pub origin_fingerprint: String,
    pub origin_calendar_id: String,
    pub origin_event_id: String,
}

impl EventSpec {
    /// Whether the blocker carries no detail of the origin event.
    pub fn is_opaque(&self) -> bool {
        self.title == BUSY_TITLE && self.description.is_none()
    }
}

/// One page of an event listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPage {
    pub events: Vec<RemoteEvent>,
    /// Present while more pages remain.
    pub next_page_token: Option<String>,
}

/// Result of a remote delete. All three count as "the blocker is gone".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    Gone,
}

/// Result of a remote patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched,
    /// The target event no longer exists (404/410).
    Missing,
}

/// Largest window extent accepted on either side of "now" (100 years).
pub const MAX_WINDOW_HOURS: u64 = 24 * 365 * 100;

/// Rolling window of relevance around "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub past: Duration,
    pub future: Duration,
}

impl SyncWindow {
    /// Window of the given extents, each capped at [`MAX_WINDOW_HOURS`].
    pub fn from_hours(past_hours: u64, future_hours: u64) -> Self {
        let hours = |h: u64| {
            let capped = i64::try_from(h.min(MAX_WINDOW_HOURS)).unwrap_or(i64::MAX);
            Duration::try_hours(capped).unwrap_or(Duration::MAX)
        };
        Self {
            past: hours(past_hours),
            future: hours(future_hours),
        }
    }

    /// Concrete bounds for a run starting at `now`, saturating at the
    /// representable date range.
    pub fn bounds(&self, now: DateTime<Utc>) -> TimeRange {
        TimeRange {
            start: now
                .checked_sub_signed(self.past)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: now
                .checked_add_signed(self.future)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl Default for SyncWindow {
    fn default() -> Self {
        Self::from_hours(24, 1440)
    }
}

/// `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
