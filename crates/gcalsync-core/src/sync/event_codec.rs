//! Encoding/decoding between Google Calendar JSON and projection types.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};

use crate::sync::types::{
    EventSpec, EventStatus, EventTime, RemoteEvent, BLOCKER_TAG, FINGERPRINT_PROP,
    ORIGIN_CALENDAR_PROP, ORIGIN_EVENT_PROP,
};

/// An event payload that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot decode event {event_id}: {message}")]
pub struct DecodeError {
    pub event_id: String,
    pub message: String,
}

// ============================================================================
// Remote -> RemoteEvent
// ============================================================================

/// Parse one item of an `events.list` response.
///
/// Cancelled instances of recurring events often carry no `start`/`end`; they
/// fall back to `originalStartTime` so they still decode.
pub fn parse_gcal_event(item: &Value) -> Result<RemoteEvent, DecodeError> {
    let id = item["id"].as_str().unwrap_or_default().to_string();
    let fail = |message: String| DecodeError {
        event_id: if id.is_empty() { "<no id>".into() } else { id.clone() },
        message,
    };

    if id.is_empty() {
        return Err(fail("missing id".into()));
    }

    let status = EventStatus::parse(item["status"].as_str().unwrap_or("confirmed"));

    let updated_str = item["updated"]
        .as_str()
        .ok_or_else(|| fail("missing updated".into()))?;
    let updated = DateTime::parse_from_rfc3339(updated_str)
        .map_err(|e| fail(format!("invalid updated '{updated_str}': {e}")))?
        .with_timezone(&Utc);

    let fallback = &item["originalStartTime"];
    let start = match parse_event_time(&item["start"]) {
        Some(t) => t,
        None if status == EventStatus::Cancelled => {
            parse_event_time(fallback).unwrap_or(EventTime::At(updated))
        }
        None => return Err(fail("missing or invalid start".into())),
    };
    let end = match parse_event_time(&item["end"]) {
        Some(t) => t,
        None if status == EventStatus::Cancelled => start,
        None => return Err(fail("missing or invalid end".into())),
    };

    let declined = item["attendees"]
        .as_array()
        .map(|attendees| {
            attendees.iter().any(|a| {
                a["self"].as_bool() == Some(true)
                    && a["responseStatus"].as_str() == Some("declined")
            })
        })
        .unwrap_or(false);

    Ok(RemoteEvent {
        id: id.clone(),
        title: item["summary"].as_str().map(|s| s.to_string()),
        html_link: item["htmlLink"].as_str().map(|s| s.to_string()),
        start,
        end,
        status,
        updated,
        transparent: item["transparency"].as_str() == Some("transparent"),
        declined,
        is_blocker: is_blocker(item),
    })
}

/// Whether a raw event carries the managed-blocker tag.
pub fn is_blocker(item: &Value) -> bool {
    item["extendedProperties"]["private"][BLOCKER_TAG].as_str() == Some("1")
}

fn parse_event_time(value: &Value) -> Option<EventTime> {
    if let Some(dt) = value["dateTime"].as_str() {
        return DateTime::parse_from_rfc3339(dt)
            .ok()
            .map(|t| EventTime::At(t.with_timezone(&Utc)));
    }
    value["date"]
        .as_str()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(EventTime::AllDay)
}

// ============================================================================
// EventSpec -> Remote
// ============================================================================

/// Convert an EventSpec to a Google Calendar event body.
///
/// The same body serves inserts and patches: detail fields are always sent
/// (empty when absent) so a patch clears whatever an earlier projection wrote,
/// and the whole private property map is sent so the tags survive.
pub fn to_gcal_event(spec: &EventSpec) -> Value {
    json!({
        "summary": spec.title,
        "description": spec.description.clone().unwrap_or_default(),
        "location": "",
        "attendees": [],
        "start": event_time_json(&spec.start),
        "end": event_time_json(&spec.end),
        "transparency": "opaque",
        "reminders": {
            "useDefault": false,
            "overrides": [],
        },
        "extendedProperties": {
            "private": {
                BLOCKER_TAG: "1",
                FINGERPRINT_PROP: spec.origin_fingerprint,
                ORIGIN_CALENDAR_PROP: spec.origin_calendar_id,
                ORIGIN_EVENT_PROP: spec.origin_event_id,
            }
        }
    })
}

fn event_time_json(time: &EventTime) -> Value {
    match time {
        EventTime::At(dt) => json!({ "dateTime": dt.to_rfc3339(), "date": null }),
        EventTime::AllDay(d) => json!({ "date": d.format("%Y-%m-%d").to_string(), "dateTime": null }),
    }
}
