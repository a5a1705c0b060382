//! Origin fingerprints.
//!
//! A fingerprint summarizes everything about a source event that shows up in
//! its blocker. When it changes, the blocker is patched.

use sha2::{Digest, Sha256};

use crate::sync::types::{EventStatus, ProjectionMode, RemoteEvent};

/// Fingerprint assigned to cancelled events.
pub const CANCELLED_FINGERPRINT: &str = "cancelled";

/// Hex characters kept from the digest.
const FINGERPRINT_LEN: usize = 16;

/// Compute the fingerprint of `event` as projected in `mode`.
pub fn fingerprint(event: &RemoteEvent, mode: ProjectionMode) -> String {
    if event.status == EventStatus::Cancelled {
        return CANCELLED_FINGERPRINT.to_string();
    }

    let mut hasher = Sha256::new();
    for part in [
        event.id.as_str(),
        &event.updated.to_rfc3339(),
        &event.start.canonical(),
        &event.end.canonical(),
        event.status.as_str(),
        mode.as_str(),
    ] {
        hasher.update(part.as_bytes());
        // Field separator; ids never contain NUL.
        hasher.update([0u8]);
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(FINGERPRINT_LEN);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::EventTime;
    use chrono::{Duration, TimeZone, Utc};

    fn event() -> RemoteEvent {
        let start = Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap();
        RemoteEvent {
            id: "evt-1".into(),
            title: Some("Standup".into()),
            html_link: None,
            start: EventTime::At(start),
            end: EventTime::At(start + Duration::minutes(15)),
            status: EventStatus::Confirmed,
            updated: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            transparent: false,
            declined: false,
            is_blocker: false,
        }
    }

    #[test]
    fn fingerprint_is_short_hex_and_stable() {
        let fp = fingerprint(&event(), ProjectionMode::Busy);
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, fingerprint(&event(), ProjectionMode::Busy));
    }

    #[test]
    fn fingerprint_tracks_time_and_revision() {
        let base = fingerprint(&event(), ProjectionMode::Detailed);

        let mut moved = event();
        moved.end = EventTime::At(Utc.with_ymd_and_hms(2024, 5, 6, 11, 0, 0).unwrap());
        assert_ne!(base, fingerprint(&moved, ProjectionMode::Detailed));

        let mut edited = event();
        edited.updated += Duration::seconds(1);
        assert_ne!(base, fingerprint(&edited, ProjectionMode::Detailed));
    }

    #[test]
    fn fingerprint_depends_on_mode() {
        assert_ne!(
            fingerprint(&event(), ProjectionMode::Busy),
            fingerprint(&event(), ProjectionMode::Detailed)
        );
    }

    #[test]
    fn title_alone_does_not_change_fingerprint() {
        // A title edit always bumps `updated` remotely; the title itself is not hashed.
        let mut renamed = event();
        renamed.title = Some("Renamed".into());
        assert_eq!(
            fingerprint(&event(), ProjectionMode::Detailed),
            fingerprint(&renamed, ProjectionMode::Detailed)
        );
    }

    #[test]
    fn cancelled_events_get_sentinel() {
        let mut cancelled = event();
        cancelled.status = EventStatus::Cancelled;
        assert_eq!(fingerprint(&cancelled, ProjectionMode::Busy), CANCELLED_FINGERPRINT);
    }
}
