//! Google Calendar v3 gateway.
//!
//! Talks to `events.list/insert/patch/delete` with bearer tokens from a
//! [`CredentialBroker`]. Non-2xx answers are classified here: 404/410 become
//! "missing" outcomes, rate limiting and network errors are transient,
//! everything else is fatal.

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::traits::{CalendarGateway, CredentialBroker};
use crate::error::{CoreError, MissingKind, RemoteError, Result};
use crate::sync::event_codec::{parse_gcal_event, to_gcal_event};
use crate::sync::types::{DeleteOutcome, EventPage, EventSpec, PatchOutcome, TimeRange};

/// Page size requested from `events.list`.
const PAGE_SIZE: &str = "250";

/// 403 reasons that mean "slow down" rather than "forbidden".
const RATE_LIMIT_REASONS: [&str; 2] = ["rateLimitExceeded", "userRateLimitExceeded"];

/// Gateway to the Google Calendar REST API.
pub struct GoogleCalendarGateway<B> {
    base_url: String,
    client: Client,
    broker: B,
}

impl<B: CredentialBroker> GoogleCalendarGateway<B> {
    pub fn new(base_url: impl Into<String>, broker: B) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            broker,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id)
        )
    }

    /// Send `request` with the account's token. Non-2xx answers become errors.
    async fn send(&self, operation: &str, account: &str, request: RequestBuilder) -> Result<Response> {
        let token = self.broker.access_token(account).await?;
        let resp = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RemoteError::Transient {
                operation: operation.to_string(),
                status: "network".into(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.broker.invalidate(account);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify(operation, status, &body).into())
    }
}

/// Map a non-2xx response to a [`RemoteError`].
pub fn classify(operation: &str, status: StatusCode, body: &str) -> RemoteError {
    let operation = operation.to_string();
    match status.as_u16() {
        404 => RemoteError::Missing {
            operation,
            kind: MissingKind::NotFound,
        },
        410 => RemoteError::Missing {
            operation,
            kind: MissingKind::Gone,
        },
        429 => RemoteError::Transient {
            operation,
            status: "429".into(),
            message: error_message(body),
        },
        403 if RATE_LIMIT_REASONS.iter().any(|r| body.contains(r)) => RemoteError::Transient {
            operation,
            status: "403".into(),
            message: error_message(body),
        },
        code => RemoteError::Fatal {
            operation,
            status: code,
            message: error_message(body),
        },
    }
}

/// The `error.message` of a Google error body, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| body.trim().to_string())
}

fn missing_kind(err: &CoreError) -> Option<MissingKind> {
    match err {
        CoreError::Remote(RemoteError::Missing { kind, .. }) => Some(*kind),
        _ => None,
    }
}

async fn read_json(operation: &str, resp: Response) -> Result<Value> {
    let status = resp.status().as_u16();
    resp.json::<Value>().await.map_err(|e| {
        RemoteError::Fatal {
            operation: operation.to_string(),
            status,
            message: format!("unreadable response body: {e}"),
        }
        .into()
    })
}

#[async_trait(?Send)]
impl<B: CredentialBroker> CalendarGateway for GoogleCalendarGateway<B> {
    async fn list_events_page(
        &self,
        account: &str,
        calendar_id: &str,
        range: TimeRange,
        page_token: Option<&str>,
    ) -> Result<EventPage> {
        let time_min = range.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let time_max = range.end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut request = self.client.get(self.events_url(calendar_id)).query(&[
            ("singleEvents", "true"),
            ("showDeleted", "true"),
            ("maxResults", PAGE_SIZE),
            ("timeMin", time_min.as_str()),
            ("timeMax", time_max.as_str()),
        ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let resp = self.send("list_events", account, request).await?;
        let body = read_json("list_events", resp).await?;

        let mut events = Vec::new();
        for item in body["items"].as_array().into_iter().flatten() {
            match parse_gcal_event(item) {
                Ok(event) => events.push(event),
                Err(e) => warn!(calendar_id, error = %e, "skipping undecodable event"),
            }
        }
        debug!(calendar_id, count = events.len(), "listed events page");

        Ok(EventPage {
            events,
            next_page_token: body["nextPageToken"].as_str().map(|s| s.to_string()),
        })
    }

    async fn insert_event(
        &self,
        account: &str,
        calendar_id: &str,
        spec: &EventSpec,
    ) -> Result<String> {
        let request = self
            .client
            .post(self.events_url(calendar_id))
            .json(&to_gcal_event(spec));
        let resp = self.send("insert_event", account, request).await?;
        let body = read_json("insert_event", resp).await?;

        let event_id = body["id"].as_str().ok_or_else(|| RemoteError::Fatal {
            operation: "insert_event".into(),
            status: 200,
            message: "missing event id in response".into(),
        })?;
        Ok(event_id.to_string())
    }

    async fn patch_event(
        &self,
        account: &str,
        calendar_id: &str,
        event_id: &str,
        spec: &EventSpec,
    ) -> Result<PatchOutcome> {
        let request = self
            .client
            .patch(self.event_url(calendar_id, event_id))
            .json(&to_gcal_event(spec));
        match self.send("patch_event", account, request).await {
            Ok(_) => Ok(PatchOutcome::Patched),
            Err(e) if missing_kind(&e).is_some() => Ok(PatchOutcome::Missing),
            Err(e) => Err(e),
        }
    }

    async fn delete_event(
        &self,
        account: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<DeleteOutcome> {
        let request = self.client.delete(self.event_url(calendar_id, event_id));
        match self.send("delete_event", account, request).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) => match missing_kind(&e) {
                Some(MissingKind::NotFound) => Ok(DeleteOutcome::NotFound),
                Some(MissingKind::Gone) => Ok(DeleteOutcome::Gone),
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::{EventTime, BUSY_TITLE};
    use chrono::{Duration, TimeZone, Utc};
    use mockito::Matcher;
    use std::cell::Cell;

    #[derive(Default)]
    struct StaticBroker {
        invalidated: Cell<u32>,
    }

    #[async_trait(?Send)]
    impl CredentialBroker for StaticBroker {
        async fn access_token(&self, _account: &str) -> Result<String> {
            Ok("test-token".into())
        }

        fn invalidate(&self, _account: &str) {
            self.invalidated.set(self.invalidated.get() + 1);
        }
    }

    fn gateway(server: &mockito::ServerGuard) -> GoogleCalendarGateway<StaticBroker> {
        GoogleCalendarGateway::new(format!("{}/", server.url()), StaticBroker::default())
    }

    fn range() -> TimeRange {
        let start = Utc.with_ymd_and_hms(2024, 5, 5, 12, 0, 0).unwrap();
        TimeRange {
            start,
            end: start + Duration::days(60),
        }
    }

    fn spec() -> EventSpec {
        let start = Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap();
        EventSpec {
            start: EventTime::At(start),
            end: EventTime::At(start + Duration::hours(1)),
            title: BUSY_TITLE.into(),
            description: None,
            origin_fingerprint: "0123456789abcdef".into(),
            origin_calendar_id: "home".into(),
            origin_event_id: "evt-1".into(),
        }
    }

    #[test]
    fn ids_are_encoded_in_paths() {
        let gw = GoogleCalendarGateway::new("https://api.example.com/v3", StaticBroker::default());
        assert_eq!(
            gw.event_url("en.usa#holiday@group.v.calendar.google.com", "a/b"),
            "https://api.example.com/v3/calendars/en.usa%23holiday%40group.v.calendar.google.com/events/a%2Fb"
        );
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify("op", StatusCode::NOT_FOUND, ""),
            RemoteError::Missing { kind: MissingKind::NotFound, .. }
        ));
        assert!(matches!(
            classify("op", StatusCode::GONE, ""),
            RemoteError::Missing { kind: MissingKind::Gone, .. }
        ));
        assert!(matches!(
            classify("op", StatusCode::TOO_MANY_REQUESTS, ""),
            RemoteError::Transient { .. }
        ));
        let limited = r#"{"error":{"errors":[{"reason":"userRateLimitExceeded"}],"code":403,"message":"Rate Limit Exceeded"}}"#;
        assert!(matches!(
            classify("op", StatusCode::FORBIDDEN, limited),
            RemoteError::Transient { .. }
        ));
        let forbidden = r#"{"error":{"errors":[{"reason":"forbidden"}],"code":403,"message":"Forbidden"}}"#;
        match classify("op", StatusCode::FORBIDDEN, forbidden) {
            RemoteError::Fatal { status, message, .. } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Forbidden");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            classify("op", StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            RemoteError::Fatal { status: 500, .. }
        ));
    }

    #[tokio::test]
    async fn list_events_pages_and_skips_garbage() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/calendars/home/events")
            .match_header("authorization", "Bearer test-token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("singleEvents".into(), "true".into()),
                Matcher::UrlEncoded("showDeleted".into(), "true".into()),
                Matcher::UrlEncoded("maxResults".into(), "250".into()),
                Matcher::UrlEncoded("timeMin".into(), "2024-05-05T12:00:00Z".into()),
                Matcher::Regex("timeMax=[^&]*$".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"items":[
                    {"id":"a","updated":"2024-05-01T00:00:00Z","start":{"dateTime":"2024-05-06T10:00:00Z"},"end":{"dateTime":"2024-05-06T11:00:00Z"}},
                    {"summary":"no id"}
                ],"nextPageToken":"p2"}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/calendars/home/events")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "p2".into()))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"items":[{"id":"b","status":"cancelled","updated":"2024-05-01T00:00:00Z"}]}"#,
            )
            .create_async()
            .await;

        let gw = gateway(&server);
        let page = gw.list_events_page("me", "home", range(), None).await.unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].id, "a");
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));

        let page = gw
            .list_events_page("me", "home", range(), Some("p2"))
            .await
            .unwrap();
        assert_eq!(page.events[0].id, "b");
        assert_eq!(page.next_page_token, None);

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn insert_sends_tagged_body_and_returns_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/calendars/work/events")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "summary": "Busy",
                "extendedProperties": {"private": {"gcalsync_blocker": "1"}}
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"blk-1"}"#)
            .create_async()
            .await;

        let id = gateway(&server)
            .insert_event("me", "work", &spec())
            .await
            .unwrap();
        assert_eq!(id, "blk-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn patch_reports_missing_target() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/calendars/work/events/blk-1")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("PATCH", "/calendars/work/events/blk-2")
            .with_status(200)
            .with_body(r#"{"id":"blk-2"}"#)
            .create_async()
            .await;

        let gw = gateway(&server);
        assert_eq!(
            gw.patch_event("me", "work", "blk-1", &spec()).await.unwrap(),
            PatchOutcome::Missing
        );
        assert_eq!(
            gw.patch_event("me", "work", "blk-2", &spec()).await.unwrap(),
            PatchOutcome::Patched
        );
    }

    #[tokio::test]
    async fn delete_outcomes() {
        let mut server = mockito::Server::new_async().await;
        for (id, status) in [("ok", 204), ("nf", 404), ("gone", 410)] {
            server
                .mock("DELETE", format!("/calendars/work/events/{id}").as_str())
                .with_status(status)
                .create_async()
                .await;
        }

        let gw = gateway(&server);
        assert_eq!(gw.delete_event("me", "work", "ok").await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(gw.delete_event("me", "work", "nf").await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(gw.delete_event("me", "work", "gone").await.unwrap(), DeleteOutcome::Gone);
    }

    #[tokio::test]
    async fn rate_limit_is_transient_and_server_error_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/calendars/work/events/slow")
            .with_status(429)
            .create_async()
            .await;
        server
            .mock("DELETE", "/calendars/work/events/boom")
            .with_status(500)
            .with_body("backend error")
            .create_async()
            .await;

        let gw = gateway(&server);
        let err = gw.delete_event("me", "work", "slow").await.unwrap_err();
        assert!(err.is_transient());
        let err = gw.delete_event("me", "work", "boom").await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn unauthorized_drops_cached_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/calendars/work/events")
            .with_status(401)
            .create_async()
            .await;

        let gw = gateway(&server);
        let err = gw.insert_event("me", "work", &spec()).await.unwrap_err();
        assert!(matches!(err, CoreError::Remote(RemoteError::Fatal { status: 401, .. })));
        assert_eq!(gw.broker().invalidated.get(), 1);
    }

    #[tokio::test]
    async fn connection_failure_is_transient() {
        // Nothing listens on port 9 (discard) on test hosts.
        let gw = GoogleCalendarGateway::new("http://127.0.0.1:9", StaticBroker::default());
        let err = gw.delete_event("me", "work", "x").await.unwrap_err();
        assert!(err.is_transient());
    }
}
