use async_trait::async_trait;

use crate::error::Result;
use crate::sync::types::{DeleteOutcome, EventPage, EventSpec, PatchOutcome, TimeRange};

/// Remote calendar operations the engines need.
///
/// Implementations classify failures: a missing object is reported through
/// the outcome types, rate limiting and network trouble as
/// [`RemoteError::Transient`](crate::error::RemoteError::Transient), anything
/// else as `Fatal`. Pacing and retries are the caller's job.
#[async_trait(?Send)]
pub trait CalendarGateway {
    /// One page of the events overlapping `range`, recurring events expanded
    /// and cancelled instances included. Pass the previous page's token to
    /// continue.
    async fn list_events_page(
        &self,
        account: &str,
        calendar_id: &str,
        range: TimeRange,
        page_token: Option<&str>,
    ) -> Result<EventPage>;

    /// Create an event; returns the id the remote assigned.
    async fn insert_event(&self, account: &str, calendar_id: &str, spec: &EventSpec)
        -> Result<String>;

    async fn patch_event(
        &self,
        account: &str,
        calendar_id: &str,
        event_id: &str,
        spec: &EventSpec,
    ) -> Result<PatchOutcome>;

    async fn delete_event(
        &self,
        account: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<DeleteOutcome>;
}

/// Hands out bearer tokens per account.
#[async_trait(?Send)]
pub trait CredentialBroker {
    /// A currently valid access token for `account`.
    async fn access_token(&self, account: &str) -> Result<String>;

    /// Forget any cached token for `account`, e.g. after the remote rejected it.
    fn invalidate(&self, account: &str);
}
