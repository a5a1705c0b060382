//! Everything an engine run needs, passed explicitly.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::integrations::CalendarGateway;
use crate::storage::{Calendar, Config, IndexStore};
use crate::sync::pacer::{Pacer, RetryPolicy};
use crate::sync::types::{RemoteEvent, SyncWindow, TimeRange};

/// Inputs shared by the reconciler and the desync engine.
pub struct EngineContext<'a, G> {
    pub store: &'a IndexStore,
    pub gateway: &'a G,
    pub rate_interval: Duration,
    pub retry: RetryPolicy,
    pub window: SyncWindow,
    pub cancel: CancellationToken,
}

impl<'a, G: CalendarGateway> EngineContext<'a, G> {
    /// Context with pacing and window taken from `config`.
    pub fn from_config(
        store: &'a IndexStore,
        gateway: &'a G,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            gateway,
            rate_interval: config.rate_interval(),
            retry: RetryPolicy::default(),
            window: config.window(),
            cancel,
        }
    }

    /// A fresh executor for one run.
    pub fn pacer(&self) -> Pacer {
        Pacer::new(self.rate_interval, self.retry, self.cancel.clone())
    }
}

/// Every event of `calendar` in `range`, one paced call per page.
pub async fn list_events<G: CalendarGateway>(
    pacer: &mut Pacer,
    gateway: &G,
    calendar: &Calendar,
    range: TimeRange,
) -> Result<Vec<RemoteEvent>> {
    let mut events = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let token = page_token.as_deref();
        let page = pacer
            .run("list_events", || {
                gateway.list_events_page(&calendar.account_name, &calendar.calendar_id, range, token)
            })
            .await?;
        events.extend(page.events);

        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }
    debug!(calendar_id = %calendar.calendar_id, count = events.len(), "fetched events");
    Ok(events)
}
