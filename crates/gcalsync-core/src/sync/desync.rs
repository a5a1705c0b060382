//! Removal of every blocker this tool created.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::integrations::CalendarGateway;
use crate::storage::BlockerEvent;
use crate::sync::context::EngineContext;
use crate::sync::types::DeleteOutcome;

/// Outcome of a desync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DesyncReport {
    /// Blockers deleted remotely.
    pub deleted: usize,
    /// Rows whose remote event was already missing (404/410).
    pub already_gone: usize,
}

/// Delete every indexed blocker, account by account.
///
/// Each row is dropped right after its remote event is confirmed gone, so an
/// interrupted run can simply be repeated.
pub async fn desync<G: CalendarGateway>(ctx: &EngineContext<'_, G>) -> Result<DesyncReport> {
    let mut by_account: BTreeMap<String, Vec<BlockerEvent>> = BTreeMap::new();
    for row in ctx.store.blockers()? {
        by_account.entry(row.account_name.clone()).or_default().push(row);
    }

    let total: usize = by_account.values().map(Vec::len).sum();
    info!(accounts = by_account.len(), blockers = total, "starting desync");

    let gateway = ctx.gateway;
    let mut pacer = ctx.pacer();
    let mut report = DesyncReport::default();
    for (account, rows) in &by_account {
        debug!(account = %account, blockers = rows.len(), "removing blockers");
        for row in rows {
            let outcome = pacer
                .run("delete_event", || {
                    gateway.delete_event(account, &row.calendar_id, &row.event_id)
                })
                .await?;
            match outcome {
                DeleteOutcome::Deleted => report.deleted += 1,
                DeleteOutcome::NotFound | DeleteOutcome::Gone => {
                    warn!(
                        calendar_id = %row.calendar_id,
                        event_id = %row.event_id,
                        "blocker was already gone"
                    );
                    report.already_gone += 1;
                }
            }
            ctx.store.delete_blocker(&row.calendar_id, &row.event_id)?;
        }
    }

    info!(
        deleted = report.deleted,
        already_gone = report.already_gone,
        "desync finished"
    );
    Ok(report)
}
