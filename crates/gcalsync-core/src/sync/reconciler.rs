//! Blocker reconciliation.
//!
//! One run makes every target calendar hold exactly one blocker per busy event
//! of every other registered calendar inside the window, and nothing else.
//!
//! The run is split in two halves:
//! - [`plan_target`] is pure: it diffs source events against the index rows of
//!   one target and returns ordered actions.
//! - [`reconcile`] fetches sources, plans each target and executes the plan
//!   through the pacer, writing the index right after each remote mutation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CoreError, RemoteError, Result};
use crate::integrations::CalendarGateway;
use crate::storage::{BlockerEvent, Calendar};
use crate::sync::context::{list_events, EngineContext};
use crate::sync::fingerprint::fingerprint;
use crate::sync::pacer::Pacer;
use crate::sync::types::{
    DeleteOutcome, EventSpec, PatchOutcome, ProjectionMode, RemoteEvent, BUSY_TITLE,
};

/// Title used when the source event has none.
pub const UNTITLED: &str = "(No title)";

/// Events of one registered calendar, as fetched for this run.
#[derive(Debug, Clone)]
pub struct SourceEvents {
    pub calendar: Calendar,
    pub events: Vec<RemoteEvent>,
}

/// One step of a target's plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    Delete(BlockerEvent),
    Update { blocker: BlockerEvent, spec: EventSpec },
    Create(EventSpec),
}

/// Ordered actions for one target calendar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetPlan {
    pub actions: Vec<PlannedAction>,
    pub unchanged: usize,
}

impl TargetPlan {
    /// True when the target is already converged.
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Counts for one target calendar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub calendar_id: String,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Outcome of a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub targets: Vec<TargetReport>,
}

impl ReconcileReport {
    fn add(&mut self, target: TargetReport) {
        self.created += target.created;
        self.updated += target.updated;
        self.deleted += target.deleted;
        self.unchanged += target.unchanged;
        self.targets.push(target);
    }

    /// Number of remote mutations the run performed.
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Build the blocker for `event` of `source_calendar_id`.
pub fn materialize(
    source_calendar_id: &str,
    event: &RemoteEvent,
    mode: ProjectionMode,
    origin_fingerprint: String,
) -> EventSpec {
    let (title, description) = match mode {
        ProjectionMode::Busy => (BUSY_TITLE.to_string(), None),
        ProjectionMode::Detailed => {
            let title = event
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(UNTITLED)
                .to_string();
            let mut description = format!("Mirrored from {source_calendar_id}");
            if let Some(link) = &event.html_link {
                description.push('\n');
                description.push_str(link);
            }
            (title, Some(description))
        }
    };

    EventSpec {
        start: event.start,
        end: event.end,
        title,
        description,
        origin_fingerprint,
        origin_calendar_id: source_calendar_id.to_string(),
        origin_event_id: event.id.clone(),
    }
}

/// Diff every source against the existing blockers of `target`.
///
/// `busy_sources` holds the sources with a policy edge into `target`.
/// Sources equal to `target` are ignored. Rows pointing at an origin event no
/// longer live (or at a calendar that is not a source) are deleted, as is
/// every row after the first for the same origin event.
pub fn plan_target(
    target: &Calendar,
    sources: &[SourceEvents],
    existing: &[BlockerEvent],
    busy_sources: &BTreeSet<String>,
) -> TargetPlan {
    // (origin calendar, origin event) -> spec
    let mut live: BTreeMap<(&str, &str), EventSpec> = BTreeMap::new();
    for source in sources {
        let source_id = source.calendar.calendar_id.as_str();
        if source_id == target.calendar_id {
            continue;
        }
        let mode = if busy_sources.contains(source_id) {
            ProjectionMode::Busy
        } else {
            ProjectionMode::Detailed
        };
        for event in &source.events {
            if event.is_blocker || !event.occupies_time() {
                continue;
            }
            let fp = fingerprint(event, mode);
            live.insert(
                (source_id, event.id.as_str()),
                materialize(source_id, event, mode, fp),
            );
        }
    }

    let mut rows: BTreeMap<(&str, &str), Vec<&BlockerEvent>> = BTreeMap::new();
    for row in existing {
        rows.entry((row.origin_calendar_id.as_str(), row.origin_event_id.as_str()))
            .or_default()
            .push(row);
    }

    let referenced: BTreeSet<(&str, &str)> = rows.keys().copied().collect();

    let mut deletes = Vec::new();
    let mut updates = Vec::new();
    let mut creates = Vec::new();
    let mut unchanged = 0;

    for (key, mut group) in rows {
        group.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        let mut group = group.into_iter();
        let Some(spec) = live.get(&key) else {
            deletes.extend(group.cloned());
            continue;
        };
        if let Some(kept) = group.next() {
            if kept.origin_fingerprint == spec.origin_fingerprint {
                unchanged += 1;
            } else {
                updates.push((kept.clone(), spec.clone()));
            }
        }
        deletes.extend(group.cloned());
    }

    for (key, spec) in live {
        if !referenced.contains(&key) {
            creates.push(spec);
        }
    }

    deletes.sort_by(|a, b| (&a.calendar_id, &a.event_id).cmp(&(&b.calendar_id, &b.event_id)));
    updates.sort_by(|a, b| {
        (&a.0.calendar_id, &a.0.event_id).cmp(&(&b.0.calendar_id, &b.0.event_id))
    });
    creates.sort_by(|a, b| {
        (&a.origin_calendar_id, &a.origin_event_id)
            .cmp(&(&b.origin_calendar_id, &b.origin_event_id))
    });

    let mut actions = Vec::with_capacity(deletes.len() + updates.len() + creates.len());
    actions.extend(deletes.into_iter().map(PlannedAction::Delete));
    actions.extend(
        updates
            .into_iter()
            .map(|(blocker, spec)| PlannedAction::Update { blocker, spec }),
    );
    actions.extend(creates.into_iter().map(PlannedAction::Create));

    TargetPlan { actions, unchanged }
}

/// Run one convergence pass over every registered calendar.
///
/// A calendar that answers 404/410 when listed counts as having no events,
/// so its blockers elsewhere are removed and nothing new is written into it.
///
/// # Errors
///
/// Stops at the first failure that is not a missing remote object. Every
/// mutation that succeeded before it is already recorded in the index.
pub async fn reconcile<G: CalendarGateway>(
    ctx: &EngineContext<'_, G>,
    now: DateTime<Utc>,
) -> Result<ReconcileReport> {
    let calendars = ctx.store.calendars()?;
    if calendars.len() < 2 {
        warn!(
            registered = calendars.len(),
            "fewer than two calendars registered, nothing to sync"
        );
        return Ok(ReconcileReport::default());
    }

    let range = ctx.window.bounds(now);
    info!(
        calendars = calendars.len(),
        from = %range.start,
        to = %range.end,
        "starting sync"
    );

    let mut pacer = ctx.pacer();
    let mut sources = Vec::with_capacity(calendars.len());
    let mut missing = BTreeSet::new();
    for calendar in &calendars {
        let events = match list_events(&mut pacer, ctx.gateway, calendar, range).await {
            Ok(events) => events,
            Err(CoreError::Remote(RemoteError::Missing { kind, .. })) => {
                warn!(
                    calendar_id = %calendar.calendar_id,
                    ?kind,
                    "calendar not found remotely, treating it as empty"
                );
                missing.insert(calendar.calendar_id.clone());
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        sources.push(SourceEvents {
            calendar: calendar.clone(),
            events,
        });
    }

    let edges = ctx.store.blocks()?;
    let mut report = ReconcileReport::default();
    for target in &calendars {
        let busy_sources: BTreeSet<String> = edges
            .iter()
            .filter(|e| e.target_calendar_id == target.calendar_id)
            .map(|e| e.source_calendar_id.clone())
            .collect();
        let existing = ctx.store.blockers_in(&target.calendar_id)?;
        // Nothing can be written into a calendar that is gone; only clean up.
        let plan = if missing.contains(&target.calendar_id) {
            plan_target(target, &[], &existing, &busy_sources)
        } else {
            plan_target(target, &sources, &existing, &busy_sources)
        };

        let target_report = execute_plan(ctx, &mut pacer, target, plan, now).await?;
        debug!(
            calendar_id = %target.calendar_id,
            created = target_report.created,
            updated = target_report.updated,
            deleted = target_report.deleted,
            "target reconciled"
        );
        report.add(target_report);
    }

    info!(
        created = report.created,
        updated = report.updated,
        deleted = report.deleted,
        unchanged = report.unchanged,
        "sync finished"
    );
    Ok(report)
}

async fn execute_plan<G: CalendarGateway>(
    ctx: &EngineContext<'_, G>,
    pacer: &mut Pacer,
    target: &Calendar,
    plan: TargetPlan,
    now: DateTime<Utc>,
) -> Result<TargetReport> {
    let gateway = ctx.gateway;
    let mut report = TargetReport {
        calendar_id: target.calendar_id.clone(),
        unchanged: plan.unchanged,
        ..Default::default()
    };

    for action in plan.actions {
        match action {
            PlannedAction::Delete(row) => {
                let outcome = pacer
                    .run("delete_event", || {
                        gateway.delete_event(&row.account_name, &row.calendar_id, &row.event_id)
                    })
                    .await?;
                if outcome != DeleteOutcome::Deleted {
                    warn!(
                        calendar_id = %row.calendar_id,
                        event_id = %row.event_id,
                        ?outcome,
                        "blocker was already gone"
                    );
                }
                ctx.store.delete_blocker(&row.calendar_id, &row.event_id)?;
                report.deleted += 1;
            }
            PlannedAction::Update { blocker, spec } => {
                let outcome = pacer
                    .run("patch_event", || {
                        gateway.patch_event(
                            &blocker.account_name,
                            &blocker.calendar_id,
                            &blocker.event_id,
                            &spec,
                        )
                    })
                    .await?;
                match outcome {
                    PatchOutcome::Patched => {
                        ctx.store.update_fingerprint(
                            &blocker.calendar_id,
                            &blocker.event_id,
                            &spec.origin_fingerprint,
                            now,
                        )?;
                    }
                    PatchOutcome::Missing => {
                        warn!(
                            calendar_id = %blocker.calendar_id,
                            event_id = %blocker.event_id,
                            "blocker vanished remotely, recreating"
                        );
                        let event_id = pacer
                            .run("insert_event", || {
                                gateway.insert_event(&blocker.account_name, &blocker.calendar_id, &spec)
                            })
                            .await?;
                        let replacement = BlockerEvent {
                            event_id,
                            origin_fingerprint: spec.origin_fingerprint.clone(),
                            last_seen_at: now,
                            ..blocker.clone()
                        };
                        ctx.store.replace_blocker(&blocker.event_id, &replacement)?;
                    }
                }
                report.updated += 1;
            }
            PlannedAction::Create(spec) => {
                let event_id = pacer
                    .run("insert_event", || {
                        gateway.insert_event(&target.account_name, &target.calendar_id, &spec)
                    })
                    .await?;
                debug!(
                    calendar_id = %target.calendar_id,
                    origin_event_id = %spec.origin_event_id,
                    %event_id,
                    "blocker created"
                );
                ctx.store.upsert_blocker(&BlockerEvent {
                    event_id,
                    calendar_id: target.calendar_id.clone(),
                    account_name: target.account_name.clone(),
                    origin_calendar_id: spec.origin_calendar_id,
                    origin_event_id: spec.origin_event_id,
                    origin_fingerprint: spec.origin_fingerprint,
                    last_seen_at: now,
                })?;
                report.created += 1;
            }
        }
    }

    Ok(report)
}
