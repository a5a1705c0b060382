//! Blocker projection between registered calendars.
//!
//! The reconciler mirrors busy time from every calendar into every other
//! one; the desync engine takes all of it back out.

pub mod context;
pub mod desync;
pub mod event_codec;
pub mod fingerprint;
pub mod pacer;
pub mod reconciler;
pub mod types;


pub use context::EngineContext;
pub use desync::{desync, DesyncReport};
pub use pacer::{Pacer, RetryPolicy};
pub use reconciler::{plan_target, reconcile, ReconcileReport, TargetReport};
pub use types::{
    DeleteOutcome, EventPage, EventSpec, EventStatus, EventTime, PatchOutcome, ProjectionMode,
    RemoteEvent, SyncWindow, TimeRange,
};
