//! Block-policy administration.
//!
//! An edge `source -> target` makes blockers of `source` events inside
//! `target` read "Busy" instead of carrying the event's details. Editing edges
//! touches only the local index; the next `sync` applies the change.

use tracing::warn;

use crate::error::{Result, UserError};
use crate::storage::{BlockEdge, IndexStore};

/// What an add/remove actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyChange {
    Added,
    AlreadyPresent,
    Removed,
    NotPresent,
}

impl PolicyChange {
    /// Whether the index changed and a sync is needed to apply it.
    pub fn changed(&self) -> bool {
        matches!(self, PolicyChange::Added | PolicyChange::Removed)
    }
}

/// Add the edge `source -> target`.
///
/// # Errors
/// [`UserError::UnknownCalendar`] if either side is not registered,
/// [`UserError::SelfBlock`] if both sides are the same calendar.
pub fn add_block(store: &IndexStore, source: &str, target: &str) -> Result<PolicyChange> {
    if source == target {
        return Err(UserError::SelfBlock(source.to_string()).into());
    }
    ensure_registered(store, source, target)?;

    if store.insert_block(source, target)? {
        Ok(PolicyChange::Added)
    } else {
        warn!(source, target, "block already exists");
        Ok(PolicyChange::AlreadyPresent)
    }
}

/// Remove the edge `source -> target`.
///
/// # Errors
/// [`UserError::UnknownCalendar`] if either side is not registered.
pub fn remove_block(store: &IndexStore, source: &str, target: &str) -> Result<PolicyChange> {
    ensure_registered(store, source, target)?;
    if store.delete_block(source, target)? {
        Ok(PolicyChange::Removed)
    } else {
        warn!(source, target, "no such block");
        Ok(PolicyChange::NotPresent)
    }
}

/// All edges, ordered by (source, target).
pub fn list_blocks(store: &IndexStore) -> Result<Vec<BlockEdge>> {
    store.blocks()
}

fn ensure_registered(store: &IndexStore, source: &str, target: &str) -> Result<()> {
    for calendar_id in [source, target] {
        if store.calendar(calendar_id)?.is_none() {
            return Err(UserError::UnknownCalendar(calendar_id.to_string()).into());
        }
    }
    Ok(())
}
