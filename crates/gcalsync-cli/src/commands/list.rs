//! `gcalsync list`: what is registered and how much is mirrored.

use gcalsync_core::{list_blocks, BlockEdge, CalendarSummary, CoreError};
use serde::Serialize;

use crate::common::{open_store, print_json};

#[derive(Serialize)]
struct Listing {
    calendars: Vec<CalendarSummary>,
    blocks: Vec<BlockEdge>,
}

pub fn run(json: bool) -> Result<(), CoreError> {
    let store = open_store()?;
    let listing = Listing {
        calendars: store.calendar_summaries()?,
        blocks: list_blocks(&store)?,
    };

    if json {
        return print_json(&listing);
    }

    if listing.calendars.is_empty() {
        println!("No calendars registered. Use 'gcalsync add <account> [calendar_id...]'.");
        return Ok(());
    }

    println!("Calendars:");
    for cal in &listing.calendars {
        println!(
            "  {:<40} account={:<16} blockers={}",
            cal.calendar_id, cal.account_name, cal.blocker_count
        );
    }
    if !listing.blocks.is_empty() {
        println!("Blocks:");
        for edge in &listing.blocks {
            println!("  {} -> {}", edge.source_calendar_id, edge.target_calendar_id);
        }
    }
    Ok(())
}
