//! `gcalsync block/unblock/blocks`: edit the block policy.

use gcalsync_core::{add_block, list_blocks, remove_block, CoreError, PolicyChange};

use crate::common::{open_store, print_json};

pub fn block(source: &str, target: &str) -> Result<(), CoreError> {
    let store = open_store()?;
    match add_block(&store, source, target)? {
        PolicyChange::AlreadyPresent => println!("{source} is already blocked in {target}"),
        _ => {
            println!("Events of {source} will show as \"Busy\" in {target}");
            println!("Run 'gcalsync sync' to apply.");
        }
    }
    Ok(())
}

pub fn unblock(source: &str, target: &str) -> Result<(), CoreError> {
    let store = open_store()?;
    match remove_block(&store, source, target)? {
        PolicyChange::NotPresent => println!("{source} is not blocked in {target}"),
        _ => {
            println!("Events of {source} will show with details in {target}");
            println!("Run 'gcalsync sync' to apply.");
        }
    }
    Ok(())
}

pub fn list(json: bool) -> Result<(), CoreError> {
    let store = open_store()?;
    let edges = list_blocks(&store)?;
    if json {
        return print_json(&edges);
    }
    if edges.is_empty() {
        println!("No blocks.");
    }
    for edge in &edges {
        println!("{} -> {}", edge.source_calendar_id, edge.target_calendar_id);
    }
    Ok(())
}
