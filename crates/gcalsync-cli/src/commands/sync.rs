//! `gcalsync sync/desync`: the two engine runs.

use chrono::Utc;
use gcalsync_core::integrations::{GoogleCalendarGateway, StoreTokenBroker};
use gcalsync_core::{desync, reconcile, CoreError, EngineContext};
use tokio_util::sync::CancellationToken;

use crate::common::{cancel_on_ctrl_c, load_config, open_store, runtime};

pub fn run_sync() -> Result<(), CoreError> {
    let config = load_config()?;
    let store = open_store()?;
    let gateway = GoogleCalendarGateway::new(
        config.api_base_url.clone(),
        StoreTokenBroker::new(&store, config.oauth()),
    );

    let report = runtime()?.block_on(async {
        let cancel = CancellationToken::new();
        cancel_on_ctrl_c(cancel.clone());
        let ctx = EngineContext::from_config(&store, &gateway, &config, cancel);
        reconcile(&ctx, Utc::now()).await
    })?;

    for target in &report.targets {
        if target.created + target.updated + target.deleted > 0 {
            println!(
                "{}: {} created, {} updated, {} deleted",
                target.calendar_id, target.created, target.updated, target.deleted
            );
        }
    }
    println!(
        "Sync complete: {} created, {} updated, {} deleted, {} unchanged",
        report.created, report.updated, report.deleted, report.unchanged
    );
    Ok(())
}

pub fn run_desync() -> Result<(), CoreError> {
    let config = load_config()?;
    let store = open_store()?;
    let gateway = GoogleCalendarGateway::new(
        config.api_base_url.clone(),
        StoreTokenBroker::new(&store, config.oauth()),
    );

    let report = runtime()?.block_on(async {
        let cancel = CancellationToken::new();
        cancel_on_ctrl_c(cancel.clone());
        let ctx = EngineContext::from_config(&store, &gateway, &config, cancel);
        desync(&ctx).await
    })?;

    println!(
        "Desync complete: {} blockers deleted, {} already gone",
        report.deleted, report.already_gone
    );
    Ok(())
}
