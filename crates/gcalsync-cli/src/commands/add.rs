//! `gcalsync add`: register an account's calendars.

use gcalsync_core::integrations::StoreTokenBroker;
use gcalsync_core::CoreError;

use crate::common::{load_config, open_store, runtime};

/// Calendar registered when none is named.
const DEFAULT_CALENDAR: &str = "primary";

pub fn run(account_name: &str, calendar_ids: Vec<String>, no_auth: bool) -> Result<(), CoreError> {
    let store = open_store()?;

    let calendar_ids = if calendar_ids.is_empty() {
        vec![DEFAULT_CALENDAR.to_string()]
    } else {
        calendar_ids
    };

    for calendar_id in &calendar_ids {
        if store.add_calendar(account_name, calendar_id)? {
            println!("Registered {calendar_id} for account {account_name}");
        } else {
            println!("{calendar_id} is already registered for account {account_name}");
        }
    }

    if no_auth || store.account_token(account_name)?.is_some() {
        return Ok(());
    }

    let config = load_config()?;
    let broker = StoreTokenBroker::new(&store, config.oauth());
    runtime()?.block_on(broker.authorize(account_name))?;
    println!("Account {account_name} authorized");
    println!("Run 'gcalsync sync' to mirror its calendars.");
    Ok(())
}
