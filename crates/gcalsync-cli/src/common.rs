//! Helpers shared by the subcommands.

use gcalsync_core::storage::INDEX_FILE;
use gcalsync_core::{Config, CoreError, IndexStore};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Open (or create) the index in the working directory.
pub fn open_store() -> Result<IndexStore, CoreError> {
    debug!(path = INDEX_FILE, "opening index");
    IndexStore::open(INDEX_FILE)
}

/// Load `.gcalsync.toml` from the working directory.
pub fn load_config() -> Result<Config, CoreError> {
    Ok(Config::load(Config::default_path())?)
}

/// Single-threaded runtime; the engine never needs more.
pub fn runtime() -> Result<Runtime, CoreError> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

/// Cancel `token` on Ctrl-C. Must be called inside the runtime.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; finishing the current call...");
            token.cancel();
        }
    });
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CoreError> {
    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{json}");
    Ok(())
}
