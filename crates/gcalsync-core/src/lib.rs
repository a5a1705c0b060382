//! # gcalsync core library
//!
//! Mirrors busy time between Google calendars. Every registered calendar gets
//! a placeholder "blocker" event for each busy event of every other registered
//! calendar; a block-policy edge collapses those placeholders to a bare "Busy".
//!
//! ## Architecture
//!
//! - **Storage**: SQLite index (`.gcalsync.db`) of calendars, policy edges,
//!   blockers and tokens, plus TOML configuration (`.gcalsync.toml`)
//! - **Integrations**: Google Calendar gateway and OAuth credential broker
//! - **Sync**: the reconciler and the desync engine, sharing one rate-limited
//!   executor
//! - **Blocks**: policy-edge administration
//!
//! ## Key Components
//!
//! - [`IndexStore`]: the local index
//! - [`reconcile`]: one convergence run
//! - [`desync`]: remove every blocker
//! - [`CalendarGateway`]: seam for the remote calendar API

pub mod blocks;
pub mod error;
pub mod integrations;
pub mod storage;
pub mod sync;

pub use blocks::{add_block, list_blocks, remove_block, PolicyChange};
pub use error::{ConfigError, CoreError, IndexError, OAuthError, RemoteError, UserError};
pub use integrations::{CalendarGateway, CredentialBroker, GoogleCalendarGateway, StoreTokenBroker};
pub use storage::{BlockEdge, BlockerEvent, Calendar, CalendarSummary, Config, IndexStore};
pub use sync::{desync, reconcile, DesyncReport, EngineContext, ReconcileReport};
