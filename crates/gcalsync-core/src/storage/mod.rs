mod config;
pub mod index;
pub mod migrations;

pub use config::{Config, CONFIG_FILE};
pub use index::{BlockEdge, BlockerEvent, Calendar, CalendarSummary, IndexStore, INDEX_FILE};
