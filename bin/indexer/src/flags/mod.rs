//! CLI Flags

mod indexer;
pub use indexer::{ForceFrom, IndexerArgs};
