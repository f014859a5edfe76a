//! Per-store migrators
//!
//! Each migrator moves one store kind from source to target. Units (tables,
//! key batches) go through the bounded scheduler and every batch through the
//! retry policy; counters land in the run's [`Statistics`](crate::state::Statistics).

mod documents;
mod keyvalue;
mod relational;

pub use documents::DocumentMigrator;
pub use keyvalue::{read_entry, KeyValueMigrator};
pub use relational::RelationalMigrator;
