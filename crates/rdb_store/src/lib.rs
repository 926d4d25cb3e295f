pub mod config;
mod db;
pub mod extra;
pub mod locks;
pub mod meta;
pub mod migration;
pub mod query;
pub mod schema;
pub mod store;

pub use config::{DatabaseConfig, PoolConfig, RdbConfig, SchemaConfig};
pub use extra::{ExtraValue, ExtraValueStore, ExtraValues, ReconcileReport};
pub use locks::NamedLocks;
pub use loam_rdb_core::*;
pub use meta::{MetaStore, MetaType};
pub use query::{FilterTranslator, SortDirection, SortTerm, SortTranslator};
pub use schema::{Inbound, InboundContext, ResourceSchema, StoredRow, EXTRA_SENTINEL};
pub use store::RdbStore;
