//! redb table definitions for the replikit state store.
//!
//! Object tables use `&str` keys and `&[u8]` values (JSON-serialized objects).
//! Keys follow the pattern `{namespace}/{name}`.

use redb::TableDefinition;

/// Fleets keyed by `{namespace}/{name}`.
pub const FLEETS: TableDefinition<&str, &[u8]> = TableDefinition::new("fleets");

/// Replicas keyed by `{namespace}/{name}`.
pub const REPLICAS: TableDefinition<&str, &[u8]> = TableDefinition::new("replicas");

/// Back-reference index keyed by `{namespace}/{fleet}/{replica}`.
pub const REPLICAS_BY_FLEET: TableDefinition<&str, ()> =
    TableDefinition::new("replicas_by_fleet");

/// Monotonic counters used for uids and generated names.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Sequence name for object uids.
pub const UID_SEQUENCE: &str = "uid";

/// Sequence name for generated object names.
pub const NAME_SEQUENCE: &str = "name";
