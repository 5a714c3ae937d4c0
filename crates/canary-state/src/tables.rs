//! redb table definitions for the canary state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys use `:` as the separator — target ids must not
//! contain it. Numeric key components are zero-padded so that lexicographic
//! key order matches numeric order.

use redb::TableDefinition;

/// Canary releases keyed by `{target_id}:{release_id}`.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Active (non-terminal) release id per target, keyed by `{target_id}`.
///
/// The uniqueness invariant — at most one non-terminal release per target —
/// is enforced by checking and writing this index inside a single write
/// transaction.
pub const ACTIVE_RELEASES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("active_releases");

/// Per-target release id counters, keyed by `{target_id}`.
pub const RELEASE_SEQ: TableDefinition<&str, &[u8]> = TableDefinition::new("release_seq");

/// Versioned canary configs keyed by `{target_id}:{version:010}`.
pub const CANARY_CONFIGS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("canary_configs");

/// Versioned rollback configs keyed by `{target_id}:{version:010}`.
pub const ROLLBACK_CONFIGS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("rollback_configs");

/// Head config version per target, keyed by `{target_id}:{canary|rollback}`.
pub const CONFIG_HEADS: TableDefinition<&str, &[u8]> = TableDefinition::new("config_heads");

/// Deployment history entries keyed by `{target_id}:{sequence_no:020}`.
pub const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("history");

/// Last assigned history sequence number per target, keyed by `{target_id}`.
pub const HISTORY_SEQ: TableDefinition<&str, &[u8]> = TableDefinition::new("history_seq");

/// Rollback events keyed by `{target_id}:{triggered_at:020}:{release_id}`.
pub const ROLLBACK_EVENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("rollback_events");

/// Last recorded rollback timestamp per target, keyed by `{target_id}`.
pub const COOLDOWNS: TableDefinition<&str, &[u8]> = TableDefinition::new("cooldowns");

/// Pushed metric samples keyed by `{target_id}:{sample_seq:020}`.
pub const METRIC_SAMPLES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("metric_samples");

/// Per-target metric sample counters, keyed by `{target_id}`.
pub const SAMPLE_SEQ: TableDefinition<&str, &[u8]> = TableDefinition::new("sample_seq");
