//! StateStore — redb-backed state persistence for the canary controller.
//!
//! Provides typed CRUD over releases, configs, rollback events, history
//! entries, cooldowns, and metric samples. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Compound check-then-write operations (`insert_release_exclusive`,
//! `append_history`, `check_and_set_cooldown`) run inside a single write
//! transaction; redb's single-writer model makes them atomic.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RELEASES).map_err(map_err!(Table))?;
        txn.open_table(ACTIVE_RELEASES).map_err(map_err!(Table))?;
        txn.open_table(RELEASE_SEQ).map_err(map_err!(Table))?;
        txn.open_table(CANARY_CONFIGS).map_err(map_err!(Table))?;
        txn.open_table(ROLLBACK_CONFIGS).map_err(map_err!(Table))?;
        txn.open_table(CONFIG_HEADS).map_err(map_err!(Table))?;
        txn.open_table(HISTORY).map_err(map_err!(Table))?;
        txn.open_table(HISTORY_SEQ).map_err(map_err!(Table))?;
        txn.open_table(ROLLBACK_EVENTS).map_err(map_err!(Table))?;
        txn.open_table(COOLDOWNS).map_err(map_err!(Table))?;
        txn.open_table(METRIC_SAMPLES).map_err(map_err!(Table))?;
        txn.open_table(SAMPLE_SEQ).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Releases ───────────────────────────────────────────────────

    /// Insert a release, enforcing the one-active-release-per-target
    /// invariant.
    ///
    /// Returns `false` (and writes nothing) if the target already has a
    /// non-terminal release. Check and insert happen in one write
    /// transaction.
    pub fn insert_release_exclusive(&self, release: &CanaryRelease) -> StateResult<bool> {
        let value = serde_json::to_vec(release).map_err(map_err!(Serialize))?;
        let id_value = serde_json::to_vec(&release.id).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut active = txn.open_table(ACTIVE_RELEASES).map_err(map_err!(Table))?;
            let occupied = active
                .get(release.target_id.as_str())
                .map_err(map_err!(Read))?
                .is_some();
            if occupied {
                // Dropping the transaction without commit aborts it.
                return Ok(false);
            }
            active
                .insert(release.target_id.as_str(), id_value.as_slice())
                .map_err(map_err!(Write))?;

            let mut releases = txn.open_table(RELEASES).map_err(map_err!(Table))?;
            releases
                .insert(release.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(target_id = %release.target_id, release_id = %release.id, "release created");
        Ok(true)
    }

    /// Persist a release state change, maintaining the active-release index.
    ///
    /// A terminal release clears the index entry (if it still points at this
    /// release); a non-terminal one refreshes it.
    pub fn transition_release(&self, release: &CanaryRelease) -> StateResult<()> {
        let value = serde_json::to_vec(release).map_err(map_err!(Serialize))?;
        let id_value = serde_json::to_vec(&release.id).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut releases = txn.open_table(RELEASES).map_err(map_err!(Table))?;
            releases
                .insert(release.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut active = txn.open_table(ACTIVE_RELEASES).map_err(map_err!(Table))?;
            if release.status.is_terminal() {
                let points_here = match active
                    .get(release.target_id.as_str())
                    .map_err(map_err!(Read))?
                {
                    Some(guard) => {
                        let id: ReleaseId = serde_json::from_slice(guard.value())
                            .map_err(map_err!(Deserialize))?;
                        id == release.id
                    }
                    None => false,
                };
                if points_here {
                    active
                        .remove(release.target_id.as_str())
                        .map_err(map_err!(Write))?;
                }
            } else {
                active
                    .insert(release.target_id.as_str(), id_value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a release by target and release id.
    pub fn get_release(
        &self,
        target_id: &str,
        release_id: &str,
    ) -> StateResult<Option<CanaryRelease>> {
        let key = format!("{target_id}:{release_id}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let release: CanaryRelease =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(release))
            }
            None => Ok(None),
        }
    }

    /// Get the active (non-terminal) release for a target, if any.
    pub fn active_release(&self, target_id: &str) -> StateResult<Option<CanaryRelease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let active = txn.open_table(ACTIVE_RELEASES).map_err(map_err!(Table))?;
        let release_id: ReleaseId = match active.get(target_id).map_err(map_err!(Read))? {
            Some(guard) => {
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
            }
            None => return Ok(None),
        };
        let releases = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        let key = format!("{target_id}:{release_id}");
        match releases.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let release: CanaryRelease =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(release))
            }
            None => Ok(None),
        }
    }

    /// List all releases for a target, oldest id first.
    pub fn list_releases(&self, target_id: &str) -> StateResult<Vec<CanaryRelease>> {
        let prefix = format!("{target_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let release: CanaryRelease =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(release);
            }
        }
        Ok(results)
    }

    /// List active releases across all targets (for ramp resume on restart).
    pub fn list_active_releases(&self) -> StateResult<Vec<CanaryRelease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let active = txn.open_table(ACTIVE_RELEASES).map_err(map_err!(Table))?;
        let releases = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in active.iter().map_err(map_err!(Read))? {
            let (target, id_value) = entry.map_err(map_err!(Read))?;
            let release_id: ReleaseId =
                serde_json::from_slice(id_value.value()).map_err(map_err!(Deserialize))?;
            let key = format!("{}:{}", target.value(), release_id);
            if let Some(guard) = releases.get(key.as_str()).map_err(map_err!(Read))? {
                let release: CanaryRelease =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                results.push(release);
            }
        }
        Ok(results)
    }

    /// Allocate the next release sequence number for a target (starts at 1).
    pub fn next_release_seq(&self, target_id: &str) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut table = txn.open_table(RELEASE_SEQ).map_err(map_err!(Table))?;
            let last: u64 = match table.get(target_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => 0,
            };
            seq = last + 1;
            let value = serde_json::to_vec(&seq).map_err(map_err!(Serialize))?;
            table
                .insert(target_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(seq)
    }

    // ── Configs ────────────────────────────────────────────────────

    /// Store a new canary config version for its target. Returns the
    /// assigned version number; prior versions are retained.
    pub fn put_canary_config(
        &self,
        config: &CanaryConfig,
        updated_at: u64,
    ) -> StateResult<u64> {
        self.put_config_versioned(
            CANARY_CONFIGS,
            &config.target_id,
            "canary",
            config,
            updated_at,
        )
    }

    /// Get the head canary config version for a target.
    pub fn get_canary_config(
        &self,
        target_id: &str,
    ) -> StateResult<Option<Versioned<CanaryConfig>>> {
        self.get_config_head(CANARY_CONFIGS, target_id, "canary")
    }

    /// List all stored canary config versions for a target, oldest first.
    pub fn list_canary_config_versions(
        &self,
        target_id: &str,
    ) -> StateResult<Vec<Versioned<CanaryConfig>>> {
        self.list_config_versions(CANARY_CONFIGS, target_id)
    }

    /// Store a new rollback config version for its target.
    pub fn put_rollback_config(
        &self,
        config: &RollbackConfig,
        updated_at: u64,
    ) -> StateResult<u64> {
        self.put_config_versioned(
            ROLLBACK_CONFIGS,
            &config.target_id,
            "rollback",
            config,
            updated_at,
        )
    }

    /// Get the head rollback config version for a target.
    pub fn get_rollback_config(
        &self,
        target_id: &str,
    ) -> StateResult<Option<Versioned<RollbackConfig>>> {
        self.get_config_head(ROLLBACK_CONFIGS, target_id, "rollback")
    }

    /// List all stored rollback config versions for a target, oldest first.
    pub fn list_rollback_config_versions(
        &self,
        target_id: &str,
    ) -> StateResult<Vec<Versioned<RollbackConfig>>> {
        self.list_config_versions(ROLLBACK_CONFIGS, target_id)
    }

    fn put_config_versioned<T: serde::Serialize>(
        &self,
        table_def: redb::TableDefinition<&str, &[u8]>,
        target_id: &str,
        kind: &str,
        config: &T,
        updated_at: u64,
    ) -> StateResult<u64> {
        let head_key = format!("{target_id}:{kind}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let version;
        {
            let mut heads = txn.open_table(CONFIG_HEADS).map_err(map_err!(Table))?;
            let last: u64 = match heads.get(head_key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => 0,
            };
            version = last + 1;
            let head_value = serde_json::to_vec(&version).map_err(map_err!(Serialize))?;
            heads
                .insert(head_key.as_str(), head_value.as_slice())
                .map_err(map_err!(Write))?;

            let versioned = Versioned {
                version,
                updated_at,
                config,
            };
            let value = serde_json::to_vec(&versioned).map_err(map_err!(Serialize))?;
            let key = format!("{target_id}:{version:010}");
            let mut configs = txn.open_table(table_def).map_err(map_err!(Table))?;
            configs
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%target_id, kind, version, "config version stored");
        Ok(version)
    }

    fn get_config_head<T: serde::de::DeserializeOwned>(
        &self,
        table_def: redb::TableDefinition<&str, &[u8]>,
        target_id: &str,
        kind: &str,
    ) -> StateResult<Option<Versioned<T>>> {
        let head_key = format!("{target_id}:{kind}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let heads = txn.open_table(CONFIG_HEADS).map_err(map_err!(Table))?;
        let version: u64 = match heads.get(head_key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
            }
            None => return Ok(None),
        };
        let configs = txn.open_table(table_def).map_err(map_err!(Table))?;
        let key = format!("{target_id}:{version:010}");
        match configs.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let versioned: Versioned<T> =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(versioned))
            }
            None => Ok(None),
        }
    }

    fn list_config_versions<T: serde::de::DeserializeOwned>(
        &self,
        table_def: redb::TableDefinition<&str, &[u8]>,
        target_id: &str,
    ) -> StateResult<Vec<Versioned<T>>> {
        let prefix = format!("{target_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let versioned: Versioned<T> =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(versioned);
            }
        }
        Ok(results)
    }

    // ── Deployment history ─────────────────────────────────────────

    /// Append a history entry, assigning the next sequence number for the
    /// target. Sequence bump and entry insert share one write transaction.
    pub fn append_history(
        &self,
        target_id: &str,
        release_id: &str,
        event: HistoryEventType,
        payload: serde_json::Value,
        timestamp: u64,
    ) -> StateResult<HistoryEntry> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let entry;
        {
            let mut seq_table = txn.open_table(HISTORY_SEQ).map_err(map_err!(Table))?;
            let last: u64 = match seq_table.get(target_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => 0,
            };
            let sequence_no = last + 1;
            let seq_value = serde_json::to_vec(&sequence_no).map_err(map_err!(Serialize))?;
            seq_table
                .insert(target_id, seq_value.as_slice())
                .map_err(map_err!(Write))?;

            entry = HistoryEntry {
                sequence_no,
                target_id: target_id.to_string(),
                release_id: release_id.to_string(),
                event,
                payload,
                timestamp,
            };
            let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
            let mut history = txn.open_table(HISTORY).map_err(map_err!(Table))?;
            history
                .insert(entry.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(entry)
    }

    /// Query history entries for a target, ascending by sequence number.
    ///
    /// `event` filters by entry type; `after_seq` is an exclusive cursor;
    /// `limit` caps the page size.
    pub fn query_history(
        &self,
        target_id: &str,
        event: Option<HistoryEventType>,
        after_seq: Option<u64>,
        limit: usize,
    ) -> StateResult<Vec<HistoryEntry>> {
        let prefix = format!("{target_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for item in table.iter().map_err(map_err!(Read))? {
            let (key, value) = item.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let entry: HistoryEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if let Some(cursor) = after_seq
                && entry.sequence_no <= cursor
            {
                continue;
            }
            if let Some(filter) = event
                && entry.event != filter
            {
                continue;
            }
            results.push(entry);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    /// Delete history entries older than the cutoff timestamp. Returns the
    /// number deleted.
    pub fn prune_history_older_than(
        &self,
        target_id: &str,
        cutoff_epoch: u64,
    ) -> StateResult<u32> {
        let prefix = format!("{target_id}:");
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for item in table.iter().map_err(map_err!(Read))? {
                let (key, value) = item.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) {
                    continue;
                }
                let entry: HistoryEntry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if entry.timestamp < cutoff_epoch {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    /// Targets that have history entries (for the retention loop).
    pub fn history_targets(&self) -> StateResult<Vec<TargetId>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY_SEQ).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            results.push(key.value().to_string());
        }
        Ok(results)
    }

    // ── Rollback events ────────────────────────────────────────────

    /// Append an immutable rollback event.
    pub fn append_rollback_event(&self, event: &RollbackEvent) -> StateResult<()> {
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLBACK_EVENTS).map_err(map_err!(Table))?;
            table
                .insert(event.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(target_id = %event.target_id, release_id = %event.release_id, "rollback event stored");
        Ok(())
    }

    /// List rollback events for a target, oldest first.
    pub fn list_rollback_events(&self, target_id: &str) -> StateResult<Vec<RollbackEvent>> {
        let prefix = format!("{target_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLBACK_EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let event: RollbackEvent =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(event);
            }
        }
        Ok(results)
    }

    // ── Rollback cooldowns ─────────────────────────────────────────

    /// Atomically check the per-target rollback cooldown and claim it.
    ///
    /// Returns `true` (and records `now` as the last rollback time) if the
    /// cooldown has elapsed or was never set; `false` (writing nothing) if a
    /// rollback was recorded within `cooldown_secs`. Check and set share one
    /// write transaction so concurrent rollbacks cannot both claim it.
    pub fn check_and_set_cooldown(
        &self,
        target_id: &str,
        now: u64,
        cooldown_secs: u64,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(COOLDOWNS).map_err(map_err!(Table))?;
            let last: Option<u64> = match table.get(target_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            if let Some(last) = last
                && now.saturating_sub(last) < cooldown_secs
            {
                return Ok(false);
            }
            let value = serde_json::to_vec(&now).map_err(map_err!(Serialize))?;
            table
                .insert(target_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    /// Last recorded rollback timestamp for a target, if any.
    pub fn last_rollback_at(&self, target_id: &str) -> StateResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COOLDOWNS).map_err(map_err!(Table))?;
        match table.get(target_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
            )),
            None => Ok(None),
        }
    }

    // ── Metric samples ─────────────────────────────────────────────

    /// Store pushed metric samples for a target.
    pub fn push_samples(&self, target_id: &str, samples: &[MetricSample]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut seq_table = txn.open_table(SAMPLE_SEQ).map_err(map_err!(Table))?;
            let mut last: u64 = match seq_table.get(target_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => 0,
            };
            let mut table = txn.open_table(METRIC_SAMPLES).map_err(map_err!(Table))?;
            for sample in samples {
                last += 1;
                let key = format!("{target_id}:{last:020}");
                let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            let seq_value = serde_json::to_vec(&last).map_err(map_err!(Serialize))?;
            seq_table
                .insert(target_id, seq_value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Samples for a target with `timestamp >= cutoff_epoch`.
    pub fn samples_since(
        &self,
        target_id: &str,
        cutoff_epoch: u64,
    ) -> StateResult<Vec<MetricSample>> {
        let prefix = format!("{target_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRIC_SAMPLES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let sample: MetricSample =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if sample.timestamp >= cutoff_epoch {
                    results.push(sample);
                }
            }
        }
        Ok(results)
    }

    /// Delete metric samples older than the cutoff timestamp. Returns the
    /// number deleted.
    pub fn prune_samples_older_than(
        &self,
        target_id: &str,
        cutoff_epoch: u64,
    ) -> StateResult<u32> {
        let prefix = format!("{target_id}:");
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(METRIC_SAMPLES).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for item in table.iter().map_err(map_err!(Read))? {
                let (key, value) = item.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) {
                    continue;
                }
                let sample: MetricSample =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if sample.timestamp < cutoff_epoch {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(METRIC_SAMPLES).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    /// Targets that have stored metric samples (for the retention loop).
    pub fn sample_targets(&self) -> StateResult<Vec<TargetId>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SAMPLE_SEQ).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            results.push(key.value().to_string());
        }
        Ok(results)
    }
}
