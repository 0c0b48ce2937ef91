//! # The Store Handle
//!
//! One RocksDB instance, two column families (`rows`, `kv`), a cache
//! block and a read-permit semaphore. The handle is cheap to clone and
//! internally synchronized; all mutation goes through [`crate::tx::StoreTx`]
//! (rows) and [`crate::kv::KvBatch`] (KV), both of which apply atomically.

use crate::cache::{CacheStats, UnitCaches};
use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::keys;
use crate::kv::{KvBatch, KvOp, ReverseBatch};
use crate::rows::{
    numeric_subject_default, AaRow, DefinitionRow, KnownBadRow, OutputRow, UnhandledRow, UnitRow,
};
use crate::tx::StoreTx;
use parking_lot::RwLock;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use serde::de::DeserializeOwned;
use shared_types::{
    network_params, network_params_installed, Address, BallId, FeedValue, Joint, SystemSubject,
    UnitId, UnitProps,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Row tables column family.
pub const CF_ROWS: &str = "rows";
/// Ordered KV column family.
pub const CF_KV: &str = "kv";

const COLUMN_FAMILIES: &[&str] = &[CF_ROWS, CF_KV];

/// Scan bound for internal index walks that are expected to be small.
const INTERNAL_SCAN_LIMIT: usize = 100_000;

pub(crate) struct StoreInner {
    pub(crate) db: DB,
    pub(crate) config: StoreConfig,
    pub(crate) caches: RwLock<UnitCaches>,
    last_stable_mci: AtomicU64,
    read_permits: Arc<Semaphore>,
}

/// Cloneable store handle.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

/// A leased read connection. Dropping the permit returns the connection on
/// every exit path, panics included.
pub struct ReadPermit {
    _permit: OwnedSemaphorePermit,
}

impl Store {
    /// Open or create the store.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        if config.max_connections < 8 {
            return Err(StoreError::Config(format!(
                "max_connections = {} is unsafe; at least 8 required",
                config.max_connections
            )));
        }
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, &config.path, cf_descriptors)
            .map_err(StoreError::engine)?;

        let store = Self {
            inner: Arc::new(StoreInner {
                db,
                read_permits: Arc::new(Semaphore::new(config.max_connections)),
                caches: RwLock::new(UnitCaches::default()),
                last_stable_mci: AtomicU64::new(0),
                config,
            }),
        };
        let last_stable = store.meta_u64("last_stable_mci")?.unwrap_or(0);
        store
            .inner
            .last_stable_mci
            .store(last_stable, Ordering::Release);
        info!(last_stable_mci = last_stable, "store opened");
        Ok(store)
    }

    /// Lease a read connection. Blocks when all `max_connections` are out.
    pub async fn read_permit(&self) -> ReadPermit {
        let permit = self
            .inner
            .read_permits
            .clone()
            .acquire_owned()
            .await
            .expect("store semaphore never closes");
        ReadPermit { _permit: permit }
    }

    /// Begin a row-store transaction.
    pub fn begin_tx(&self) -> StoreTx<'_> {
        StoreTx::new(self)
    }

    /// Begin a KV batch.
    pub fn kv_batch(&self) -> KvBatch<'_> {
        KvBatch::new(self)
    }

    /// The store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Column family plumbing
    // -----------------------------------------------------------------------

    pub(crate) fn rows_cf(&self) -> &ColumnFamily {
        self.inner.db.cf_handle(CF_ROWS).expect("rows CF exists")
    }

    pub(crate) fn kv_cf(&self) -> &ColumnFamily {
        self.inner.db.cf_handle(CF_KV).expect("kv CF exists")
    }

    pub(crate) fn rows_get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner
            .db
            .get_cf(self.rows_cf(), key)
            .map_err(StoreError::engine)
    }

    pub(crate) fn rows_exists(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.rows_get_raw(key)?.is_some())
    }

    /// Bounded prefix scan over the row store. The limit is pushed into
    /// the iteration; the result never buffers more than `limit` entries.
    pub(crate) fn rows_scan(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.scan_cf(self.rows_cf(), prefix, limit)
    }

    /// Public bounded prefix scan over the row store, for read-side
    /// consumers (light server). The limit is pushed into the iteration.
    pub fn rows_scan_bounded(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.rows_scan(prefix, limit)
    }

    /// Raw KV read (ordered-KV column family).
    pub fn kv_get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner
            .db
            .get_cf(self.kv_cf(), key)
            .map_err(StoreError::engine)
    }

    /// Bounded prefix scan over the KV store.
    pub fn kv_scan(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.scan_cf(self.kv_cf(), prefix, limit)
    }

    fn scan_cf(
        &self,
        cf: &ColumnFamily,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut results = Vec::new();
        let iter = self
            .inner
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(StoreError::engine)?;
            if !key.starts_with(prefix) || results.len() >= limit {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }

    pub(crate) fn rows_apply(&self, ops: &[KvOp], sync: bool) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                KvOp::Put(key, value) => batch.put_cf(self.rows_cf(), key, value),
                KvOp::Delete(key) => batch.delete_cf(self.rows_cf(), key),
            }
        }
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(sync && self.inner.config.sync_writes);
        self.inner
            .db
            .write_opt(batch, &write_opts)
            .map_err(StoreError::engine)
    }

    pub(crate) fn kv_apply_ops(&self, ops: &[KvOp], sync: bool) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                KvOp::Put(key, value) => batch.put_cf(self.kv_cf(), key, value),
                KvOp::Delete(key) => batch.delete_cf(self.kv_cf(), key),
            }
        }
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(sync && self.inner.config.sync_writes);
        self.inner
            .db
            .write_opt(batch, &write_opts)
            .map_err(StoreError::engine)
    }

    /// Undo a synced KV batch after a failed row commit.
    pub fn kv_apply_reverse(&self, reverse: ReverseBatch) -> Result<(), StoreError> {
        if !reverse.is_empty() {
            warn!(ops = reverse.ops.len(), "reversing KV batch");
        }
        self.kv_apply_ops(&reverse.ops, true)
    }

    /// Decode a row, tagging failures with the offending key.
    pub fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T, StoreError> {
        bincode::deserialize(bytes).map_err(|e| StoreError::corrupt(key, e))
    }

    fn get_row<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.rows_get_raw(key)? {
            Some(bytes) => Ok(Some(Self::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Units & graph
    // -----------------------------------------------------------------------

    /// Unit row from disk (cache bypass).
    pub fn unit_row(&self, unit: &str) -> Result<Option<UnitRow>, StoreError> {
        self.get_row(&keys::unit(unit))
    }

    /// Unit props, cache first. A cache miss reads disk without
    /// populating: cache mutation belongs to the `write` lock holders.
    pub fn unit_props(&self, unit: &str) -> Result<Option<UnitProps>, StoreError> {
        if let Some(props) = self.inner.caches.read().props(unit) {
            return Ok(Some(props.clone()));
        }
        Ok(self.unit_row(unit)?.map(|row| row.props))
    }

    /// Whether the unit is saved.
    pub fn is_known_unit(&self, unit: &str) -> Result<bool, StoreError> {
        if self.inner.caches.read().known.contains(unit) {
            return Ok(true);
        }
        self.rows_exists(&keys::unit(unit))
    }

    /// Direct children (units listing `unit` as a parent).
    pub fn children(&self, unit: &str) -> Result<Vec<UnitId>, StoreError> {
        Ok(self
            .rows_scan(&keys::children_of(unit), INTERNAL_SCAN_LIMIT)?
            .into_iter()
            .map(|(key, _)| keys::last_part(&key))
            .collect())
    }

    /// Current tips: units nothing references yet.
    pub fn free_units(&self) -> Result<Vec<UnitId>, StoreError> {
        Ok(self
            .rows_scan(&keys::scan_prefix("free", &[]), INTERNAL_SCAN_LIMIT)?
            .into_iter()
            .map(|(key, _)| keys::last_part(&key))
            .collect())
    }

    /// Full joint body from the KV side.
    pub fn joint(&self, unit: &UnitId) -> Result<Option<Joint>, StoreError> {
        match self.kv_get_raw(&keys::kv_joint(unit))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::corrupt(&keys::kv_joint(unit), e)),
            None => Ok(None),
        }
    }

    /// Main-chain unit at `mci`.
    pub fn mc_unit_at(&self, mci: u64) -> Result<Option<UnitId>, StoreError> {
        Ok(self
            .rows_get_raw(&keys::mc_unit(mci))?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Stable units of one MCI, cache first.
    pub fn stable_units_at(&self, mci: u64) -> Result<Vec<UnitId>, StoreError> {
        if let Some(units) = self.inner.caches.read().by_mci.get(&mci) {
            return Ok(units.clone());
        }
        Ok(self
            .rows_scan(&keys::stable_units_of_mci(mci), INTERNAL_SCAN_LIMIT)?
            .into_iter()
            .map(|(key, _)| keys::last_part(&key))
            .collect())
    }

    /// Ball assigned to `unit`, if stabilized.
    pub fn ball_of_unit(&self, unit: &str) -> Result<Option<BallId>, StoreError> {
        Ok(self
            .rows_get_raw(&keys::ball_of_unit(unit))?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// Unit owning `ball`.
    pub fn unit_of_ball(&self, ball: &str) -> Result<Option<UnitId>, StoreError> {
        Ok(self
            .rows_get_raw(&keys::unit_of_ball(ball))?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// The last stable MCI. Readers outside the `write` lock may observe a
    /// value that is about to advance, never one that retreats.
    pub fn last_stable_mci(&self) -> u64 {
        self.inner.last_stable_mci.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_stable_mci_in_memory(&self, mci: u64) {
        let prev = self.inner.last_stable_mci.swap(mci, Ordering::Release);
        debug_assert!(prev <= mci, "last_stable_mci must never decrease");
    }

    // -----------------------------------------------------------------------
    // Outputs, inputs, spends
    // -----------------------------------------------------------------------

    /// Output row by its (unit, message, output) coordinates.
    pub fn output(
        &self,
        unit: &str,
        message_index: u32,
        output_index: u32,
    ) -> Result<Option<OutputRow>, StoreError> {
        self.get_row(&keys::output(unit, message_index, output_index))
    }

    /// Every unit spending the given source output, conflicts included.
    pub fn spenders_of(
        &self,
        src_unit: &str,
        src_msg: u32,
        src_out: u32,
    ) -> Result<Vec<UnitId>, StoreError> {
        Ok(self
            .rows_scan(&keys::spenders_of(src_unit, src_msg, src_out), INTERNAL_SCAN_LIMIT)?
            .into_iter()
            .map(|(key, _)| keys::last_part(&key))
            .collect())
    }

    /// The unit holding the serial claim on a source output, if any.
    pub fn serial_spender_of(
        &self,
        src_unit: &str,
        src_msg: u32,
        src_out: u32,
    ) -> Result<Option<UnitId>, StoreError> {
        Ok(self
            .rows_get_raw(&keys::serial_spender(src_unit, src_msg, src_out))?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// Outputs owned by `address`, bounded: ((unit, msg, out), row).
    pub fn outputs_of_address(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<((UnitId, u32, u32), OutputRow)>, StoreError> {
        let mut results = Vec::new();
        for (key, _) in self.rows_scan(&keys::outputs_of_address(address), limit)? {
            let parts = keys::parts(&key);
            // oa\n<address>\n<unit>\n<msg>\n<out>
            let (Some(unit), Some(msg), Some(out)) = (parts.get(2), parts.get(3), parts.get(4))
            else {
                continue;
            };
            let (Ok(msg), Ok(out)) = (msg.parse::<u32>(), out.parse::<u32>()) else {
                continue;
            };
            if let Some(row) = self.output(unit, msg, out)? {
                results.push(((unit.clone(), msg, out), row));
            }
        }
        Ok(results)
    }

    /// Units authored by `address`.
    pub fn units_by_author(&self, address: &str) -> Result<Vec<UnitId>, StoreError> {
        Ok(self
            .rows_scan(&keys::units_of_author(address), INTERNAL_SCAN_LIMIT)?
            .into_iter()
            .map(|(key, _)| keys::last_part(&key))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Definitions & attestations
    // -----------------------------------------------------------------------

    /// Stored definition by its chash.
    pub fn definition(&self, chash: &str) -> Result<Option<DefinitionRow>, StoreError> {
        self.get_row(&keys::definition(chash))
    }

    /// The definition chash governing `address` at `max_mci`: the latest
    /// stabilized change at or below it, else the address itself.
    pub fn definition_chash_at(&self, address: &str, max_mci: u64) -> Result<Address, StoreError> {
        let mut current = address.to_string();
        for (key, value) in
            self.rows_scan(&keys::definition_changes_of(address), INTERNAL_SCAN_LIMIT)?
        {
            let parts = keys::parts(&key);
            // adc\n<address>\n<mci>\n<unit>
            let Some(mci) = parts.get(2).and_then(|p| p.parse::<u64>().ok()) else {
                continue;
            };
            if mci > max_mci {
                break;
            }
            current = Self::decode::<String>(&key, &value)?;
        }
        Ok(current)
    }

    /// Whether `attestor` has attested `attested` in a stable unit.
    pub fn has_attestation(&self, attestor: &str, attested: &str) -> Result<bool, StoreError> {
        Ok(!self
            .rows_scan(&keys::attestations_by(attestor, attested), 1)?
            .is_empty())
    }

    /// Asset definition row.
    pub fn asset(&self, asset_unit: &str) -> Result<Option<crate::rows::AssetRow>, StoreError> {
        self.get_row(&keys::asset(asset_unit))
    }

    /// AA deployment row.
    pub fn aa_row(&self, address: &str) -> Result<Option<AaRow>, StoreError> {
        self.get_row(&keys::aa_address(address))
    }

    /// Current value of an AA state variable.
    pub fn aa_state_var(&self, aa: &str, var: &str) -> Result<Option<serde_json::Value>, StoreError> {
        match self.kv_get_raw(&keys::kv_state_var(aa, var))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::corrupt(&keys::kv_state_var(aa, var), e)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Data feeds
    // -----------------------------------------------------------------------

    /// Whether any of `addresses` posted `feed` matching `op`/`value` in a
    /// unit whose MCI is at or below `max_mci`.
    pub fn data_feed_exists(
        &self,
        addresses: &[Address],
        feed: &str,
        op: &str,
        value: &FeedValue,
        max_mci: u64,
    ) -> Result<bool, StoreError> {
        for address in addresses {
            let entries =
                self.kv_scan(&keys::kv_data_feed_prefix(address, feed), INTERNAL_SCAN_LIMIT)?;
            for (key, _) in entries {
                let parts = keys::parts(&key);
                // df\n<address>\n<feed>\n<type>\n<value>\n<mci>
                let (Some(type_tag), Some(raw), Some(mci_part)) =
                    (parts.get(3), parts.get(4), parts.get(5))
                else {
                    continue;
                };
                let Some(mci) = mci_part.parse::<u64>().ok() else {
                    continue;
                };
                if mci > max_mci {
                    continue;
                }
                if feed_matches(type_tag, raw, op, value) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Latest value of one (address, feed) pair.
    pub fn data_feed_latest(
        &self,
        address: &str,
        feed: &str,
    ) -> Result<Option<FeedValue>, StoreError> {
        match self.kv_get_raw(&keys::kv_data_feed_latest(address, feed))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::corrupt(&keys::kv_data_feed_latest(address, feed), e)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Governance & fees
    // -----------------------------------------------------------------------

    /// The operator committee governing at `mci`: the latest vote-derived
    /// set at or below it, else the genesis committee.
    pub fn op_list_at(&self, mci: u64) -> Result<Vec<Address>, StoreError> {
        let mut current: Option<Vec<Address>> = None;
        for (key, value) in self.rows_scan(
            &keys::system_var_history(SystemSubject::OpList),
            INTERNAL_SCAN_LIMIT,
        )? {
            let parts = keys::parts(&key);
            let Some(since) = parts.get(2).and_then(|p| p.parse::<u64>().ok()) else {
                continue;
            };
            if since > mci {
                break;
            }
            let row: crate::rows::SystemVarRow = Self::decode(&key, &value)?;
            current = serde_json::from_str(&row.value_json)
                .map_err(|e| StoreError::corrupt(&key, e))
                .map(Some)?;
        }
        if let Some(ops) = current {
            return Ok(ops);
        }
        if network_params_installed() {
            Ok(network_params().genesis_operators.clone())
        } else {
            Ok(Vec::new())
        }
    }

    /// Governed numeric subject value at `mci`, falling back to the
    /// protocol default.
    pub fn system_numeric_at(&self, subject: SystemSubject, mci: u64) -> Result<u64, StoreError> {
        let mut current = numeric_subject_default(subject);
        for (key, value) in
            self.rows_scan(&keys::system_var_history(subject), INTERNAL_SCAN_LIMIT)?
        {
            let parts = keys::parts(&key);
            let Some(since) = parts.get(2).and_then(|p| p.parse::<u64>().ok()) else {
                continue;
            };
            if since > mci {
                break;
            }
            let row: crate::rows::SystemVarRow = Self::decode(&key, &value)?;
            current = serde_json::from_str(&row.value_json)
                .map_err(|e| StoreError::corrupt(&key, e))?;
        }
        Ok(current)
    }

    /// TPS fee balance of `address` effective at `mci`: the entry with the
    /// largest MCI at or below the query MCI, else zero.
    pub fn tps_balance_at(&self, address: &str, mci: u64) -> Result<i64, StoreError> {
        let mut balance = 0i64;
        for (key, value) in
            self.rows_scan(&keys::tps_balance_history(address), INTERNAL_SCAN_LIMIT)?
        {
            let parts = keys::parts(&key);
            let Some(entry_mci) = parts.get(2).and_then(|p| p.parse::<u64>().ok()) else {
                continue;
            };
            if entry_mci > mci {
                break;
            }
            balance = Self::decode(&key, &value)?;
        }
        Ok(balance)
    }

    // -----------------------------------------------------------------------
    // Intake bookkeeping
    // -----------------------------------------------------------------------

    /// Permanently rejected joint record.
    pub fn known_bad(&self, unit: &str) -> Result<Option<KnownBadRow>, StoreError> {
        self.get_row(&keys::known_bad(unit))
    }

    /// Parked joint record.
    pub fn unhandled(&self, unit: &str) -> Result<Option<UnhandledRow>, StoreError> {
        self.get_row(&keys::unhandled(unit))
    }

    /// All parked joints, bounded.
    pub fn unhandled_all(&self, limit: usize) -> Result<Vec<(UnitId, UnhandledRow)>, StoreError> {
        self.rows_scan(&keys::scan_prefix("uh", &[]), limit)?
            .into_iter()
            .map(|(key, value)| {
                let unit = keys::last_part(&key);
                Ok((unit, Self::decode(&key, &value)?))
            })
            .collect()
    }

    /// Units parked waiting for `unit`.
    pub fn dependents_of(&self, unit: &str) -> Result<Vec<UnitId>, StoreError> {
        Ok(self
            .rows_scan(&keys::dependents_of(unit), INTERNAL_SCAN_LIMIT)?
            .into_iter()
            .map(|(key, _)| keys::last_part(&key))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Meta & crash recovery
    // -----------------------------------------------------------------------

    /// Store-level scalar.
    pub fn meta_u64(&self, name: &str) -> Result<Option<u64>, StoreError> {
        self.get_row(&keys::meta(name))
    }

    /// Durable in-flight marker: recorded (synced) before the KV batch of
    /// a save, cleared after the row commit. A marker found at startup
    /// points recovery at the only unit whose KV entry may be orphaned.
    pub fn set_inflight_unit(&self, unit: &UnitId) -> Result<(), StoreError> {
        self.rows_apply(
            &[KvOp::Put(
                keys::meta("inflight_unit"),
                bincode::serialize(unit).map_err(|e| StoreError::Engine(e.to_string()))?,
            )],
            true,
        )
    }

    /// Clear the in-flight marker after a completed (or reversed) save.
    pub fn clear_inflight_unit(&self) -> Result<(), StoreError> {
        self.rows_apply(&[KvOp::Delete(keys::meta("inflight_unit"))], true)
    }

    /// The in-flight marker, if a crash left one behind.
    pub fn inflight_unit(&self) -> Result<Option<UnitId>, StoreError> {
        self.get_row(&keys::meta("inflight_unit"))
    }

    /// Whether a joint body exists in the KV store, without parsing it
    /// (recovery must not trust a torn body to be well-formed).
    pub fn kv_joint_exists(&self, unit: &UnitId) -> Result<bool, StoreError> {
        Ok(self.kv_get_raw(&keys::kv_joint(unit))?.is_some())
    }

    /// Delete an orphan KV joint entry during startup recovery.
    pub fn kv_delete_joint(&self, unit: &UnitId) -> Result<(), StoreError> {
        self.kv_apply_ops(&[KvOp::Delete(keys::kv_joint(unit))], true)
    }

    // -----------------------------------------------------------------------
    // Cache surface (mutations expected under the `write` lock)
    // -----------------------------------------------------------------------

    /// Record a freshly saved unit in the caches.
    pub fn cache_note_saved(&self, props: UnitProps, message_refs: &[(UnitId, u32)]) {
        let mut caches = self.inner.caches.write();
        caches.note_saved(props);
        for (unit, count) in message_refs {
            caches.add_message_refs(unit, *count);
        }
    }

    /// Record stabilization of a unit.
    pub fn cache_note_stabilized(&self, props: UnitProps, released_refs: &[(UnitId, u32)]) {
        let mut caches = self.inner.caches.write();
        for (unit, count) in released_refs {
            caches.release_message_refs(unit, *count);
        }
        caches.note_stabilized(props);
    }

    /// Replace cached props (MCI assignment, sequence flips).
    pub fn cache_update_props(&self, props: UnitProps) {
        self.inner.caches.write().update_props(props);
    }

    /// Release unstable-message references pinned against `unit`.
    pub fn cache_release_refs(&self, unit: &UnitId, count: u32) {
        self.inner.caches.write().release_message_refs(unit, count);
    }

    /// Drop and rebuild the caches from disk. Called after any failed save
    /// so no torn in-memory state survives the rollback.
    pub fn reset_memory(&self) -> Result<(), StoreError> {
        let mut fresh = UnitCaches::default();
        for (key, _) in self.rows_scan(&keys::scan_prefix("unst", &[]), INTERNAL_SCAN_LIMIT)? {
            let unit = keys::last_part(&key);
            if let Some(row) = self.unit_row(&unit)? {
                fresh.unstable_message_refs.insert(
                    unit.clone(),
                    row.unstable_message_refs,
                );
                fresh.known.insert(unit.clone());
                fresh.unstable.insert(unit, row.props);
            }
        }
        fresh
            .unstable_message_refs
            .retain(|_, count| *count > 0);
        let mut caches = self.inner.caches.write();
        *caches = fresh;
        debug!(stats = ?caches.stats(), "caches rebuilt from disk");
        Ok(())
    }

    /// Evict old stable entries; safe by construction (pending unstable
    /// message references pin their units).
    pub fn shrink_cache(&self) -> usize {
        let last_stable = self.last_stable_mci();
        let retention = self.inner.config.cache_retention_window;
        self.inner.caches.write().shrink(last_stable, retention)
    }

    /// Cache sizes, for tests and metrics.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.caches.read().stats()
    }

    /// Snapshot of the unstable unit props (cache side).
    pub fn unstable_units_cached(&self) -> Vec<UnitProps> {
        self.inner.caches.read().unstable.values().cloned().collect()
    }
}

fn feed_matches(type_tag: &str, raw: &str, op: &str, wanted: &FeedValue) -> bool {
    match (type_tag, wanted) {
        ("s", FeedValue::String(want)) => match op {
            "=" => raw == want,
            "!=" => raw != want,
            ">" => raw > want.as_str(),
            ">=" => raw >= want.as_str(),
            "<" => raw < want.as_str(),
            "<=" => raw <= want.as_str(),
            _ => false,
        },
        ("n", FeedValue::Number(want)) => {
            let Some(have) = keys::i64_from_ordered(raw) else {
                return false;
            };
            match op {
                "=" => have == *want,
                "!=" => have != *want,
                ">" => have > *want,
                ">=" => have >= *want,
                "<" => have < *want,
                "<=" => have <= *want,
                _ => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::for_testing(dir.path().to_string_lossy())).unwrap();
        (dir, store)
    }

    #[test]
    fn rejects_small_connection_pools() {
        let dir = TempDir::new().unwrap();
        let mut config = StoreConfig::for_testing(dir.path().to_string_lossy());
        config.max_connections = 1;
        assert!(matches!(
            Store::open(config),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn meta_and_inflight_marker() {
        let (_dir, store) = open_store();
        assert_eq!(store.inflight_unit().unwrap(), None);
        store.set_inflight_unit(&"U1".to_string()).unwrap();
        assert_eq!(store.inflight_unit().unwrap(), Some("U1".to_string()));
        store.clear_inflight_unit().unwrap();
        assert_eq!(store.inflight_unit().unwrap(), None);
    }

    #[test]
    fn last_stable_mci_starts_at_zero() {
        let (_dir, store) = open_store();
        assert_eq!(store.last_stable_mci(), 0);
    }

    #[tokio::test]
    async fn read_permits_bound_concurrency() {
        let (_dir, store) = open_store();
        let mut permits = Vec::new();
        for _ in 0..store.config().max_connections {
            permits.push(store.read_permit().await);
        }
        // All permits out: the next lease must not be immediately ready.
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            store.read_permit(),
        )
        .await;
        assert!(pending.is_err());
        drop(permits);
        let _ = store.read_permit().await;
    }
}
