// ============================================================================
// PulseDb - Embedded Database (redb)
// ============================================================================
// Persistent local storage for intents, transfers and recurring schedules.
// Default path: ~/.pulse/agent.redb (override via PULSE_DB_PATH env var)
// ============================================================================

pub mod types;

pub use types::{DbStats, IntentRecord, ScheduleRecord, TransferRecord};

use anyhow::{anyhow, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::{Confirmation, IntentStatus, TransferStatus};

/// Records keyed by id (or tx hash), bincode encoded
type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

// Table definitions
const INTENTS: RecordTable = TableDefinition::new("intents");
const TRANSFERS: RecordTable = TableDefinition::new("transfers");
const SCHEDULES: RecordTable = TableDefinition::new("schedules");
/// `(next_run, schedule_id)` for active schedules only
const SCHEDULE_DUE: TableDefinition<(i64, &str), ()> = TableDefinition::new("schedule_due");

/// Persistence port used by the executor and the scheduler.
pub trait PulseStore: Send + Sync {
    fn put_intent(&self, intent: &IntentRecord) -> Result<()>;
    fn get_intent(&self, id: &str) -> Result<Option<IntentRecord>>;
    /// Move an intent to `status`. `executed_at` is stamped on `Executed`.
    fn update_intent_status(
        &self,
        id: &str,
        status: IntentStatus,
        error_message: Option<String>,
        at: i64,
    ) -> Result<IntentRecord>;

    /// Insert a transfer keyed by tx hash. Returns `false` (and writes
    /// nothing) when a record with the same hash already exists.
    fn insert_transfer(&self, transfer: &TransferRecord) -> Result<bool>;
    /// Apply a confirmation outcome. Terminal records keep their status and
    /// only have missing confirmation metadata backfilled.
    fn finalize_transfer(
        &self,
        tx_hash: &str,
        confirmation: &Confirmation,
        error_message: Option<String>,
        at: i64,
    ) -> Result<TransferRecord>;
    fn get_transfer(&self, tx_hash: &str) -> Result<Option<TransferRecord>>;
    fn list_transfers(&self, user_id: Option<&str>) -> Result<Vec<TransferRecord>>;

    fn insert_schedule(&self, schedule: &ScheduleRecord) -> Result<()>;
    fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRecord>>;
    fn list_schedules(&self, user_id: Option<&str>) -> Result<Vec<ScheduleRecord>>;
    /// Active schedules with `next_run <= now`, earliest first.
    fn due_schedules(&self, now: i64) -> Result<Vec<ScheduleRecord>>;
    /// Record a successful run. A schedule deactivated in the meantime
    /// stays out of the due index.
    fn record_schedule_run(&self, id: &str, last_run: i64, next_run: i64) -> Result<ScheduleRecord>;
    /// Returns `false` if no such schedule exists.
    fn deactivate_schedule(&self, id: &str) -> Result<bool>;
}

/// Embedded database for the Pulse agent
pub struct PulseDb {
    db: Database,
    path: PathBuf,
}

fn encode<T: serde::Serialize>(what: &str, value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| anyhow!("Failed to serialize {}: {}", what, e))
}

fn decode<T: serde::de::DeserializeOwned>(what: &str, bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| anyhow!("Failed to deserialize {}: {}", what, e))
}

impl PulseDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses PULSE_DB_PATH env var or ~/.pulse/agent.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("PULSE_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let pulse_dir = home.join(".pulse");
            std::fs::create_dir_all(&pulse_dir)
                .map_err(|e| anyhow!("Failed to create .pulse directory: {}", e))?;
            pulse_dir.join("agent.redb")
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn.open_table(INTENTS).map_err(|e| anyhow!("Failed to create intents table: {}", e))?;
            let _ = write_txn.open_table(TRANSFERS).map_err(|e| anyhow!("Failed to create transfers table: {}", e))?;
            let _ = write_txn.open_table(SCHEDULES).map_err(|e| anyhow!("Failed to create schedules table: {}", e))?;
            let _ = write_txn.open_table(SCHEDULE_DUE).map_err(|e| anyhow!("Failed to create schedule index: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        info!("Database ready");

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_one<T: serde::de::DeserializeOwned>(
        &self,
        table_def: RecordTable,
        what: &str,
        key: &str,
    ) -> Result<Option<T>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(table_def)
            .map_err(|e| anyhow!("Failed to open {} table: {}", what, e))?;

        match table.get(key).map_err(|e| anyhow!("Failed to get {}: {}", what, e))? {
            Some(value) => Ok(Some(decode(what, value.value())?)),
            None => Ok(None),
        }
    }

    fn read_all<T: serde::de::DeserializeOwned>(
        &self,
        table_def: RecordTable,
        what: &str,
    ) -> Result<Vec<T>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(table_def)
            .map_err(|e| anyhow!("Failed to open {} table: {}", what, e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate {}: {}", what, e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            results.push(decode(what, value.value())?);
        }
        Ok(results)
    }

    fn write_one<T: serde::Serialize>(
        &self,
        table_def: RecordTable,
        what: &str,
        key: &str,
        record: &T,
    ) -> Result<()> {
        let value = encode(what, record)?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(table_def)
                .map_err(|e| anyhow!("Failed to open {} table: {}", what, e))?;
            table.insert(key, value.as_slice())
                .map_err(|e| anyhow!("Failed to insert {}: {}", what, e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;
        Ok(())
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> Result<DbStats> {
        let intents: Vec<IntentRecord> = self.read_all(INTENTS, "intent")?;
        let transfers: Vec<TransferRecord> = self.read_all(TRANSFERS, "transfer")?;
        let schedules: Vec<ScheduleRecord> = self.read_all(SCHEDULES, "schedule")?;

        let mut intent_counts = HashMap::new();
        for intent in &intents {
            *intent_counts.entry(format!("{:?}", intent.status)).or_insert(0usize) += 1;
        }
        let mut transfer_counts = HashMap::new();
        for transfer in &transfers {
            *transfer_counts.entry(transfer.status.as_str().to_string()).or_insert(0usize) += 1;
        }

        Ok(DbStats {
            total_intents: intents.len(),
            intent_counts,
            total_transfers: transfers.len(),
            transfer_counts,
            total_schedules: schedules.len(),
            active_schedules: schedules.iter().filter(|s| s.is_active).count(),
        })
    }
}

impl PulseStore for PulseDb {
    // ========================================================================
    // Intent Operations
    // ========================================================================

    fn put_intent(&self, intent: &IntentRecord) -> Result<()> {
        self.write_one(INTENTS, "intent", &intent.id, intent)?;
        debug!("Stored intent: {}", intent.id);
        Ok(())
    }

    fn get_intent(&self, id: &str) -> Result<Option<IntentRecord>> {
        self.read_one(INTENTS, "intent", id)
    }

    fn update_intent_status(
        &self,
        id: &str,
        status: IntentStatus,
        error_message: Option<String>,
        at: i64,
    ) -> Result<IntentRecord> {
        let mut intent = self
            .get_intent(id)?
            .ok_or_else(|| anyhow!("Intent not found: {}", id))?;

        intent.status = status;
        if error_message.is_some() {
            intent.error_message = error_message;
        }
        if status == IntentStatus::Executed {
            intent.executed_at = Some(at);
        }

        self.put_intent(&intent)?;
        debug!("Updated intent {} status to {:?}", id, status);
        Ok(intent)
    }

    // ========================================================================
    // Transfer Operations
    // ========================================================================

    fn insert_transfer(&self, transfer: &TransferRecord) -> Result<bool> {
        let value = encode("transfer", transfer)?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let inserted;
        {
            let mut table = write_txn.open_table(TRANSFERS)
                .map_err(|e| anyhow!("Failed to open transfers table: {}", e))?;
            let exists = table
                .get(transfer.tx_hash.as_str())
                .map_err(|e| anyhow!("Failed to get transfer: {}", e))?
                .is_some();
            if !exists {
                table.insert(transfer.tx_hash.as_str(), value.as_slice())
                    .map_err(|e| anyhow!("Failed to insert transfer: {}", e))?;
            }
            inserted = !exists;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        if inserted {
            debug!("Stored transfer: {} ({})", transfer.tx_hash, transfer.status.as_str());
        } else {
            debug!("Transfer {} already recorded, skipping insert", transfer.tx_hash);
        }
        Ok(inserted)
    }

    fn finalize_transfer(
        &self,
        tx_hash: &str,
        confirmation: &Confirmation,
        error_message: Option<String>,
        at: i64,
    ) -> Result<TransferRecord> {
        let mut transfer: TransferRecord = self
            .get_transfer(tx_hash)?
            .ok_or_else(|| anyhow!("Transfer not found: {}", tx_hash))?;

        if transfer.status.is_terminal() {
            // Only backfill metadata on an already final record
            transfer.block_number = transfer.block_number.or(Some(confirmation.block_number));
            transfer.gas_used = transfer.gas_used.or(Some(confirmation.gas_used));
            transfer.confirmed_at = transfer.confirmed_at.or(Some(at));
        } else {
            transfer.status = confirmation.status;
            transfer.block_number = Some(confirmation.block_number);
            transfer.gas_used = Some(confirmation.gas_used);
            transfer.confirmed_at = Some(at);
            if error_message.is_some() {
                transfer.error_message = error_message;
            }
        }

        self.write_one(TRANSFERS, "transfer", tx_hash, &transfer)?;
        debug!("Finalized transfer {} as {}", tx_hash, transfer.status.as_str());
        Ok(transfer)
    }

    fn get_transfer(&self, tx_hash: &str) -> Result<Option<TransferRecord>> {
        self.read_one(TRANSFERS, "transfer", tx_hash)
    }

    fn list_transfers(&self, user_id: Option<&str>) -> Result<Vec<TransferRecord>> {
        let mut transfers: Vec<TransferRecord> = self.read_all(TRANSFERS, "transfer")?;
        if let Some(user) = user_id {
            transfers.retain(|t| t.user_id == user);
        }
        transfers.sort_by_key(|t| t.created_at);
        Ok(transfers)
    }

    // ========================================================================
    // Schedule Operations
    // ========================================================================

    fn insert_schedule(&self, schedule: &ScheduleRecord) -> Result<()> {
        let value = encode("schedule", schedule)?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(SCHEDULES)
                .map_err(|e| anyhow!("Failed to open schedules table: {}", e))?;
            table.insert(schedule.id.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert schedule: {}", e))?;

            if schedule.is_active {
                let mut due = write_txn.open_table(SCHEDULE_DUE)
                    .map_err(|e| anyhow!("Failed to open schedule index: {}", e))?;
                due.insert((schedule.next_run, schedule.id.as_str()), ())
                    .map_err(|e| anyhow!("Failed to index schedule: {}", e))?;
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored schedule: {} (next run {})", schedule.id, schedule.next_run);
        Ok(())
    }

    fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRecord>> {
        self.read_one(SCHEDULES, "schedule", id)
    }

    fn list_schedules(&self, user_id: Option<&str>) -> Result<Vec<ScheduleRecord>> {
        let mut schedules: Vec<ScheduleRecord> = self.read_all(SCHEDULES, "schedule")?;
        if let Some(user) = user_id {
            schedules.retain(|s| s.user_id == user);
        }
        schedules.sort_by_key(|s| s.created_at);
        Ok(schedules)
    }

    fn due_schedules(&self, now: i64) -> Result<Vec<ScheduleRecord>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let due = read_txn.open_table(SCHEDULE_DUE)
            .map_err(|e| anyhow!("Failed to open schedule index: {}", e))?;
        let schedules = read_txn.open_table(SCHEDULES)
            .map_err(|e| anyhow!("Failed to open schedules table: {}", e))?;

        let mut results = Vec::new();
        let iter = due.iter().map_err(|e| anyhow!("Failed to iterate schedule index: {}", e))?;
        for entry in iter {
            let (key, _) = entry.map_err(|e| anyhow!("Failed to read index entry: {}", e))?;
            let (next_run, id) = key.value();
            if next_run > now {
                break;
            }
            let value = schedules
                .get(id)
                .map_err(|e| anyhow!("Failed to get schedule: {}", e))?
                .ok_or_else(|| anyhow!("Schedule index points at missing schedule: {}", id))?;
            let schedule: ScheduleRecord = decode("schedule", value.value())?;
            if schedule.is_active {
                results.push(schedule);
            }
        }
        Ok(results)
    }

    fn record_schedule_run(&self, id: &str, last_run: i64, next_run: i64) -> Result<ScheduleRecord> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let schedule;
        {
            let mut table = write_txn.open_table(SCHEDULES)
                .map_err(|e| anyhow!("Failed to open schedules table: {}", e))?;
            let mut due = write_txn.open_table(SCHEDULE_DUE)
                .map_err(|e| anyhow!("Failed to open schedule index: {}", e))?;

            let bytes = table
                .get(id)
                .map_err(|e| anyhow!("Failed to get schedule: {}", e))?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| anyhow!("Schedule not found: {}", id))?;
            let mut record: ScheduleRecord = decode("schedule", &bytes)?;

            due.remove((record.next_run, id))
                .map_err(|e| anyhow!("Failed to unindex schedule: {}", e))?;
            record.last_run = Some(last_run);
            record.next_run = next_run;
            if record.is_active {
                due.insert((record.next_run, id), ())
                    .map_err(|e| anyhow!("Failed to index schedule: {}", e))?;
            }

            let value = encode("schedule", &record)?;
            table.insert(id, value.as_slice())
                .map_err(|e| anyhow!("Failed to update schedule: {}", e))?;
            schedule = record;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Schedule {} ran at {}, next run {}", id, last_run, next_run);
        Ok(schedule)
    }

    fn deactivate_schedule(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let found;
        {
            let mut table = write_txn.open_table(SCHEDULES)
                .map_err(|e| anyhow!("Failed to open schedules table: {}", e))?;
            let mut due = write_txn.open_table(SCHEDULE_DUE)
                .map_err(|e| anyhow!("Failed to open schedule index: {}", e))?;

            let bytes = table
                .get(id)
                .map_err(|e| anyhow!("Failed to get schedule: {}", e))?
                .map(|v| v.value().to_vec());
            found = bytes.is_some();

            if let Some(bytes) = bytes {
                let mut record: ScheduleRecord = decode("schedule", &bytes)?;
                due.remove((record.next_run, id))
                    .map_err(|e| anyhow!("Failed to unindex schedule: {}", e))?;
                record.is_active = false;
                let value = encode("schedule", &record)?;
                table.insert(id, value.as_slice())
                    .map_err(|e| anyhow!("Failed to update schedule: {}", e))?;
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        if found {
            debug!("Deactivated schedule: {}", id);
        }
        Ok(found)
    }
}
