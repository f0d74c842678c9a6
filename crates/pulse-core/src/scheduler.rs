//! ============================================================================
//! Schedule Processor - recurring transfers on a fixed timer
//! ============================================================================
//! Each tick performs one sequential due-scan:
//! - schedules run one at a time in `next_run` order (one agent, one nonce)
//! - a confirmed run advances `next_run` by one period (monthly: the next
//!   anchored slot after the run, so a late run never skips a month)
//! - any failure leaves the schedule due for the next tick
//! - one bad schedule never stops the rest of the scan
//! ============================================================================

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, U256};
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::ScheduleRecord;
use crate::error::TransferError;
use crate::executor::TransferExecutor;
use crate::signature::SIGNATURE_LEN;
use crate::types::{Frequency, IntentAction, IntentStatus, TransferStatus};

/// Default due-scan period
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS),
        }
    }
}

/// Outcome of one schedule within a scan
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOutcome {
    pub schedule_id: String,
    pub tx_hash: Option<String>,
    pub next_run: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<ScheduleOutcome>,
}

pub struct ScheduleProcessor {
    executor: Arc<TransferExecutor>,
    config: SchedulerConfig,
    /// Held for the duration of a scan so ticks never overlap
    scan_lock: Mutex<()>,
    shutdown: watch::Sender<bool>,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl ScheduleProcessor {
    pub fn new(executor: Arc<TransferExecutor>, config: SchedulerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            executor,
            config,
            scan_lock: Mutex::new(()),
            shutdown,
            handle: StdMutex::new(None),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.executor.clock().now()
    }

    /// Register a recurring authorization for a `recurring_transfer` intent.
    /// The first run happens one period from now.
    pub fn create_schedule(
        &self,
        user_id: &str,
        intent_id: &str,
        frequency: Frequency,
        amount: U256,
        recipient: Address,
        signature: &Bytes,
    ) -> Result<ScheduleRecord, TransferError> {
        let store = self.executor.store();
        let intent = store
            .get_intent(intent_id)
            .map_err(TransferError::storage)?
            .ok_or_else(|| TransferError::IntentNotFound(intent_id.to_string()))?;

        if intent.action != IntentAction::RecurringTransfer {
            return Err(TransferError::Validation(format!(
                "Intent {} is not a recurring transfer",
                intent_id
            )));
        }
        if intent.user_id != user_id {
            return Err(TransferError::Validation(format!(
                "Intent {} does not belong to user {}",
                intent_id, user_id
            )));
        }
        match intent.status {
            IntentStatus::Scheduled => {
                return Err(TransferError::Validation(format!(
                    "Intent {} is already scheduled",
                    intent_id
                )))
            }
            IntentStatus::Executed => {
                return Err(TransferError::DuplicateExecution(intent_id.to_string()))
            }
            _ => {}
        }
        if amount.is_zero() {
            return Err(TransferError::Validation(
                "Transfer amount must be greater than zero".into(),
            ));
        }
        if recipient == Address::ZERO {
            return Err(TransferError::Validation(
                "Recipient must not be the zero address".into(),
            ));
        }
        if signature.len() != SIGNATURE_LEN {
            return Err(TransferError::Validation(format!(
                "Signature must be {} bytes, got {}",
                SIGNATURE_LEN,
                signature.len()
            )));
        }
        // Validates the stored address before anything is written
        intent.user_address()?;

        let now = self.now();
        let anchor_day = now.day();
        let next_run = frequency
            .next_run(now, anchor_day)
            .ok_or_else(|| TransferError::Validation("Next run is out of range".into()))?;

        let schedule = ScheduleRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            user_address: intent.user_address.clone(),
            intent_id: intent_id.to_string(),
            frequency,
            amount: amount.to_string(),
            recipient: recipient.to_string(),
            signature: format!("0x{}", hex::encode(signature)),
            next_run: next_run.timestamp(),
            last_run: None,
            anchor_day,
            is_active: true,
            created_at: now.timestamp(),
        };

        store.insert_schedule(&schedule).map_err(TransferError::storage)?;
        store
            .update_intent_status(intent_id, IntentStatus::Scheduled, None, now.timestamp())
            .map_err(TransferError::storage)?;

        info!(
            "Schedule created: {} ({} for intent {}, next run {})",
            schedule.id,
            frequency.as_str(),
            intent_id,
            next_run
        );
        Ok(schedule)
    }

    /// Deactivate a schedule. Irreversible; an execution already in flight
    /// still completes and is recorded.
    pub fn cancel_schedule(&self, schedule_id: &str) -> Result<ScheduleRecord, TransferError> {
        let store = self.executor.store();
        if !store.deactivate_schedule(schedule_id).map_err(TransferError::storage)? {
            return Err(TransferError::ScheduleNotFound(schedule_id.to_string()));
        }
        let schedule = store
            .get_schedule(schedule_id)
            .map_err(TransferError::storage)?
            .ok_or_else(|| TransferError::ScheduleNotFound(schedule_id.to_string()))?;

        info!("Schedule cancelled: {}", schedule_id);
        Ok(schedule)
    }

    /// One full sequential pass over every due schedule.
    pub async fn run_due_scan(&self) -> Result<ScanReport, TransferError> {
        let _guard = self.scan_lock.lock().await;

        let now = self.now();
        let due = self
            .executor
            .store()
            .due_schedules(now.timestamp())
            .map_err(TransferError::storage)?;

        info!("Found {} due schedules", due.len());
        let mut report = ScanReport {
            due: due.len(),
            ..Default::default()
        };

        for schedule in &due {
            let outcome = self.process(schedule).await;
            if outcome.error.is_none() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            report.outcomes.push(outcome);
        }

        if report.due > 0 {
            info!(
                "Due-scan complete: {} succeeded, {} failed",
                report.succeeded, report.failed
            );
        }
        Ok(report)
    }

    async fn process(&self, schedule: &ScheduleRecord) -> ScheduleOutcome {
        debug!("Executing scheduled transfer {}", schedule.id);
        let mut outcome = ScheduleOutcome {
            schedule_id: schedule.id.clone(),
            tx_hash: None,
            next_run: None,
            error: None,
        };

        let result = match self.executor.execute_scheduled(schedule).await {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to execute schedule {}: {}", schedule.id, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        outcome.tx_hash = Some(result.tx_hash.clone());

        if result.status != TransferStatus::Confirmed {
            warn!(
                "Scheduled transfer {} for schedule {} reverted, will retry next tick",
                result.tx_hash, schedule.id
            );
            outcome.error = Some(format!("Transfer {} reverted on-chain", result.tx_hash));
            return outcome;
        }

        let ran_at = self.now();
        let due = DateTime::from_timestamp(schedule.next_run, 0).unwrap_or(ran_at);
        let Some(next_run) = schedule.frequency.advance(due, ran_at, schedule.anchor_day) else {
            error!(
                "Schedule {} paid but not advanced: {} (next run out of range)",
                schedule.id, result.tx_hash
            );
            outcome.error = Some(format!(
                "Paid but not advanced: {} (next run out of range)",
                result.tx_hash
            ));
            return outcome;
        };

        match self
            .executor
            .store()
            .record_schedule_run(&schedule.id, ran_at.timestamp(), next_run.timestamp())
        {
            Ok(updated) => {
                info!(
                    "Scheduled transfer executed: {} (schedule {}, next run {})",
                    result.tx_hash, schedule.id, next_run
                );
                outcome.next_run = Some(updated.next_run);
            }
            Err(e) => {
                // The transfer is on-chain; the schedule stays due until reconciled
                error!(
                    "Schedule {} paid but not advanced: {} ({:#})",
                    schedule.id, result.tx_hash, e
                );
                outcome.error = Some(format!("Paid but not advanced: {} ({:#})", result.tx_hash, e));
            }
        }
        outcome
    }

    /// Spawn the timer loop. The first scan happens one interval from now.
    pub fn start(self: &Arc<Self>) {
        let mut guard = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            warn!("Scheduler already running");
            return;
        }

        let _ = self.shutdown.send(false);
        let mut shutdown = self.shutdown.subscribe();
        let processor = Arc::clone(self);
        let period = self.config.interval;

        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        info!("Running scheduled transfers check...");
                        if let Err(e) = processor.run_due_scan().await {
                            error!("Failed to process scheduled transfers: {}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Scheduler stopped");
        }));

        info!("Scheduler started - checking every {}s", period.as_secs());
    }

    /// Signal the loop to exit and wait for an in-flight scan to finish.
    pub async fn stop(&self) {
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        let _ = self.shutdown.send(true);
        if let Err(e) = handle.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}
