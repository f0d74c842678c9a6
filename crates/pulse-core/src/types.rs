//! ============================================================================
//! Core Types for the Pulse Agent
//! ============================================================================
//! Transfer requests, signed authorizations, lifecycle states and the
//! recurring frequency arithmetic shared by the executor and the scheduler.
//! ============================================================================

use alloy_primitives::{Address, Bytes, B256, U256};
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// The exact struct the user signs and the vault re-hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub recipient: Address,
    pub amount: U256,
    pub nonce: U256,
    pub deadline: U256,
}

impl TransferRequest {
    /// Reject requests the vault would refuse anyway.
    pub fn validate(&self, now: i64) -> Result<(), TransferError> {
        if self.amount.is_zero() {
            return Err(TransferError::Validation(
                "Transfer amount must be greater than zero".into(),
            ));
        }
        if self.recipient == Address::ZERO {
            return Err(TransferError::Validation(
                "Recipient must not be the zero address".into(),
            ));
        }
        if self.deadline <= U256::from(now.max(0) as u64) {
            return Err(TransferError::DeadlineExpired {
                deadline: self.deadline,
                now,
            });
        }
        Ok(())
    }
}

/// A user signature over a transfer request.
/// `request` is the exact object the user signed; when absent the executor
/// rebuilds one from the intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAuthorization {
    pub request: Option<TransferRequest>,
    pub signature: Bytes,
    pub signer: Address,
}

/// Intent actions produced by the intent parser
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    SingleTransfer,
    RecurringTransfer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Scheduled,
    Executed,
    Failed,
}

/// Transfer execution state: `Pending -> Confirmed | Failed`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Confirmed => "confirmed",
            TransferStatus::Failed => "failed",
        }
    }
}

/// Recurring cadence of a schedule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for Frequency {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(TransferError::Validation(format!(
                "Unsupported frequency '{}': expected daily, weekly or monthly",
                other
            ))),
        }
    }
}

/// `anchor_day` of `year`/`month`, clamped to the month length, at `time`.
fn monthly_slot(year: i32, month: u32, anchor_day: u32, time: NaiveTime) -> Option<DateTime<Utc>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last_day = first.checked_add_months(Months::new(1))?.pred_opt()?.day();
    let date = first.with_day(anchor_day.clamp(1, last_day))?;
    Some(date.and_time(time).and_utc())
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Next run after `last_run`.
    ///
    /// Daily and weekly add a fixed 24h / 7x24h. Monthly moves to the same
    /// day-of-month in the following calendar month, using `anchor_day`
    /// (the day the schedule was first due) clamped to the length of the
    /// target month. The time of day of `last_run` is kept.
    pub fn next_run(&self, last_run: DateTime<Utc>, anchor_day: u32) -> Option<DateTime<Utc>> {
        match self {
            Self::Daily => last_run.checked_add_signed(Duration::hours(24)),
            Self::Weekly => last_run.checked_add_signed(Duration::days(7)),
            Self::Monthly => {
                let first_of_month = NaiveDate::from_ymd_opt(last_run.year(), last_run.month(), 1)?;
                let target = first_of_month.checked_add_months(Months::new(1))?;
                monthly_slot(target.year(), target.month(), anchor_day, last_run.time())
            }
        }
    }

    /// Next run after an occurrence that was due at `due` and ran at `ran_at`.
    ///
    /// Daily and weekly count one period from `ran_at`. Monthly returns the
    /// first anchored slot (time of day taken from `due`) strictly after
    /// `ran_at`, so a late run never skips a calendar month and the result
    /// is at most one month after `ran_at`.
    pub fn advance(&self, due: DateTime<Utc>, ran_at: DateTime<Utc>, anchor_day: u32) -> Option<DateTime<Utc>> {
        match self {
            Self::Daily | Self::Weekly => self.next_run(ran_at, anchor_day),
            Self::Monthly => {
                let same_month = monthly_slot(ran_at.year(), ran_at.month(), anchor_day, due.time())?;
                if same_month > ran_at {
                    return Some(same_month);
                }
                let first_of_month = NaiveDate::from_ymd_opt(ran_at.year(), ran_at.month(), 1)?;
                let target = first_of_month.checked_add_months(Months::new(1))?;
                monthly_slot(target.year(), target.month(), anchor_day, due.time())
            }
        }
    }
}

/// Handle for a submitted but not yet included transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransfer {
    pub tx_hash: B256,
}

/// Inclusion outcome reported by the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    /// Either `Confirmed` or `Failed` (reverted)
    pub status: TransferStatus,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Normalized result of one execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub tx_hash: String,
    pub status: TransferStatus,
    pub explorer_url: String,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

/// Agent reputation summary (informational only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReputation {
    pub agent_id: u64,
    pub feedback_count: u64,
    pub average_rating: u64,
}
