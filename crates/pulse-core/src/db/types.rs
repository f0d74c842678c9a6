//! ============================================================================
//! Database Types - Serializable records for redb storage
//! ============================================================================
//! Amounts are stored as decimal wei strings and addresses as 0x hex so the
//! records stay stable under bincode regardless of primitive serde formats.

use std::collections::HashMap;

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::error::TransferError;
use crate::types::{Frequency, IntentAction, IntentStatus, TransferStatus};
use crate::utils::{parse_address, parse_signature, parse_wei};

/// A parsed user intent. Written by the intent front-end, the core only
/// reads amount/recipient/frequency and moves the status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentRecord {
    pub id: String,
    pub user_id: String,
    /// Wallet that owns the vault balance and signs requests
    pub user_address: String,
    pub raw_input: String,
    pub action: IntentAction,
    /// Human amount in USD (18-decimal stable token), e.g. "12.5"
    pub amount: String,
    pub currency: String,
    pub recipient: String,
    pub frequency: Option<Frequency>,
    pub status: IntentStatus,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub executed_at: Option<i64>,
}

impl IntentRecord {
    pub fn user_address(&self) -> Result<Address, TransferError> {
        parse_address(&self.user_address)
    }

    pub fn recipient(&self) -> Result<Address, TransferError> {
        parse_address(&self.recipient)
    }
}

/// One on-chain transfer attempt, keyed by its unique transaction hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferRecord {
    pub tx_hash: String,
    pub intent_id: String,
    /// Set when the transfer was produced by a recurring schedule
    pub schedule_id: Option<String>,
    pub user_id: String,
    pub agent_id: u64,
    pub recipient: String,
    /// Wei, decimal
    pub amount: String,
    pub status: TransferStatus,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
}

/// A recurring transfer authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleRecord {
    pub id: String,
    pub user_id: String,
    pub user_address: String,
    pub intent_id: String,
    pub frequency: Frequency,
    /// Wei, decimal
    pub amount: String,
    pub recipient: String,
    /// 65-byte user signature, 0x hex
    pub signature: String,
    pub next_run: i64,
    pub last_run: Option<i64>,
    /// Day of month of the first run, used for monthly clamping
    pub anchor_day: u32,
    pub is_active: bool,
    pub created_at: i64,
}

impl ScheduleRecord {
    pub fn user_address(&self) -> Result<Address, TransferError> {
        parse_address(&self.user_address)
    }

    pub fn recipient(&self) -> Result<Address, TransferError> {
        parse_address(&self.recipient)
    }

    pub fn amount_wei(&self) -> Result<U256, TransferError> {
        parse_wei(&self.amount)
    }

    pub fn signature_bytes(&self) -> Result<Bytes, TransferError> {
        parse_signature(&self.signature)
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub total_intents: usize,
    pub intent_counts: HashMap<String, usize>,
    pub total_transfers: usize,
    pub transfer_counts: HashMap<String, usize>,
    pub total_schedules: usize,
    pub active_schedules: usize,
}
