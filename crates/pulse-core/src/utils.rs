//! Unit conversion and parsing helpers (cUSD uses 18 decimals).

use alloy_primitives::utils::{format_ether, parse_ether};
use alloy_primitives::{Address, Bytes, U256};
use std::str::FromStr;

use crate::error::TransferError;

/// Convert a decimal USD amount ("12.50") into token base units.
pub fn usd_to_wei(amount: &str) -> Result<U256, TransferError> {
    parse_ether(amount.trim())
        .map_err(|e| TransferError::Validation(format!("Invalid amount '{}': {}", amount, e)))
}

pub fn wei_to_usd(amount: U256) -> String {
    format_ether(amount)
}

/// Unix deadline `secs` seconds after `now`.
pub fn deadline_from_now(now: i64, secs: u64) -> U256 {
    U256::from((now.max(0) as u64).saturating_add(secs))
}

pub fn parse_address(value: &str) -> Result<Address, TransferError> {
    Address::from_str(value.trim())
        .map_err(|e| TransferError::Validation(format!("Invalid address '{}': {}", value, e)))
}

pub fn parse_signature(value: &str) -> Result<Bytes, TransferError> {
    let bytes = Bytes::from_str(value.trim())
        .map_err(|e| TransferError::Validation(format!("Invalid signature hex: {}", e)))?;
    if bytes.len() != 65 {
        return Err(TransferError::Validation(format!(
            "Signature must be 65 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Stored amounts are decimal wei strings.
pub fn parse_wei(value: &str) -> Result<U256, TransferError> {
    U256::from_str_radix(value.trim(), 10)
        .map_err(|e| TransferError::Validation(format!("Invalid wei amount '{}': {}", value, e)))
}

pub fn explorer_tx_url(base: &str, tx_hash: &str) -> String {
    format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash)
}
