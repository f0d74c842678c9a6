//! ============================================================================
//! PULSE-CORE: signed-transfer authorization and recurring schedules
//! ============================================================================
//! This crate handles all backend logic for the PulseRemit agent:
//! - EIP-712 digest construction and secp256k1 signer recovery
//! - Vault reads and `executeTransfer` submission over JSON-RPC
//! - Transfer execution with pre-flight checks and durable records
//! - Hourly due-scan of recurring schedules
//! ============================================================================

pub mod abi;
pub mod chain;
pub mod clock;
pub mod config;
pub mod db;
pub mod digest;
pub mod error;
pub mod executor;
pub mod scheduler;
pub mod signature;
pub mod types;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use types::*;
pub use chain::{ChainGateway, GatewayConfig, VaultGateway};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PulseConfig;
pub use db::{PulseDb, PulseStore};
pub use error::TransferError;
pub use executor::{ExecutorConfig, TransferExecutor};
pub use scheduler::{ScanReport, ScheduleProcessor, SchedulerConfig};
