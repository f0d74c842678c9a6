//! ============================================================================
//! Chain Gateway - the only component that talks to the vault and the network
//! ============================================================================
//! Reads (nonce, balance, domain separator) surface network failures as
//! `TransferError::Transient`; nothing is silently defaulted except the
//! informational agent reputation lookup, which degrades to zeros.
//! Submissions are terminal for the attempt and never retried here.
//! ============================================================================

pub mod retry;
pub mod rpc;
pub mod tx;
pub mod vault;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::error::TransferError;
use crate::signature;
use crate::types::{AgentReputation, Confirmation, PendingTransfer, TransferRequest};

pub use retry::{classify_error, ConfirmationConfig, ErrorKind};
pub use vault::{GatewayConfig, VaultGateway};

#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Platform agent id used for `executeTransfer`.
    fn agent_id(&self) -> u64;

    /// Current vault nonce of `user`.
    async fn read_nonce(&self, user: Address) -> Result<U256, TransferError>;

    /// Vault balance of `user` in wei.
    async fn read_vault_balance(&self, user: Address) -> Result<U256, TransferError>;

    async fn read_domain_separator(&self) -> Result<B256, TransferError>;

    /// Address that signed `digest`.
    fn recover_signer(&self, digest: &B256, signature: &[u8]) -> Result<Address, TransferError> {
        signature::recover_signer(digest, signature)
    }

    /// Broadcast `executeTransfer` and return as soon as the node accepts it.
    async fn submit_transfer(
        &self,
        request: &TransferRequest,
        signature: &Bytes,
        agent_id: U256,
    ) -> Result<PendingTransfer, TransferError>;

    /// Wait until the transaction is mined and report its outcome.
    async fn await_confirmation(&self, pending: &PendingTransfer) -> Result<Confirmation, TransferError>;

    /// Whether the identity registry lists the agent account as owner of the agent id.
    async fn verify_agent_ownership(&self) -> bool;

    async fn agent_reputation(&self) -> AgentReputation;

    fn explorer_url(&self, tx_hash: &B256) -> String;
}
