//! ============================================================================
//! Vault Gateway - JSON-RPC implementation of `ChainGateway`
//! ============================================================================
//! Handles:
//! - Vault reads through `eth_call` with typed ABI decoding
//! - `executeTransfer` submission signed by the agent key (legacy EIP-155 tx)
//! - Receipt polling with exponential backoff
//! - ERC-8004 identity and reputation lookups
//! ============================================================================

use std::fmt;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use tracing::{debug, error, info, warn};

use super::retry::{calculate_delay, classify_error, ConfirmationConfig, ErrorKind};
use super::rpc::{JsonRpcClient, RpcError};
use super::tx::LegacyTx;
use super::ChainGateway;
use crate::abi::{IIdentityRegistry, IPulseVault, IReputationRegistry};
use crate::error::TransferError;
use crate::signature::signer_address;
use crate::types::{AgentReputation, Confirmation, PendingTransfer, TransferRequest, TransferStatus};
use crate::utils::{explorer_tx_url, wei_to_usd};

/// Headroom applied on top of `eth_estimateGas`, in percent
const GAS_LIMIT_MULTIPLIER_PCT: u64 = 120;

/// Immutable chain configuration injected into the gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub vault: Address,
    pub identity_registry: Option<Address>,
    pub reputation_registry: Option<Address>,
    pub agent_id: u64,
    pub agent_key: SigningKey,
    pub explorer_url: String,
    pub confirmation: ConfirmationConfig,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("vault", &self.vault)
            .field("identity_registry", &self.identity_registry)
            .field("reputation_registry", &self.reputation_registry)
            .field("agent_id", &self.agent_id)
            .field("agent_key", &"<redacted>")
            .field("explorer_url", &self.explorer_url)
            .field("confirmation", &self.confirmation)
            .finish()
    }
}

pub struct VaultGateway {
    config: GatewayConfig,
    rpc: JsonRpcClient,
    agent_address: Address,
}

/// Map an RPC failure on a read path.
fn read_error(what: &str, err: RpcError) -> TransferError {
    TransferError::Transient(format!("{}: {}", what, err.detail()))
}

/// Map an RPC failure on the submission path: network trouble stays
/// transient, everything the node or contract rejected is terminal.
fn submit_error(what: &str, err: RpcError) -> TransferError {
    let detail = err.detail();
    match err {
        RpcError::Transport(_) => TransferError::Transient(format!("{}: {}", what, detail)),
        _ => match classify_error(&detail) {
            kind if kind.is_transient() => TransferError::Transient(format!("{}: {}", what, detail)),
            ErrorKind::StaleNonce => {
                TransferError::Submission(format!("{}: agent nonce conflict: {}", what, detail))
            }
            _ => TransferError::Submission(format!("{}: {}", what, detail)),
        },
    }
}

impl VaultGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let rpc = JsonRpcClient::new(&config.rpc_url);
        let agent_address = signer_address(&config.agent_key);
        info!(
            "Vault gateway ready: vault={} agent={} agent_id={} rpc={}",
            config.vault,
            agent_address,
            config.agent_id,
            rpc.url()
        );
        Self {
            config,
            rpc,
            agent_address,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Address of the agent account paying gas for submissions
    pub fn agent_address(&self) -> Address {
        self.agent_address
    }

    /// Fail fast when the RPC endpoint serves a different chain than configured.
    pub async fn check_chain_id(&self) -> Result<(), TransferError> {
        let remote = self
            .rpc
            .chain_id()
            .await
            .map_err(|e| read_error("eth_chainId", e))?;
        if remote != self.config.chain_id {
            return Err(TransferError::Validation(format!(
                "RPC endpoint serves chain {}, configured chain is {}",
                remote, self.config.chain_id
            )));
        }
        debug!("Chain id verified: {}", remote);
        Ok(())
    }

    async fn read<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return, TransferError> {
        let data = call.abi_encode();
        let output = self
            .rpc
            .call(to, &data)
            .await
            .map_err(|e| read_error(C::SIGNATURE, e))?;
        C::abi_decode_returns(&output, true).map_err(|e| {
            TransferError::Transient(format!("{}: undecodable result: {}", C::SIGNATURE, e))
        })
    }

    async fn vault_reputation(&self) -> Result<AgentReputation, TransferError> {
        let ret = self
            .read(
                self.config.vault,
                IPulseVault::getAgentReputationCall {
                    agentId: U256::from(self.config.agent_id),
                },
            )
            .await?;
        Ok(AgentReputation {
            agent_id: self.config.agent_id,
            feedback_count: ret.feedbackCount.saturating_to::<u64>(),
            average_rating: ret.averageRating.saturating_to::<u64>(),
        })
    }

    async fn registry_reputation(&self, registry: Address) -> Result<AgentReputation, TransferError> {
        let ret = self
            .read(
                registry,
                IReputationRegistry::getSummaryCall {
                    agentId: U256::from(self.config.agent_id),
                    clients: Vec::new(),
                    domain: B256::ZERO,
                    tag: B256::ZERO,
                },
            )
            .await?;
        Ok(AgentReputation {
            agent_id: self.config.agent_id,
            feedback_count: ret.feedbackCount,
            average_rating: u64::from(ret.averageRating),
        })
    }
}

#[async_trait]
impl ChainGateway for VaultGateway {
    fn agent_id(&self) -> u64 {
        self.config.agent_id
    }

    async fn read_nonce(&self, user: Address) -> Result<U256, TransferError> {
        let ret = self
            .read(self.config.vault, IPulseVault::getNonceCall { user })
            .await?;
        debug!("Vault nonce for {}: {}", user, ret.nonce);
        Ok(ret.nonce)
    }

    async fn read_vault_balance(&self, user: Address) -> Result<U256, TransferError> {
        let ret = self
            .read(self.config.vault, IPulseVault::balanceOfCall { user })
            .await?;
        debug!("Vault balance for {}: {} USD", user, wei_to_usd(ret.balance));
        Ok(ret.balance)
    }

    async fn read_domain_separator(&self) -> Result<B256, TransferError> {
        let ret = self
            .read(self.config.vault, IPulseVault::getDomainSeparatorCall {})
            .await?;
        Ok(ret.separator)
    }

    async fn submit_transfer(
        &self,
        request: &TransferRequest,
        signature: &Bytes,
        agent_id: U256,
    ) -> Result<PendingTransfer, TransferError> {
        info!(
            "Executing transfer: {} USD -> {} (agent {})",
            wei_to_usd(request.amount),
            request.recipient,
            agent_id
        );

        let data = IPulseVault::executeTransferCall {
            request: request.into(),
            signature: signature.clone(),
            agentId: agent_id,
        }
        .abi_encode();

        let nonce = self
            .rpc
            .pending_nonce(self.agent_address)
            .await
            .map_err(|e| read_error("eth_getTransactionCount", e))?;
        let gas_price = self
            .rpc
            .gas_price()
            .await
            .map_err(|e| read_error("eth_gasPrice", e))?;
        // Estimation simulates the call, so contract rejections surface here
        let estimated = self
            .rpc
            .estimate_gas(self.agent_address, self.config.vault, &data)
            .await
            .map_err(|e| submit_error("executeTransfer rejected", e))?;
        let gas_limit = estimated.saturating_mul(GAS_LIMIT_MULTIPLIER_PCT) / 100;

        let tx = LegacyTx {
            nonce,
            gas_price,
            gas_limit,
            to: self.config.vault,
            value: U256::ZERO,
            data: Bytes::from(data),
            chain_id: self.config.chain_id,
        };
        let raw = tx.sign(&self.config.agent_key)?;

        let tx_hash = self
            .rpc
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| submit_error("eth_sendRawTransaction", e))?;

        info!("Transfer transaction sent: {} (agent nonce {}, gas {})", tx_hash, nonce, gas_limit);
        Ok(PendingTransfer { tx_hash })
    }

    async fn await_confirmation(&self, pending: &PendingTransfer) -> Result<Confirmation, TransferError> {
        let confirm = &self.config.confirmation;
        let mut attempt: u32 = 0;

        loop {
            match self.rpc.transaction_receipt(pending.tx_hash).await {
                Ok(Some(receipt)) => {
                    let block_number = receipt.block_number.map(|b| b.to::<u64>()).unwrap_or_default();
                    let gas_used = receipt.gas_used.to::<u64>();
                    let status = if receipt.succeeded() {
                        info!(
                            "Transfer confirmed: {} (block {}, gas used {})",
                            pending.tx_hash, block_number, gas_used
                        );
                        TransferStatus::Confirmed
                    } else {
                        error!("Transfer reverted on-chain: {} (block {})", pending.tx_hash, block_number);
                        TransferStatus::Failed
                    };
                    return Ok(Confirmation {
                        status,
                        block_number,
                        gas_used,
                    });
                }
                Ok(None) => {
                    debug!("Receipt for {} not available yet (poll {})", pending.tx_hash, attempt + 1);
                }
                Err(e) => {
                    warn!("Receipt poll for {} failed: {}", pending.tx_hash, e);
                }
            }

            attempt = attempt.saturating_add(1);
            if let Some(max) = confirm.max_polls {
                if attempt >= max {
                    return Err(TransferError::Transient(format!(
                        "Transaction {} not confirmed after {} polls",
                        pending.tx_hash, attempt
                    )));
                }
            }

            tokio::time::sleep(calculate_delay(attempt - 1, confirm)).await;
        }
    }

    async fn verify_agent_ownership(&self) -> bool {
        let Some(registry) = self.config.identity_registry else {
            warn!("No identity registry configured, agent ownership unverified");
            return false;
        };

        match self
            .read(
                registry,
                IIdentityRegistry::ownerOfCall {
                    agentId: U256::from(self.config.agent_id),
                },
            )
            .await
        {
            Ok(ret) => {
                let verified = ret.owner == self.agent_address;
                if !verified {
                    warn!(
                        "Agent {} is owned by {}, not by agent account {}",
                        self.config.agent_id, ret.owner, self.agent_address
                    );
                }
                verified
            }
            Err(e) => {
                error!("Failed to verify agent ownership: {}", e);
                false
            }
        }
    }

    async fn agent_reputation(&self) -> AgentReputation {
        match self.vault_reputation().await {
            Ok(reputation) => {
                debug!(
                    "Agent reputation fetched: {} feedback, rating {}",
                    reputation.feedback_count, reputation.average_rating
                );
                return reputation;
            }
            Err(e) => warn!("Vault reputation lookup failed: {}", e),
        }

        if let Some(registry) = self.config.reputation_registry {
            match self.registry_reputation(registry).await {
                Ok(reputation) => return reputation,
                Err(e) => warn!("Reputation registry lookup failed: {}", e),
            }
        }

        AgentReputation {
            agent_id: self.config.agent_id,
            ..Default::default()
        }
    }

    fn explorer_url(&self, tx_hash: &B256) -> String {
        explorer_tx_url(&self.config.explorer_url, &tx_hash.to_string())
    }
}
