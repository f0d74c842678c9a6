//! Scripted in-memory `ChainGateway` for executor and scheduler tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::chain::ChainGateway;
use crate::error::TransferError;
use crate::types::{AgentReputation, Confirmation, PendingTransfer, TransferRequest, TransferStatus};

pub const MOCK_GAS_USED: u64 = 51_000;

#[derive(Debug, Clone, Copy)]
pub enum MockOutcome {
    Confirm { block: u64 },
    Revert { block: u64 },
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub request: TransferRequest,
    pub signature: Bytes,
    pub agent_id: U256,
}

struct MockState {
    nonces: HashMap<Address, U256>,
    balances: HashMap<Address, U256>,
    outcome: MockOutcome,
    reject_recipients: HashSet<Address>,
    submissions: Vec<Submission>,
    agent_verified: bool,
    tx_counter: u64,
    /// When set, every vault read fails with this transient error
    read_failure: Option<String>,
    confirmation_failure: Option<String>,
}

pub struct MockGateway {
    agent_id: u64,
    domain: B256,
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(domain: B256) -> Self {
        Self {
            agent_id: 7,
            domain,
            state: Mutex::new(MockState {
                nonces: HashMap::new(),
                balances: HashMap::new(),
                outcome: MockOutcome::Confirm { block: 1 },
                reject_recipients: HashSet::new(),
                submissions: Vec::new(),
                agent_verified: true,
                tx_counter: 0,
                read_failure: None,
                confirmation_failure: None,
            }),
        }
    }

    pub fn set_nonce(&self, user: Address, nonce: u64) {
        self.state.lock().unwrap().nonces.insert(user, U256::from(nonce));
    }

    pub fn set_balance(&self, user: Address, balance: U256) {
        self.state.lock().unwrap().balances.insert(user, balance);
    }

    pub fn set_outcome(&self, outcome: MockOutcome) {
        self.state.lock().unwrap().outcome = outcome;
    }

    pub fn set_agent_verified(&self, verified: bool) {
        self.state.lock().unwrap().agent_verified = verified;
    }

    /// Make the node reject any submission paying `recipient`.
    pub fn reject_recipient(&self, recipient: Address) {
        self.state.lock().unwrap().reject_recipients.insert(recipient);
    }

    /// Make nonce, balance and domain reads fail as if the node were down.
    pub fn fail_reads(&self, message: Option<&str>) {
        self.state.lock().unwrap().read_failure = message.map(str::to_string);
    }

    /// Make the confirmation wait give up after submission.
    pub fn fail_confirmation(&self, message: Option<&str>) {
        self.state.lock().unwrap().confirmation_failure = message.map(str::to_string);
    }

    fn check_read(&self) -> Result<(), TransferError> {
        match &self.state.lock().unwrap().read_failure {
            Some(message) => Err(TransferError::Transient(message.clone())),
            None => Ok(()),
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    fn agent_id(&self) -> u64 {
        self.agent_id
    }

    async fn read_nonce(&self, user: Address) -> Result<U256, TransferError> {
        self.check_read()?;
        Ok(self.state.lock().unwrap().nonces.get(&user).copied().unwrap_or_default())
    }

    async fn read_vault_balance(&self, user: Address) -> Result<U256, TransferError> {
        self.check_read()?;
        Ok(self.state.lock().unwrap().balances.get(&user).copied().unwrap_or_default())
    }

    async fn read_domain_separator(&self) -> Result<B256, TransferError> {
        self.check_read()?;
        Ok(self.domain)
    }

    async fn submit_transfer(
        &self,
        request: &TransferRequest,
        signature: &Bytes,
        agent_id: U256,
    ) -> Result<PendingTransfer, TransferError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_recipients.contains(&request.recipient) {
            return Err(TransferError::Submission(
                "executeTransfer rejected: execution reverted".into(),
            ));
        }
        state.tx_counter += 1;
        state.submissions.push(Submission {
            request: *request,
            signature: signature.clone(),
            agent_id,
        });
        Ok(PendingTransfer {
            tx_hash: B256::left_padding_from(&state.tx_counter.to_be_bytes()),
        })
    }

    async fn await_confirmation(&self, _pending: &PendingTransfer) -> Result<Confirmation, TransferError> {
        let (outcome, failure) = {
            let state = self.state.lock().unwrap();
            (state.outcome, state.confirmation_failure.clone())
        };
        if let Some(message) = failure {
            return Err(TransferError::Transient(message));
        }
        Ok(match outcome {
            MockOutcome::Confirm { block } => Confirmation {
                status: TransferStatus::Confirmed,
                block_number: block,
                gas_used: MOCK_GAS_USED,
            },
            MockOutcome::Revert { block } => Confirmation {
                status: TransferStatus::Failed,
                block_number: block,
                gas_used: MOCK_GAS_USED,
            },
        })
    }

    async fn verify_agent_ownership(&self) -> bool {
        self.state.lock().unwrap().agent_verified
    }

    async fn agent_reputation(&self) -> AgentReputation {
        AgentReputation {
            agent_id: self.agent_id,
            ..Default::default()
        }
    }

    fn explorer_url(&self, tx_hash: &B256) -> String {
        format!("https://explorer.test/tx/{}", tx_hash)
    }
}
