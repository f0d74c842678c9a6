//! ============================================================================
//! Transfer Executor - orchestrates one signed transfer end to end
//! ============================================================================
//! validate -> (agent check) -> digest + signer recovery -> balance check
//! -> submit -> record pending -> await confirmation -> finalize record
//! -> advance intent.
//!
//! Pre-flight and transient failures leave the intent `pending`; an on-chain
//! revert is a `failed` result (not an error) and fails the intent.
//! ============================================================================

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use tracing::{debug, error, info, warn};

use crate::chain::ChainGateway;
use crate::clock::Clock;
use crate::db::{IntentRecord, PulseStore, ScheduleRecord, TransferRecord};
use crate::digest::typed_data_digest;
use crate::error::TransferError;
use crate::types::{IntentAction, IntentStatus, SignedAuthorization, TransferRequest, TransferResult, TransferStatus};
use crate::utils::{deadline_from_now, usd_to_wei, wei_to_usd};

/// Deadline applied to locally built requests
pub const DEFAULT_DEADLINE_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Refuse to submit when the signature does not recover the expected signer
    pub enforce_signer_match: bool,
    /// Require the agent to own its identity NFT before submitting
    pub require_agent_verification: bool,
    pub fallback_deadline_secs: u64,
    pub recurring_deadline_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            enforce_signer_match: true,
            require_agent_verification: false,
            fallback_deadline_secs: DEFAULT_DEADLINE_SECS,
            recurring_deadline_secs: DEFAULT_DEADLINE_SECS,
        }
    }
}

/// Everything needed to run one transfer attempt.
struct TransferJob<'a> {
    intent_id: &'a str,
    schedule_id: Option<&'a str>,
    user_id: &'a str,
    signer: Address,
    request: TransferRequest,
    signature: &'a Bytes,
}

pub struct TransferExecutor {
    gateway: Arc<dyn ChainGateway>,
    store: Arc<dyn PulseStore>,
    clock: Arc<dyn Clock>,
    config: ExecutorConfig,
}

impl TransferExecutor {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        store: Arc<dyn PulseStore>,
        clock: Arc<dyn Clock>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            clock,
            config,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn ChainGateway> {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<dyn PulseStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Execute a single intent with the user's authorization.
    pub async fn execute(
        &self,
        intent_id: &str,
        authorization: &SignedAuthorization,
    ) -> Result<TransferResult, TransferError> {
        let intent = self
            .store
            .get_intent(intent_id)
            .map_err(TransferError::storage)?
            .ok_or_else(|| TransferError::IntentNotFound(intent_id.to_string()))?;

        let not_executable = |reason: &str| TransferError::IntentNotExecutable {
            id: intent_id.to_string(),
            reason: reason.to_string(),
        };
        match intent.status {
            IntentStatus::Executed => {
                return Err(TransferError::DuplicateExecution(intent_id.to_string()))
            }
            IntentStatus::Failed => return Err(not_executable("intent already failed")),
            IntentStatus::Scheduled => return Err(not_executable("intent is scheduled")),
            IntentStatus::Pending => {}
        }
        if intent.action == IntentAction::RecurringTransfer {
            return Err(not_executable("recurring intents run through a schedule"));
        }

        // The authorization must come from the intent owner
        let owner = intent.user_address()?;
        if authorization.signer != owner {
            return Err(TransferError::SignerMismatch {
                expected: owner,
                recovered: authorization.signer,
            });
        }

        let request = match authorization.request {
            Some(request) => request,
            None => {
                warn!(
                    "No signed request supplied for intent {}, rebuilding from intent",
                    intent_id
                );
                self.fallback_request(&intent).await?
            }
        };

        let job = TransferJob {
            intent_id,
            schedule_id: None,
            user_id: &intent.user_id,
            signer: authorization.signer,
            request,
            signature: &authorization.signature,
        };
        let result = self.run(job).await?;

        let now = self.clock.timestamp();
        match result.status {
            TransferStatus::Confirmed => {
                self.store
                    .update_intent_status(intent_id, IntentStatus::Executed, None, now)
                    .map_err(TransferError::storage)?;
                info!("Intent {} executed: {}", intent_id, result.tx_hash);
            }
            _ => {
                let message = format!("Transfer {} reverted on-chain", result.tx_hash);
                self.store
                    .update_intent_status(intent_id, IntentStatus::Failed, Some(message), now)
                    .map_err(TransferError::storage)?;
                warn!("Intent {} failed: {} reverted", intent_id, result.tx_hash);
            }
        }

        Ok(result)
    }

    /// Run one occurrence of a recurring schedule. The request is rebuilt
    /// with the user's live nonce and a fresh deadline; the stored signature
    /// is reused. The schedule's intent status is left untouched.
    pub async fn execute_scheduled(&self, schedule: &ScheduleRecord) -> Result<TransferResult, TransferError> {
        let user = schedule.user_address()?;
        let signature = schedule.signature_bytes()?;
        let nonce = self.gateway.read_nonce(user).await?;
        let now = self.clock.timestamp();

        let request = TransferRequest {
            recipient: schedule.recipient()?,
            amount: schedule.amount_wei()?,
            nonce,
            deadline: deadline_from_now(now, self.config.recurring_deadline_secs),
        };

        let job = TransferJob {
            intent_id: &schedule.intent_id,
            schedule_id: Some(schedule.id.as_str()),
            user_id: &schedule.user_id,
            signer: user,
            request,
            signature: &signature,
        };
        self.run(job).await
    }

    /// Request rebuilt from the intent when the caller did not send the exact
    /// object that was signed.
    async fn fallback_request(&self, intent: &IntentRecord) -> Result<TransferRequest, TransferError> {
        let user = intent.user_address()?;
        let nonce = self.gateway.read_nonce(user).await?;
        Ok(TransferRequest {
            recipient: intent.recipient()?,
            amount: usd_to_wei(&intent.amount)?,
            nonce,
            deadline: deadline_from_now(self.clock.timestamp(), self.config.fallback_deadline_secs),
        })
    }

    async fn run(&self, job: TransferJob<'_>) -> Result<TransferResult, TransferError> {
        let request = job.request;
        request.validate(self.clock.timestamp())?;

        if self.config.require_agent_verification && !self.gateway.verify_agent_ownership().await {
            return Err(TransferError::AgentNotVerified(self.gateway.agent_id()));
        }

        let domain = self.gateway.read_domain_separator().await?;
        let digest = typed_data_digest(&request, &domain);
        let recovered = self.gateway.recover_signer(&digest, job.signature)?;
        if recovered != job.signer {
            if self.config.enforce_signer_match {
                return Err(TransferError::SignerMismatch {
                    expected: job.signer,
                    recovered,
                });
            }
            warn!(
                "Signature recovers {} but signer is {}, submitting anyway",
                recovered, job.signer
            );
        } else {
            debug!("Signature verified for {}", recovered);
        }

        let available = self.gateway.read_vault_balance(job.signer).await?;
        if available < request.amount {
            return Err(TransferError::InsufficientBalance {
                needed: request.amount,
                available,
            });
        }

        let agent_id = self.gateway.agent_id();
        let pending = self
            .gateway
            .submit_transfer(&request, job.signature, U256::from(agent_id))
            .await?;
        let tx_hash = pending.tx_hash.to_string();

        let record = TransferRecord {
            tx_hash: tx_hash.clone(),
            intent_id: job.intent_id.to_string(),
            schedule_id: job.schedule_id.map(str::to_string),
            user_id: job.user_id.to_string(),
            agent_id,
            recipient: request.recipient.to_string(),
            amount: request.amount.to_string(),
            status: TransferStatus::Pending,
            block_number: None,
            gas_used: None,
            error_message: None,
            created_at: self.clock.timestamp(),
            confirmed_at: None,
        };
        if !self.store.insert_transfer(&record).map_err(TransferError::storage)? {
            warn!("Transfer {} was already recorded", tx_hash);
        }

        let confirmation = self.gateway.await_confirmation(&pending).await?;
        let error_message = match confirmation.status {
            TransferStatus::Failed => Some("Transaction reverted on-chain".to_string()),
            _ => None,
        };
        let stored = self
            .store
            .finalize_transfer(&tx_hash, &confirmation, error_message, self.clock.timestamp())
            .map_err(TransferError::storage)?;

        match stored.status {
            TransferStatus::Confirmed => info!(
                "Transfer {} confirmed: {} USD -> {} (block {})",
                tx_hash,
                wei_to_usd(request.amount),
                request.recipient,
                confirmation.block_number
            ),
            _ => error!("Transfer {} failed on-chain (block {})", tx_hash, confirmation.block_number),
        }

        Ok(TransferResult {
            explorer_url: self.gateway.explorer_url(&pending.tx_hash),
            tx_hash,
            status: stored.status,
            block_number: stored.block_number,
            gas_used: stored.gas_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::PulseDb;
    use crate::signature::{sign_digest, signer_address};
    use crate::testing::{MockGateway, MockOutcome};
    use alloy_primitives::B256;
    use chrono::{TimeZone, Utc};
    use k256::ecdsa::SigningKey;
    use tempfile::TempDir;

    const ETHER: u128 = 1_000_000_000_000_000_000;

    struct Harness {
        _dir: TempDir,
        gateway: Arc<MockGateway>,
        store: Arc<PulseDb>,
        executor: TransferExecutor,
        key: SigningKey,
        user: Address,
        now: i64,
    }

    fn domain() -> B256 {
        B256::repeat_byte(0xd0)
    }

    fn recipient() -> Address {
        Address::repeat_byte(0x22)
    }

    fn harness(config: ExecutorConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("executor.redb");
        let store = Arc::new(PulseDb::open(Some(path.to_str().unwrap())).unwrap());
        let gateway = Arc::new(MockGateway::new(domain()));
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let key = SigningKey::from_slice(&[0x21; 32]).unwrap();
        let user = signer_address(&key);

        let executor = TransferExecutor::new(gateway.clone(), store.clone(), clock, config);
        Harness {
            _dir: dir,
            gateway,
            store,
            executor,
            key,
            user,
            now: start.timestamp(),
        }
    }

    fn intent(h: &Harness, id: &str) -> IntentRecord {
        let record = IntentRecord {
            id: id.to_string(),
            user_id: "user-1".into(),
            user_address: h.user.to_string(),
            raw_input: "send $100 to 0x2222".into(),
            action: IntentAction::SingleTransfer,
            amount: "100".into(),
            currency: "cUSD".into(),
            recipient: recipient().to_string(),
            frequency: None,
            status: IntentStatus::Pending,
            error_message: None,
            created_at: h.now,
            executed_at: None,
        };
        h.store.put_intent(&record).unwrap();
        record
    }

    fn request(h: &Harness, nonce: u64) -> TransferRequest {
        TransferRequest {
            recipient: recipient(),
            amount: U256::from(100 * ETHER),
            nonce: U256::from(nonce),
            deadline: U256::from((h.now + 3600) as u64),
        }
    }

    fn sign(key: &SigningKey, request: &TransferRequest) -> Bytes {
        let sig = sign_digest(key, &typed_data_digest(request, &domain())).unwrap();
        Bytes::from(sig.to_vec())
    }

    fn authorize(h: &Harness, request: TransferRequest) -> SignedAuthorization {
        SignedAuthorization {
            request: Some(request),
            signature: sign(&h.key, &request),
            signer: h.user,
        }
    }

    #[tokio::test]
    async fn test_confirmed_transfer_executes_intent() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(200 * ETHER));
        h.gateway.set_outcome(MockOutcome::Confirm { block: 4242 });

        let result = h.executor.execute("i-1", &authorize(&h, request(&h, 7))).await.unwrap();

        assert_eq!(result.status, TransferStatus::Confirmed);
        assert_eq!(result.block_number, Some(4242));
        assert!(result.explorer_url.ends_with(&result.tx_hash));

        let stored = h.store.get_transfer(&result.tx_hash).unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Confirmed);
        assert_eq!(stored.block_number, Some(4242));
        assert_eq!(stored.amount, (100 * ETHER).to_string());
        assert_eq!(stored.agent_id, 7);

        let intent = h.store.get_intent("i-1").unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::Executed);
        assert!(intent.executed_at.is_some());

        let submissions = h.gateway.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].request.nonce, U256::from(7));
        assert_eq!(submissions[0].agent_id, U256::from(7));
    }

    #[tokio::test]
    async fn test_reverted_transfer_fails_intent() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(200 * ETHER));
        h.gateway.set_outcome(MockOutcome::Revert { block: 10 });

        let result = h.executor.execute("i-1", &authorize(&h, request(&h, 0))).await.unwrap();
        assert_eq!(result.status, TransferStatus::Failed);

        let stored = h.store.get_transfer(&result.tx_hash).unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Failed);
        assert!(stored.error_message.is_some());

        let intent = h.store.get_intent("i-1").unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::Failed);
        assert!(intent.error_message.unwrap().contains(&result.tx_hash));
    }

    #[tokio::test]
    async fn test_second_execution_is_rejected() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(500 * ETHER));
        let auth = authorize(&h, request(&h, 0));

        h.executor.execute("i-1", &auth).await.unwrap();
        let err = h.executor.execute("i-1", &auth).await.unwrap_err();

        assert_eq!(err, TransferError::DuplicateExecution("i-1".into()));
        assert_eq!(h.gateway.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_intent() {
        let h = harness(ExecutorConfig::default());
        let err = h
            .executor
            .execute("missing", &authorize(&h, request(&h, 0)))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::IntentNotFound("missing".into()));
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_preflight() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(50 * ETHER));

        let err = h.executor.execute("i-1", &authorize(&h, request(&h, 0))).await.unwrap_err();

        assert_eq!(
            err,
            TransferError::InsufficientBalance {
                needed: U256::from(100 * ETHER),
                available: U256::from(50 * ETHER),
            }
        );
        assert!(h.gateway.submissions().is_empty());
        assert!(h.store.list_transfers(None).unwrap().is_empty());
        assert_eq!(h.store.get_intent("i-1").unwrap().unwrap().status, IntentStatus::Pending);
    }

    #[tokio::test]
    async fn test_expired_deadline_is_rejected_before_submission() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(200 * ETHER));
        let mut expired = request(&h, 0);
        expired.deadline = U256::from((h.now - 1) as u64);

        let err = h.executor.execute("i-1", &authorize(&h, expired)).await.unwrap_err();

        assert!(matches!(err, TransferError::DeadlineExpired { .. }));
        assert!(h.gateway.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_signer_mismatch_is_enforced() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(200 * ETHER));

        let other = SigningKey::from_slice(&[0x55; 32]).unwrap();
        let req = request(&h, 0);
        let auth = SignedAuthorization {
            request: Some(req),
            signature: sign(&other, &req),
            signer: h.user,
        };

        let err = h.executor.execute("i-1", &auth).await.unwrap_err();
        assert_eq!(
            err,
            TransferError::SignerMismatch {
                expected: h.user,
                recovered: signer_address(&other),
            }
        );
        assert!(h.gateway.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_signer_mismatch_can_be_relaxed() {
        let h = harness(ExecutorConfig {
            enforce_signer_match: false,
            ..Default::default()
        });
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(200 * ETHER));

        let other = SigningKey::from_slice(&[0x55; 32]).unwrap();
        let req = request(&h, 0);
        let auth = SignedAuthorization {
            request: Some(req),
            signature: sign(&other, &req),
            signer: h.user,
        };

        let result = h.executor.execute("i-1", &auth).await.unwrap();
        assert_eq!(result.status, TransferStatus::Confirmed);
        assert_eq!(h.gateway.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_request_from_intent() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(200 * ETHER));
        h.gateway.set_nonce(h.user, 3);

        // The user signed what the executor will rebuild: live nonce, +1h
        let expected = request(&h, 3);
        let auth = SignedAuthorization {
            request: None,
            signature: sign(&h.key, &expected),
            signer: h.user,
        };

        let result = h.executor.execute("i-1", &auth).await.unwrap();
        assert_eq!(result.status, TransferStatus::Confirmed);
        assert_eq!(h.gateway.submissions()[0].request, expected);
    }

    #[tokio::test]
    async fn test_submission_rejection_leaves_intent_pending() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(200 * ETHER));
        h.gateway.reject_recipient(recipient());

        let err = h.executor.execute("i-1", &authorize(&h, request(&h, 0))).await.unwrap_err();

        assert!(matches!(err, TransferError::Submission(_)));
        assert!(!err.is_transient());
        assert!(h.store.list_transfers(None).unwrap().is_empty());
        assert_eq!(h.store.get_intent("i-1").unwrap().unwrap().status, IntentStatus::Pending);
    }

    #[tokio::test]
    async fn test_unverified_agent_is_rejected_when_required() {
        let h = harness(ExecutorConfig {
            require_agent_verification: true,
            ..Default::default()
        });
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(200 * ETHER));
        h.gateway.set_agent_verified(false);

        let err = h.executor.execute("i-1", &authorize(&h, request(&h, 0))).await.unwrap_err();
        assert_eq!(err, TransferError::AgentNotVerified(7));
    }

    #[tokio::test]
    async fn test_failed_intent_is_terminal() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(500 * ETHER));
        h.gateway.set_outcome(MockOutcome::Revert { block: 10 });
        let reverted = h.executor.execute("i-1", &authorize(&h, request(&h, 0))).await.unwrap();
        assert_eq!(reverted.status, TransferStatus::Failed);

        h.gateway.set_outcome(MockOutcome::Confirm { block: 11 });
        let err = h
            .executor
            .execute("i-1", &authorize(&h, request(&h, 1)))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::IntentNotExecutable { .. }));
        assert_eq!(h.gateway.submissions().len(), 1);
        assert_eq!(h.store.get_intent("i-1").unwrap().unwrap().status, IntentStatus::Failed);
    }

    #[tokio::test]
    async fn test_recurring_intents_are_not_executed_directly() {
        let h = harness(ExecutorConfig::default());
        h.gateway.set_balance(h.user, U256::from(500 * ETHER));

        let mut recurring = intent(&h, "i-recurring");
        recurring.action = IntentAction::RecurringTransfer;
        h.store.put_intent(&recurring).unwrap();

        let mut scheduled = intent(&h, "i-scheduled");
        scheduled.status = IntentStatus::Scheduled;
        h.store.put_intent(&scheduled).unwrap();

        for id in ["i-recurring", "i-scheduled"] {
            let err = h
                .executor
                .execute(id, &authorize(&h, request(&h, 0)))
                .await
                .unwrap_err();
            match err {
                TransferError::IntentNotExecutable { id: rejected, .. } => assert_eq!(rejected, id),
                other => panic!("unexpected error: {}", other),
            }
        }
        assert!(h.gateway.submissions().is_empty());
        assert_eq!(
            h.store.get_intent("i-scheduled").unwrap().unwrap().status,
            IntentStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn test_authorization_must_come_from_intent_owner() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");

        // A wallet with funds signs a perfectly valid request of its own
        let stranger = SigningKey::from_slice(&[0x66; 32]).unwrap();
        let stranger_address = signer_address(&stranger);
        h.gateway.set_balance(stranger_address, U256::from(500 * ETHER));
        let req = request(&h, 0);
        let auth = SignedAuthorization {
            request: Some(req),
            signature: sign(&stranger, &req),
            signer: stranger_address,
        };

        let err = h.executor.execute("i-1", &auth).await.unwrap_err();

        assert_eq!(
            err,
            TransferError::SignerMismatch {
                expected: h.user,
                recovered: stranger_address,
            }
        );
        assert!(h.gateway.submissions().is_empty());
        assert_eq!(h.store.get_intent("i-1").unwrap().unwrap().status, IntentStatus::Pending);
    }

    #[tokio::test]
    async fn test_transient_read_failure_leaves_intent_pending() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(200 * ETHER));
        h.gateway.fail_reads(Some("connection refused"));

        let err = h.executor.execute("i-1", &authorize(&h, request(&h, 0))).await.unwrap_err();

        assert_eq!(err, TransferError::Transient("connection refused".into()));
        assert!(err.is_transient());
        assert!(h.gateway.submissions().is_empty());
        assert!(h.store.list_transfers(None).unwrap().is_empty());
        assert_eq!(h.store.get_intent("i-1").unwrap().unwrap().status, IntentStatus::Pending);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_keeps_pending_record() {
        let h = harness(ExecutorConfig::default());
        intent(&h, "i-1");
        h.gateway.set_balance(h.user, U256::from(200 * ETHER));
        h.gateway.fail_confirmation(Some("not confirmed after 30 polls"));

        let err = h.executor.execute("i-1", &authorize(&h, request(&h, 0))).await.unwrap_err();
        assert!(err.is_transient());

        // Submitted and recorded, awaiting reconciliation
        assert_eq!(h.gateway.submissions().len(), 1);
        let transfers = h.store.list_transfers(None).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].status, TransferStatus::Pending);
        assert_eq!(transfers[0].block_number, None);
        assert_eq!(h.store.get_intent("i-1").unwrap().unwrap().status, IntentStatus::Pending);
    }
}
