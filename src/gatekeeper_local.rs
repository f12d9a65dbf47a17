//! Reference gatekeeper: challenge issuance and ledger-backed payment
//! verification.
//!
//! [`GatekeeperLocal`] implements [`Gatekeeper`] over four injected
//! collaborators: a device directory (machine configuration), a ledger
//! gateway (read-only transaction lookup), a challenge/payment store, and a
//! dispense notifier. Verification runs an ordered chain of checks with early
//! exit, so every rejection carries the one error code that names the first
//! failed requirement.

use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::device::{DeviceConfig, DeviceDirectory};
use crate::gatekeeper::Gatekeeper;
use crate::ledger::{LedgerError, LedgerGateway, LedgerOperation, LedgerTransaction};
use crate::notifier::DispenseNotifier;
use crate::store::{ChallengeStore, InsertPaymentError, PaymentStore, StoreError};
use crate::timestamp::{ClockError, UnixTimestamp};
use crate::types::{
    Asset, Challenge, ChallengeId, DeviceId, DispenseEvent, EventKind, PaymentRecord,
    PaymentStatus, Stroops, TxHash, VerifyErrorCode, VerifySuccess,
};

/// Errors of challenge issuance.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    /// No machine with this id is configured.
    #[error("Machine not found")]
    DeviceNotFound,
    /// The configured price cannot be expressed in stroops.
    #[error("Configured price is invalid: {0}")]
    InvalidPrice(#[from] crate::types::MoneyAmountError),
    #[error(transparent)]
    Clock(#[from] ClockError),
}

/// All the ways a submitted payment can be rejected.
///
/// Variants marked with a wire code are surfaced verbatim to the paying
/// client; the rest collapse to `UNKNOWN_ERROR`.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The transaction id is not a 64-char hex digest. Rejected before any
    /// network call.
    #[error("Invalid transaction hash format")]
    MalformedTxHash,
    /// No machine with this id is configured.
    #[error("Machine not found")]
    DeviceNotFound,
    /// The ledger has no such transaction. Commonly transient: a freshly
    /// submitted transaction may not have propagated yet.
    #[error("Transaction not found on the Stellar network")]
    TransactionNotFound,
    /// The transaction exists but failed on the ledger.
    #[error("Transaction failed on network")]
    TransactionFailed,
    /// The transaction carries no payment-type operation.
    #[error("No payment operation found")]
    NoPaymentOperation,
    /// The payment operation's amount cannot be read as a ledger amount.
    #[error("Malformed payment amount")]
    MalformedAmount,
    /// The payment went to an account other than the device's merchant account.
    #[error("Payment sent to wrong account")]
    WrongDestination,
    /// The payment is not in the native asset.
    #[error("Payment must be in XLM")]
    WrongAsset,
    /// The transaction memo does not equal the expected challenge id.
    #[error("Transaction memo does not match challenge")]
    MemoMismatch,
    /// The referenced challenge was issued for a different machine, so its
    /// price and expiry say nothing about this purchase.
    #[error("Challenge does not belong to this machine")]
    ForeignChallenge,
    /// The referenced challenge's validity window has passed.
    #[error("Payment challenge has expired")]
    ExpiredChallenge,
    /// The paid amount is below the required floor.
    #[error("Payment amount is insufficient")]
    InsufficientAmount,
    /// A verified payment already exists for this transaction hash. Rejected
    /// deterministically forever.
    #[error("This transaction has already been used")]
    DuplicatePayment,
    /// Ledger gateway failure other than not-found.
    #[error("Ledger lookup failed: {0}")]
    Ledger(LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Clock(#[from] ClockError),
}

impl VerifyError {
    /// Stable wire code for this rejection.
    pub fn code(&self) -> VerifyErrorCode {
        match self {
            VerifyError::MalformedTxHash
            | VerifyError::TransactionFailed
            | VerifyError::NoPaymentOperation
            | VerifyError::MalformedAmount => VerifyErrorCode::InvalidTransaction,
            VerifyError::TransactionNotFound => VerifyErrorCode::TransactionNotFound,
            VerifyError::WrongDestination => VerifyErrorCode::WrongDestination,
            VerifyError::WrongAsset => VerifyErrorCode::WrongAsset,
            VerifyError::MemoMismatch | VerifyError::ForeignChallenge => {
                VerifyErrorCode::InvalidMemo
            }
            VerifyError::ExpiredChallenge => VerifyErrorCode::ExpiredChallenge,
            VerifyError::InsufficientAmount => VerifyErrorCode::InsufficientAmount,
            VerifyError::DuplicatePayment => VerifyErrorCode::DuplicatePayment,
            VerifyError::DeviceNotFound
            | VerifyError::Ledger(_)
            | VerifyError::Store(_)
            | VerifyError::Clock(_) => VerifyErrorCode::UnknownError,
        }
    }
}

/// Tunable windows of the gatekeeper.
#[derive(Debug, Clone, Copy)]
pub struct GatekeeperSettings {
    /// How long an issued challenge (and its quoted price) is honored.
    pub challenge_ttl: Duration,
    /// Upper bound on a dispense notification send. Deliberately shorter than
    /// the ledger lookup timeout: notification is best-effort, the lookup is
    /// on the correctness path.
    pub notify_timeout: Duration,
}

impl Default for GatekeeperSettings {
    fn default() -> Self {
        Self {
            challenge_ttl: Duration::from_secs(600),
            notify_timeout: Duration::from_secs(2),
        }
    }
}

/// Reference [`Gatekeeper`] implementation.
#[derive(Debug)]
pub struct GatekeeperLocal<D, L, S, N> {
    devices: Arc<D>,
    ledger: Arc<L>,
    store: Arc<S>,
    notifier: Arc<N>,
    settings: GatekeeperSettings,
}

impl<D, L, S, N> Clone for GatekeeperLocal<D, L, S, N> {
    fn clone(&self) -> Self {
        Self {
            devices: Arc::clone(&self.devices),
            ledger: Arc::clone(&self.ledger),
            store: Arc::clone(&self.store),
            notifier: Arc::clone(&self.notifier),
            settings: self.settings,
        }
    }
}

impl<D, L, S, N> GatekeeperLocal<D, L, S, N>
where
    D: DeviceDirectory,
    L: LedgerGateway,
    S: ChallengeStore + PaymentStore,
    N: DispenseNotifier,
{
    pub fn new(
        devices: Arc<D>,
        ledger: Arc<L>,
        store: Arc<S>,
        notifier: Arc<N>,
        settings: GatekeeperSettings,
    ) -> Self {
        Self {
            devices,
            ledger,
            store,
            notifier,
            settings,
        }
    }

    /// Locates the stored challenge a verification refers to, by the supplied
    /// challenge id or, failing that, by the transaction's own memo.
    ///
    /// A store miss is not an error: issuance persists challenges
    /// optimistically, so validation requirements must be derivable without
    /// the record. A hit for a different machine is rejected outright, since
    /// a foreign challenge's price floor and expiry must never stand in for
    /// this device's own.
    async fn resolve_challenge(
        &self,
        device_id: &DeviceId,
        challenge_id: Option<&ChallengeId>,
        transaction: &LedgerTransaction,
    ) -> Result<Option<Challenge>, VerifyError> {
        let id = challenge_id
            .cloned()
            .or_else(|| transaction.memo.clone().map(ChallengeId));
        let Some(id) = id else {
            return Ok(None);
        };
        match self.store.challenge(&id).await? {
            Some(challenge) if challenge.device_id != *device_id => {
                Err(VerifyError::ForeignChallenge)
            }
            found => Ok(found),
        }
    }

    /// Commits the verified payment record. An insert conflict means another
    /// verification of the same transaction won the race and is reported as a
    /// duplicate; a backend failure is logged and swallowed, since the ledger
    /// already holds the authoritative record of this payment.
    async fn commit_payment(&self, record: PaymentRecord) -> Result<(), VerifyError> {
        match self.store.insert_verified(record).await {
            Ok(()) => Ok(()),
            Err(InsertPaymentError::Duplicate) => Err(VerifyError::DuplicatePayment),
            Err(InsertPaymentError::Store(error)) => {
                tracing::warn!(%error, "Failed to record payment, duplicate window weakened");
                Ok(())
            }
        }
    }

    /// Fires the dispense event with a short bounded timeout. Never fails the
    /// verification outcome.
    async fn notify_dispense(&self, event: DispenseEvent) {
        let send = self.notifier.notify(event);
        match tokio::time::timeout(self.settings.notify_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!(%error, "Dispense notification failed"),
            Err(_) => tracing::warn!("Dispense notification timed out"),
        }
    }
}

impl<D, L, S, N> Gatekeeper for GatekeeperLocal<D, L, S, N>
where
    D: DeviceDirectory,
    L: LedgerGateway,
    S: ChallengeStore + PaymentStore,
    N: DispenseNotifier,
{
    type IssueError = IssueError;
    type VerifyError = VerifyError;

    /// Creates a challenge for a device from its configured price and payout
    /// account.
    ///
    /// The challenge is persisted optimistically: a store failure is logged
    /// and issuance still succeeds, because verification can derive the memo
    /// requirement from the submitted challenge id.
    #[instrument(skip_all, err, fields(device_id = %device_id))]
    async fn issue_challenge(&self, device_id: &DeviceId) -> Result<Challenge, IssueError> {
        let device = self
            .devices
            .device(device_id)
            .ok_or(IssueError::DeviceNotFound)?;
        let challenge_id = ChallengeId::random();
        let amount = device.price.as_stroops()?;
        let expires_at = UnixTimestamp::now()? + self.settings.challenge_ttl;
        let challenge = Challenge {
            vend402: true,
            challenge_id: challenge_id.clone(),
            device_id: device_id.clone(),
            amount,
            asset: Asset::Xlm,
            destination: device.destination,
            memo: challenge_id.0.clone(),
            expires_at,
            message: Some(format!("Pay {} XLM to dispense item", amount.as_xlm())),
        };
        if let Err(error) = self.store.put_challenge(challenge.clone()).await {
            tracing::warn!(%error, "Failed to store challenge, continuing");
        }
        tracing::info!(challenge_id = %challenge_id, amount = %amount, "Challenge issued");
        Ok(challenge)
    }

    /// Validates a submitted transaction hash, in order and with early exit:
    /// hash format, device lookup, ledger fetch, on-ledger success, payment
    /// operation presence, destination, asset, challenge ownership, memo,
    /// challenge expiry, amount, and finally the duplicate check backed by an
    /// atomic insert.
    #[instrument(skip_all, err, fields(device_id = %device_id))]
    async fn verify_payment(
        &self,
        device_id: &DeviceId,
        tx_hash: &str,
        challenge_id: Option<&ChallengeId>,
    ) -> Result<VerifySuccess, VerifyError> {
        let tx_hash: TxHash = tx_hash.parse().map_err(|_| VerifyError::MalformedTxHash)?;
        let device = self
            .devices
            .device(device_id)
            .ok_or(VerifyError::DeviceNotFound)?;

        let transaction = self
            .ledger
            .transaction_by_hash(&tx_hash)
            .await
            .map_err(|error| match error {
                LedgerError::NotFound => VerifyError::TransactionNotFound,
                other => VerifyError::Ledger(other),
            })?;

        let payment = assert_ledger_state(&transaction)?;
        assert_destination(payment, &device)?;
        assert_asset(payment)?;

        let challenge = self
            .resolve_challenge(device_id, challenge_id, &transaction)
            .await?;
        let expected_memo = challenge
            .as_ref()
            .map(|c| c.memo.as_str())
            .or(challenge_id.map(ChallengeId::as_str));
        if let Some(expected) = expected_memo {
            assert_memo(&transaction, expected)?;
        }
        let now = UnixTimestamp::now()?;
        if let Some(challenge) = &challenge {
            assert_not_expired(challenge, now)?;
        }
        let paid = assert_amount(payment, challenge.as_ref().map(|c| c.amount))?;

        if self.store.verified_payment(&tx_hash).await?.is_some() {
            return Err(VerifyError::DuplicatePayment);
        }
        let recorded_challenge_id = challenge
            .map(|c| c.challenge_id)
            .or_else(|| challenge_id.cloned())
            .or_else(|| transaction.memo.clone().map(ChallengeId));
        let record = PaymentRecord {
            tx_hash,
            challenge_id: recorded_challenge_id.clone(),
            device_id: device_id.clone(),
            amount: paid,
            status: PaymentStatus::Verified,
            verified_at: now,
        };
        self.commit_payment(record).await?;

        self.notify_dispense(DispenseEvent {
            event: EventKind::Dispense,
            device_id: device_id.clone(),
            tx_hash,
            challenge_id: recorded_challenge_id,
            timestamp: now,
        })
        .await;

        tracing::info!(tx_hash = %tx_hash, amount = %paid, "Payment verified");
        Ok(VerifySuccess {
            success: true,
            message: "Payment verified successfully. Dispensing item...".to_string(),
            tx_hash,
            dispensed: true,
        })
    }
}

/// The transaction must have succeeded on the ledger and contain at least one
/// payment-type operation.
fn assert_ledger_state(transaction: &LedgerTransaction) -> Result<&LedgerOperation, VerifyError> {
    if !transaction.successful {
        return Err(VerifyError::TransactionFailed);
    }
    transaction
        .operations
        .iter()
        .find(|op| op.is_payment())
        .ok_or(VerifyError::NoPaymentOperation)
}

/// The payment operation's destination must equal the device's configured
/// merchant account. This is the "no free dispense" check.
fn assert_destination(payment: &LedgerOperation, device: &DeviceConfig) -> Result<(), VerifyError> {
    if payment.to.as_deref() == Some(device.destination.as_str()) {
        Ok(())
    } else {
        Err(VerifyError::WrongDestination)
    }
}

fn assert_asset(payment: &LedgerOperation) -> Result<(), VerifyError> {
    if payment.is_native_asset() {
        Ok(())
    } else {
        Err(VerifyError::WrongAsset)
    }
}

/// The transaction memo must equal the expected challenge id exactly.
fn assert_memo(transaction: &LedgerTransaction, expected: &str) -> Result<(), VerifyError> {
    if transaction.memo.as_deref() == Some(expected) {
        Ok(())
    } else {
        Err(VerifyError::MemoMismatch)
    }
}

fn assert_not_expired(challenge: &Challenge, now: UnixTimestamp) -> Result<(), VerifyError> {
    if challenge.expires_at.is_before(now) {
        Err(VerifyError::ExpiredChallenge)
    } else {
        Ok(())
    }
}

/// The paid amount must meet the challenge's price when the challenge record
/// is available (underpayment rejected, overpayment accepted), or be strictly
/// positive when it is not.
fn assert_amount(
    payment: &LedgerOperation,
    floor: Option<Stroops>,
) -> Result<Stroops, VerifyError> {
    let amount = payment.amount.ok_or(VerifyError::MalformedAmount)?;
    let paid = Stroops::from_xlm(amount).map_err(|_| VerifyError::MalformedAmount)?;
    match floor {
        Some(required) if paid < required => Err(VerifyError::InsufficientAmount),
        None if paid == Stroops(0) => Err(VerifyError::InsufficientAmount),
        _ => Ok(paid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StaticDeviceDirectory;
    use crate::notifier::DispenseHub;
    use crate::store::MemoryStore;
    use crate::types::MoneyAmount;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MERCHANT: &str = "GA7QYNF7SOWQ3GLR2BGMZEHXAVIRZA4KVWLTJJFC7MGXUA74P7UJVSGZ";
    const THIRD_PARTY: &str = "GCXKG6RN4ONIEPCMNFB732A436Z5PNDSRLGWK7GIDAXEYENCEDY4U6GA";

    /// Ledger fake: serves transactions from a map, counts lookups.
    struct FakeLedger {
        transactions: HashMap<TxHash, LedgerTransaction>,
        lookups: AtomicUsize,
    }

    impl FakeLedger {
        fn new(transactions: Vec<LedgerTransaction>) -> Self {
            let transactions = transactions
                .into_iter()
                .map(|tx| (TxHash::from_str(&tx.hash).unwrap(), tx))
                .collect();
            Self {
                transactions,
                lookups: AtomicUsize::new(0),
            }
        }

        fn empty() -> Self {
            Self::new(Vec::new())
        }
    }

    #[async_trait]
    impl LedgerGateway for FakeLedger {
        async fn transaction_by_hash(
            &self,
            hash: &TxHash,
        ) -> Result<LedgerTransaction, LedgerError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.transactions
                .get(hash)
                .cloned()
                .ok_or(LedgerError::NotFound)
        }
    }

    fn payment_op(to: &str, amount: &str, asset_type: &str) -> LedgerOperation {
        LedgerOperation {
            kind: "payment".to_string(),
            from: Some(THIRD_PARTY.to_string()),
            to: Some(to.to_string()),
            amount: Some(Decimal::from_str(amount).unwrap()),
            asset_type: Some(asset_type.to_string()),
        }
    }

    fn ledger_tx(hash: &str, memo: Option<&str>, operations: Vec<LedgerOperation>) -> LedgerTransaction {
        LedgerTransaction {
            hash: hash.to_string(),
            successful: true,
            memo: memo.map(str::to_string),
            memo_type: memo.map(|_| "text".to_string()),
            operations,
        }
    }

    type TestGatekeeper =
        GatekeeperLocal<StaticDeviceDirectory, FakeLedger, MemoryStore, DispenseHub>;

    fn gatekeeper(ledger: FakeLedger) -> TestGatekeeper {
        let devices = StaticDeviceDirectory::new(HashMap::from([(
            "machine-1".into(),
            crate::device::DeviceConfig {
                price: MoneyAmount(Decimal::new(5, 1)), // 0.5 XLM
                destination: MERCHANT.parse().unwrap(),
            },
        )]));
        GatekeeperLocal::new(
            Arc::new(devices),
            Arc::new(ledger),
            Arc::new(MemoryStore::new()),
            Arc::new(DispenseHub::new()),
            GatekeeperSettings::default(),
        )
    }

    fn tx_hash(seed: &str) -> String {
        seed.repeat(32)
    }

    #[tokio::test]
    async fn issues_priced_challenge_with_distinct_ids() {
        let gk = gatekeeper(FakeLedger::empty());
        let device = "machine-1".into();

        let first = gk.issue_challenge(&device).await.unwrap();
        let second = gk.issue_challenge(&device).await.unwrap();

        // 0.5 XLM at 7 decimal places.
        assert_eq!(first.amount, Stroops(5_000_000));
        assert_eq!(first.destination.as_str(), MERCHANT);
        assert_eq!(first.memo, first.challenge_id.0);
        assert!(first.vend402);
        assert_ne!(first.challenge_id, second.challenge_id);
        assert!(UnixTimestamp::now().unwrap().is_before(first.expires_at));
    }

    #[tokio::test]
    async fn issuance_fails_for_unknown_device() {
        let gk = gatekeeper(FakeLedger::empty());
        let err = gk.issue_challenge(&"machine-9".into()).await.unwrap_err();
        assert!(matches!(err, IssueError::DeviceNotFound));
    }

    #[tokio::test]
    async fn verifies_matching_payment_and_signals_dispense() {
        let gk = gatekeeper(FakeLedger::empty());
        let device: DeviceId = "machine-1".into();
        let challenge = gk.issue_challenge(&device).await.unwrap();

        let hash = tx_hash("ab");
        let tx = ledger_tx(
            &hash,
            Some(challenge.challenge_id.as_str()),
            vec![payment_op(MERCHANT, "0.5", "native")],
        );
        let gk = TestGatekeeper {
            ledger: Arc::new(FakeLedger::new(vec![tx])),
            ..gk
        };
        let mut dispense = gk.notifier.subscribe(&device);

        let result = gk
            .verify_payment(&device, &hash, Some(&challenge.challenge_id))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.dispensed);
        assert_eq!(result.tx_hash.to_string(), hash);

        let event = dispense.recv().await.unwrap();
        assert_eq!(event.device_id, device);
        assert_eq!(event.challenge_id, Some(challenge.challenge_id));
    }

    #[tokio::test]
    async fn replayed_transaction_is_rejected() {
        let gk = gatekeeper(FakeLedger::empty());
        let device: DeviceId = "machine-1".into();
        let challenge = gk.issue_challenge(&device).await.unwrap();

        let hash = tx_hash("ab");
        let tx = ledger_tx(
            &hash,
            Some(challenge.challenge_id.as_str()),
            vec![payment_op(MERCHANT, "0.5", "native")],
        );
        let gk = TestGatekeeper {
            ledger: Arc::new(FakeLedger::new(vec![tx])),
            ..gk
        };

        gk.verify_payment(&device, &hash, Some(&challenge.challenge_id))
            .await
            .unwrap();
        let err = gk
            .verify_payment(&device, &hash, Some(&challenge.challenge_id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::DuplicatePayment);
    }

    #[tokio::test]
    async fn concurrent_verifications_succeed_at_most_once() {
        let gk = gatekeeper(FakeLedger::empty());
        let device: DeviceId = "machine-1".into();
        let challenge = gk.issue_challenge(&device).await.unwrap();

        let hash = tx_hash("ab");
        let tx = ledger_tx(
            &hash,
            Some(challenge.challenge_id.as_str()),
            vec![payment_op(MERCHANT, "0.5", "native")],
        );
        let gk = Arc::new(TestGatekeeper {
            ledger: Arc::new(FakeLedger::new(vec![tx])),
            ..gk
        });

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let gk = gk.clone();
            let device = device.clone();
            let hash = hash.clone();
            let challenge_id = challenge.challenge_id.clone();
            tasks.push(tokio::spawn(async move {
                gk.verify_payment(&device, &hash, Some(&challenge_id)).await
            }));
        }

        let mut successes = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert_eq!(err.code(), VerifyErrorCode::DuplicatePayment),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn unknown_transaction_is_distinct_from_other_failures() {
        let gk = gatekeeper(FakeLedger::empty());
        let err = gk
            .verify_payment(&"machine-1".into(), &tx_hash("ab"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::TransactionNotFound);
    }

    #[tokio::test]
    async fn payment_to_third_party_never_dispenses() {
        let hash = tx_hash("ab");
        let tx = ledger_tx(&hash, None, vec![payment_op(THIRD_PARTY, "100", "native")]);
        let gk = gatekeeper(FakeLedger::new(vec![tx]));

        let err = gk
            .verify_payment(&"machine-1".into(), &hash, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::WrongDestination);

        // Rejections must leave no payment record behind.
        let recorded = gk
            .store
            .verified_payment(&TxHash::from_str(&hash).unwrap())
            .await
            .unwrap();
        assert!(recorded.is_none());
    }

    #[tokio::test]
    async fn non_native_asset_is_rejected() {
        let hash = tx_hash("ab");
        let tx = ledger_tx(
            &hash,
            None,
            vec![payment_op(MERCHANT, "0.5", "credit_alphanum4")],
        );
        let gk = gatekeeper(FakeLedger::new(vec![tx]));

        let err = gk
            .verify_payment(&"machine-1".into(), &hash, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::WrongAsset);
    }

    #[tokio::test]
    async fn failed_transaction_is_rejected() {
        let hash = tx_hash("ab");
        let mut tx = ledger_tx(&hash, None, vec![payment_op(MERCHANT, "0.5", "native")]);
        tx.successful = false;
        let gk = gatekeeper(FakeLedger::new(vec![tx]));

        let err = gk
            .verify_payment(&"machine-1".into(), &hash, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::InvalidTransaction);
    }

    #[tokio::test]
    async fn transaction_without_payment_operation_is_rejected() {
        let hash = tx_hash("ab");
        let tx = ledger_tx(&hash, None, Vec::new());
        let gk = gatekeeper(FakeLedger::new(vec![tx]));

        let err = gk
            .verify_payment(&"machine-1".into(), &hash, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::InvalidTransaction);
    }

    #[tokio::test]
    async fn malformed_hash_fails_fast_without_ledger_call() {
        let gk = gatekeeper(FakeLedger::empty());
        let err = gk
            .verify_payment(&"machine-1".into(), "not-a-hash", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::InvalidTransaction);
        assert_eq!(gk.ledger.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn memo_mismatch_is_rejected() {
        let hash = tx_hash("ab");
        let tx = ledger_tx(
            &hash,
            Some("someone-elses-memo"),
            vec![payment_op(MERCHANT, "0.5", "native")],
        );
        let gk = gatekeeper(FakeLedger::new(vec![tx]));
        let challenge_id = ChallengeId("expected-memo-123".to_string());

        let err = gk
            .verify_payment(&"machine-1".into(), &hash, Some(&challenge_id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::InvalidMemo);
    }

    #[tokio::test]
    async fn zero_amount_is_always_rejected() {
        let hash = tx_hash("ab");
        let tx = ledger_tx(&hash, None, vec![payment_op(MERCHANT, "0", "native")]);
        let gk = gatekeeper(FakeLedger::new(vec![tx]));

        let err = gk
            .verify_payment(&"machine-1".into(), &hash, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::InsufficientAmount);
    }

    #[tokio::test]
    async fn underpayment_against_stored_challenge_is_rejected() {
        let gk = gatekeeper(FakeLedger::empty());
        let device: DeviceId = "machine-1".into();
        let challenge = gk.issue_challenge(&device).await.unwrap();

        let hash = tx_hash("ab");
        let tx = ledger_tx(
            &hash,
            Some(challenge.challenge_id.as_str()),
            vec![payment_op(MERCHANT, "0.4999999", "native")],
        );
        let gk = TestGatekeeper {
            ledger: Arc::new(FakeLedger::new(vec![tx])),
            ..gk
        };

        let err = gk
            .verify_payment(&device, &hash, Some(&challenge.challenge_id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::InsufficientAmount);
    }

    #[tokio::test]
    async fn overpayment_is_accepted() {
        let gk = gatekeeper(FakeLedger::empty());
        let device: DeviceId = "machine-1".into();
        let challenge = gk.issue_challenge(&device).await.unwrap();

        let hash = tx_hash("ab");
        let tx = ledger_tx(
            &hash,
            Some(challenge.challenge_id.as_str()),
            vec![payment_op(MERCHANT, "2", "native")],
        );
        let gk = TestGatekeeper {
            ledger: Arc::new(FakeLedger::new(vec![tx])),
            ..gk
        };

        let result = gk
            .verify_payment(&device, &hash, Some(&challenge.challenge_id))
            .await
            .unwrap();
        assert!(result.dispensed);
    }

    #[tokio::test]
    async fn foreign_device_challenge_never_lowers_the_price() {
        // Two machines pay into the same merchant account at very different
        // prices. A challenge issued for the cheap one must not serve as the
        // amount floor when verifying a purchase on the expensive one.
        let devices = StaticDeviceDirectory::new(HashMap::from([
            (
                "machine-a".into(),
                crate::device::DeviceConfig {
                    price: MoneyAmount(Decimal::new(5, 0)), // 5 XLM
                    destination: MERCHANT.parse().unwrap(),
                },
            ),
            (
                "machine-b".into(),
                crate::device::DeviceConfig {
                    price: MoneyAmount(Decimal::new(1, 1)), // 0.1 XLM
                    destination: MERCHANT.parse().unwrap(),
                },
            ),
        ]));
        let gk = GatekeeperLocal::new(
            Arc::new(devices),
            Arc::new(FakeLedger::empty()),
            Arc::new(MemoryStore::new()),
            Arc::new(DispenseHub::new()),
            GatekeeperSettings::default(),
        );
        let cheap = gk.issue_challenge(&"machine-b".into()).await.unwrap();

        let hash = tx_hash("ab");
        let tx = ledger_tx(
            &hash,
            Some(cheap.challenge_id.as_str()),
            vec![payment_op(MERCHANT, "0.1", "native")],
        );
        let gk = TestGatekeeper {
            ledger: Arc::new(FakeLedger::new(vec![tx])),
            ..gk
        };

        let err = gk
            .verify_payment(&"machine-a".into(), &hash, Some(&cheap.challenge_id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::InvalidMemo);
        let recorded = gk
            .store
            .verified_payment(&TxHash::from_str(&hash).unwrap())
            .await
            .unwrap();
        assert!(recorded.is_none());

        // The same payment still unlocks the machine it was made for.
        let ok = gk
            .verify_payment(&"machine-b".into(), &hash, Some(&cheap.challenge_id))
            .await
            .unwrap();
        assert!(ok.dispensed);
    }

    #[tokio::test]
    async fn expired_challenge_is_rejected() {
        let gk = gatekeeper(FakeLedger::empty());
        let device: DeviceId = "machine-1".into();
        let challenge_id = ChallengeId("expired-challenge".to_string());
        let expired = Challenge {
            vend402: true,
            challenge_id: challenge_id.clone(),
            device_id: device.clone(),
            amount: Stroops(5_000_000),
            asset: Asset::Xlm,
            destination: MERCHANT.parse().unwrap(),
            memo: challenge_id.0.clone(),
            expires_at: UnixTimestamp::from_secs(1),
            message: None,
        };
        gk.store.put_challenge(expired).await.unwrap();

        let hash = tx_hash("ab");
        let tx = ledger_tx(
            &hash,
            Some(challenge_id.as_str()),
            vec![payment_op(MERCHANT, "0.5", "native")],
        );
        let gk = TestGatekeeper {
            ledger: Arc::new(FakeLedger::new(vec![tx])),
            ..gk
        };

        let err = gk
            .verify_payment(&device, &hash, Some(&challenge_id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), VerifyErrorCode::ExpiredChallenge);
    }
}
