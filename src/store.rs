//! Durable persistence seams for challenges and settled payments.
//!
//! Production deployments back these traits with the merchant database. The
//! correctness-critical contract is [`PaymentStore::insert_verified`]: it must
//! be an atomic insert-if-absent keyed by transaction hash, so that two racing
//! verifications of the same transaction cannot both commit. The reference
//! [`MemoryStore`] provides that guarantee with `DashMap` entry locking; a
//! database implementation provides it with a uniqueness constraint.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::types::{Challenge, ChallengeId, PaymentRecord, TxHash};

/// Backend failure of a store operation.
#[derive(Debug, thiserror::Error)]
#[error("Store failure: {0}")]
pub struct StoreError(pub String);

/// Failure to commit a verified payment record.
#[derive(Debug, thiserror::Error)]
pub enum InsertPaymentError {
    /// A verified record for this transaction hash already exists. Callers
    /// must treat this as a duplicate payment, never as an internal error.
    #[error("A verified payment already exists for this transaction")]
    Duplicate,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persistence for outstanding challenges, keyed by challenge id.
///
/// Challenges are write-once: created at issuance, read during verification,
/// never mutated. An expired challenge stays in the store.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn put_challenge(&self, challenge: Challenge) -> Result<(), StoreError>;
    async fn challenge(&self, id: &ChallengeId) -> Result<Option<Challenge>, StoreError>;
}

/// Persistence for settled payments, keyed by transaction hash.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn verified_payment(&self, tx_hash: &TxHash)
    -> Result<Option<PaymentRecord>, StoreError>;

    /// Commits a verified payment record, failing with
    /// [`InsertPaymentError::Duplicate`] if one already exists for the hash.
    /// The check and the write are a single atomic step.
    async fn insert_verified(&self, record: PaymentRecord) -> Result<(), InsertPaymentError>;
}

/// In-memory reference store.
///
/// Suitable for tests and single-process deployments. Durability across
/// restarts is the database-backed implementation's job.
#[derive(Debug, Default)]
pub struct MemoryStore {
    challenges: DashMap<ChallengeId, Challenge>,
    payments: DashMap<TxHash, PaymentRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn put_challenge(&self, challenge: Challenge) -> Result<(), StoreError> {
        self.challenges
            .insert(challenge.challenge_id.clone(), challenge);
        Ok(())
    }

    async fn challenge(&self, id: &ChallengeId) -> Result<Option<Challenge>, StoreError> {
        Ok(self.challenges.get(id).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn verified_payment(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<PaymentRecord>, StoreError> {
        Ok(self.payments.get(tx_hash).map(|entry| entry.value().clone()))
    }

    async fn insert_verified(&self, record: PaymentRecord) -> Result<(), InsertPaymentError> {
        match self.payments.entry(record.tx_hash) {
            Entry::Occupied(_) => Err(InsertPaymentError::Duplicate),
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(())
            }
        }
    }
}
