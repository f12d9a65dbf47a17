//! Core trait defining the payment-gating interface of a vend402 gatekeeper.
//!
//! Implementors issue payment challenges for devices
//! ([`Gatekeeper::issue_challenge`]) and verify submitted ledger payments
//! against them ([`Gatekeeper::verify_payment`]).

use std::fmt::Debug;
use std::sync::Arc;

use crate::types::{Challenge, ChallengeId, DeviceId, VerifySuccess};

/// Trait defining the asynchronous interface for payment gatekeepers.
///
/// A gatekeeper is a stateless request handler: each invocation is
/// independent, and any shared state lives behind the persistence layer.
pub trait Gatekeeper {
    /// Error of challenge issuance, e.g. an unknown device.
    type IssueError: Debug;
    /// Error of payment verification, carrying a stable wire code.
    type VerifyError: Debug;

    /// Creates a priced, time-bounded payment challenge for a device.
    ///
    /// # Errors
    ///
    /// Returns [`Self::IssueError`] if the device is not configured.
    fn issue_challenge(
        &self,
        device_id: &DeviceId,
    ) -> impl Future<Output = Result<Challenge, Self::IssueError>> + Send;

    /// Verifies a submitted transaction hash against the ledger and the
    /// device's payment requirements, records the settlement, and signals
    /// the device to dispense.
    ///
    /// # Errors
    ///
    /// Returns [`Self::VerifyError`] if any validation step fails; the
    /// variant determines the wire code shown to the paying client.
    fn verify_payment(
        &self,
        device_id: &DeviceId,
        tx_hash: &str,
        challenge_id: Option<&ChallengeId>,
    ) -> impl Future<Output = Result<VerifySuccess, Self::VerifyError>> + Send;
}

impl<T: Gatekeeper + Sync> Gatekeeper for Arc<T> {
    type IssueError = T::IssueError;
    type VerifyError = T::VerifyError;

    fn issue_challenge(
        &self,
        device_id: &DeviceId,
    ) -> impl Future<Output = Result<Challenge, Self::IssueError>> + Send {
        self.as_ref().issue_challenge(device_id)
    }

    fn verify_payment(
        &self,
        device_id: &DeviceId,
        tx_hash: &str,
        challenge_id: Option<&ChallengeId>,
    ) -> impl Future<Output = Result<VerifySuccess, Self::VerifyError>> + Send {
        self.as_ref().verify_payment(device_id, tx_hash, challenge_id)
    }
}
