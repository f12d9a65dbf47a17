//! Client-side payment orchestration.
//!
//! The paying party's agent drives one purchase attempt through a finite
//! state machine: request a challenge, hand it to a wallet for signing,
//! submit the signed transaction to the ledger network, and ask the
//! gatekeeper to verify. Wallet and network access sit behind the
//! [`WalletSigner`] and [`LedgerSubmitter`] seams, and the gatekeeper behind
//! [`GatekeeperApi`], so the machine itself is testable without any I/O.
//!
//! Session state is scoped to one attempt and never persisted; discarding a
//! session is always safe, since the replay defense lives server-side.

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::types::{
    Challenge, ChallengeId, DeviceId, ErrorResponse, GatekeeperRequest, TxHash,
    VerificationResponse, VerifyErrorCode,
};

/// Observable state of one purchase attempt.
///
/// `Success` and `Error` are absorbing: no transition leaves them except an
/// explicit [`PaymentSession::retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentState {
    Idle,
    RequestingChallenge,
    ChallengeReceived,
    Signing,
    Submitting,
    Verifying,
    Success,
    Error,
}

/// Why a purchase attempt ended in `Error`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FlowError {
    #[error("Failed to request challenge: {0}")]
    Challenge(String),
    #[error("Wallet signing failed: {0}")]
    Signing(String),
    #[error("Transaction submission failed: {0}")]
    Submission(String),
    /// The gatekeeper rejected the payment; carries its stable code so the
    /// UI can show a precise remediation.
    #[error("{message}")]
    Rejected {
        code: VerifyErrorCode,
        message: String,
    },
    #[error("Verification request failed: {0}")]
    Verification(String),
}

/// A signed, ready-to-broadcast transaction envelope (base64 XDR on Stellar).
#[derive(Debug, Clone)]
pub struct SignedEnvelope(pub String);

/// External wallet failures.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Signing request was denied")]
    Denied,
    #[error("Wallet unavailable: {0}")]
    Unavailable(String),
}

/// Ledger network broadcast failure.
#[derive(Debug, thiserror::Error)]
#[error("Broadcast failed: {0}")]
pub struct SubmitError(pub String);

/// Signs a challenge's payment (destination, amount, memo) with the user's key.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    async fn sign(&self, challenge: &Challenge) -> Result<SignedEnvelope, WalletError>;
}

/// Broadcasts a signed envelope to the ledger network and returns its hash.
#[async_trait]
pub trait LedgerSubmitter: Send + Sync {
    async fn submit(&self, envelope: &SignedEnvelope) -> Result<TxHash, SubmitError>;
}

/// Errors of the HTTP gatekeeper client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Gatekeeper request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gatekeeper error: {0}")]
    Gatekeeper(String),
    /// A 402 body arrived without the vend402 protocol marker.
    #[error("Response is not a vend402 challenge")]
    NotAChallenge,
}

/// The two gatekeeper operations a paying client performs.
#[async_trait]
pub trait GatekeeperApi: Send + Sync {
    async fn request_challenge(&self, device_id: &DeviceId) -> Result<Challenge, ClientError>;
    async fn verify_payment(
        &self,
        device_id: &DeviceId,
        tx_hash: &TxHash,
        challenge_id: Option<&ChallengeId>,
    ) -> Result<VerificationResponse, ClientError>;
}

/// HTTP client for the gatekeeper endpoint.
#[derive(Debug, Clone)]
pub struct GatekeeperClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl GatekeeperClient {
    pub fn new(endpoint: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl GatekeeperApi for GatekeeperClient {
    /// Requests a payment challenge. The challenge arrives as the body of a
    /// `402 Payment Required` response; anything else is an error.
    async fn request_challenge(&self, device_id: &DeviceId) -> Result<Challenge, ClientError> {
        let request = GatekeeperRequest::GetChallenge {
            device_id: device_id.clone(),
        };
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;
        if response.status() == StatusCode::PAYMENT_REQUIRED {
            let challenge: Challenge = response.json().await?;
            if challenge.vend402 {
                Ok(challenge)
            } else {
                Err(ClientError::NotAChallenge)
            }
        } else {
            let error: ErrorResponse = response.json().await?;
            Err(ClientError::Gatekeeper(error.error))
        }
    }

    async fn verify_payment(
        &self,
        device_id: &DeviceId,
        tx_hash: &TxHash,
        challenge_id: Option<&ChallengeId>,
    ) -> Result<VerificationResponse, ClientError> {
        let request = GatekeeperRequest::VerifyPayment {
            device_id: device_id.clone(),
            tx_hash: tx_hash.to_string(),
            challenge_id: challenge_id.cloned(),
        };
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;
        let outcome: VerificationResponse = response.json().await?;
        Ok(outcome)
    }
}

/// One purchase attempt, from `Idle` to a terminal state.
///
/// Single-flow and cooperative: at most one outstanding operation, and a
/// challenge is signed and submitted at most once. A retry discards the old
/// challenge entirely, because its expiry and one-shot semantics are tied to
/// its id.
pub struct PaymentSession<A, W, S> {
    api: A,
    wallet: W,
    submitter: S,
    device_id: DeviceId,
    state: PaymentState,
    challenge: Option<Challenge>,
    tx_hash: Option<TxHash>,
    error: Option<FlowError>,
}

impl<A, W, S> PaymentSession<A, W, S>
where
    A: GatekeeperApi,
    W: WalletSigner,
    S: LedgerSubmitter,
{
    pub fn new(api: A, wallet: W, submitter: S, device_id: DeviceId) -> Self {
        Self {
            api,
            wallet,
            submitter,
            device_id,
            state: PaymentState::Idle,
            challenge: None,
            tx_hash: None,
            error: None,
        }
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    pub fn tx_hash(&self) -> Option<&TxHash> {
        self.tx_hash.as_ref()
    }

    pub fn last_error(&self) -> Option<&FlowError> {
        self.error.as_ref()
    }

    fn fail(&mut self, error: FlowError) -> PaymentState {
        tracing::debug!(%error, "Payment flow failed");
        self.error = Some(error);
        self.state = PaymentState::Error;
        self.state
    }

    /// `Idle → RequestingChallenge → ChallengeReceived | Error`.
    ///
    /// A no-op in any other state, so a terminal state cannot be left by
    /// calling `start` again.
    pub async fn start(&mut self) -> PaymentState {
        if self.state != PaymentState::Idle {
            return self.state;
        }
        self.state = PaymentState::RequestingChallenge;
        match self.api.request_challenge(&self.device_id).await {
            Ok(challenge) => {
                self.challenge = Some(challenge);
                self.state = PaymentState::ChallengeReceived;
                self.state
            }
            Err(error) => self.fail(FlowError::Challenge(error.to_string())),
        }
    }

    /// `ChallengeReceived → Signing → Submitting → Verifying → Success | Error`.
    ///
    /// Valid only in `ChallengeReceived`; once the machine leaves that state
    /// the challenge can never be signed or submitted a second time.
    pub async fn confirm(&mut self) -> PaymentState {
        if self.state != PaymentState::ChallengeReceived {
            return self.state;
        }
        let Some(challenge) = self.challenge.clone() else {
            return self.fail(FlowError::Signing("No active challenge".to_string()));
        };

        self.state = PaymentState::Signing;
        let envelope = match self.wallet.sign(&challenge).await {
            Ok(envelope) => envelope,
            Err(error) => return self.fail(FlowError::Signing(error.to_string())),
        };

        self.state = PaymentState::Submitting;
        let tx_hash = match self.submitter.submit(&envelope).await {
            Ok(tx_hash) => tx_hash,
            Err(error) => return self.fail(FlowError::Submission(error.to_string())),
        };
        self.tx_hash = Some(tx_hash);

        self.state = PaymentState::Verifying;
        match self
            .api
            .verify_payment(&self.device_id, &tx_hash, Some(&challenge.challenge_id))
            .await
        {
            Ok(VerificationResponse::Success(_)) => {
                self.state = PaymentState::Success;
            }
            Ok(VerificationResponse::Failure(failure)) => {
                // Transient rejections (e.g. TRANSACTION_NOT_FOUND while the
                // ledger propagates) are surfaced, not silently retried.
                self.fail(FlowError::Rejected {
                    code: failure.code,
                    message: failure.message,
                });
            }
            Err(error) => {
                self.fail(FlowError::Verification(error.to_string()));
            }
        }
        self.state
    }

    /// Full flow: request a challenge and, if one arrives, confirm it.
    pub async fn run(&mut self) -> PaymentState {
        if self.start().await == PaymentState::ChallengeReceived {
            self.confirm().await;
        }
        self.state
    }

    /// `{Success, Error} → Idle`, clearing the challenge, hash, and error.
    ///
    /// The old challenge is discarded unconditionally; the next `start`
    /// requests a fresh one.
    pub fn retry(&mut self) -> PaymentState {
        if matches!(self.state, PaymentState::Success | PaymentState::Error) {
            self.state = PaymentState::Idle;
            self.challenge = None;
            self.tx_hash = None;
            self.error = None;
        }
        self.state
    }
}
