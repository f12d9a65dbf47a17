//! Read-only access to the Stellar transaction record.
//!
//! The gatekeeper never signs or submits anything. It only asks one question
//! of the ledger: does this transaction exist, did it succeed, and what
//! payment operations does it carry. [`LedgerGateway`] is that question as a
//! trait, so verification logic can run against a fake in tests, and
//! [`HorizonGateway`] answers it against a real Horizon API.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::types::TxHash;

/// A transaction as recorded on the ledger, reduced to the fields payment
/// verification needs.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerTransaction {
    pub hash: String,
    pub successful: bool,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub memo_type: Option<String>,
    /// Operations are fetched separately on Horizon and stapled on here.
    #[serde(default)]
    pub operations: Vec<LedgerOperation>,
}

/// One operation of a ledger transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerOperation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    /// Amount in XLM decimal form as Horizon reports it, e.g. `"0.5000000"`.
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub asset_type: Option<String>,
}

impl LedgerOperation {
    pub fn is_payment(&self) -> bool {
        self.kind == "payment"
    }

    pub fn is_native_asset(&self) -> bool {
        self.asset_type.as_deref() == Some("native")
    }
}

/// Errors from the ledger gateway.
///
/// `NotFound` is split out because it is commonly transient: a freshly
/// submitted transaction may not have propagated to the queried Horizon node
/// yet, and callers are expected to retry with backoff.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Transaction not found on the ledger")]
    NotFound,
    #[error("Ledger request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected ledger response status: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("Invalid ledger endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Read-only ledger lookup by transaction hash.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Fetches a transaction and its operations.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the ledger has no such transaction,
    /// [`LedgerError::Transport`] on network failure or timeout.
    async fn transaction_by_hash(&self, hash: &TxHash) -> Result<LedgerTransaction, LedgerError>;
}

/// Horizon envelope for collection endpoints: `{"_embedded": {"records": [...]}}`.
#[derive(Debug, Deserialize)]
struct Embedded<T> {
    #[serde(rename = "_embedded")]
    embedded: Records<T>,
}

#[derive(Debug, Deserialize)]
struct Records<T> {
    records: Vec<T>,
}

/// [`LedgerGateway`] implementation over the Horizon REST API.
#[derive(Debug, Clone)]
pub struct HorizonGateway {
    http: reqwest::Client,
    base: Url,
}

impl HorizonGateway {
    /// Builds a gateway against a Horizon base URL with a bounded per-request
    /// timeout. The timeout is on the verification critical path, so it is
    /// configured separately from (and longer than) the notification timeout.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base.join(path)
    }
}

#[async_trait]
impl LedgerGateway for HorizonGateway {
    async fn transaction_by_hash(&self, hash: &TxHash) -> Result<LedgerTransaction, LedgerError> {
        let tx_url = self.endpoint(&format!("transactions/{hash}"))?;
        let response = self.http.get(tx_url).send().await?;
        let mut transaction: LedgerTransaction = match response.status() {
            StatusCode::NOT_FOUND => return Err(LedgerError::NotFound),
            StatusCode::OK => response.json().await?,
            status => return Err(LedgerError::UnexpectedStatus(status)),
        };

        let ops_url = self.endpoint(&format!("transactions/{hash}/operations"))?;
        let response = self.http.get(ops_url).send().await?;
        let operations: Embedded<LedgerOperation> = match response.status() {
            StatusCode::NOT_FOUND => return Err(LedgerError::NotFound),
            StatusCode::OK => response.json().await?,
            status => return Err(LedgerError::UnexpectedStatus(status)),
        };
        transaction.operations = operations.embedded.records;
        Ok(transaction)
    }
}
