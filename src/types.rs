//! Protocol types for the vend402 gatekeeper.
//!
//! Wire messages exchanged between the paying client, the gatekeeper, and the
//! vending device, plus the validating newtypes they are built from. All JSON
//! payloads use camelCase field names and stringified integers for amounts and
//! timestamps, compatible with the Vend402 TypeScript client.

use once_cell::sync::Lazy;
use rand::Rng;
use rand::distr::Alphanumeric;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use crate::timestamp::UnixTimestamp;

/// Number of stroops in one XLM. A stroop is the minor unit of the Stellar
/// native asset: 1 XLM = 10^7 stroops.
pub const STROOPS_PER_XLM: u64 = 10_000_000;

/// Number of characters in a generated challenge id.
const CHALLENGE_ID_LEN: usize = 16;

/// A 32-byte Stellar transaction hash, encoded as a 64-char lowercase hex string.
///
/// Unlike EVM hashes, Stellar transaction ids carry no `0x` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

/// The submitted transaction id does not look like a Stellar transaction hash.
#[derive(Debug, thiserror::Error)]
#[error("Invalid transaction hash format")]
pub struct TxHashParseError;

static TX_HASH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{64}$").expect("invalid regex"));

impl FromStr for TxHash {
    type Err = TxHashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !TX_HASH_REGEX.is_match(s) {
            return Err(TxHashParseError);
        }
        let bytes = hex::decode(s).map_err(|_| TxHashParseError)?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| TxHashParseError)?;
        Ok(TxHash(array))
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A Stellar account id in strkey form: `G` followed by 55 base32 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StellarAccount(String);

/// The string is not a valid Stellar public account id.
#[derive(Debug, thiserror::Error)]
#[error("Invalid Stellar account id: {0}")]
pub struct StellarAccountParseError(String);

static ACCOUNT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^G[A-Z2-7]{55}$").expect("invalid regex"));

impl FromStr for StellarAccount {
    type Err = StellarAccountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if ACCOUNT_REGEX.is_match(s) {
            Ok(StellarAccount(s.to_string()))
        } else {
            Err(StellarAccountParseError(s.to_string()))
        }
    }
}

impl<'de> Deserialize<'de> for StellarAccount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Display for StellarAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StellarAccount {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque identifier of a vending machine, assigned by the merchant dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId(value.to_string())
    }
}

/// Unguessable token identifying one payment challenge.
///
/// The challenge id doubles as the required transaction memo, and is the only
/// binding between a ledger transaction and a specific purchase intent, so it
/// must come from a cryptographically secure generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChallengeId(pub String);

impl ChallengeId {
    /// Generates a fresh challenge id from the thread-local CSPRNG.
    pub fn random() -> Self {
        let id: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(CHALLENGE_ID_LEN)
            .map(char::from)
            .collect();
        ChallengeId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An integer amount of stroops, the Stellar minor unit.
///
/// Amounts never travel as floating point. Serialized as a stringified
/// integer, e.g. `5000000` becomes `"5000000"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stroops(pub u64);

impl Serialize for Stroops {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Stroops {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let value = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("amount must be a non-negative integer"))?;
        Ok(Stroops(value))
    }
}

impl Display for Stroops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Stroops {
    /// Converts a decimal XLM amount into stroops, truncating toward zero.
    ///
    /// Truncation never rounds up, so a quoted price never exceeds the
    /// configured one. Negative amounts are rejected.
    pub fn from_xlm(xlm: Decimal) -> Result<Self, MoneyAmountError> {
        if xlm.is_sign_negative() {
            return Err(MoneyAmountError::Negative);
        }
        let scaled = xlm
            .checked_mul(Decimal::from(STROOPS_PER_XLM))
            .ok_or(MoneyAmountError::OutOfRange)?;
        let value = scaled.trunc().to_u64().ok_or(MoneyAmountError::OutOfRange)?;
        Ok(Stroops(value))
    }

    /// Human-readable XLM rendering for display messages, e.g. `0.5`.
    pub fn as_xlm(&self) -> Decimal {
        (Decimal::from(self.0) / Decimal::from(STROOPS_PER_XLM)).normalize()
    }
}

/// A human-readable XLM price, e.g. a machine's configured item price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoneyAmount(pub Decimal);

#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountError {
    #[error("Negative value is not allowed")]
    Negative,
    #[error("Amount does not fit the ledger's integer range")]
    OutOfRange,
}

impl MoneyAmount {
    pub fn as_stroops(&self) -> Result<Stroops, MoneyAmountError> {
        Stroops::from_xlm(self.0)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Asset expected by the gatekeeper. Only the Stellar native asset is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Asset {
    #[serde(rename = "XLM")]
    Xlm,
}

/// A server-issued, time-bounded statement of what must be paid, to whom, and
/// with what memo, to unlock one dispense.
///
/// Returned as the body of a `402 Payment Required` response. Read-only once
/// issued; logically expired after `expires_at` but never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Protocol marker, always `true`. Lets clients tell a vend402 challenge
    /// from other 402 bodies.
    pub vend402: bool,
    pub challenge_id: ChallengeId,
    pub device_id: DeviceId,
    /// Amount to pay, in stroops.
    pub amount: Stroops,
    pub asset: Asset,
    /// Merchant account that must receive the funds.
    pub destination: StellarAccount,
    /// Memo the paying transaction must carry. Equals `challenge_id`.
    pub memo: String,
    pub expires_at: UnixTimestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Action-discriminated request body of the gatekeeper endpoint.
///
/// The transaction hash arrives as a raw string so that a malformed value is
/// rejected by the verifier with a proper `INVALID_TRANSACTION` code instead
/// of a generic deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum GatekeeperRequest {
    #[serde(rename = "getChallenge", rename_all = "camelCase")]
    GetChallenge { device_id: DeviceId },
    #[serde(rename = "verifyPayment", rename_all = "camelCase")]
    VerifyPayment {
        device_id: DeviceId,
        tx_hash: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        challenge_id: Option<ChallengeId>,
    },
}

/// Stable error codes surfaced to paying clients on verification failure.
///
/// Each code maps to a precise remediation on the client side, per the error
/// taxonomy: input errors, ledger-state errors, replay errors, and a catch-all
/// for infrastructure failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyErrorCode {
    InvalidTransaction,
    InsufficientAmount,
    WrongDestination,
    WrongAsset,
    ExpiredChallenge,
    InvalidMemo,
    TransactionNotFound,
    DuplicatePayment,
    UnknownError,
}

impl Display for VerifyErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerifyErrorCode::InvalidTransaction => "INVALID_TRANSACTION",
            VerifyErrorCode::InsufficientAmount => "INSUFFICIENT_AMOUNT",
            VerifyErrorCode::WrongDestination => "WRONG_DESTINATION",
            VerifyErrorCode::WrongAsset => "WRONG_ASSET",
            VerifyErrorCode::ExpiredChallenge => "EXPIRED_CHALLENGE",
            VerifyErrorCode::InvalidMemo => "INVALID_MEMO",
            VerifyErrorCode::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            VerifyErrorCode::DuplicatePayment => "DUPLICATE_PAYMENT",
            VerifyErrorCode::UnknownError => "UNKNOWN_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Successful verification outcome: payment accepted, dispense signal sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySuccess {
    pub success: bool,
    pub message: String,
    pub tx_hash: TxHash,
    pub dispensed: bool,
}

/// Failed verification outcome with a stable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyFailure {
    pub success: bool,
    pub code: VerifyErrorCode,
    pub message: String,
}

/// Combined verification response, discriminated by the `success` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerificationResponse {
    Success(VerifySuccess),
    Failure(VerifyFailure),
}

/// Final state of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Verified,
    Rejected,
}

/// A verified settlement, written exactly once at verification success and
/// immutable afterward. The transaction hash is the idempotency key: at most
/// one verified record may exist per hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub tx_hash: TxHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<ChallengeId>,
    pub device_id: DeviceId,
    pub amount: Stroops,
    pub status: PaymentStatus,
    pub verified_at: UnixTimestamp,
}

/// Kind tag of a device-facing event. Only dispense events exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "dispense")]
    Dispense,
}

/// Fire-and-forget signal to a vending device that a payment was verified and
/// one item should be dispensed. Devices must tolerate missed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispenseEvent {
    pub event: EventKind,
    pub device_id: DeviceId,
    pub tx_hash: TxHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<ChallengeId>,
    pub timestamp: UnixTimestamp,
}

/// Generic error body for non-protocol failures (unknown device, bad request).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> StellarAccount {
        "GA7QYNF7SOWQ3GLR2BGMZEHXAVIRZA4KVWLTJJFC7MGXUA74P7UJVSGZ"
            .parse()
            .unwrap()
    }

    #[test]
    fn tx_hash_accepts_64_hex_chars() {
        let s = "deadbeef".repeat(8);
        let hash: TxHash = s.parse().unwrap();
        assert_eq!(hash.to_string(), s);
    }

    #[test]
    fn tx_hash_rejects_malformed_input() {
        assert!("deadbeef".parse::<TxHash>().is_err());
        // 0x prefixes are an EVM habit; Stellar hashes are bare hex.
        assert!(format!("0x{}", "ab".repeat(31)).parse::<TxHash>().is_err());
        assert!("g".repeat(64).parse::<TxHash>().is_err());
        assert!(("deadbeef".repeat(8) + "00").parse::<TxHash>().is_err());
    }

    #[test]
    fn stellar_account_validation() {
        assert_eq!(
            account().as_str(),
            "GA7QYNF7SOWQ3GLR2BGMZEHXAVIRZA4KVWLTJJFC7MGXUA74P7UJVSGZ"
        );
        assert!("not-an-account".parse::<StellarAccount>().is_err());
        // Lowercase strkeys are not canonical.
        assert!(
            "ga7qynf7sowq3glr2bgmzehxavirza4kvwltjjfc7mgxua74p7ujvsgz"
                .parse::<StellarAccount>()
                .is_err()
        );
    }

    #[test]
    fn stroops_truncate_never_round_up() {
        let half = MoneyAmount(Decimal::new(5, 1)); // 0.5 XLM
        assert_eq!(half.as_stroops().unwrap(), Stroops(5_000_000));

        // 0.12345678 XLM has more precision than a stroop; the extra digit
        // must be dropped, not rounded.
        let fine = MoneyAmount(Decimal::new(12345678, 8));
        assert_eq!(fine.as_stroops().unwrap(), Stroops(1_234_567));

        let negative = MoneyAmount(Decimal::new(-1, 0));
        assert!(negative.as_stroops().is_err());
    }

    #[test]
    fn stroops_wire_format_is_string() {
        let json = serde_json::to_string(&Stroops(5_000_000)).unwrap();
        assert_eq!(json, "\"5000000\"");
        let back: Stroops = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Stroops(5_000_000));
    }

    #[test]
    fn challenge_ids_are_distinct() {
        let a = ChallengeId::random();
        let b = ChallengeId::random();
        assert_eq!(a.as_str().len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn gatekeeper_request_action_discriminator() {
        let get: GatekeeperRequest =
            serde_json::from_str(r#"{"action":"getChallenge","deviceId":"machine-1"}"#).unwrap();
        assert!(matches!(
            get,
            GatekeeperRequest::GetChallenge { device_id } if device_id.0 == "machine-1"
        ));

        let verify: GatekeeperRequest = serde_json::from_str(
            r#"{"action":"verifyPayment","deviceId":"machine-1","txHash":"abc"}"#,
        )
        .unwrap();
        match verify {
            GatekeeperRequest::VerifyPayment {
                tx_hash,
                challenge_id,
                ..
            } => {
                assert_eq!(tx_hash, "abc");
                assert!(challenge_id.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }

        assert!(
            serde_json::from_str::<GatekeeperRequest>(
                r#"{"action":"selfDestruct","deviceId":"machine-1"}"#
            )
            .is_err()
        );
    }

    #[test]
    fn verify_error_code_wire_names() {
        let json = serde_json::to_string(&VerifyErrorCode::DuplicatePayment).unwrap();
        assert_eq!(json, "\"DUPLICATE_PAYMENT\"");
        let back: VerifyErrorCode = serde_json::from_str("\"WRONG_DESTINATION\"").unwrap();
        assert_eq!(back, VerifyErrorCode::WrongDestination);
    }

    #[test]
    fn challenge_serializes_camel_case() {
        let challenge = Challenge {
            vend402: true,
            challenge_id: ChallengeId("abcdef0123456789".to_string()),
            device_id: "machine-1".into(),
            amount: Stroops(5_000_000),
            asset: Asset::Xlm,
            destination: account(),
            memo: "abcdef0123456789".to_string(),
            expires_at: UnixTimestamp::from_secs(1700000000),
            message: None,
        };
        let value = serde_json::to_value(&challenge).unwrap();
        assert_eq!(value["vend402"], true);
        assert_eq!(value["challengeId"], "abcdef0123456789");
        assert_eq!(value["amount"], "5000000");
        assert_eq!(value["asset"], "XLM");
        assert_eq!(value["expiresAt"], "1700000000");
        assert!(value.get("message").is_none());
    }
}
