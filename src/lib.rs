//! Payment gatekeeper for cryptocurrency-operated vending machines.
//!
//! This crate implements the vend402 protocol: an HTTP-native payment flow
//! built on the `402 Payment Required` status code, settling in Stellar
//! lumens (XLM). A machine's buyer requests a challenge naming a price,
//! destination account, and memo; pays on the Stellar network; then submits
//! the transaction hash for verification. A verified payment releases
//! exactly one dispense.
//!
//! # Roles
//!
//! - **Gatekeeper**: The server that issues challenges and verifies payments
//!   against the ledger. See [`gatekeeper`] for the trait definition and
//!   [`gatekeeper_local`] for the reference implementation.
//!
//! - **Machine**: A vending machine that long-polls for dispense events.
//!   See [`notifier`] and the dispense endpoint in [`handlers`].
//!
//! - **Buyer/Client**: The paying party's agent. See [`client`] for the
//!   payment orchestration state machine and the HTTP gatekeeper client.
//!
//! # Modules
//!
//! - [`client`] — Client-side payment flow: state machine, wallet and submitter seams.
//! - [`config`] — Configuration for the gatekeeper server, including the device table.
//! - [`device`] — Device configuration lookup.
//! - [`gatekeeper`] — The [`Gatekeeper`](gatekeeper::Gatekeeper) trait for challenge issuance and payment verification.
//! - [`gatekeeper_local`] — Reference implementation verifying against a ledger gateway.
//! - [`handlers`] — HTTP endpoint handlers for the gatekeeper server.
//! - [`ledger`] — Ledger gateway trait and the Horizon-backed implementation.
//! - [`notifier`] — Dispense event signaling.
//! - [`store`] — Challenge and verified-payment stores; the duplicate-payment defense.
//! - [`timestamp`] — Unix timestamp type for challenge validity windows.
//! - [`types`] — Wire and domain types of the vend402 protocol.

pub mod client;
pub mod config;
pub mod device;
pub mod gatekeeper;
pub mod gatekeeper_local;
pub mod handlers;
pub mod ledger;
pub mod notifier;
pub mod sig_down;
pub mod store;
pub mod telemetry;
pub mod timestamp;
pub mod types;
