//! Origin side of the ACE x402 payment scheme: challenge issuance, the
//! payment verification pipeline, an idempotent file-backed payment ledger,
//! and an axum router tying them together.

pub mod config;
pub mod errors;
pub mod ledger;
pub mod origin;
pub mod router;
pub mod verify;
