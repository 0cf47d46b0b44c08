//! Core protocol layer of the ACE x402 payment scheme: canonical JSON,
//! hashing, challenge issuance, and payment signing primitives shared by
//! the client kit and the origin paywall.

pub mod canonical;
pub mod challenge;
pub mod errors;
pub mod payment;
pub mod transport;
pub mod types;

pub use errors::{Error, Result};
