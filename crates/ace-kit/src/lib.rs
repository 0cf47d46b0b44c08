//! Client side of the ACE x402 payment scheme: a spend-limited session
//! ledger, pluggable session stores, and an HTTP interceptor that answers
//! `402 Payment Required` challenges with signed payments.

pub mod errors;
pub mod interceptor;
pub mod session;
pub mod signer;
pub mod store;
