// Path: crates/chain/src/lib.rs
//! # Mech Chain
//!
//! Everything that touches an EVM node: a thin typed JSON-RPC client, the
//! `sol!` bindings for the five consumed contracts, the EOA signer, and the
//! Safe `execTransaction` routing used for every on-chain write.

pub mod backoff;
pub mod contracts;
pub mod rpc;
pub mod safe;
pub mod signer;

pub use rpc::{RpcClient, RpcLog, TxReceipt};
pub use safe::{classify_submission_error, receipt_has_revoke, SafeRouter, SubmissionClass};
pub use signer::EthSigner;
