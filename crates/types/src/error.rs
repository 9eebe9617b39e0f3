// Path: crates/types/src/error.rs
//! Error taxonomy for the worker node.
//!
//! Every error carries a stable, machine-readable string code next to its
//! human message; callers branch on `code()`, logs and envelopes carry both.

use alloy_primitives::{Address, B256};
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors from the JSON-RPC transport and contract reads.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The HTTP transport failed before a JSON-RPC response arrived.
    #[error("RPC transport error: {0}")]
    Transport(String),
    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Remote {
        /// JSON-RPC error code from the node.
        code: i64,
        /// JSON-RPC error message from the node.
        message: String,
    },
    /// The call result could not be decoded into the expected ABI shape.
    #[error("ABI decode error: {0}")]
    Decode(String),
    /// The call exceeded its deadline.
    #[error("RPC call timed out: {0}")]
    Timeout(String),
    /// All retry attempts were exhausted.
    #[error("RPC retries exhausted: {0}")]
    RetriesExhausted(String),
}

impl ErrorCode for RpcError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "RPC_TRANSPORT_ERROR",
            Self::Remote { .. } => "RPC_REMOTE_ERROR",
            Self::Decode(_) => "RPC_DECODE_ERROR",
            Self::Timeout(_) => "RPC_TIMEOUT",
            Self::RetriesExhausted(_) => "RPC_RETRIES_EXHAUSTED",
        }
    }
}

/// Errors from key handling and signature production.
#[derive(Debug, Error)]
pub enum SignError {
    /// The key material on disk was malformed.
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
    /// The message to sign failed validation (e.g. bad hex).
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    /// The EIP-712 payload could not be interpreted.
    #[error("Invalid typed data: {0}")]
    TypedData(String),
    /// The underlying signer failed.
    #[error("Signing failed: {0}")]
    Signer(String),
}

impl ErrorCode for SignError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "SIGN_INVALID_KEY",
            Self::InvalidMessage(_) => "SIGN_INVALID_MESSAGE",
            Self::TypedData(_) => "SIGN_INVALID_TYPED_DATA",
            Self::Signer(_) => "SIGN_FAILED",
        }
    }
}

/// Errors from Safe transaction routing (chain reads plus owner signing).
#[derive(Debug, Error)]
pub enum SafeError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Sign(#[from] SignError),
}

impl ErrorCode for SafeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Rpc(e) => e.code(),
            Self::Sign(e) => e.code(),
        }
    }
}

/// Errors from IPFS uploads and reads.
#[derive(Debug, Error)]
pub enum IpfsError {
    /// The local node rejected or failed the upload.
    #[error("IPFS upload failed: {0}")]
    Upload(String),
    /// The requested content is not present on the local node.
    #[error("Content not found for digest {0}")]
    NotFound(String),
    /// The public gateway fallback failed.
    #[error("IPFS gateway error: {0}")]
    Gateway(String),
    /// The returned CID could not be reduced to a 32-byte digest.
    #[error("CID digest derivation failed: {0}")]
    Digest(String),
}

impl ErrorCode for IpfsError {
    fn code(&self) -> &'static str {
        match self {
            Self::Upload(_) => "IPFS_UPLOAD_FAILED",
            Self::NotFound(_) => "IPFS_NOT_FOUND",
            Self::Gateway(_) => "IPFS_GATEWAY_ERROR",
            Self::Digest(_) => "IPFS_DIGEST_ERROR",
        }
    }
}

/// Errors from the credential bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The capability probe failed; the provider set is treated as empty.
    #[error("Capability probe failed: {0}")]
    Probe(String),
    /// Token issuance failed for a provider.
    #[error("Token request for '{provider}' failed: {message}")]
    Token {
        /// Provider whose token was requested.
        provider: String,
        /// Failure detail.
        message: String,
    },
    /// The 402 payment flow failed.
    #[error("x402 payment failed: {0}")]
    Payment(String),
    /// The request-bound signature could not be produced.
    #[error("Bridge request signing failed: {0}")]
    Signature(String),
}

impl ErrorCode for BridgeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Probe(_) => "BRIDGE_PROBE_FAILED",
            Self::Token { .. } => "BRIDGE_TOKEN_FAILED",
            Self::Payment(_) => "BRIDGE_PAYMENT_FAILED",
            Self::Signature(_) => "BRIDGE_SIGNATURE_FAILED",
        }
    }
}

/// Errors surfaced by the signing proxy to its HTTP clients.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Missing or invalid bearer token.
    #[error("Unauthorized")]
    Unauthorized,
    /// The request body failed validation.
    #[error("Validation error: {0}")]
    Validation(String),
    /// A downstream dependency (RPC, IPFS, Safe) failed transiently.
    #[error("Upstream error: {0}")]
    Upstream(String),
    /// The dispatch path failed.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

impl ErrorCode for ProxyError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Dispatch(_) => "DISPATCH_FAILED",
        }
    }
}

/// Errors from request intake and claiming.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Another worker won the lease race.
    #[error("Claim lost to another worker")]
    ClaimLost,
    /// The worker's capability profile does not cover the request.
    #[error("Ineligible for request: {0}")]
    Ineligible(String),
    /// The request source (indexer or chain) failed.
    #[error("Request source error: {0}")]
    Source(String),
    /// The lease broker failed.
    #[error("Lease broker error: {0}")]
    Lease(String),
}

impl ErrorCode for IntakeError {
    fn code(&self) -> &'static str {
        match self {
            Self::ClaimLost => "CLAIM_LOST",
            Self::Ineligible(_) => "INELIGIBLE",
            Self::Source(_) => "INTAKE_SOURCE_ERROR",
            Self::Lease(_) => "INTAKE_LEASE_ERROR",
        }
    }
}

/// Errors from the agent subprocess runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The subprocess could not be spawned.
    #[error("Agent spawn failed: {0}")]
    Spawn(String),
    /// The run was cancelled and the agent was interrupted.
    #[error("Agent interrupted")]
    Interrupted,
    /// The agent exited non-zero.
    #[error("Agent exited with status {0}")]
    NonZeroExit(i32),
    /// The result file was missing or unparseable.
    #[error("Agent result invalid: {0}")]
    BadResult(String),
    /// Scratch-dir or pipe plumbing failed.
    #[error("Agent IO error: {0}")]
    Io(String),
}

impl ErrorCode for RunnerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "AGENT_SPAWN_FAILED",
            Self::Interrupted => "AGENT_INTERRUPTED",
            Self::NonZeroExit(_) => "AGENT_NONZERO_EXIT",
            Self::BadResult(_) => "AGENT_BAD_RESULT",
            Self::Io(_) => "AGENT_IO_ERROR",
        }
    }
}

/// Errors from the delivery engine state machine.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Rejected at entry; never retried.
    #[error("Validation error: {0}")]
    Validation(String),
    /// A prior submission for this request is still in flight.
    #[error("Delivery already in flight for request {0}")]
    PendingInFlight(B256),
    /// Both verification tiers failed; retry later.
    #[error("Undelivered-state verification failed: {0}")]
    VerifyFailed(String),
    /// Neither the local node nor the gateway accepted the payload, so no
    /// on-chain digest exists to deliver.
    #[error("Payload upload failed: {0}")]
    Upload(String),
    /// The Safe address has no contract code at the RPC.
    #[error("Safe {0} has no code on chain")]
    SafeNotDeployed(Address),
    /// We are not the priority mech and the response window is still open.
    #[error("Priority window active until {response_timeout} for foreign mech request")]
    CrossMechPriorityActive {
        /// Epoch seconds when the window closes.
        response_timeout: u64,
    },
    /// The Safe executed but the inner mech call reverted (GS013).
    #[error("Safe inner call reverted: {0}")]
    InnerRevert(String),
    /// Submission failed after the nonce/mempool retry ladder.
    #[error("Submission failed: {0}")]
    Submission(String),
    /// The receipt reported failure or never arrived.
    #[error("Receipt error: {0}")]
    Receipt(String),
    /// A chain read underneath the engine failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl ErrorCode for DeliveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::PendingInFlight(_) => "PENDING_IN_FLIGHT",
            Self::VerifyFailed(_) => "VERIFY_FAILED",
            Self::Upload(_) => "DELIVERY_UPLOAD_FAILED",
            Self::SafeNotDeployed(_) => "SAFE_NOT_DEPLOYED",
            Self::CrossMechPriorityActive { .. } => "CROSS_MECH_PRIORITY_ACTIVE",
            Self::InnerRevert(_) => "SAFE_INNER_REVERT",
            Self::Submission(_) => "DELIVERY_SUBMISSION_FAILED",
            Self::Receipt(_) => "DELIVERY_RECEIPT_ERROR",
            Self::Rpc(e) => e.code(),
        }
    }
}

/// Errors from the service registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The profile directory could not be read.
    #[error("Profile dir error: {0}")]
    Io(#[from] std::io::Error),
    /// A profile file failed to parse.
    #[error("Profile '{file}' invalid: {message}")]
    Profile {
        /// Offending file name.
        file: String,
        /// Parse failure detail.
        message: String,
    },
    /// No valid services survived validation.
    #[error("No valid services in profile directory")]
    NoServices,
}

impl ErrorCode for RegistryError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "REGISTRY_IO_ERROR",
            Self::Profile { .. } => "REGISTRY_PROFILE_INVALID",
            Self::NoServices => "REGISTRY_NO_SERVICES",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_level_codes_are_stable() {
        assert_eq!(IntakeError::ClaimLost.code(), "CLAIM_LOST");
        assert_eq!(IntakeError::Ineligible(String::new()).code(), "INELIGIBLE");
        assert_eq!(
            DeliveryError::PendingInFlight(B256::ZERO).code(),
            "PENDING_IN_FLIGHT"
        );
        assert_eq!(
            DeliveryError::VerifyFailed(String::new()).code(),
            "VERIFY_FAILED"
        );
        assert_eq!(
            DeliveryError::SafeNotDeployed(Address::ZERO).code(),
            "SAFE_NOT_DEPLOYED"
        );
        assert_eq!(
            DeliveryError::CrossMechPriorityActive {
                response_timeout: 0
            }
            .code(),
            "CROSS_MECH_PRIORITY_ACTIVE"
        );
        assert_eq!(
            DeliveryError::Validation(String::new()).code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn rpc_errors_pass_through_delivery_wrapper() {
        let e = DeliveryError::from(RpcError::Timeout("eth_call".into()));
        assert_eq!(e.code(), "RPC_TIMEOUT");
    }
}
