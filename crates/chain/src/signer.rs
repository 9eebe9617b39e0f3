// Path: crates/chain/src/signer.rs
//! The agent EOA signer.
//!
//! Loads the 32-byte secp256k1 key from the profile's key file and produces
//! the three signature flavors that cross the proxy boundary (personal,
//! raw-bytes personal, EIP-712) plus the Safe owner signature (eth_sign
//! convention, `v += 4`).

use alloy_dyn_abi::TypedData;
use alloy_primitives::{Address, Signature, B256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use mech_types::error::SignError;
use serde_json::Value;
use std::path::Path;

pub struct EthSigner {
    inner: PrivateKeySigner,
}

impl EthSigner {
    /// Reads a hex-encoded 32-byte key (optionally `0x`-prefixed) from disk.
    pub fn load(path: &Path) -> Result<Self, SignError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SignError::InvalidKey(format!("{}: {e}", path.display())))?;
        let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
            .map_err(|e| SignError::InvalidKey(format!("key file is not hex: {e}")))?;
        Self::from_key_bytes(&bytes)
    }

    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self, SignError> {
        let inner = PrivateKeySigner::from_slice(bytes)
            .map_err(|e| SignError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Lower-cased `0x` hex of the signer address, the form the proxy
    /// reports to the agent.
    pub fn address_hex(&self) -> String {
        format!("{:#x}", self.inner.address())
    }

    /// EIP-191 personal signature over the message bytes.
    pub fn personal_sign(&self, message: &[u8]) -> Result<[u8; 65], SignError> {
        let sig = self
            .inner
            .sign_message_sync(message)
            .map_err(|e| SignError::Signer(e.to_string()))?;
        Ok(to_rsv(&sig))
    }

    /// Signature over a precomputed 32-byte hash, without any prefix.
    pub fn sign_prehash(&self, hash: B256) -> Result<[u8; 65], SignError> {
        let sig = self
            .inner
            .sign_hash_sync(&hash)
            .map_err(|e| SignError::Signer(e.to_string()))?;
        Ok(to_rsv(&sig))
    }

    /// Raw signature object over a hash, for transaction assembly.
    pub fn sign_tx_hash(&self, hash: B256) -> Result<Signature, SignError> {
        self.inner
            .sign_hash_sync(&hash)
            .map_err(|e| SignError::Signer(e.to_string()))
    }

    /// Safe owner signature for a Safe transaction hash: an EIP-191
    /// personal signature over the hash with `v += 4`, the Safe contract's
    /// marker for eth_sign-style owner approval.
    pub fn safe_signature(&self, safe_tx_hash: B256) -> Result<[u8; 65], SignError> {
        let mut sig = self.personal_sign(safe_tx_hash.as_slice())?;
        sig[64] += 4;
        Ok(sig)
    }

    /// EIP-712 signature over a full typed-data JSON object
    /// (`{domain, types, primaryType, message}`).
    pub fn sign_typed_data(&self, payload: &Value) -> Result<[u8; 65], SignError> {
        let typed: TypedData = serde_json::from_value(payload.clone())
            .map_err(|e| SignError::TypedData(e.to_string()))?;
        let hash = typed
            .eip712_signing_hash()
            .map_err(|e| SignError::TypedData(e.to_string()))?;
        self.sign_prehash(hash)
    }
}

fn to_rsv(sig: &Signature) -> [u8; 65] {
    let mut out = [0u8; 65];
    out[..32].copy_from_slice(&sig.r().to_be_bytes::<32>());
    out[32..64].copy_from_slice(&sig.s().to_be_bytes::<32>());
    out[64] = 27 + sig.v() as u8;
    out
}
