// Path: crates/chain/src/safe.rs
//! Safe transaction routing.
//!
//! Every on-chain write originates from the service's 1-of-1 Gnosis Safe so
//! the mech's `onlyOperator` check passes. The agent EOA signs the Safe
//! transaction hash (eth_sign convention, `v += 4`) and also pays gas for
//! the outer `execTransaction`.

use crate::contracts::IAgentMech;
use crate::contracts::IGnosisSafe;
use crate::rpc::{RpcClient, TxReceipt};
use crate::signer::EthSigner;
use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use mech_types::error::{RpcError, SafeError};
use std::sync::Arc;
use std::time::Duration;

/// Classification of a submission failure, driving the retry policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionClass {
    /// `nonce too low` / `replacement transaction underpriced`: retry on the
    /// long ladder after re-verifying undelivered state.
    NonceConflict,
    /// The node lost track of the transaction post-submission.
    NotFound,
    /// The Safe executed but the inner call reverted (`GS013`): fatal,
    /// almost always a mech↔safe authorization mismatch.
    InnerRevert,
    /// Anything else: fatal for this attempt.
    Other,
}

/// Maps a node error message onto the submission retry policy table.
pub fn classify_submission_error(message: &str) -> SubmissionClass {
    let lower = message.to_lowercase();
    if lower.contains("nonce too low") || lower.contains("replacement transaction underpriced") {
        SubmissionClass::NonceConflict
    } else if lower.contains("transaction not found") {
        SubmissionClass::NotFound
    } else if message.contains("GS013") {
        SubmissionClass::InnerRevert
    } else {
        SubmissionClass::Other
    }
}

/// True when the receipt contains a `RevokeRequest(requestId)` emitted by
/// the target mech: the contract accepted the transaction but rejected the
/// delivery content.
pub fn receipt_has_revoke(receipt: &TxReceipt, mech: Address, request_id: B256) -> bool {
    receipt.logs.iter().any(|log| {
        log.address == mech
            && log.topics.first() == Some(&IAgentMech::RevokeRequest::SIGNATURE_HASH)
            && log.topics.get(1) == Some(&request_id)
    })
}

/// Routes inner calls through one Safe on one chain.
pub struct SafeRouter {
    rpc: Arc<RpcClient>,
    signer: Arc<EthSigner>,
    safe: Address,
    chain_id: u64,
}

impl SafeRouter {
    pub fn new(rpc: Arc<RpcClient>, signer: Arc<EthSigner>, safe: Address, chain_id: u64) -> Self {
        Self {
            rpc,
            signer,
            safe,
            chain_id,
        }
    }

    pub fn safe_address(&self) -> Address {
        self.safe
    }

    /// `eth_getCode != 0x`; a Safe that was never deployed cannot execute.
    pub async fn is_deployed(&self) -> Result<bool, RpcError> {
        Ok(!self.rpc.get_code(self.safe).await?.is_empty())
    }

    /// Signs and submits `execTransaction(to, data)`; returns the outer
    /// transaction hash. Submission failures surface as `RpcError::Remote`
    /// whose message feeds [`classify_submission_error`].
    pub async fn exec_transaction(&self, to: Address, data: Vec<u8>) -> Result<B256, SafeError> {
        let safe_nonce: U256 = self.rpc.call(self.safe, IGnosisSafe::nonceCall {}).await?;

        let inner: Bytes = data.into();
        let safe_tx_hash: B256 = self
            .rpc
            .call(
                self.safe,
                IGnosisSafe::getTransactionHashCall {
                    to,
                    value: U256::ZERO,
                    data: inner.clone(),
                    operation: 0,
                    safeTxGas: U256::ZERO,
                    baseGas: U256::ZERO,
                    gasPrice: U256::ZERO,
                    gasToken: Address::ZERO,
                    refundReceiver: Address::ZERO,
                    _nonce: safe_nonce,
                },
            )
            .await?;

        let signatures = self.signer.safe_signature(safe_tx_hash)?;
        let calldata = IGnosisSafe::execTransactionCall {
            to,
            value: U256::ZERO,
            data: inner,
            operation: 0,
            safeTxGas: U256::ZERO,
            baseGas: U256::ZERO,
            gasPrice: U256::ZERO,
            gasToken: Address::ZERO,
            refundReceiver: Address::ZERO,
            signatures: signatures.to_vec().into(),
        }
        .abi_encode();

        let from = self.signer.address();
        let nonce_latest = self.rpc.transaction_count(from, "latest").await?;
        let nonce_pending = self.rpc.transaction_count(from, "pending").await?;
        tracing::debug!(
            target: "safe",
            event = "eoa_nonce",
            %from,
            nonce_latest,
            nonce_pending,
            safe_nonce = %safe_nonce,
        );

        let gas = self.rpc.estimate_gas(from, self.safe, &calldata).await?;
        let gas_price = self.rpc.gas_price().await?;

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: nonce_pending,
            gas_price,
            // 20% headroom over the estimate; Safe signature checking cost
            // varies slightly with calldata.
            gas_limit: gas + gas / 5,
            to: TxKind::Call(self.safe),
            value: U256::ZERO,
            input: calldata.into(),
        };

        let sighash = tx.signature_hash();
        let signature = self.signer.sign_tx_hash(sighash)?;
        let envelope = TxEnvelope::Legacy(tx.into_signed(signature));
        let raw = envelope.encoded_2718();

        let tx_hash = self.rpc.send_raw_transaction(&raw).await?;
        tracing::info!(target: "safe", event = "submitted", %tx_hash, to = %to);
        Ok(tx_hash)
    }

    /// Polls for the receipt until the deadline.
    pub async fn await_receipt(
        &self,
        tx_hash: B256,
        deadline: Duration,
    ) -> Result<TxReceipt, RpcError> {
        let poll = Duration::from_secs(3);
        let started = std::time::Instant::now();
        loop {
            if let Some(receipt) = self.rpc.transaction_receipt(tx_hash).await? {
                return Ok(receipt);
            }
            if started.elapsed() + poll > deadline {
                return Err(RpcError::Timeout(format!(
                    "receipt for {tx_hash:#x} not found within {}s",
                    deadline.as_secs()
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }
}
