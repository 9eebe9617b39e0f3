// Path: crates/chain/src/contracts.rs
//! ABI bindings for the contracts the worker consumes.
//!
//! Read paths go through `eth_call`; the only write the worker ever makes is
//! `GnosisSafe.execTransaction` wrapping either `deliverToMarketplace` or
//! `MechMarketplace.request`.

use alloy_sol_types::sol;

sol! {
    /// Staking contract holding the service's stake; all reads are
    /// immutable per deployment except `tsCheckpoint`.
    #[derive(Debug)]
    interface IStaking {
        struct ServiceInfo {
            address multisig;
            address owner;
            uint256[] nonces;
            uint256 tsStart;
            uint256 reward;
            uint256 inactivity;
        }

        function livenessPeriod() external view returns (uint256);
        function tsCheckpoint() external view returns (uint256);
        function activityChecker() external view returns (address);
        function rewardsPerSecond() external view returns (uint256);
        function minStakingDeposit() external view returns (uint256);
        function maxNumServices() external view returns (uint256);
        function maxNumInactivityPeriods() external view returns (uint256);
        function getServiceInfo(uint256 serviceId) external view returns (ServiceInfo memory);
    }

    /// Activity checker exposing the raw nonce/request-count view.
    #[derive(Debug)]
    interface IActivityChecker {
        function livenessRatio() external view returns (uint256);
        /// Returns `[safeNonce, requestCount]` for the multisig.
        function getMultisigNonces(address multisig) external view returns (uint256[] memory);
    }

    /// The mech endpoint itself.
    #[derive(Debug)]
    interface IAgentMech {
        function getUndeliveredRequestIds(uint256 size, uint256 offset) external view returns (bytes32[] memory);
        function deliverToMarketplace(bytes32 requestId, bytes32 deliveryDigest) external;
        /// Emitted when the contract rejects the delivery content inside an
        /// otherwise successful transaction.
        event RevokeRequest(bytes32 indexed requestId);
    }

    /// Marketplace routing requests to mechs.
    #[derive(Debug)]
    interface IMechMarketplace {
        function minResponseTimeout() external view returns (uint256);
        function maxResponseTimeout() external view returns (uint256);
        function request(
            bytes memory data,
            uint256 maxDeliveryRate,
            bytes32 paymentType,
            address priorityMech,
            uint256 responseTimeout,
            bytes memory paymentData
        ) external payable returns (uint256 requestId);
        event MarketplaceRequest(address indexed priorityMech, address indexed requester, uint256 requestId, bytes data);
    }

    /// 1-of-1 Gnosis Safe owned by the agent EOA.
    #[derive(Debug)]
    interface IGnosisSafe {
        function nonce() external view returns (uint256);
        function getTransactionHash(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            uint256 _nonce
        ) external view returns (bytes32);
        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            bytes memory signatures
        ) external payable returns (bool success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{keccak256, B256, U256};
    use alloy_sol_types::{SolCall, SolEvent};

    #[test]
    fn revoke_event_topic_matches_signature() {
        assert_eq!(
            IAgentMech::RevokeRequest::SIGNATURE_HASH,
            keccak256("RevokeRequest(bytes32)".as_bytes())
        );
    }

    #[test]
    fn undelivered_call_encodes_selector_and_args() {
        let call = IAgentMech::getUndeliveredRequestIdsCall {
            size: U256::from(100),
            offset: U256::from(0),
        };
        let encoded = call.abi_encode();
        // selector + two static words
        assert_eq!(encoded.len(), 4 + 32 + 32);
        assert_eq!(
            &encoded[..4],
            &keccak256("getUndeliveredRequestIds(uint256,uint256)".as_bytes())[..4]
        );
    }

    #[test]
    fn deliver_call_is_two_words() {
        let call = IAgentMech::deliverToMarketplaceCall {
            requestId: B256::repeat_byte(0x11),
            deliveryDigest: B256::repeat_byte(0x22),
        };
        let encoded = call.abi_encode();
        assert_eq!(encoded.len(), 4 + 64);
    }
}
