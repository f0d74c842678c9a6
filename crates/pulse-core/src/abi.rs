//! Solidity interface definitions for the vault and the ERC-8004 registries.
//!
//! Only the functions the agent actually calls are declared:
//! - [`IPulseVault`]: nonce / balance / domain reads and `executeTransfer`
//! - [`IIdentityRegistry`]: agent NFT ownership
//! - [`IReputationRegistry`]: fallback reputation summary

use alloy_sol_types::sol;

use crate::types;

sol! {
    /// Must stay byte-identical to the vault's `TransferRequest` struct:
    /// its EIP-712 type string is derived from this declaration.
    #[derive(Debug, PartialEq, Eq)]
    struct TransferRequest {
        address recipient;
        uint256 amount;
        uint256 nonce;
        uint256 deadline;
    }

    #[derive(Debug)]
    interface IPulseVault {
        function getNonce(address user) external view returns (uint256 nonce);
        function balanceOf(address user) external view returns (uint256 balance);
        function getDomainSeparator() external view returns (bytes32 separator);
        function getAgentReputation(uint256 agentId) external view returns (uint256 feedbackCount, uint256 averageRating);
        function executeTransfer(TransferRequest request, bytes signature, uint256 agentId) external;
    }

    #[derive(Debug)]
    interface IIdentityRegistry {
        function ownerOf(uint256 agentId) external view returns (address owner);
    }

    #[derive(Debug)]
    interface IReputationRegistry {
        function getSummary(uint256 agentId, address[] clients, bytes32 domain, bytes32 tag) external view returns (uint64 feedbackCount, uint8 averageRating);
    }
}

impl From<&types::TransferRequest> for TransferRequest {
    fn from(request: &types::TransferRequest) -> Self {
        Self {
            recipient: request.recipient,
            amount: request.amount,
            nonce: request.nonce,
            deadline: request.deadline,
        }
    }
}
