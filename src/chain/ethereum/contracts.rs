//! MessageTransmitter contract bindings
//!
//! Alloy-generated bindings for the CCTP MessageTransmitter contract: the
//! `MessageSent` event the listener subscribes to, `receiveMessage` for
//! delivery, and the `usedNonces` mapping consulted before re-broadcasting.

use alloy_sol_types::sol;

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract MessageTransmitter {
        event MessageSent(bytes message);

        function receiveMessage(bytes calldata message, bytes calldata attestation)
            external
            returns (bool success);

        function usedNonces(bytes32 sourceAndNonce) external view returns (uint256);
    }
);
