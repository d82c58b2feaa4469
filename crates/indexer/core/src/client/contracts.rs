//! ABI bindings for the contracts whose logs are indexed.

use alloy_sol_types::sol;

sol! {
    /// Origin-side message tree.
    contract Home {
        event Dispatch(
            bytes32 indexed messageHash,
            uint256 indexed leafIndex,
            uint64 indexed destinationAndNonce,
            bytes32 committedRoot,
            bytes message
        );

        event Update(
            uint32 indexed homeDomain,
            bytes32 indexed oldRoot,
            bytes32 indexed newRoot,
            bytes signature
        );

        function state() external view returns (uint8);
    }

    /// Destination-side mirror of a remote home.
    contract Replica {
        event Update(
            uint32 indexed homeDomain,
            bytes32 indexed oldRoot,
            bytes32 indexed newRoot,
            bytes signature
        );

        event Process(bytes32 indexed messageHash, bool indexed success, bytes indexed returnData);
    }

    /// Token bridge entrypoint.
    contract BridgeRouter {
        event Send(
            address indexed token,
            address indexed from,
            uint32 indexed toDomain,
            bytes32 toId,
            uint256 amount,
            bool fastLiquidityEnabled
        );

        event Receive(
            uint64 indexed originAndNonce,
            address indexed token,
            address indexed recipient,
            address liquidityProvider,
            uint256 amount
        );
    }
}

/// Value of `Home.state()` while the home accepts messages.
pub const HOME_STATE_ACTIVE: u8 = 1;
