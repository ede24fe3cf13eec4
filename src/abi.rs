pub mod erc20 {
    alloy::sol!(
        /// ERC-20 token, only the parts the order state depends on.
        #[derive(Debug, PartialEq, Eq)]
        #[sol(rpc)]
        interface IERC20 {
            event Transfer(address indexed from, address indexed to, uint256 value);
            event Approval(address indexed owner, address indexed spender, uint256 value);

            function balanceOf(address owner) external view returns (uint256);
            function allowance(address owner, address spender) external view returns (uint256);
        }
    );
}

pub mod ether_token {
    alloy::sol!(
        /// Wrapped ether, mints and burns without `Transfer` events.
        #[derive(Debug, PartialEq, Eq)]
        #[sol(rpc)]
        interface IEtherToken {
            event Deposit(address indexed owner, uint256 value);
            event Withdrawal(address indexed owner, uint256 value);
        }
    );
}

#[allow(clippy::too_many_arguments)]
pub mod exchange {
    alloy::sol!(
        #[derive(Debug, PartialEq, Eq)]
        #[sol(rpc)]
        interface IExchange {
            event LogFill(
                address indexed maker,
                address taker,
                address indexed feeRecipient,
                address makerToken,
                address takerToken,
                uint256 filledMakerTokenAmount,
                uint256 filledTakerTokenAmount,
                uint256 paidMakerFee,
                uint256 paidTakerFee,
                bytes32 indexed tokens,
                bytes32 orderHash
            );

            event LogCancel(
                address indexed maker,
                address indexed feeRecipient,
                address makerToken,
                address takerToken,
                uint256 cancelledMakerTokenAmount,
                uint256 cancelledTakerTokenAmount,
                bytes32 indexed tokens,
                bytes32 orderHash
            );

            event LogError(uint8 indexed errorId, bytes32 indexed orderHash);

            function filled(bytes32 orderHash) external view returns (uint256);
            function cancelled(bytes32 orderHash) external view returns (uint256);
        }
    );
}
