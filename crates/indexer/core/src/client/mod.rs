//! Access to the chains being indexed.

mod contracts;
pub use contracts::{BridgeRouter, HOME_STATE_ACTIVE, Home, Replica};

mod error;
pub use error::ClientError;

mod metrics;

mod rpc;
pub use rpc::RpcChainClient;

mod traits;
pub use traits::{ChainClient, ReceiptInfo, TransactionInfo};
#[cfg(test)]
pub(crate) use traits::MockClient;
