use super::ClientError;
use alloy_primitives::{Address, B256, U256};
use alloy_rpc_types_eth::{Filter, Log};
use async_trait::async_trait;
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Sender and inclusion block of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    /// Transaction sender.
    pub from: Address,
    /// Block the transaction was included in. `None` while pending.
    pub block_number: Option<u64>,
}

/// The parts of a receipt the indexer keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptInfo {
    /// Transaction sender.
    pub from: Address,
    /// Gas consumed by the transaction.
    pub gas_used: U256,
    /// Block the transaction was included in.
    pub block_number: Option<u64>,
}

/// [`ChainClient`] abstracts the RPC surface of one domain.
///
/// Implementations apply their own rate limiting. Retrying is left to the caller.
#[async_trait]
#[auto_impl(&, Arc)]
pub trait ChainClient: Debug + Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> Result<u64, ClientError>;

    /// Logs matching `filter`.
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError>;

    /// Timestamp of block `number`, in seconds.
    async fn block_timestamp(&self, number: u64) -> Result<u64, ClientError>;

    /// Looks up a transaction by hash.
    ///
    /// # Errors
    /// Returns [`ClientError::MissingTransaction`] if the node does not know it.
    async fn transaction(&self, hash: B256) -> Result<TransactionInfo, ClientError>;

    /// Looks up a transaction receipt by hash.
    ///
    /// # Errors
    /// Returns [`ClientError::MissingReceipt`] if the node does not know it.
    async fn receipt(&self, hash: B256) -> Result<ReceiptInfo, ClientError>;

    /// Calls `state()` on the home contract at `home`.
    async fn home_state(&self, home: Address) -> Result<u8, ClientError>;
}

#[cfg(test)]
mockall::mock! {
    #[derive(Debug)]
    pub Client {}

    #[async_trait]
    impl ChainClient for Client {
        async fn block_number(&self) -> Result<u64, ClientError>;
        async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError>;
        async fn block_timestamp(&self, number: u64) -> Result<u64, ClientError>;
        async fn transaction(&self, hash: B256) -> Result<TransactionInfo, ClientError>;
        async fn receipt(&self, hash: B256) -> Result<ReceiptInfo, ClientError>;
        async fn home_state(&self, home: Address) -> Result<u8, ClientError>;
    }
}
