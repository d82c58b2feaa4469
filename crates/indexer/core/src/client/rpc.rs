use super::{
    ChainClient, ClientError, ReceiptInfo, TransactionInfo,
    contracts::Home,
    metrics::Metrics,
};
use crate::rate_limiter::{RateBudget, RpcMethod, RpcRateLimiter};
use alloy_network::{Ethereum, TransactionResponse};
use alloy_primitives::{Address, B256, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types_eth::{BlockNumberOrTag, Filter, Log, TransactionInput, TransactionRequest};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use nomad_indexer_types::{Domain, DomainId};
use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug)]
struct Endpoint {
    url: Url,
    provider: RootProvider<Ethereum>,
}

/// [`ChainClient`] over JSON-RPC HTTP endpoints.
///
/// Requests go to the active endpoint. A transport failure moves the client on to the next
/// configured endpoint, wrapping around, so the caller's next retry hits a different node.
#[derive(Debug)]
pub struct RpcChainClient {
    domain: DomainId,
    endpoints: Vec<Endpoint>,
    active: AtomicUsize,
    limiter: RpcRateLimiter,
}

impl RpcChainClient {
    /// Connects to the endpoints of `domain`, in the order they are configured.
    ///
    /// The rate budget is taken from the domain override if present, otherwise derived from the
    /// first endpoint's provider.
    pub fn new(domain: &Domain) -> Result<Self, ClientError> {
        let first = domain.rpcs.first().ok_or(ClientError::NoEndpoints)?;
        let budget = domain
            .rate_limit
            .map(RateBudget::from)
            .unwrap_or_else(|| RateBudget::for_endpoint(&domain.name, first));

        let endpoints = domain
            .rpcs
            .iter()
            .map(|raw| {
                let url = Url::parse(raw)?;
                Ok(Endpoint { provider: RootProvider::new_http(url.clone()), url })
            })
            .collect::<Result<Vec<_>, ClientError>>()?;

        Metrics::init(domain.id);
        debug!(
            target: "indexer::rpc",
            domain = domain.id,
            endpoints = endpoints.len(),
            units = budget.units,
            "Created chain client"
        );

        Ok(Self {
            domain: domain.id,
            endpoints,
            active: AtomicUsize::new(0),
            limiter: RpcRateLimiter::new(budget),
        })
    }

    /// URL requests are currently sent to.
    pub fn active_url(&self) -> &Url {
        &self.endpoints[self.active_index()].url
    }

    fn active_index(&self) -> usize {
        self.active.load(Ordering::Relaxed) % self.endpoints.len()
    }

    fn rotate(&self, failed: usize, err: &ClientError) {
        if self.endpoints.len() < 2 || !err.is_transport() {
            return;
        }
        let next = (failed + 1) % self.endpoints.len();
        // Concurrent failures on the same endpoint must only advance once.
        if self
            .active
            .compare_exchange(failed, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            metrics::counter!(Metrics::RPC_FALLBACK_TOTAL, "domain" => self.domain.to_string())
                .increment(1);
            warn!(
                target: "indexer::rpc",
                domain = self.domain,
                from = %self.endpoints[failed].url,
                to = %self.endpoints[next].url,
                %err,
                "Switching rpc endpoint"
            );
        }
    }

    async fn request<T, F, Fut>(&self, method: RpcMethod, op: F) -> Result<T, ClientError>
    where
        F: FnOnce(RootProvider<Ethereum>) -> Fut + Send,
        Fut: Future<Output = Result<T, ClientError>> + Send,
        T: Send,
    {
        self.limiter.acquire(method).await;

        let index = self.active_index();
        let provider = self.endpoints[index].provider.clone();
        let result = nomad_indexer_storage::observe_metrics_for_result_async!(
            Metrics::RPC_REQUESTS_SUCCESS_TOTAL,
            Metrics::RPC_REQUESTS_ERROR_TOTAL,
            Metrics::RPC_REQUEST_DURATION_SECONDS,
            method.as_str(),
            op(provider),
            "domain" => self.domain.to_string()
        );

        if let Err(err) = &result {
            self.rotate(index, err);
        }
        result
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn block_number(&self) -> Result<u64, ClientError> {
        self.request(RpcMethod::BlockNumber, |provider| async move {
            Ok(provider.get_block_number().await?)
        })
        .await
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ClientError> {
        let filter = filter.clone();
        self.request(RpcMethod::Logs, |provider| async move {
            Ok(provider.get_logs(&filter).await?)
        })
        .await
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, ClientError> {
        self.request(RpcMethod::Block, |provider| async move {
            let block = provider
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .await?
                .ok_or(ClientError::MissingBlock(number))?;
            Ok(block.header.timestamp)
        })
        .await
    }

    async fn transaction(&self, hash: B256) -> Result<TransactionInfo, ClientError> {
        self.request(RpcMethod::Transaction, |provider| async move {
            let tx = provider
                .get_transaction_by_hash(hash)
                .await?
                .ok_or(ClientError::MissingTransaction(hash))?;
            Ok(TransactionInfo { from: tx.from(), block_number: tx.block_number() })
        })
        .await
    }

    async fn receipt(&self, hash: B256) -> Result<ReceiptInfo, ClientError> {
        self.request(RpcMethod::Receipt, |provider| async move {
            let receipt = provider
                .get_transaction_receipt(hash)
                .await?
                .ok_or(ClientError::MissingReceipt(hash))?;
            Ok(ReceiptInfo {
                from: receipt.from,
                gas_used: U256::from(receipt.gas_used),
                block_number: receipt.block_number,
            })
        })
        .await
    }

    async fn home_state(&self, home: Address) -> Result<u8, ClientError> {
        let input = TransactionInput::new(Home::stateCall {}.abi_encode().into());
        let request = TransactionRequest::default().to(home).input(input);
        self.request(RpcMethod::Call, |provider| async move {
            let output = provider.call(request).await?;
            Ok(Home::stateCall::abi_decode_returns(&output)?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use std::collections::BTreeMap;

    fn domain(rpcs: &[&str]) -> Domain {
        Domain {
            id: 1000,
            name: "ethereum".to_string(),
            rpcs: rpcs.iter().map(|s| s.to_string()).collect(),
            deploy_height: 0,
            home: Address::ZERO,
            replicas: BTreeMap::new(),
            bridge_router: None,
            optimistic_seconds: 1800,
            batch_size: None,
            rate_limit: None,
        }
    }

    #[test]
    fn test_requires_an_endpoint() {
        assert_eq!(RpcChainClient::new(&domain(&[])).unwrap_err(), ClientError::NoEndpoints);
    }

    #[test]
    fn test_rejects_invalid_url() {
        let err = RpcChainClient::new(&domain(&["not a url"])).unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_rotates_on_transport_failure() {
        // Nothing listens on these ports.
        let client =
            RpcChainClient::new(&domain(&["http://127.0.0.1:1", "http://127.0.0.1:2"])).unwrap();
        assert_eq!(client.active_url().as_str(), "http://127.0.0.1:1/");

        assert!(client.block_number().await.is_err());
        assert_eq!(client.active_url().as_str(), "http://127.0.0.1:2/");

        assert!(client.block_number().await.is_err());
        assert_eq!(client.active_url().as_str(), "http://127.0.0.1:1/");
    }

    #[test]
    fn test_non_transport_errors_keep_endpoint() {
        let client =
            RpcChainClient::new(&domain(&["http://127.0.0.1:1", "http://127.0.0.1:2"])).unwrap();
        client.rotate(0, &ClientError::MissingBlock(5));
        assert_eq!(client.active_index(), 0);
    }
}
