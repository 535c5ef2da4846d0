//! Chain transports: filtered log queries and contract view calls.
//!
//! The core only talks to the chain through [`LogTransport`] and
//! [`CallTransport`]. [`JsonRpcClient`] implements both on an ethers
//! `Provider<Http>`; tests swap in in-memory implementations.

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockId, BlockNumber, Bytes, Filter, Log, TransactionRequest, ValueOrArray, H256, U64,
};
use std::time::Duration;
use tracing::debug;

use crate::error::TransportError;
use crate::types::EventKind;

/// A log query. Only constructible for the governor's own event set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    address: Address,
    topics: Vec<H256>,
    pub from_block: u64,
    /// `None` means "latest".
    pub to_block: Option<u64>,
}

impl LogQuery {
    /// All four governance events.
    pub fn governance(address: Address, from_block: u64, to_block: Option<u64>) -> Self {
        Self::for_events(address, &EventKind::ALL, from_block, to_block)
    }

    /// A subset of the governance events. Duplicates are dropped.
    pub fn for_events(
        address: Address,
        kinds: &[EventKind],
        from_block: u64,
        to_block: Option<u64>,
    ) -> Self {
        let mut topics: Vec<H256> = Vec::with_capacity(kinds.len());
        for t in kinds.iter().map(|k| k.topic()) {
            if !topics.contains(&t) {
                topics.push(t);
            }
        }
        Self {
            address,
            topics,
            from_block,
            to_block,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn topics(&self) -> &[H256] {
        &self.topics
    }

    /// `eth_getLogs` filter; topics form one OR-set in position 0.
    pub fn to_filter(&self) -> Filter {
        let to = match self.to_block {
            Some(n) => BlockNumber::Number(U64::from(n)),
            None => BlockNumber::Latest,
        };
        Filter::new()
            .address(self.address)
            .from_block(BlockNumber::Number(U64::from(self.from_block)))
            .to_block(to)
            .topic0(ValueOrArray::Array(self.topics.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub block_number: u64,
    pub topics: Vec<H256>,
    pub data: Bytes,
    pub transaction_hash: H256,
    pub log_index: Option<u64>,
}

impl RawLog {
    /// Pending and removed logs have no place in the chain yet.
    fn from_mined(lg: Log) -> Option<Self> {
        if lg.removed == Some(true) {
            return None;
        }
        Some(Self {
            address: lg.address,
            block_number: lg.block_number?.as_u64(),
            topics: lg.topics,
            data: lg.data,
            transaction_hash: lg.transaction_hash?,
            log_index: lg.log_index.map(|i| i.low_u64()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
}

/// Upper bound on concurrent per-block header reads.
pub const BLOCK_READ_CONCURRENCY: usize = 8;

#[async_trait]
pub trait LogTransport: Send + Sync {
    async fn block_number(&self) -> Result<u64, TransportError>;

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, TransportError>;

    /// Unix seconds of `block`. Transports that cannot answer return `None`.
    async fn block_timestamp(&self, _block: u64) -> Result<Option<u64>, TransportError> {
        Ok(None)
    }
}

#[async_trait]
pub trait CallTransport: Send + Sync {
    async fn call(&self, req: &CallRequest) -> Result<Bytes, TransportError>;
}

#[derive(Clone, Debug)]
pub struct JsonRpcClient {
    url: String,
    provider: Provider<Http>,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let url = url.into();
        let endpoint =
            reqwest::Url::parse(&url).map_err(|e| TransportError::Url(format!("{url}: {e}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let provider = Provider::new(Http::new_with_client(endpoint, http));
        Ok(Self { url, provider })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `eth_sendTransaction` from an account whose key the endpoint holds.
    /// Gas price and limit are filled in by the provider.
    pub async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<H256, TransportError> {
        let tx: TypedTransaction = TransactionRequest::new().from(from).to(to).data(data).into();
        let pending = self.provider.send_transaction(tx, None).await?;
        Ok(pending.tx_hash())
    }
}

#[async_trait]
impl LogTransport for JsonRpcClient {
    async fn block_number(&self) -> Result<u64, TransportError> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, TransportError> {
        let logs = self.provider.get_logs(&query.to_filter()).await?;
        let total = logs.len();
        let out: Vec<RawLog> = logs.into_iter().filter_map(RawLog::from_mined).collect();
        if out.len() < total {
            debug!(skipped = total - out.len(), "skipping pending or removed logs");
        }
        Ok(out)
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>, TransportError> {
        let id = BlockId::Number(BlockNumber::Number(U64::from(block)));
        let header = self.provider.get_block(id).await?;
        Ok(header.map(|b| b.timestamp.low_u64()))
    }
}

#[async_trait]
impl CallTransport for JsonRpcClient {
    async fn call(&self, req: &CallRequest) -> Result<Bytes, TransportError> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(req.to)
            .data(req.data.clone())
            .into();
        Ok(self.provider.call(&tx, None).await?)
    }
}
