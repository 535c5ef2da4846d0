//! In-memory chain used by unit tests.

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::abi::{selector, word_at, PROPOSAL_VOTES_FN, STATE_FN};
use crate::error::TransportError;
use crate::transport::{CallRequest, CallTransport, LogQuery, LogTransport, RawLog};
use crate::types::EventKind;

pub const GOVERNOR: Address = Address::repeat_byte(0xc0);

#[derive(Default)]
struct ChainInner {
    latest: u64,
    down: bool,
    fail_next_logs: u32,
    logs: Vec<RawLog>,
    timestamps: HashMap<u64, u64>,
    states: HashMap<U256, u8>,
    votes: HashMap<U256, (U256, U256, U256)>,
    failing_state: HashSet<U256>,
    failing_votes: HashSet<U256>,
    queries: Vec<LogQuery>,
}

#[derive(Default)]
pub struct MemoryChain {
    inner: Mutex<ChainInner>,
}

impl MemoryChain {
    pub fn new(latest: u64) -> Self {
        let chain = Self::default();
        chain.set_latest(latest);
        chain
    }

    fn with<R>(&self, f: impl FnOnce(&mut ChainInner) -> R) -> R {
        let mut g = self.inner.lock().expect("chain lock");
        f(&mut g)
    }

    pub fn set_latest(&self, n: u64) {
        self.with(|c| c.latest = n);
    }

    pub fn set_down(&self, down: bool) {
        self.with(|c| c.down = down);
    }

    pub fn fail_next_logs(&self, n: u32) {
        self.with(|c| c.fail_next_logs = n);
    }

    pub fn push_log(&self, log: RawLog) {
        self.with(|c| c.logs.push(log));
    }

    pub fn set_timestamp(&self, block: u64, ts: u64) {
        self.with(|c| c.timestamps.insert(block, ts));
    }

    pub fn set_state(&self, id: u64, state: u8) {
        self.with(|c| c.states.insert(U256::from(id), state));
    }

    pub fn set_votes(&self, id: u64, against: U256, for_: U256, abstain: U256) {
        self.with(|c| c.votes.insert(U256::from(id), (against, for_, abstain)));
    }

    pub fn fail_state(&self, id: u64) {
        self.with(|c| c.failing_state.insert(U256::from(id)));
    }

    pub fn fail_votes(&self, id: u64) {
        self.with(|c| c.failing_votes.insert(U256::from(id)));
    }

    pub fn queries(&self) -> Vec<LogQuery> {
        self.with(|c| c.queries.clone())
    }
}

fn down() -> TransportError {
    TransportError::Unavailable("memory chain is down".into())
}

#[async_trait]
impl LogTransport for MemoryChain {
    async fn block_number(&self) -> Result<u64, TransportError> {
        self.with(|c| if c.down { Err(down()) } else { Ok(c.latest) })
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, TransportError> {
        self.with(|c| {
            c.queries.push(query.clone());
            if c.down {
                return Err(down());
            }
            if c.fail_next_logs > 0 {
                c.fail_next_logs -= 1;
                return Err(down());
            }
            let to = query.to_block.unwrap_or(c.latest);
            Ok(c.logs
                .iter()
                .filter(|l| l.address == query.address())
                .filter(|l| l.block_number >= query.from_block && l.block_number <= to)
                .filter(|l| {
                    l.topics
                        .first()
                        .map(|t| query.topics().contains(t))
                        .unwrap_or(false)
                })
                .cloned()
                .collect())
        })
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>, TransportError> {
        self.with(|c| Ok(c.timestamps.get(&block).copied()))
    }
}

#[async_trait]
impl CallTransport for MemoryChain {
    async fn call(&self, req: &CallRequest) -> Result<Bytes, TransportError> {
        let data = req.data.as_ref();
        if data.len() < 4 {
            return Err(TransportError::Malformed("short calldata".into()));
        }
        let id = word_at(&data[4..], 0).unwrap_or_default();
        let sel = &data[..4];
        self.with(|c| {
            if c.down {
                return Err(down());
            }
            if sel == selector(STATE_FN) {
                if c.failing_state.contains(&id) {
                    return Err(TransportError::Rpc {
                        code: -32000,
                        message: "execution reverted".into(),
                    });
                }
                let state = c.states.get(&id).copied().unwrap_or(0);
                Ok(Bytes::from(encode(&[Token::Uint(U256::from(state))])))
            } else if sel == selector(PROPOSAL_VOTES_FN) {
                if c.failing_votes.contains(&id) {
                    return Err(down());
                }
                let (a, f, ab) = c.votes.get(&id).copied().unwrap_or_default();
                Ok(Bytes::from(encode(&[
                    Token::Uint(a),
                    Token::Uint(f),
                    Token::Uint(ab),
                ])))
            } else {
                Err(TransportError::Rpc {
                    code: -32601,
                    message: "unknown selector".into(),
                })
            }
        })
    }
}

fn raw(topics: Vec<H256>, data: Vec<u8>, block: u64, log_index: u64) -> RawLog {
    RawLog {
        address: GOVERNOR,
        block_number: block,
        topics,
        data: Bytes::from(data),
        transaction_hash: H256::from_low_u64_be(block * 1000 + log_index),
        log_index: Some(log_index),
    }
}

pub fn created_log(id: u64, block: u64, log_index: u64, description: &str) -> RawLog {
    let data = encode(&[
        Token::Address(Address::repeat_byte(0x66)),
        Token::Array(vec![Token::Address(Address::repeat_byte(0x01))]),
        Token::Array(vec![Token::Uint(U256::zero())]),
        Token::Array(vec![Token::String("setGasLimit(uint256)".into())]),
        Token::Array(vec![Token::Bytes(vec![0x01])]),
        Token::Uint(U256::from(block + 1)),
        Token::Uint(U256::from(block + 50_000)),
        Token::String(description.into()),
    ]);
    raw(
        vec![EventKind::ProposalCreated.topic(), H256::from_low_u64_be(id)],
        data,
        block,
        log_index,
    )
}

pub fn executed_log(id: u64, block: u64, log_index: u64) -> RawLog {
    raw(
        vec![EventKind::ProposalExecuted.topic(), H256::from_low_u64_be(id)],
        vec![],
        block,
        log_index,
    )
}

/// `n × 10^18`.
pub fn tokens(n: u64) -> U256 {
    U256::from(n) * U256::exp10(18)
}
