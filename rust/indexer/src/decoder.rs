use chrono::Utc;
use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Bytes, H256, U256};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::abi::{addr_from_topic, decode_string, topic_u256, u64_from, word_at};
use crate::error::DecodeError;
use crate::transport::RawLog;
use crate::types::{CreatedProposal, EventKind, EventPayload, GovernanceEvent, VoteSupport};

/// Decode one governor log. Unknown or malformed logs yield `None`.
pub fn decode_log(log: &RawLog) -> Option<GovernanceEvent> {
    classify(log).ok()
}

pub fn classify(log: &RawLog) -> Result<GovernanceEvent, DecodeError> {
    let t0 = log.topics.first().ok_or(DecodeError::MissingTopic)?;
    let kind = EventKind::from_topic(t0).ok_or(DecodeError::UnknownTopic)?;
    let data = log.data.as_ref();

    let (proposal_id, payload) = match kind {
        EventKind::ProposalCreated => {
            let created = decode_created(&log.topics, data)?;
            (created.proposal_id, EventPayload::Created(created))
        }
        EventKind::ProposalQueued => {
            let (id, rest) = leading_id(&log.topics, data)?;
            (id, EventPayload::Queued { eta: word_at(data, rest) })
        }
        EventKind::ProposalExecuted => {
            let (id, _) = leading_id(&log.topics, data)?;
            (id, EventPayload::Executed)
        }
        EventKind::VoteCast => decode_vote(&log.topics, data)?,
    };

    Ok(GovernanceEvent {
        kind,
        proposal_id,
        block_number: log.block_number,
        log_index: log.log_index,
        transaction_hash: log.transaction_hash,
        timestamp: Utc::now(),
        block_time: None,
        payload,
    })
}

/// Id from topic1 when indexed, else data word 0. Also returns the data slot
/// where the remaining fields start.
fn leading_id(topics: &[H256], data: &[u8]) -> Result<(U256, usize), DecodeError> {
    if let Some(t) = topics.get(1) {
        return Ok((topic_u256(t), 0));
    }
    word_at(data, 0)
        .map(|id| (id, 1))
        .ok_or_else(|| DecodeError::Malformed("missing proposal id".into()))
}

fn created_params() -> [ParamType; 9] {
    [
        ParamType::Uint(256),
        ParamType::Address,
        ParamType::Array(Box::new(ParamType::Address)),
        ParamType::Array(Box::new(ParamType::Uint(256))),
        ParamType::Array(Box::new(ParamType::String)),
        ParamType::Array(Box::new(ParamType::Bytes)),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::String,
    ]
}

fn decode_created(topics: &[H256], data: &[u8]) -> Result<CreatedProposal, DecodeError> {
    // id and proposer may be indexed, everything else is in data
    let indexed = topics.len().saturating_sub(1).min(2);
    let mut tokens: Vec<Token> = Vec::with_capacity(9);
    if let Some(t) = topics.get(1) {
        tokens.push(Token::Uint(topic_u256(t)));
    }
    if indexed == 2 {
        tokens.push(Token::Address(addr_from_topic(&topics[2])));
    }

    let params = created_params();
    match decode(&params[indexed..], data) {
        Ok(rest) => {
            tokens.extend(rest);
            if let Some(created) = created_from_tokens(tokens.clone()) {
                return Ok(created);
            }
        }
        Err(e) => debug!(error = %e, "ProposalCreated data did not decode"),
    }

    // keep the event with default fields as long as the id is known
    let proposal_id = match tokens.first() {
        Some(Token::Uint(id)) => *id,
        _ => word_at(data, 0)
            .ok_or_else(|| DecodeError::Malformed("ProposalCreated without id".into()))?,
    };
    let proposer = match tokens.get(1) {
        Some(Token::Address(a)) => *a,
        _ => Default::default(),
    };
    Ok(CreatedProposal {
        proposal_id,
        proposer,
        ..CreatedProposal::default()
    })
}

fn created_from_tokens(tokens: Vec<Token>) -> Option<CreatedProposal> {
    let mut it = tokens.into_iter();
    let proposal_id = it.next()?.into_uint()?;
    let proposer = it.next()?.into_address()?;
    let mut targets = it
        .next()?
        .into_array()?
        .into_iter()
        .map(Token::into_address)
        .collect::<Option<Vec<_>>>()?;
    let mut values = it
        .next()?
        .into_array()?
        .into_iter()
        .map(Token::into_uint)
        .collect::<Option<Vec<_>>>()?;
    let mut signatures = it
        .next()?
        .into_array()?
        .into_iter()
        .map(Token::into_string)
        .collect::<Option<Vec<_>>>()?;
    let mut calldatas: Vec<Bytes> = it
        .next()?
        .into_array()?
        .into_iter()
        .map(|t| t.into_bytes().map(Into::into))
        .collect::<Option<Vec<_>>>()?;
    let start_block = u64_from(it.next()?.into_uint()?)?;
    let end_block = u64_from(it.next()?.into_uint()?)?;
    let description = it.next()?.into_string()?;

    let n = targets.len();
    if values.len() != n || signatures.len() != n || calldatas.len() != n {
        debug!(%proposal_id, "action arrays differ in length, dropping them");
        targets.clear();
        values.clear();
        signatures.clear();
        calldatas.clear();
    }

    Some(CreatedProposal {
        proposal_id,
        proposer,
        targets,
        values,
        signatures,
        calldatas,
        start_block,
        end_block,
        description,
    })
}

fn decode_vote(topics: &[H256], data: &[u8]) -> Result<(U256, EventPayload), DecodeError> {
    let voter = topics
        .get(1)
        .map(addr_from_topic)
        .ok_or_else(|| DecodeError::Malformed("VoteCast without voter".into()))?;
    // data: [id,] support, votes, reason
    let (proposal_id, base) = match topics.get(2) {
        Some(t) => (topic_u256(t), 0),
        None => (
            word_at(data, 0)
                .ok_or_else(|| DecodeError::Malformed("VoteCast without id".into()))?,
            1,
        ),
    };
    let support = word_at(data, base)
        .and_then(u64_from)
        .and_then(|v| u8::try_from(v).ok())
        .and_then(|v| VoteSupport::try_from(v).ok());
    Ok((
        proposal_id,
        EventPayload::VoteCast {
            voter,
            support,
            votes: word_at(data, base + 1),
            reason: decode_string(data, base + 2),
        },
    ))
}

/// Snapshot of decoder counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub decoded: u64,
    pub unknown: u64,
    pub malformed: u64,
}

#[derive(Debug, Default)]
pub struct DecodeCounters {
    decoded: AtomicU64,
    unknown: AtomicU64,
    malformed: AtomicU64,
}

impl DecodeCounters {
    pub fn snapshot(&self) -> DecodeStats {
        DecodeStats {
            decoded: self.decoded.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Stateful wrapper that counts what it drops.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    counters: Arc<DecodeCounters>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> Arc<DecodeCounters> {
        self.counters.clone()
    }

    pub fn decode(&self, log: &RawLog) -> Option<GovernanceEvent> {
        match classify(log) {
            Ok(ev) => {
                self.counters.decoded.fetch_add(1, Ordering::Relaxed);
                Some(ev)
            }
            Err(DecodeError::UnknownTopic) | Err(DecodeError::MissingTopic) => {
                self.counters.unknown.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                debug!(block = log.block_number, tx = ?log.transaction_hash, error = %e, "dropping log");
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}
