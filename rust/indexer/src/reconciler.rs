//! Proposal reconciliation: per-id state and tally reads merged into the book.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use ethers::abi::Token;
use ethers::types::{Address, U256};
use futures::future::join_all;
use futures::StreamExt;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::abi::{call_data, u64_from, word_at, PROPOSAL_VOTES_FN, STATE_FN};
use crate::book::ProposalBook;
use crate::decoder::decode_log;
use crate::error::TransportError;
use crate::transport::{
    CallRequest, CallTransport, LogQuery, LogTransport, BLOCK_READ_CONCURRENCY,
};
use crate::types::{
    CreatedProposal, EventKind, EventPayload, GovernanceEvent, ProposalBatch, ProposalRecord, ProposalState,
    RecordSource, VoteTally,
};

pub struct Reconciler {
    logs: Arc<dyn LogTransport>,
    calls: Arc<dyn CallTransport>,
    governor: Address,
    lookback_blocks: u64,
    book: RwLock<ProposalBook>,
}

impl Reconciler {
    pub fn new(
        logs: Arc<dyn LogTransport>,
        calls: Arc<dyn CallTransport>,
        governor: Address,
        lookback_blocks: u64,
    ) -> Self {
        Self {
            logs,
            calls,
            governor,
            lookback_blocks,
            book: RwLock::new(ProposalBook::new()),
        }
    }

    pub fn governor(&self) -> Address {
        self.governor
    }

    pub async fn book_len(&self) -> usize {
        self.book.read().await.len()
    }

    pub async fn record(&self, id: U256) -> Option<ProposalRecord> {
        self.book.read().await.get(&id).cloned()
    }

    /// Refresh state and tallies for `ids`, most recent first, at most `limit`.
    /// A failed read degrades only its own id (`Pending`, zero votes).
    pub async fn reconcile(&self, ids: &[U256], limit: usize) -> Vec<ProposalRecord> {
        let mut seen = HashSet::new();
        let mut ids: Vec<U256> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        self.book.read().await.order_ids(&mut ids);
        ids.truncate(limit);
        if ids.is_empty() {
            return Vec::new();
        }

        let reads = join_all(ids.iter().map(|id| async move {
            let (state, votes) = futures::join!(self.read_state(*id), self.read_votes(*id));
            (*id, state, votes)
        }))
        .await;

        let now = Utc::now();
        let mut book = self.book.write().await;
        reads
            .into_iter()
            .map(|(id, state, votes)| {
                let state = state.unwrap_or_else(|e| {
                    warn!(proposal_id = %id, error = %e, "state read failed, defaulting to Pending");
                    ProposalState::Pending
                });
                let tally = votes.unwrap_or_else(|e| {
                    warn!(proposal_id = %id, error = %e, "votes read failed, defaulting to zero");
                    VoteTally::default()
                });
                book.apply_snapshot(id, state, tally, now)
            })
            .collect()
    }

    /// Latest `limit` proposals created within the lookback window, reconciled.
    /// Falls back to tagged fixtures when the chain cannot be read.
    pub async fn get_recent_proposals(&self, limit: usize) -> ProposalBatch {
        match self.scan_created(limit).await {
            Ok(ids) => ProposalBatch::Live(self.reconcile(&ids, limit).await),
            Err(e) => {
                warn!(error = %e, "proposal scan failed, serving fixtures");
                ProposalBatch::Fallback {
                    records: fixtures(limit, Utc::now()),
                    reason: e.to_string(),
                }
            }
        }
    }

    pub async fn proposal_state(&self, id: U256) -> Result<ProposalState, TransportError> {
        self.read_state(id).await
    }

    /// Records creation fields carried by a streamed event.
    pub async fn observe_event(&self, ev: &GovernanceEvent) {
        if let EventPayload::Created(created) = &ev.payload {
            let created_at = ev.block_time.unwrap_or(ev.timestamp);
            self.book
                .write()
                .await
                .observe_created(created.clone(), ev.block_number, created_at);
        }
    }

    async fn scan_created(&self, limit: usize) -> Result<Vec<U256>, TransportError> {
        let latest = self.logs.block_number().await?;
        let from = latest.saturating_sub(self.lookback_blocks);
        let query =
            LogQuery::for_events(self.governor, &[EventKind::ProposalCreated], from, Some(latest));
        let raw = self.logs.get_logs(&query).await?;

        let mut created: Vec<(u64, Option<u64>, CreatedProposal)> = raw
            .iter()
            .filter_map(decode_log)
            .filter_map(|ev| match ev.payload {
                EventPayload::Created(c) => Some((ev.block_number, ev.log_index, c)),
                _ => None,
            })
            .collect();
        created.sort_by_key(|(block, idx, _)| (*block, *idx));
        let tail = created.split_off(created.len().saturating_sub(limit));
        debug!(
            from,
            latest,
            found = created.len() + tail.len(),
            kept = tail.len(),
            "scanned ProposalCreated logs"
        );

        let blocks: Vec<u64> = tail.iter().map(|(block, _, _)| *block).collect();
        let times: Vec<DateTime<Utc>> = futures::stream::iter(
            blocks.into_iter().map(|block| self.created_at(block, latest)),
        )
        .buffered(BLOCK_READ_CONCURRENCY)
        .collect()
        .await;
        let mut book = self.book.write().await;
        let mut ids = Vec::with_capacity(tail.len());
        for ((block, _, c), at) in tail.into_iter().zip(times) {
            ids.push(c.proposal_id);
            book.observe_created(c, block, at);
        }
        info!(count = ids.len(), "recent proposals discovered");
        Ok(ids)
    }

    /// Block time when the transport has it, else `now - age × average block time`.
    async fn created_at(&self, block: u64, latest: u64) -> DateTime<Utc> {
        match self.logs.block_timestamp(block).await {
            Ok(Some(ts)) => {
                if let Some(t) = i64::try_from(ts)
                    .ok()
                    .and_then(|s| Utc.timestamp_opt(s, 0).single())
                {
                    return t;
                }
            }
            Ok(None) => {}
            Err(e) => debug!(block, error = %e, "block timestamp unavailable"),
        }
        // capped at a century so the subtraction cannot overflow
        let age = latest
            .saturating_sub(block)
            .saturating_mul(gov_common::AVERAGE_BLOCK_SECS)
            .min(3_153_600_000);
        Utc::now() - ChronoDuration::seconds(age as i64)
    }

    async fn read_state(&self, id: U256) -> Result<ProposalState, TransportError> {
        let out = self
            .calls
            .call(&CallRequest {
                to: self.governor,
                data: call_data(STATE_FN, &[Token::Uint(id)]),
            })
            .await?;
        let code = word_at(&out, 0)
            .and_then(u64_from)
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| TransportError::Malformed(format!("state({id}) returned {out}")))?;
        ProposalState::try_from(code)
            .map_err(|c| TransportError::Malformed(format!("unknown proposal state {c}")))
    }

    async fn read_votes(&self, id: U256) -> Result<VoteTally, TransportError> {
        let out = self
            .calls
            .call(&CallRequest {
                to: self.governor,
                data: call_data(PROPOSAL_VOTES_FN, &[Token::Uint(id)]),
            })
            .await?;
        match (word_at(&out, 0), word_at(&out, 1), word_at(&out, 2)) {
            (Some(against_votes), Some(for_votes), Some(abstain_votes)) => Ok(VoteTally {
                against_votes,
                for_votes,
                abstain_votes,
            }),
            _ => Err(TransportError::Malformed(format!(
                "proposalVotes({id}) returned {} bytes",
                out.len()
            ))),
        }
    }
}

fn whole_tokens(n: u64) -> U256 {
    U256::from(n) * U256::exp10(18)
}

fn fixture_address(s: &str) -> Address {
    Address::from_str(s).unwrap_or_default()
}

/// Demo proposals served when the chain is unreachable. Always tagged
/// `RecordSource::Fixture`.
pub fn fixtures(limit: usize, now: DateTime<Utc>) -> Vec<ProposalRecord> {
    let demo = |id: u64,
                proposer: &str,
                start_block: u64,
                end_block: u64,
                description: &str,
                state: ProposalState,
                votes: (u64, u64, u64),
                age_days: i64| {
        let created_at = now - ChronoDuration::days(age_days);
        let mut rec = ProposalRecord::from_created(
            CreatedProposal {
                proposal_id: U256::from(id),
                proposer: fixture_address(proposer),
                start_block,
                end_block,
                description: description.to_string(),
                ..CreatedProposal::default()
            },
            None,
            created_at,
        );
        rec.state = state;
        rec.for_votes = whole_tokens(votes.0);
        rec.against_votes = whole_tokens(votes.1);
        rec.abstain_votes = whole_tokens(votes.2);
        rec.updated_at = now;
        rec.source = RecordSource::Fixture;
        rec
    };
    vec![
        demo(
            123,
            "0x6626593C237f530D15aE9980A95ef938Ac15c35c",
            18_000_000,
            18_050_000,
            "[Demo] Increase block gas limit to 50M",
            ProposalState::Active,
            (1_500_000, 50_000, 10_000),
            2,
        ),
        demo(
            124,
            "0x2B384212EDc04Ae8bB41738D05BA20E33277bf33",
            18_050_000,
            18_100_000,
            "[Demo] Update Compound treasury allocation",
            ProposalState::Succeeded,
            (2_500_000, 80_000, 0),
            5,
        ),
    ]
    .into_iter()
    .take(limit)
    .collect()
}
