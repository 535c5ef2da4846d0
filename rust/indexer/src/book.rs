use chrono::{DateTime, Utc};
use ethers::types::U256;
use std::collections::HashMap;

use crate::types::{CreatedProposal, ProposalRecord, ProposalState, VoteTally};

/// In-memory proposal store keyed by id. Every write is an upsert.
#[derive(Debug, Default)]
pub struct ProposalBook {
    records: HashMap<U256, ProposalRecord>,
}

impl ProposalBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &U256) -> Option<&ProposalRecord> {
        self.records.get(id)
    }

    /// Creation fields are immutable once seen. A record that only exists
    /// because of an earlier state read gets them filled in.
    pub fn observe_created(
        &mut self,
        created: CreatedProposal,
        created_block: u64,
        created_at: DateTime<Utc>,
    ) {
        match self.records.get_mut(&created.proposal_id) {
            Some(rec) if rec.created_block.is_some() => {}
            Some(rec) => {
                let mut fresh =
                    ProposalRecord::from_created(created, Some(created_block), created_at);
                fresh.state = rec.state;
                fresh.for_votes = rec.for_votes;
                fresh.against_votes = rec.against_votes;
                fresh.abstain_votes = rec.abstain_votes;
                fresh.updated_at = rec.updated_at;
                *rec = fresh;
            }
            None => {
                let id = created.proposal_id;
                self.records.insert(
                    id,
                    ProposalRecord::from_created(created, Some(created_block), created_at),
                );
            }
        }
    }

    /// Overwrite state and tallies with a point-in-time read.
    pub fn apply_snapshot(
        &mut self,
        id: U256,
        state: ProposalState,
        tally: VoteTally,
        now: DateTime<Utc>,
    ) -> ProposalRecord {
        let rec = self
            .records
            .entry(id)
            .or_insert_with(|| ProposalRecord::bare(id, now));
        rec.state = state;
        rec.for_votes = tally.for_votes;
        rec.against_votes = tally.against_votes;
        rec.abstain_votes = tally.abstain_votes;
        rec.updated_at = now;
        rec.clone()
    }

    /// Orders `ids` most recent first: creation block descending, then id
    /// descending. Ids without a known creation block sort last.
    pub fn order_ids(&self, ids: &mut [U256]) {
        ids.sort_by(|a, b| {
            let ka = (self.records.get(a).and_then(|r| r.created_block), *a);
            let kb = (self.records.get(b).and_then(|r| r.created_block), *b);
            kb.cmp(&ka)
        });
    }
}
