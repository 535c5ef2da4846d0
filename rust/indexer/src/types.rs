use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::abi::{
    k256, PROPOSAL_CREATED_SIG, PROPOSAL_EXECUTED_SIG, PROPOSAL_QUEUED_SIG, VOTE_CAST_SIG,
};

/// Governor proposal lifecycle, numbered as `state(uint256)` returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalState {
    Pending = 0,
    Active = 1,
    Canceled = 2,
    Defeated = 3,
    Succeeded = 4,
    Queued = 5,
    Expired = 6,
    Executed = 7,
}

impl ProposalState {
    pub fn name(self) -> &'static str {
        match self {
            ProposalState::Pending => "Pending",
            ProposalState::Active => "Active",
            ProposalState::Canceled => "Canceled",
            ProposalState::Defeated => "Defeated",
            ProposalState::Succeeded => "Succeeded",
            ProposalState::Queued => "Queued",
            ProposalState::Expired => "Expired",
            ProposalState::Executed => "Executed",
        }
    }
}

impl TryFrom<u8> for ProposalState {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        Ok(match v {
            0 => ProposalState::Pending,
            1 => ProposalState::Active,
            2 => ProposalState::Canceled,
            3 => ProposalState::Defeated,
            4 => ProposalState::Succeeded,
            5 => ProposalState::Queued,
            6 => ProposalState::Expired,
            7 => ProposalState::Executed,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ProposalCreated,
    ProposalQueued,
    ProposalExecuted,
    VoteCast,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::ProposalCreated,
        EventKind::ProposalQueued,
        EventKind::ProposalExecuted,
        EventKind::VoteCast,
    ];

    pub fn signature(self) -> &'static str {
        match self {
            EventKind::ProposalCreated => PROPOSAL_CREATED_SIG,
            EventKind::ProposalQueued => PROPOSAL_QUEUED_SIG,
            EventKind::ProposalExecuted => PROPOSAL_EXECUTED_SIG,
            EventKind::VoteCast => VOTE_CAST_SIG,
        }
    }

    pub fn topic(self) -> H256 {
        known_topics()[self as usize]
    }

    pub fn from_topic(t: &H256) -> Option<Self> {
        known_topics()
            .iter()
            .position(|k| k == t)
            .map(|i| Self::ALL[i])
    }
}

/// Topic hashes indexed like `EventKind::ALL`, hashed once per process.
fn known_topics() -> &'static [H256; 4] {
    static TOPICS: OnceLock<[H256; 4]> = OnceLock::new();
    TOPICS.get_or_init(|| EventKind::ALL.map(|k| k256(k.signature())))
}

/// 0 = against, 1 = for, 2 = abstain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteSupport {
    Against = 0,
    For = 1,
    Abstain = 2,
}

impl TryFrom<u8> for VoteSupport {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(VoteSupport::Against),
            1 => Ok(VoteSupport::For),
            2 => Ok(VoteSupport::Abstain),
            other => Err(other),
        }
    }
}

/// `(against, for, abstain)` as returned by `proposalVotes(uint256)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    #[serde(with = "dec")]
    pub against_votes: U256,
    #[serde(with = "dec")]
    pub for_votes: U256,
    #[serde(with = "dec")]
    pub abstain_votes: U256,
}

/// Creation fields as they appear in a `ProposalCreated` log. Everything but
/// the id may be left at its default when the log data could not be decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedProposal {
    #[serde(with = "dec")]
    pub proposal_id: U256,
    pub proposer: Address,
    pub targets: Vec<Address>,
    #[serde(with = "dec_vec")]
    pub values: Vec<U256>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<Bytes>,
    pub start_block: u64,
    pub end_block: u64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventPayload {
    Created(CreatedProposal),
    Queued {
        #[serde(with = "dec_opt")]
        eta: Option<U256>,
    },
    Executed,
    VoteCast {
        voter: Address,
        support: Option<VoteSupport>,
        #[serde(with = "dec_opt")]
        votes: Option<U256>,
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(with = "dec")]
    pub proposal_id: U256,
    pub block_number: u64,
    pub log_index: Option<u64>,
    pub transaction_hash: H256,
    /// Wall-clock capture time.
    pub timestamp: DateTime<Utc>,
    /// Chain time of `block_number`, when the transport could resolve it.
    pub block_time: Option<DateTime<Utc>>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Live,
    Fixture,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRecord {
    #[serde(with = "dec")]
    pub proposal_id: U256,
    pub proposer: Address,
    pub targets: Vec<Address>,
    #[serde(with = "dec_vec")]
    pub values: Vec<U256>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<Bytes>,
    pub start_block: u64,
    pub end_block: u64,
    pub description: String,
    pub state: ProposalState,
    #[serde(with = "dec")]
    pub for_votes: U256,
    #[serde(with = "dec")]
    pub against_votes: U256,
    #[serde(with = "dec")]
    pub abstain_votes: U256,
    pub created_block: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: RecordSource,
}

impl ProposalRecord {
    /// Record with only an id, used when state is read for an id whose
    /// creation log has not been seen.
    pub fn bare(proposal_id: U256, now: DateTime<Utc>) -> Self {
        Self::from_created(
            CreatedProposal {
                proposal_id,
                ..CreatedProposal::default()
            },
            None,
            now,
        )
    }

    pub fn from_created(
        created: CreatedProposal,
        created_block: Option<u64>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            proposal_id: created.proposal_id,
            proposer: created.proposer,
            targets: created.targets,
            values: created.values,
            signatures: created.signatures,
            calldatas: created.calldatas,
            start_block: created.start_block,
            end_block: created.end_block,
            description: created.description,
            state: ProposalState::Pending,
            for_votes: U256::zero(),
            against_votes: U256::zero(),
            abstain_votes: U256::zero(),
            created_block,
            created_at,
            updated_at: created_at,
            source: RecordSource::Live,
        }
    }
}

/// Result of `get_recent_proposals`. Fixture output never masquerades as live data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalBatch {
    Live(Vec<ProposalRecord>),
    Fallback {
        records: Vec<ProposalRecord>,
        reason: String,
    },
}

impl ProposalBatch {
    pub fn records(&self) -> &[ProposalRecord] {
        match self {
            ProposalBatch::Live(records) => records.as_slice(),
            ProposalBatch::Fallback { records, .. } => records.as_slice(),
        }
    }

    pub fn into_records(self) -> Vec<ProposalRecord> {
        match self {
            ProposalBatch::Live(records) => records,
            ProposalBatch::Fallback { records, .. } => records,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ProposalBatch::Fallback { .. })
    }

    pub fn source(&self) -> RecordSource {
        if self.is_fallback() {
            RecordSource::Fixture
        } else {
            RecordSource::Live
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProposalBatch::Live(_) => None,
            ProposalBatch::Fallback { reason, .. } => Some(reason),
        }
    }
}

// 256-bit values travel as decimal strings.
pub(crate) mod dec {
    use ethers::types::U256;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }
}

pub(crate) mod dec_opt {
    use ethers::types::U256;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(v: &Option<U256>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(v) => s.serialize_some(&v.to_string()),
            None => s.serialize_none(),
        }
    }
}

pub(crate) mod dec_vec {
    use ethers::types::U256;
    use serde::ser::{SerializeSeq, Serializer};

    pub fn serialize<S: Serializer>(v: &[U256], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(v.len()))?;
        for x in v {
            seq.serialize_element(&x.to_string())?;
        }
        seq.end()
    }
}
