//! Governance actions, calldata recognition and the decision-agent contract.
//!
//! Signing is delegated: [`TransactionSigner`] is the only way a transaction
//! leaves this crate. [`dispatch`] records every attempt on an [`ActionSink`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::abi::{call_data, selector, word_at, CAST_VOTE_FN, EXECUTE_FN, PROPOSE_FN, QUEUE_FN};
use crate::error::{ActionError, TransportError};
use crate::transport::JsonRpcClient;
use crate::types::{dec, ProposalRecord, ProposalState, VoteSupport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Vote,
    Queue,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(with = "dec")]
    pub proposal_id: U256,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: Option<H256>,
    pub status: ActionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub proposal_id: U256,
    /// Required for `Vote`.
    pub support: Option<VoteSupport>,
}

impl ActionRequest {
    pub fn vote(proposal_id: U256, support: VoteSupport) -> Self {
        Self {
            kind: ActionKind::Vote,
            proposal_id,
            support: Some(support),
        }
    }

    pub fn queue(proposal_id: U256) -> Self {
        Self {
            kind: ActionKind::Queue,
            proposal_id,
            support: None,
        }
    }

    pub fn execute(proposal_id: U256) -> Self {
        Self {
            kind: ActionKind::Execute,
            proposal_id,
            support: None,
        }
    }

    pub fn calldata(&self) -> Result<Bytes, ActionError> {
        let id = Token::Uint(self.proposal_id);
        Ok(match self.kind {
            ActionKind::Vote => {
                let support = self.support.ok_or(ActionError::MissingSupport)?;
                call_data(CAST_VOTE_FN, &[id, Token::Uint(U256::from(support as u8))])
            }
            ActionKind::Queue => call_data(QUEUE_FN, &[id]),
            ActionKind::Execute => call_data(EXECUTE_FN, &[id]),
        })
    }
}

/// Delegated signer. Returns the hash of the submitted transaction.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<H256, TransportError>;
}

/// Signs through an account held by the RPC endpoint (a node wallet or an
/// external signer speaking JSON-RPC).
#[derive(Debug, Clone)]
pub struct NodeSigner {
    client: JsonRpcClient,
    from: Address,
}

impl NodeSigner {
    pub fn new(client: JsonRpcClient, from: Address) -> Self {
        Self { client, from }
    }

    pub fn address(&self) -> Address {
        self.from
    }
}

#[async_trait]
impl TransactionSigner for NodeSigner {
    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<H256, TransportError> {
        self.client.send_transaction(self.from, to, data).await
    }
}

#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn record(&self, action: &GovernanceAction);
}

/// Sink that only emits a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl ActionSink for TracingSink {
    async fn record(&self, action: &GovernanceAction) {
        info!(
            kind = ?action.kind,
            proposal_id = %action.proposal_id,
            status = ?action.status,
            tx = ?action.tx_hash,
            "governance action"
        );
    }
}

/// Builds calldata, submits it through `signer` and records the outcome.
pub async fn dispatch(
    signer: &dyn TransactionSigner,
    sink: &dyn ActionSink,
    governor: Address,
    req: ActionRequest,
) -> Result<GovernanceAction, ActionError> {
    let data = req.calldata()?;
    let mut action = GovernanceAction {
        kind: req.kind,
        proposal_id: req.proposal_id,
        timestamp: Utc::now(),
        tx_hash: None,
        status: ActionStatus::Pending,
    };
    sink.record(&action).await;

    match signer.send_transaction(governor, data).await {
        Ok(hash) => {
            action.tx_hash = Some(hash);
            action.status = ActionStatus::Success;
            sink.record(&action).await;
            Ok(action)
        }
        Err(e) => {
            warn!(proposal_id = %req.proposal_id, error = %e, "signer rejected action");
            action.status = ActionStatus::Failed;
            sink.record(&action).await;
            Err(ActionError::Signer(e))
        }
    }
}

/// A governor call recognised in transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedCall {
    CastVote {
        proposal_id: U256,
        support: Option<VoteSupport>,
    },
    Queue {
        proposal_id: U256,
    },
    Execute {
        proposal_id: U256,
    },
    Propose {
        description: Option<String>,
    },
}

pub fn decode_call(input: &[u8]) -> Option<DecodedCall> {
    if input.len() < 4 {
        return None;
    }
    let (sel, args) = input.split_at(4);
    if sel == selector(CAST_VOTE_FN) {
        let support = word_at(args, 1)
            .filter(|w| w.bits() <= 8)
            .and_then(|w| VoteSupport::try_from(w.low_u32() as u8).ok());
        Some(DecodedCall::CastVote {
            proposal_id: word_at(args, 0)?,
            support,
        })
    } else if sel == selector(QUEUE_FN) {
        Some(DecodedCall::Queue {
            proposal_id: word_at(args, 0)?,
        })
    } else if sel == selector(EXECUTE_FN) {
        Some(DecodedCall::Execute {
            proposal_id: word_at(args, 0)?,
        })
    } else if sel == selector(PROPOSE_FN) {
        let params = [
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Array(Box::new(ParamType::Uint(256))),
            ParamType::Array(Box::new(ParamType::String)),
            ParamType::Array(Box::new(ParamType::Bytes)),
            ParamType::String,
        ];
        let description = decode(&params, args)
            .ok()
            .and_then(|t| t.into_iter().nth(4))
            .and_then(Token::into_string);
        Some(DecodedCall::Propose { description })
    } else {
        None
    }
}

/// One-line summary of a transaction's input, for activity listings.
pub fn describe_call(input: &[u8]) -> String {
    match decode_call(input) {
        Some(DecodedCall::CastVote {
            proposal_id,
            support,
        }) => {
            let side = match support {
                Some(VoteSupport::For) => "FOR",
                Some(VoteSupport::Against) => "AGAINST",
                Some(VoteSupport::Abstain) => "ABSTAIN",
                None => "UNKNOWN",
            };
            format!("Voted {side} on proposal {proposal_id}")
        }
        Some(DecodedCall::Queue { proposal_id }) => {
            format!("Queued proposal {proposal_id} for execution")
        }
        Some(DecodedCall::Execute { proposal_id }) => format!("Executed proposal {proposal_id}"),
        Some(DecodedCall::Propose { .. }) => "Created new proposal".to_string(),
        None => "Contract interaction".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    VoteFor,
    VoteAgainst,
    Abstain,
    Queue,
    Execute,
    Monitor,
}

impl AgentAction {
    /// The transaction this decision asks for, if any.
    pub fn to_request(self, proposal_id: U256) -> Option<ActionRequest> {
        match self {
            AgentAction::VoteFor => Some(ActionRequest::vote(proposal_id, VoteSupport::For)),
            AgentAction::VoteAgainst => {
                Some(ActionRequest::vote(proposal_id, VoteSupport::Against))
            }
            AgentAction::Abstain => Some(ActionRequest::vote(proposal_id, VoteSupport::Abstain)),
            AgentAction::Queue => Some(ActionRequest::queue(proposal_id)),
            AgentAction::Execute => Some(ActionRequest::execute(proposal_id)),
            AgentAction::Monitor => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: AgentAction,
    pub reasoning: String,
}

/// External reasoning service contract.
#[async_trait]
pub trait DecisionAgent: Send + Sync {
    async fn decide(&self, proposal: &ProposalRecord) -> Decision;
}

/// Deterministic local agent keyed on proposal state.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleAgent;

impl RuleAgent {
    pub fn decide_state(state: ProposalState) -> Decision {
        let (action, reasoning) = match state {
            ProposalState::Succeeded => (
                AgentAction::Queue,
                "Proposal succeeded and should be queued for execution",
            ),
            ProposalState::Queued => (
                AgentAction::Execute,
                "Proposal is queued and timelock has passed",
            ),
            ProposalState::Active => (
                AgentAction::VoteFor,
                "Proposal is active and requires voting",
            ),
            _ => (AgentAction::Monitor, "Monitoring proposal progress"),
        };
        Decision {
            action,
            reasoning: reasoning.to_string(),
        }
    }
}

#[async_trait]
impl DecisionAgent for RuleAgent {
    async fn decide(&self, proposal: &ProposalRecord) -> Decision {
        Self::decide_state(proposal.state)
    }
}
