//! Governor event indexer: polls a Compound-style Governor's logs, decodes
//! them and keeps a reconciled view of every proposal.

pub mod abi;
pub mod actions;
pub mod api;
pub mod book;
pub mod decoder;
pub mod error;
pub mod feed;
pub mod format;
pub mod reconciler;
pub mod scheduler;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ActionError, DecodeError, TransportError};
pub use reconciler::Reconciler;
pub use scheduler::{cancel_pair, CancelHandle, CancelSignal, Poller, PollerConfig, PollerState};
pub use transport::{CallRequest, CallTransport, JsonRpcClient, LogQuery, LogTransport, RawLog};
pub use types::{GovernanceEvent, ProposalBatch, ProposalRecord, ProposalState, RecordSource};
