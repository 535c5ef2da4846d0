use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::reconciler::Reconciler;
use crate::types::GovernanceEvent;

/// Bounded buffer of the most recently delivered events.
#[derive(Debug)]
pub struct RecentEvents {
    cap: usize,
    inner: RwLock<VecDeque<GovernanceEvent>>,
}

impl RecentEvents {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            inner: RwLock::new(VecDeque::with_capacity(cap)),
        }
    }

    pub async fn push(&self, ev: GovernanceEvent) {
        let mut q = self.inner.write().await;
        if q.len() == self.cap {
            q.pop_front();
        }
        q.push_back(ev);
    }

    /// Newest first.
    pub async fn latest(&self, limit: usize) -> Vec<GovernanceEvent> {
        self.inner.read().await.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Consumer loop: every event updates the book, refreshes its proposal and
/// lands in the feed. Ends when the poller drops its sender.
pub async fn forward_events(
    mut rx: mpsc::Receiver<GovernanceEvent>,
    reconciler: Arc<Reconciler>,
    feed: Arc<RecentEvents>,
) {
    while let Some(ev) = rx.recv().await {
        reconciler.observe_event(&ev).await;
        let refreshed = reconciler.reconcile(&[ev.proposal_id], 1).await;
        info!(
            kind = ?ev.kind,
            proposal_id = %ev.proposal_id,
            block = ev.block_number,
            state = ?refreshed.first().map(|r| r.state),
            "governance event"
        );
        feed.push(ev).await;
    }
    info!("event channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_log;
    use crate::testing::{created_log, executed_log, MemoryChain, GOVERNOR};
    use crate::types::{EventKind, ProposalState};
    use ethers::types::U256;

    #[tokio::test]
    async fn ring_drops_oldest() {
        let feed = RecentEvents::new(2);
        for block in [1u64, 2, 3] {
            feed.push(decode_log(&executed_log(block, block, 0)).expect("event")).await;
        }
        assert_eq!(feed.len().await, 2);
        let blocks: Vec<u64> = feed.latest(10).await.iter().map(|e| e.block_number).collect();
        assert_eq!(blocks, vec![3, 2]);
        assert_eq!(feed.latest(1).await.len(), 1);
    }

    #[tokio::test]
    async fn forwarded_events_reconcile_their_proposal() {
        let chain = Arc::new(MemoryChain::new(100));
        chain.set_state(5, 7);
        let reconciler = Arc::new(Reconciler::new(chain.clone(), chain.clone(), GOVERNOR, 1_000));
        let feed = Arc::new(RecentEvents::new(10));
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(forward_events(rx, reconciler.clone(), feed.clone()));

        tx.send(decode_log(&created_log(5, 90, 0, "five")).expect("event"))
            .await
            .expect("send");
        tx.send(decode_log(&executed_log(5, 95, 0)).expect("event"))
            .await
            .expect("send");
        drop(tx);
        task.await.expect("consumer");

        let rec = reconciler.record(U256::from(5)).await.expect("record");
        assert_eq!(rec.description, "five");
        assert_eq!(rec.state, ProposalState::Executed);
        let kinds: Vec<EventKind> = feed.latest(10).await.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::ProposalExecuted, EventKind::ProposalCreated]);
    }
}
