//! Polling scheduler: a ticker-driven state machine over the governor's logs.
//!
//! Each tick reads `[watermark, latest]` (optionally capped by a span), decodes
//! the logs in chain order and only then advances the watermark past the range.
//! A failed tick leaves the watermark untouched so the next tick re-reads the
//! same range; delivery is at-least-once.

use chrono::{DateTime, TimeZone, Utc};
use ethers::types::Address;
use futures::{Stream, StreamExt};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::decoder::{DecodeCounters, Decoder};
use crate::error::TransportError;
use crate::transport::{LogQuery, LogTransport, BLOCK_READ_CONCURRENCY};
use crate::types::GovernanceEvent;

/// Owner side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observer side. Dropping every `CancelHandle` also counts as cancellation.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub governor: Address,
    pub interval: Duration,
    /// First block to read. Unset means "start at the current head".
    pub start_block: Option<u64>,
    pub max_block_span: Option<u64>,
}

impl PollerConfig {
    pub fn new(governor: Address, interval: Duration) -> Self {
        Self {
            governor,
            interval,
            start_block: None,
            max_block_span: None,
        }
    }
}

pub struct Poller {
    logs: Arc<dyn LogTransport>,
    cfg: PollerConfig,
    decoder: Decoder,
    /// Next block to read.
    watermark: Option<u64>,
    state: PollerState,
}

impl Poller {
    pub fn new(logs: Arc<dyn LogTransport>, cfg: PollerConfig) -> Self {
        Self {
            logs,
            cfg,
            decoder: Decoder::new(),
            watermark: None,
            state: PollerState::Idle,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    pub fn decoder_counters(&self) -> Arc<DecodeCounters> {
        self.decoder.counters()
    }

    /// One poll: `Idle -> Polling -> Idle`. Events come back sorted by
    /// `(block_number, log_index)`.
    pub async fn tick(&mut self) -> Result<Vec<GovernanceEvent>, TransportError> {
        if self.state == PollerState::Stopped {
            return Ok(Vec::new());
        }
        self.state = PollerState::Polling;
        let res = self.poll_range().await;
        self.state = PollerState::Idle;
        res
    }

    async fn poll_range(&mut self) -> Result<Vec<GovernanceEvent>, TransportError> {
        let latest = self.logs.block_number().await?;
        let from = match self.watermark {
            Some(w) => w,
            None => {
                let w = self.cfg.start_block.unwrap_or(latest);
                info!(watermark = w, latest, "poller watermark initialised");
                self.watermark = Some(w);
                w
            }
        };
        if latest < from {
            debug!(from, latest, "no new blocks");
            return Ok(Vec::new());
        }
        let to = match self.cfg.max_block_span {
            Some(span) => latest.min(from.saturating_add(span.max(1) - 1)),
            None => latest,
        };

        let query = LogQuery::governance(self.cfg.governor, from, Some(to));
        let raw = self.logs.get_logs(&query).await?;
        let mut events: Vec<GovernanceEvent> =
            raw.iter().filter_map(|l| self.decoder.decode(l)).collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        self.attach_block_times(&mut events).await;

        self.watermark = Some(to + 1);
        debug!(from, to, logs = raw.len(), events = events.len(), "poll range done");
        Ok(events)
    }

    async fn attach_block_times(&self, events: &mut [GovernanceEvent]) {
        let blocks: BTreeSet<u64> = events.iter().map(|e| e.block_number).collect();
        let logs = self.logs.clone();
        let reads: Vec<(u64, Result<Option<u64>, TransportError>)> =
            futures::stream::iter(blocks)
                .map(move |b| {
                    let logs = logs.clone();
                    async move { (b, logs.block_timestamp(b).await) }
                })
                .buffer_unordered(BLOCK_READ_CONCURRENCY)
                .collect()
                .await;

        let mut failed = 0usize;
        let mut last_err = None;
        let mut by_block: HashMap<u64, DateTime<Utc>> = HashMap::with_capacity(reads.len());
        for (b, t) in reads {
            match t {
                Ok(Some(ts)) => {
                    if let Some(dt) = i64::try_from(ts)
                        .ok()
                        .and_then(|s| Utc.timestamp_opt(s, 0).single())
                    {
                        by_block.insert(b, dt);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    failed += 1;
                    last_err = Some(e);
                }
            }
        }
        if let Some(e) = last_err {
            warn!(failed, error = %e, "block times unavailable");
        }
        for ev in events.iter_mut() {
            ev.block_time = by_block.get(&ev.block_number).copied();
        }
    }

    /// Ticks until cancelled or until the receiver goes away. Failed ticks are
    /// logged and retried on the next tick.
    pub async fn run(&mut self, mut cancel: CancelSignal, tx: mpsc::Sender<GovernanceEvent>) {
        let mut ticker = self.ticker();
        info!(interval = ?self.cfg.interval, governor = ?self.cfg.governor, "poller started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.tick().await {
                Ok(events) => {
                    for ev in events {
                        if tx.send(ev).await.is_err() {
                            warn!("event receiver dropped, stopping poller");
                            self.state = PollerState::Stopped;
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, watermark = ?self.watermark, "poll failed, will retry")
                }
            }
        }
        self.state = PollerState::Stopped;
        info!(watermark = ?self.watermark, "poller stopped");
    }

    /// Lazy event stream. Events already fetched by the in-flight tick are
    /// still yielded after cancellation, then the stream ends.
    pub fn into_stream(self, cancel: CancelSignal) -> impl Stream<Item = GovernanceEvent> + Send {
        let ticker = self.ticker();
        let st = StreamState {
            poller: self,
            cancel,
            ticker,
            buffer: VecDeque::new(),
        };
        futures::stream::unfold(st, |mut st| async move {
            loop {
                if let Some(ev) = st.buffer.pop_front() {
                    return Some((ev, st));
                }
                if st.cancel.is_cancelled() {
                    st.poller.state = PollerState::Stopped;
                    return None;
                }
                tokio::select! {
                    _ = st.cancel.cancelled() => {
                        st.poller.state = PollerState::Stopped;
                        return None;
                    }
                    _ = st.ticker.tick() => {}
                }
                match st.poller.tick().await {
                    Ok(events) => st.buffer.extend(events),
                    Err(e) => {
                        warn!(error = %e, watermark = ?st.poller.watermark, "poll failed, will retry")
                    }
                }
            }
        })
    }

    fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

struct StreamState {
    poller: Poller,
    cancel: CancelSignal,
    ticker: Interval,
    buffer: VecDeque<GovernanceEvent>,
}
