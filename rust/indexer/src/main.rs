use anyhow::Context;
use ethers::types::Address;
use gov_common::GovEnv;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use governance_indexer::actions::{NodeSigner, RuleAgent, TracingSink, TransactionSigner};
use governance_indexer::api::{router, AppState};
use governance_indexer::feed::{forward_events, RecentEvents};
use governance_indexer::{cancel_pair, JsonRpcClient, Poller, PollerConfig, Reconciler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = GovEnv::from_env().validate().context("invalid configuration")?;
    let governor = Address::from(cfg.governor_address);
    let timeout = Duration::from_secs(cfg.rpc_timeout_secs);
    let client = Arc::new(JsonRpcClient::new(cfg.rpc_http.clone(), timeout)?);
    let signer: Option<Arc<dyn TransactionSigner>> = match cfg.agent_address {
        Some(agent) => {
            let node = NodeSigner::new(
                JsonRpcClient::new(cfg.signer_rpc.clone(), timeout)?,
                Address::from(agent),
            );
            info!(agent = ?node.address(), "governance actions enabled");
            Some(Arc::new(node))
        }
        None => {
            info!("AGENT_ADDRESS unset, governance actions disabled");
            None
        }
    };

    let reconciler = Arc::new(Reconciler::new(
        client.clone(),
        client.clone(),
        governor,
        cfg.lookback_blocks,
    ));
    let feed = Arc::new(RecentEvents::new(cfg.recent_events_cap));

    let mut poll_cfg = PollerConfig::new(governor, Duration::from_secs(cfg.poll_interval_secs));
    poll_cfg.start_block = cfg.start_block;
    poll_cfg.max_block_span = cfg.max_block_span;
    let mut poller = Poller::new(client.clone(), poll_cfg);
    let counters = poller.decoder_counters();

    let (cancel, signal) = cancel_pair();
    let (tx, rx) = mpsc::channel(256);
    let poll_task = tokio::spawn(async move { poller.run(signal, tx).await });
    let consumer = tokio::spawn(forward_events(rx, reconciler.clone(), feed.clone()));

    let app = router(AppState {
        reconciler,
        feed,
        counters,
        agent: Arc::new(RuleAgent),
        signer,
        sink: Arc::new(TracingSink),
    });

    let addr: SocketAddr = cfg.bind.parse().context("invalid BIND")?;
    info!(%addr, rpc = %client.url(), governor = ?governor, "governance_indexer listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl_c handler failed");
            }
        })
        .await?;

    info!("shutting down");
    cancel.cancel();
    poll_task.await?;
    consumer.await?;
    Ok(())
}
