use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use ethers::types::U256;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::actions::{
    describe_call, dispatch, ActionRequest, ActionSink, DecisionAgent, TransactionSigner,
};
use crate::error::ActionError;
use crate::decoder::DecodeCounters;
use crate::feed::RecentEvents;
use crate::format::format_votes;
use crate::reconciler::Reconciler;
use crate::types::VoteSupport;

const DEFAULT_PROPOSALS: usize = 10;
const MAX_PROPOSALS: usize = 100;
const DEFAULT_EVENTS: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub feed: Arc<RecentEvents>,
    pub counters: Arc<DecodeCounters>,
    pub agent: Arc<dyn DecisionAgent>,
    /// `None` leaves the action endpoint read-only.
    pub signer: Option<Arc<dyn TransactionSigner>>,
    pub sink: Arc<dyn ActionSink>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"ok": true, "service": "governance_indexer"})) }))
        .route("/governance/proposals", get(proposals))
        .route("/governance/state", get(proposal_state))
        .route("/governance/events/latest", get(events_latest))
        .route("/governance/stats", get(stats))
        .route("/governance/decisions", get(decisions))
        .route("/governance/calls/describe", get(describe))
        .route("/governance/actions", get(actions_info).post(submit_action))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg.into() })))
}

fn parse_proposal_id(raw: &str) -> Result<U256, ApiError> {
    U256::from_dec_str(raw.trim())
        .map_err(|_| bad_request(format!("invalid proposalId {raw:?}")))
}

#[derive(Deserialize)]
struct LimitQ {
    limit: Option<usize>,
}

async fn proposals(State(st): State<AppState>, Query(q): Query<LimitQ>) -> Json<Value> {
    let limit = q.limit.unwrap_or(DEFAULT_PROPOSALS).min(MAX_PROPOSALS);
    let batch = st.reconciler.get_recent_proposals(limit).await;
    let proposals: Vec<Value> = batch
        .records()
        .iter()
        .map(|r| {
            let mut v = serde_json::to_value(r).unwrap_or(Value::Null);
            v["stateName"] = json!(r.state.name());
            v["forVotesFormatted"] = json!(format_votes(r.for_votes));
            v["againstVotesFormatted"] = json!(format_votes(r.against_votes));
            v["abstainVotesFormatted"] = json!(format_votes(r.abstain_votes));
            v
        })
        .collect();
    Json(json!({
        "count": proposals.len(),
        "proposals": proposals,
        "source": batch.source(),
        "error": batch.error(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateQ {
    proposal_id: Option<String>,
}

async fn proposal_state(
    State(st): State<AppState>,
    Query(q): Query<StateQ>,
) -> Result<Json<Value>, ApiError> {
    let raw = q
        .proposal_id
        .ok_or_else(|| bad_request("proposalId is required"))?;
    let id = parse_proposal_id(&raw)?;
    match st.reconciler.proposal_state(id).await {
        Ok(state) => Ok(Json(json!({
            "proposalId": id.to_string(),
            "state": state as u8,
            "stateName": state.name(),
        }))),
        Err(e) => {
            warn!(proposal_id = %id, error = %e, "state lookup failed");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": format!("failed to fetch proposal state: {e}") })),
            ))
        }
    }
}

async fn events_latest(State(st): State<AppState>, Query(q): Query<LimitQ>) -> Json<Value> {
    let events = st.feed.latest(q.limit.unwrap_or(DEFAULT_EVENTS)).await;
    Json(json!({ "count": events.len(), "events": events }))
}

async fn stats(State(st): State<AppState>) -> Json<Value> {
    Json(json!({
        "decoder": st.counters.snapshot(),
        "proposals": st.reconciler.book_len().await,
        "events": st.feed.len().await,
        "governor": st.reconciler.governor(),
    }))
}

async fn decisions(State(st): State<AppState>, Query(q): Query<LimitQ>) -> Json<Value> {
    let limit = q.limit.unwrap_or(DEFAULT_PROPOSALS).min(MAX_PROPOSALS);
    let batch = st.reconciler.get_recent_proposals(limit).await;
    let mut out = Vec::with_capacity(batch.records().len());
    for rec in batch.records() {
        let d = st.agent.decide(rec).await;
        let calldata = d
            .action
            .to_request(rec.proposal_id)
            .and_then(|r| r.calldata().ok());
        out.push(json!({
            "proposalId": rec.proposal_id.to_string(),
            "stateName": rec.state.name(),
            "action": d.action,
            "reasoning": d.reasoning,
            "calldata": calldata,
            "summary": calldata.as_ref().map(|c| describe_call(c)),
        }));
    }
    Json(json!({ "decisions": out, "source": batch.source() }))
}

#[derive(Deserialize)]
struct DescribeQ {
    input: String,
}

async fn describe(Query(q): Query<DescribeQ>) -> Result<Json<Value>, ApiError> {
    let h = q.input.trim();
    let bytes = hex::decode(h.strip_prefix("0x").unwrap_or(h))
        .map_err(|_| bad_request("input must be hex"))?;
    Ok(Json(json!({ "summary": describe_call(&bytes) })))
}

async fn actions_info(State(st): State<AppState>) -> Json<Value> {
    Json(json!({
        "availableActions": ["vote", "queue", "execute"],
        "parameters": {
            "vote": ["proposalId", "support (0=against, 1=for, 2=abstain)"],
            "queue": ["proposalId"],
            "execute": ["proposalId"],
        },
        "signerConfigured": st.signer.is_some(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionBody {
    action: Option<String>,
    /// Decimal string or JSON number.
    proposal_id: Option<Value>,
    support: Option<u8>,
}

async fn submit_action(
    State(st): State<AppState>,
    Json(body): Json<ActionBody>,
) -> Result<Json<Value>, ApiError> {
    let (Some(action), Some(raw_id)) = (body.action.as_deref(), body.proposal_id.as_ref()) else {
        return Err(bad_request("Missing required fields: action, proposalId"));
    };
    let id = match raw_id {
        Value::String(s) => parse_proposal_id(s)?,
        Value::Number(n) => parse_proposal_id(&n.to_string())?,
        other => return Err(bad_request(format!("invalid proposalId {other}"))),
    };
    let req = match action {
        "vote" => {
            let support = body
                .support
                .ok_or_else(|| bad_request("Missing support parameter for vote action"))?;
            let support = VoteSupport::try_from(support)
                .map_err(|s| bad_request(format!("invalid support {s}")))?;
            ActionRequest::vote(id, support)
        }
        "queue" => ActionRequest::queue(id),
        "execute" => ActionRequest::execute(id),
        other => return Err(bad_request(format!("Unknown action: {other}"))),
    };
    let Some(signer) = st.signer.as_deref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no signer configured" })),
        ));
    };

    match dispatch(signer, st.sink.as_ref(), st.reconciler.governor(), req).await {
        Ok(done) => Ok(Json(json!({
            "success": true,
            "action": done.kind,
            "proposalId": id.to_string(),
            "txHash": done.tx_hash,
            "status": done.status,
        }))),
        Err(ActionError::MissingSupport) => Err(bad_request("Missing support parameter")),
        Err(e) => Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": format!("failed to execute action: {e}") })),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{RuleAgent, TracingSink};
    use crate::decoder::{decode_log, Decoder};
    use crate::error::TransportError;
    use crate::testing::{created_log, tokens, MemoryChain, GOVERNOR};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use ethers::types::{Address, Bytes, H256};
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Answers with a fixed hash, or fails when `hash` is `None`.
    #[derive(Default)]
    struct StubSigner {
        hash: Option<H256>,
        sent: Mutex<Vec<(Address, Bytes)>>,
    }

    #[async_trait]
    impl TransactionSigner for StubSigner {
        async fn send_transaction(&self, to: Address, data: Bytes) -> Result<H256, TransportError> {
            self.sent.lock().expect("sent lock").push((to, data));
            self.hash
                .ok_or_else(|| TransportError::Unavailable("signer offline".into()))
        }
    }

    fn app_with(
        chain: &Arc<MemoryChain>,
        signer: Option<Arc<dyn TransactionSigner>>,
    ) -> (Router, Arc<RecentEvents>) {
        let feed = Arc::new(RecentEvents::new(10));
        let state = AppState {
            reconciler: Arc::new(Reconciler::new(chain.clone(), chain.clone(), GOVERNOR, 1_000)),
            feed: feed.clone(),
            counters: Decoder::new().counters(),
            agent: Arc::new(RuleAgent),
            signer,
            sink: Arc::new(TracingSink),
        };
        (router(state), feed)
    }

    fn app(chain: &Arc<MemoryChain>) -> (Router, Arc<RecentEvents>) {
        app_with(chain, None)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        send(app, Request::builder().uri(uri).body(Body::empty()).expect("request")).await
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        send(app, req).await
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.oneshot(req).await.expect("response");
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    fn seeded_chain() -> Arc<MemoryChain> {
        let chain = Arc::new(MemoryChain::new(18_000_020));
        chain.push_log(created_log(123, 18_000_010, 0, "Increase block gas limit"));
        chain.set_state(123, 1);
        chain.set_votes(123, tokens(50_000), tokens(1_500_000), tokens(10_000));
        chain
    }

    #[tokio::test]
    async fn health() {
        let (app, _) = app(&Arc::new(MemoryChain::new(1)));
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn proposals_live() {
        let (app, _) = app(&seeded_chain());
        let (status, body) = get_json(app, "/governance/proposals?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "live");
        assert_eq!(body["error"], Value::Null);
        let p = &body["proposals"][0];
        assert_eq!(p["proposalId"], "123");
        assert_eq!(p["stateName"], "Active");
        assert_eq!(p["forVotes"], "1500000000000000000000000");
        assert_eq!(p["forVotesFormatted"], "1.50M");
    }

    #[tokio::test]
    async fn proposals_fallback_is_flagged() {
        let chain = Arc::new(MemoryChain::new(1));
        chain.set_down(true);
        let (app, _) = app(&chain);
        let (_, body) = get_json(app, "/governance/proposals").await;
        assert_eq!(body["source"], "fixture");
        assert!(body["error"].is_string());
        assert_eq!(body["count"], 2);
        assert_eq!(body["proposals"][0]["source"], "fixture");
    }

    #[tokio::test]
    async fn state_endpoint() {
        let chain = seeded_chain();
        let (app, _) = app(&chain);
        let (status, body) = get_json(app.clone(), "/governance/state?proposalId=123").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], 1);
        assert_eq!(body["stateName"], "Active");

        let (status, _) = get_json(app.clone(), "/governance/state").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(app.clone(), "/governance/state?proposalId=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        chain.fail_state(123);
        let (status, body) = get_json(app, "/governance/state?proposalId=123").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap_or_default().contains("reverted"));
    }

    #[tokio::test]
    async fn events_and_stats() {
        let (app, feed) = app(&seeded_chain());
        feed.push(decode_log(&created_log(9, 10, 0, "x")).expect("event")).await;
        let (_, body) = get_json(app.clone(), "/governance/events/latest?limit=5").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["events"][0]["type"], "ProposalCreated");
        assert_eq!(body["events"][0]["proposalId"], "9");

        let (_, body) = get_json(app, "/governance/stats").await;
        assert_eq!(body["events"], 1);
        assert_eq!(body["proposals"], 0);
        assert_eq!(body["decoder"]["unknown"], 0);
    }

    #[tokio::test]
    async fn decisions_and_describe() {
        let (app, _) = app(&seeded_chain());
        let (_, body) = get_json(app.clone(), "/governance/decisions").await;
        let d = &body["decisions"][0];
        assert_eq!(d["action"], "vote_for");
        assert_eq!(d["summary"], "Voted FOR on proposal 123");
        assert!(d["calldata"].as_str().unwrap_or_default().starts_with("0x56781388"));

        let data = ActionRequest::vote(U256::from(42), VoteSupport::For)
            .calldata()
            .expect("calldata");
        let uri = format!("/governance/calls/describe?input=0x{}", hex::encode(&data));
        let (status, body) = get_json(app.clone(), &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"], "Voted FOR on proposal 42");

        let (status, _) = get_json(app, "/governance/calls/describe?input=zz").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn actions_need_a_signer() {
        let (app, _) = app(&seeded_chain());
        let (_, info) = get_json(app.clone(), "/governance/actions").await;
        assert_eq!(info["signerConfigured"], false);
        let (status, body) = post_json(
            app,
            "/governance/actions",
            json!({ "action": "queue", "proposalId": "123" }),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "no signer configured");
    }

    #[tokio::test]
    async fn vote_action_is_signed_and_reported() {
        let signer = Arc::new(StubSigner {
            hash: Some(H256::repeat_byte(0xab)),
            ..StubSigner::default()
        });
        let dyn_signer: Arc<dyn TransactionSigner> = signer.clone();
        let (app, _) = app_with(&seeded_chain(), Some(dyn_signer));
        let (status, body) = post_json(
            app,
            "/governance/actions",
            json!({ "action": "vote", "proposalId": 123, "support": 1 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "vote");
        assert_eq!(body["proposalId"], "123");
        assert_eq!(body["status"], "success");
        assert_eq!(body["txHash"], format!("{:?}", H256::repeat_byte(0xab)));

        let sent = signer.sent.lock().expect("sent lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, GOVERNOR);
        assert_eq!(hex::encode(&sent[0].1[..4]), "56781388");
    }

    #[tokio::test]
    async fn malformed_actions_are_rejected() {
        let signer: Arc<dyn TransactionSigner> = Arc::new(StubSigner::default());
        let (app, _) = app_with(&seeded_chain(), Some(signer));
        for body in [
            json!({ "action": "vote" }),
            json!({ "action": "vote", "proposalId": "123" }),
            json!({ "action": "vote", "proposalId": "123", "support": 7 }),
            json!({ "action": "cancel", "proposalId": "123" }),
            json!({ "action": "queue", "proposalId": "12x" }),
        ] {
            let (status, _) = post_json(app.clone(), "/governance/actions", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        // signer is down
        let (status, body) = post_json(
            app,
            "/governance/actions",
            json!({ "action": "execute", "proposalId": "123" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap_or_default().contains("signer offline"));
    }
}
