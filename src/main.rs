use anyhow::Result;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use deep_research_agent::config::ResearchConfig;
use deep_research_agent::events::{
    Activity, ActivityKind, ActivityStatus, ChannelSink, Finish, NullSink, ProgressSink,
    ResearchEvent,
};
use deep_research_agent::models::{ChatRequest, ChatResponse, ModelIds};
use deep_research_agent::research::synthesizer::hard_fallback;
use deep_research_agent::research::Orchestrator;
use deep_research_agent::tools::Capabilities;
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::{info, instrument, warn};

#[derive(Clone)]
struct AppState {
    caps: Capabilities,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("deep_research_agent=debug,tower_http=info")
        .init();

    let caps = Capabilities::from_env()?;
    let state = AppState { caps };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(3000);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("deep research service running on http://0.0.0.0:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

/// Outer wall limit for a single request, in seconds.
fn outer_wall_limit() -> Duration {
    std::env::var("MAX_DURATION")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(300))
}

/// Research entry point for both protocols.
///
/// Callers with a `python-requests` User-Agent get the non-streaming eval
/// protocol; interactive callers opt into streamed research with
/// `experimental_deepResearch`. Failures still answer 200 with the
/// fallback answer, never an error status.
#[instrument(skip_all)]
async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Response {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let eval_mode = user_agent.contains("python-requests");

    let question = req
        .messages
        .last()
        .map(|m| m.content.trim().to_string())
        .unwrap_or_default();
    let models = ModelIds::from_request(&req);
    info!(
        request_id = req.id.as_deref().unwrap_or("-"),
        eval_mode,
        deep_research = req.experimental_deep_research,
        "chat request received"
    );

    if !eval_mode && req.experimental_deep_research {
        return stream_research(state, question, models);
    }

    // Eval protocol (and the non-research interactive fallback): one JSON
    // envelope carrying the three-line answer.
    if question.is_empty() {
        warn!("request carried no question");
        return Json(ChatResponse {
            content: hard_fallback(""),
        })
        .into_response();
    }

    let config = ResearchConfig::eval().clamp_time_limit(outer_wall_limit());
    let orchestrator = Orchestrator::new(state.caps.clone(), config);
    let content = orchestrator.run(&question, &models, &NullSink).await;
    Json(ChatResponse { content }).into_response()
}

/// Run the research loop in its own task and stream its events as NDJSON.
fn stream_research(state: AppState, question: String, models: ModelIds) -> Response {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let sink = ChannelSink::new(tx);

    if question.is_empty() {
        sink.emit(ResearchEvent::ActivityDelta(Activity {
            kind: ActivityKind::Thought,
            status: ActivityStatus::Error,
            message: "The request carried no question to research".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            depth: 0,
            completed_steps: 0,
            total_steps: 0,
        }));
        sink.emit(ResearchEvent::Finish(Finish {
            content: hard_fallback(""),
        }));
    } else {
        let config = ResearchConfig::interactive().clamp_time_limit(outer_wall_limit());
        let orchestrator = Orchestrator::new(state.caps.clone(), config);
        tokio::spawn(async move {
            orchestrator.run(&question, &models, &sink).await;
        });
    }

    let stream = UnboundedReceiverStream::new(rx).filter_map(|event| async move {
        let line = serde_json::to_string(&event).ok()?;
        Some(Ok::<_, Infallible>(Bytes::from(line + "\n")))
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}
