//! Study Companion Server
//!
//! HTTP API over the content scheduler, session memory, and answer evaluation.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use study_companion::{
    config::Config,
    content::{ContentItem, ExposureKind},
    context::ContextAssembler,
    evaluation::{AnswerEvaluator, AnswerInput, Evaluation},
    generation::OpenAiCompatGenerator,
    message::Turn,
    scheduler::ContentScheduler,
    session::{MemoryStats, SessionMemoryCache},
    storage::{JsonlContentPack, SqliteContentRepository},
};

/// Application state shared across handlers
struct AppState {
    repo: Arc<SqliteContentRepository>,
    scheduler: ContentScheduler,
    cache: Arc<SessionMemoryCache>,
    assembler: ContextAssembler,
    evaluator: AnswerEvaluator,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings_path = std::env::var("STUDY_COMPANION_SETTINGS").ok().map(PathBuf::from);
    let config = Config::load(settings_path.as_deref())?;
    config.ensure_dirs()?;
    tracing::info!("Starting Study Companion Server on port {}", config.server_port);
    tracing::info!("Data directory: {:?}", config.data_dir);

    // Initialize components
    let repo = Arc::new(SqliteContentRepository::new(&config)?);
    if let Some(seed_dir) = &config.seed_dir {
        let pack = JsonlContentPack::new(seed_dir)?;
        let imported = pack.import_all(&repo)?;
        tracing::info!(imported, "content packs loaded from {:?}", seed_dir);
    }

    let cache = Arc::new(SessionMemoryCache::new(config.memory.clone()));
    cache.spawn_cleanup();

    let generator = Arc::new(OpenAiCompatGenerator::new(&config.generation)?);
    {
        let generator = generator.clone();
        tokio::spawn(async move {
            if generator.health_check().await {
                tracing::info!(model = %generator.model(), "generation service is reachable");
            } else {
                tracing::warn!("generation service health check failed");
            }
        });
    }

    let state = Arc::new(AppState {
        scheduler: ContentScheduler::new(repo.clone()),
        assembler: ContextAssembler::new(cache.clone(), generator.clone(), config.context_window),
        evaluator: AnswerEvaluator::new(generator),
        repo,
        cache,
    });

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(health))
        // Content selection
        .route("/content/subjects", get(list_subjects))
        .route("/content/:subject/:kind/next", post(next_content))
        // Free chat
        .route("/chat/:conversation_id", post(chat))
        // Session memory administration
        .route("/memory/stats", get(memory_stats))
        .route(
            "/memory/:conversation_id",
            get(get_conversation).delete(clear_conversation),
        )
        // Answer grading
        .route("/evaluate", post(evaluate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    let port = config.server_port;
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

// === Handlers ===

async fn health() -> &'static str {
    "ok"
}

// --- Content handlers ---

async fn list_subjects(State(state): State<SharedState>) -> Result<Json<Vec<String>>, StatusCode> {
    let subjects = state
        .repo
        .list_subjects()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(subjects))
}

async fn next_content(
    State(state): State<SharedState>,
    Path((subject, kind)): Path<(String, String)>,
) -> Result<Json<ContentItem>, StatusCode> {
    let kind: ExposureKind = kind.parse().map_err(|_| StatusCode::BAD_REQUEST)?;

    state
        .scheduler
        .next_for_subject(&subject, kind)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

// --- Chat handlers ---

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    display_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    reply: String,
}

async fn chat(
    State(state): State<SharedState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, StatusCode> {
    if req.message.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let reply = state
        .assembler
        .respond(&conversation_id, req.message.trim(), req.display_name.as_deref())
        .await
        .map_err(|_| StatusCode::BAD_GATEWAY)?;

    Ok(Json(ChatResponse { reply }))
}

// --- Memory handlers ---

async fn memory_stats(State(state): State<SharedState>) -> Json<MemoryStats> {
    Json(state.cache.stats())
}

async fn get_conversation(
    State(state): State<SharedState>,
    Path(conversation_id): Path<String>,
) -> Json<Vec<Turn>> {
    Json(state.cache.get_messages(&conversation_id))
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    existed: bool,
}

async fn clear_conversation(
    State(state): State<SharedState>,
    Path(conversation_id): Path<String>,
) -> Json<ClearResponse> {
    Json(ClearResponse {
        existed: state.cache.clear_chat(&conversation_id),
    })
}

// --- Evaluation handlers ---

#[derive(Debug, Serialize)]
struct EvaluateResponse {
    evaluation: Evaluation,
    #[serde(skip_serializing_if = "Option::is_none")]
    enriched_answer: Option<String>,
}

async fn evaluate(
    State(state): State<SharedState>,
    Json(input): Json<AnswerInput>,
) -> Json<EvaluateResponse> {
    let evaluation = state.evaluator.evaluate(&input).await;

    let enriched_answer = if evaluation.needs_enrichment() {
        Some(
            state
                .evaluator
                .enrich_reference(&input.reference_answer, &input.question, &input.subject)
                .await,
        )
    } else {
        None
    };

    Json(EvaluateResponse {
        evaluation,
        enriched_answer,
    })
}
