use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::assistant::{AgentStatus, AskResult, HistoryTurn};
use crate::error::ChronicleError;
use crate::search::SourceKind;
use crate::server::AppState;
use crate::store::{DocumentInput, Event, EventInput};
use crate::transcript::{JumpTarget, Transcript};

/// Build all routes for the server.
pub fn build_routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/api/health", get(health_handler))
        // Events (CRUD plumbing that drives indexing)
        .route("/api/events", post(create_event_handler))
        .route("/api/events", get(list_events_handler))
        .route("/api/events/{id}", get(get_event_handler))
        .route("/api/events/{id}", put(update_event_handler))
        .route("/api/events/{id}", delete(delete_event_handler))
        .route("/api/events/{id}/documents", post(attach_document_handler))
        .route("/api/documents/{id}", delete(delete_document_handler))
        // Search
        .route("/api/search", get(search_handler))
        .route("/api/search/rebuild", post(rebuild_index_handler))
        // Assistant
        .route("/api/ask", post(ask_handler))
        .route("/api/ask/status", get(ask_status_handler))
        .route("/api/ask/warmup", post(ask_warmup_handler))
        // Transcription
        .route("/api/transcribe", post(transcribe_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Error mapping
// ============================================================================

/// Maps the domain taxonomy onto HTTP statuses with a user-facing JSON
/// body. Recoverable agent failures never surface as bare 500s.
struct ApiError(ChronicleError);

impl From<ChronicleError> for ApiError {
    fn from(e: ChronicleError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChronicleError::QuerySyntax(_) => StatusCode::BAD_REQUEST,
            ChronicleError::EventNotFound(_) => StatusCode::NOT_FOUND,
            ChronicleError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            ChronicleError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ChronicleError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ChronicleError::MalformedTranscript(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChronicleError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime: u64,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: state.version.clone(),
        uptime: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Events
// ============================================================================

async fn create_event_handler(
    State(state): State<AppState>,
    Json(input): Json<EventInput>,
) -> Result<Json<Event>, ApiError> {
    let event = state.store.create_event(input)?;
    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    timeline: Option<String>,
}

async fn list_events_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let events = state.store.list_events(query.timeline.as_deref())?;
    Ok(Json(events))
}

async fn get_event_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Event>, ApiError> {
    let event = state
        .store
        .get_event(&id)?
        .ok_or(ChronicleError::EventNotFound(id))?;
    Ok(Json(event))
}

async fn update_event_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<EventInput>,
) -> Result<Json<Event>, ApiError> {
    let event = state.store.update_event(&id, input)?;
    Ok(Json(event))
}

async fn delete_event_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_event(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn attach_document_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<DocumentInput>,
) -> Result<Json<crate::store::Document>, ApiError> {
    let doc = state.store.attach_document(&id, input)?;
    Ok(Json(doc))
}

async fn delete_document_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_document(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Search
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<u32>,
}

/// One enriched search result: the raw hit plus the owning event and, for
/// transcript matches, playback seek targets.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    source_id: String,
    kind: SourceKind,
    rank: f64,
    title_snippet: String,
    body_snippet: String,
    event: Event,
    has_audio: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    word_jump_targets: Vec<JumpTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
}

async fn search_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(state.config.search.default_limit)
        .min(state.config.search.max_limit);

    let hits = state.store.index().search(&query.q, limit);

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(event) = state.store.get_event(&hit.event_id)? else {
            continue;
        };

        let word_jump_targets = match (hit.kind, &event.transcript) {
            (SourceKind::Transcript, Some(transcript)) => {
                transcript.jump_targets(&hit.matched_terms)
            }
            _ => Vec::new(),
        };

        let page = match hit.kind {
            SourceKind::Document => state
                .store
                .get_document(&hit.source_id)?
                .map(|doc| page_locator(&doc, &hit.matched_terms)),
            _ => None,
        };

        results.push(SearchResult {
            source_id: hit.source_id,
            kind: hit.kind,
            rank: hit.rank,
            title_snippet: hit.title_snippet,
            body_snippet: hit.body_snippet,
            has_audio: event.audio_file.is_some(),
            word_jump_targets,
            page,
            event,
        });
    }

    Ok(Json(results))
}

fn page_locator(doc: &crate::store::Document, terms: &[String]) -> u32 {
    terms
        .first()
        .map(|t| doc.page_for_term(t))
        .unwrap_or(1)
}

async fn rebuild_index_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let count = state.store.rebuild_index()?;
    Ok(Json(json!({ "success": true, "entriesIndexed": count })))
}

// ============================================================================
// Assistant
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskRequest {
    question: String,
    #[serde(default)]
    timeline_filter: Option<String>,
    #[serde(default)]
    history: Vec<HistoryTurn>,
}

async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResult>, ApiError> {
    let result = state
        .agent
        .ask(
            &request.question,
            request.timeline_filter.as_deref(),
            &request.history,
        )
        .await?;
    Ok(Json(result))
}

async fn ask_status_handler(State(state): State<AppState>) -> Json<AgentStatus> {
    Json(state.agent.status().await)
}

async fn ask_warmup_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.agent.warmup().await?;
    Ok(Json(json!({ "warmed": true })))
}

// ============================================================================
// Transcription
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeQuery {
    /// When set, the finished transcript is attached to this event.
    event_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeResponse {
    transcript: Transcript,
    device: String,
    elapsed_ms: u64,
}

async fn transcribe_handler(
    State(state): State<AppState>,
    Query(query): Query<TranscribeQuery>,
    mut multipart: Multipart,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let mut audio: Option<(Vec<u8>, String)> = None;
    let mut language: Option<String> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("audio_file") => {
                let filename = field
                    .file_name()
                    .unwrap_or("audio.wav")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    ChronicleError::MalformedTranscript(format!("unreadable upload: {e}"))
                })?;
                audio = Some((bytes.to_vec(), filename));
            }
            Some("language") => {
                language = field.text().await.ok().filter(|s| !s.is_empty());
            }
            _ => {}
        }
    }

    let (bytes, filename) = audio.ok_or_else(|| {
        ChronicleError::MalformedTranscript("missing audio_file field".to_string())
    })?;
    if bytes.is_empty() {
        return Err(ChronicleError::MalformedTranscript("empty audio file".to_string()).into());
    }

    info!(filename, bytes = bytes.len(), "transcription requested");
    let outcome = state
        .transcriber
        .transcribe(bytes, &filename, language.as_deref())
        .await?;
    let transcript = Transcript::from_engine(outcome.raw)?;

    // Attaching writes the transcript and its index entry atomically.
    if let Some(event_id) = query.event_id {
        state.store.set_transcript(&event_id, transcript.clone())?;
    }

    Ok(Json(TranscribeResponse {
        transcript,
        device: outcome.device,
        elapsed_ms: outcome.elapsed_ms,
    }))
}
