use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    models::{AnswerStatus, Citation},
    vector_store::IndexStats,
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct AskPayload {
    question: String,
}

#[derive(Serialize)]
pub struct AskResponse {
    request_id: Uuid,
    status: AnswerStatus,
    answer: String,
    reply: String,
    reasoning: Vec<String>,
    citations: Vec<Citation>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/ask", post(ask_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<AskResponse>, ApiError> {
    if payload.question.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "La pregunta no puede estar vacía."));
    }

    let rag = state.rag().await.map_err(|e| {
        error!("El orquestador no está disponible: {:#}", e);
        api_error(StatusCode::SERVICE_UNAVAILABLE, format!("Servicio no disponible: {e}"))
    })?;

    let request_id = Uuid::new_v4();
    let answer = rag
        .consult(&payload.question)
        .instrument(info_span!("ask", %request_id))
        .await;

    Ok(Json(AskResponse {
        request_id,
        status: answer.status,
        citations: answer.citation_records(),
        answer: answer.text,
        reply: answer.reply,
        reasoning: answer.reasoning,
    }))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Result<Json<IndexStats>, ApiError> {
    match state.orchestrator.get() {
        Some(rag) => Ok(Json(rag.index().stats())),
        None => Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "El índice aún no está listo.")),
    }
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}
