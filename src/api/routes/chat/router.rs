//! Router for the chat API

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, sse::Event, sse::KeepAlive, sse::Sse},
    routing::{get, post},
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::public;
use crate::ai::chat::Sink;
use crate::api::public::ApiError;
use crate::api::state::SharedState;

/// What the chat turn task reports back to the SSE response
enum StreamEvent {
    Chunk(String),
    Done,
    Error(String),
}

impl StreamEvent {
    fn into_event(self) -> Event {
        match self {
            StreamEvent::Chunk(content) => Event::default()
                .event("chunk")
                .data(json!(public::ChunkEvent { content: &content }).to_string()),
            StreamEvent::Done => Event::default().event("done").data("{}"),
            StreamEvent::Error(message) => Event::default()
                .event("error")
                .data(json!(public::ErrorEvent { message: &message }).to_string()),
        }
    }
}

struct EventSink(mpsc::UnboundedSender<StreamEvent>);

impl Sink for EventSink {
    fn write(&mut self, chunk: &str) {
        // The result is ignored because a disconnect is handled by the
        // task driving the turn
        let _ = self.0.send(StreamEvent::Chunk(chunk.to_string()));
    }
}

/// Add a message to the conversation and stream the response
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<public::ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = state
        .read()
        .map_err(|_| anyhow::anyhow!("Unable to read shared state"))?
        .chat
        .clone();
    let (tx, rx) = mpsc::unbounded_channel::<StreamEvent>();

    tokio::spawn(async move {
        let variables = payload.variables.unwrap_or_default();
        let mut sink = EventSink(tx.clone());

        tokio::select! {
            result = chat.invoke_stream(&payload.message, &mut sink, &variables) => {
                match result {
                    Ok(()) => {
                        let _ = tx.send(StreamEvent::Done);
                    }
                    Err(e) => {
                        tracing::error!("Chat handler error: {}", e);
                        let _ = tx.send(StreamEvent::Error(e.to_string()));
                    }
                }
            }
            // Dropping the turn discards whatever was streamed so far
            _ = tx.closed() => {
                tracing::info!("Client disconnected, abandoning chat turn");
            }
        }
    });

    let sse_stream =
        UnboundedReceiverStream::new(rx).map(|e| Ok::<Event, Infallible>(e.into_event()));

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

/// Add a message to the conversation and wait for the whole response
async fn complete_handler(
    State(state): State<SharedState>,
    Json(payload): Json<public::ChatRequest>,
) -> Result<Json<public::ChatResponse>, ApiError> {
    let chat = state
        .read()
        .map_err(|_| anyhow::anyhow!("Unable to read shared state"))?
        .chat
        .clone();
    let variables = payload.variables.unwrap_or_default();
    let reply = chat.invoke(&payload.message, &variables).await?;
    Ok(Json(public::ChatResponse::new(&reply)))
}

/// The conversation so far
async fn transcript_handler(
    State(state): State<SharedState>,
) -> Result<Json<public::ChatTranscriptResponse>, ApiError> {
    let chat = state
        .read()
        .map_err(|_| anyhow::anyhow!("Unable to read shared state"))?
        .chat
        .clone();

    Ok(Json(public::ChatTranscriptResponse {
        prologue: chat.prologue().map(String::from),
        model: chat.connection().await.model_id,
        transcript: chat.transcript().messages(),
    }))
}

/// Create the chat router
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", post(chat_handler))
        .route("/complete", post(complete_handler))
        .route("/transcript", get(transcript_handler))
}
