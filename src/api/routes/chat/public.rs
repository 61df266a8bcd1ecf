//! Public types for the chat API
use serde::{Deserialize, Serialize};

use crate::ai::chat::Message;
use crate::ai::prompt::Variables;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    // Extra template variables for this turn
    #[serde(default)]
    pub variables: Option<Variables>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    message: String,
}

impl ChatResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
pub struct ChatTranscriptResponse {
    pub prologue: Option<String>,
    pub model: String,
    pub transcript: Vec<Message>,
}

/// Payload of a `chunk` event on the chat stream
#[derive(Serialize)]
pub struct ChunkEvent<'a> {
    pub content: &'a str,
}

/// Payload of an `error` event on the chat stream
#[derive(Serialize)]
pub struct ErrorEvent<'a> {
    pub message: &'a str,
}
