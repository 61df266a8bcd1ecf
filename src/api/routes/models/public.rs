//! Public types for the models API
use serde::{Deserialize, Serialize};

use crate::ai::directory::ModelDirectoryEntry;

#[derive(Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelDirectoryEntry>,
}

#[derive(Deserialize)]
pub struct SetModelRequest {
    // A model id or an index from the listing
    pub model: String,
}

#[derive(Serialize)]
pub struct ActiveModelResponse {
    pub model: String,
}
