//! Client for OpenAI compatible chat completion APIs.
mod core;

pub use self::core::{
    Message, ModelInfo, ModelsResponse, Role, completion, completion_stream, endpoint,
    list_models,
};
