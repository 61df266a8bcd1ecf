//! Error taxonomy for the conversation core.
//!
//! Outer layers (the CLI and HTTP handlers) wrap these in
//! `anyhow::Error`; everything below them returns `ChatError` so
//! callers can tell a bad persona file from a missing key or a dead
//! endpoint.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The persona file is malformed or missing a required field.
    #[error("Invalid config: {message}")]
    Config { message: String },

    /// Reading the persona file failed.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A model handle was needed but no API key is set.
    #[error("No API key configured for the model endpoint")]
    MissingCredential,

    /// A template referenced a variable that was not supplied.
    #[error("Failed to render prompt: {message}")]
    Template { message: String },

    /// The model endpoint failed or returned something unusable.
    #[error("Model endpoint error: {message}")]
    Transport { message: String },
}

impl ChatError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::transport(err.to_string())
    }
}

impl From<handlebars::RenderError> for ChatError {
    fn from(err: handlebars::RenderError) -> Self {
        Self::Template {
            message: err.to_string(),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
