//! The core models for managing a stateful chat with an LLM.
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::ChatError;

pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8750/v1";
pub const DEFAULT_PROVIDER: &str = "openai";

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
}

impl Role {
    /// Normalizes an external role name. `user` is stored as `human`
    /// and `ai` as `assistant`.
    pub fn parse(name: &str) -> Result<Self, ChatError> {
        match name.trim().to_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" | "human" => Ok(Role::Human),
            "assistant" | "ai" => Ok(Role::Assistant),
            other => Err(ChatError::config(format!("Unknown message role: {other}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::Human => "human",
            Role::Assistant => "assistant",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    // Persona messages are templates, runtime turns are literal text
    #[serde(skip)]
    template: bool,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            template: false,
        }
    }

    pub fn template(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            template: true,
        }
    }

    pub fn is_template(&self) -> bool {
        self.template
    }
}

/// Ordered, append-only list of messages. Insertion order defines the
/// context sent to the model.
#[derive(Clone, Debug)]
pub struct Transcript(Vec<Message>);

impl Transcript {
    /// Builds a transcript from the configured messages, falling back
    /// to the default system message so it is never empty.
    pub fn new_with_messages(messages: Vec<Message>) -> Self {
        if messages.is_empty() {
            return Self(vec![Message::template(
                Role::System,
                DEFAULT_SYSTEM_MESSAGE,
            )]);
        }
        Self(messages)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.0.clone()
    }

    pub fn push(&mut self, msg: Message) {
        self.0.push(msg)
    }

    /// A copy of this transcript with `msg` appended. Used to render a
    /// turn before committing it.
    pub fn with(&self, msg: Message) -> Self {
        let mut next = self.clone();
        next.push(msg);
        next
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.0.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.0.iter()
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new_with_messages(Vec::new())
    }
}

/// Connection parameters for the model endpoint. `api_key` may be
/// absent until a network call is attempted.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    pub model_id: String,
    pub endpoint_url: String,
    pub provider: String,
    pub api_key: Option<String>,
    pub extra_model_args: Map<String, Value>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL.to_string(),
            endpoint_url: DEFAULT_BASE_URL.to_string(),
            provider: DEFAULT_PROVIDER.to_string(),
            api_key: None,
            extra_model_args: Map::new(),
        }
    }
}
