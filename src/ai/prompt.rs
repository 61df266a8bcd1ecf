//! Renders a transcript into the messages sent to the model, using
//! Handlebars for templating. Handlebars adds additional security
//! controls since it can't do much out of the box without registering
//! your own helpers. This is ideal since output from LLMs should be
//! considered untrusted and Handlebars forces you to add only what
//! you need.
//!
//! Only messages loaded from the persona file are treated as
//! templates. Runtime turns go through verbatim.

use handlebars::Handlebars;
use serde_json::{Map, Value};

use crate::ai::chat::{Role, Transcript};
use crate::core::ChatResult;
use crate::openai;

pub type Variables = Map<String, Value>;

/// The request representation of a transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub messages: Vec<openai::Message>,
}

fn wire_role(role: Role) -> openai::Role {
    match role {
        Role::System => openai::Role::System,
        Role::Human => openai::Role::User,
        Role::Assistant => openai::Role::Assistant,
    }
}

pub struct PromptBuilder<'a> {
    registry: Handlebars<'a>,
}

impl Default for PromptBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder<'_> {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        // Referencing a variable that wasn't supplied is an error
        registry.set_strict_mode(true);
        // Prompts are plain text, not HTML
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry }
    }

    /// Resolve every template message against `variables`. Order and
    /// roles are preserved and the transcript is left untouched.
    pub fn render(
        &self,
        transcript: &Transcript,
        variables: &Variables,
    ) -> ChatResult<RenderedPrompt> {
        let messages = transcript
            .iter()
            .map(|msg| -> ChatResult<openai::Message> {
                let content = if msg.is_template() {
                    self.registry.render_template(&msg.content, variables)?
                } else {
                    msg.content.clone()
                };
                Ok(openai::Message::new(wire_role(msg.role), &content))
            })
            .collect::<ChatResult<Vec<_>>>()?;

        Ok(RenderedPrompt { messages })
    }
}
