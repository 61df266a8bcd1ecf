//! Loads a persona definition (model connection, opening messages,
//! template defaults) from a YAML file.
//!
//! ```yaml
//! prologue: Hi! Ask me anything.
//! model_kwargs:
//!   model: gpt-4
//!   base_url: http://localhost:8750/v1
//!   api_key: sk-...
//!   temperature: 0.2
//! variables:
//!   name: Ada
//! messages:
//!   - role: system
//!     content: You are talking to {{name}}.
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::ai::chat::{ConnectionConfig, Message, Role, Transcript};
use crate::core::{ChatError, ChatResult};

static MUSTACHE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\{?([^}]*)\}\}").expect("valid mustache regex"));
static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("valid identifier regex"));

/// The document as written, before validation.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub prologue: Option<serde_yaml::Value>,
    #[serde(default)]
    pub model_kwargs: Option<serde_yaml::Value>,
    #[serde(default)]
    pub variables: Option<serde_yaml::Value>,
    #[serde(default)]
    pub messages: Option<serde_yaml::Value>,
}

/// A validated persona.
#[derive(Clone, Debug)]
pub struct Persona {
    pub prologue: Option<String>,
    pub connection: ConnectionConfig,
    pub variables: Map<String, Value>,
    pub transcript: Transcript,
}

impl Persona {
    pub fn load(path: &Path) -> ChatResult<Self> {
        let raw = load(path)?;
        validate(raw)
    }

    pub fn from_yaml(text: &str) -> ChatResult<Self> {
        validate(parse(text)?)
    }
}

/// Read and parse a persona file without validating its contents.
pub fn load(path: &Path) -> ChatResult<RawConfig> {
    tracing::debug!("Loading persona from {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| ChatError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&text)
}

pub fn parse(text: &str) -> ChatResult<RawConfig> {
    let doc: serde_yaml::Value = serde_yaml::from_str(text)
        .map_err(|e| ChatError::config(format!("Failed to parse YAML: {e}")))?;

    if !doc.is_mapping() {
        return Err(ChatError::config("Top level document must be a mapping"));
    }

    serde_yaml::from_value(doc).map_err(|e| ChatError::config(e.to_string()))
}

fn to_json(value: serde_yaml::Value, field: &str) -> ChatResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| ChatError::config(format!("Unsupported value for {field}: {e}")))
}

fn take_string(kwargs: &mut Map<String, Value>, key: &str) -> ChatResult<Option<String>> {
    match kwargs.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ChatError::config(format!(
            "model_kwargs.{key} must be a string, got {other}"
        ))),
    }
}

fn connection(model_kwargs: Option<serde_yaml::Value>) -> ChatResult<ConnectionConfig> {
    let mut kwargs = match model_kwargs {
        None | Some(serde_yaml::Value::Null) => Map::new(),
        Some(v @ serde_yaml::Value::Mapping(_)) => match to_json(v, "model_kwargs")? {
            Value::Object(map) => map,
            _ => return Err(ChatError::config("model_kwargs must be a mapping")),
        },
        Some(_) => return Err(ChatError::config("model_kwargs must be a mapping")),
    };

    let defaults = ConnectionConfig::default();
    Ok(ConnectionConfig {
        model_id: take_string(&mut kwargs, "model")?.unwrap_or(defaults.model_id),
        endpoint_url: take_string(&mut kwargs, "base_url")?.unwrap_or(defaults.endpoint_url),
        provider: take_string(&mut kwargs, "model_provider")?.unwrap_or(defaults.provider),
        api_key: take_string(&mut kwargs, "api_key")?.filter(|k| !k.is_empty()),
        extra_model_args: kwargs,
    })
}

fn variables(value: Option<serde_yaml::Value>) -> ChatResult<Map<String, Value>> {
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(Map::new()),
        Some(v @ serde_yaml::Value::Mapping(_)) => match to_json(v, "variables")? {
            Value::Object(map) => Ok(map),
            _ => Err(ChatError::config("variables must be a mapping")),
        },
        Some(_) => Err(ChatError::config("variables must be a mapping")),
    }
}

fn content_string(value: &serde_yaml::Value, index: usize) -> ChatResult<String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ChatError::config(format!(
            "messages[{index}].content must be a string"
        ))),
    }
}

fn messages(value: Option<serde_yaml::Value>) -> ChatResult<Vec<Message>> {
    let items = match value {
        None | Some(serde_yaml::Value::Null) => return Ok(Vec::new()),
        Some(serde_yaml::Value::Sequence(items)) => items,
        Some(_) => return Err(ChatError::config("messages must be a list")),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let map = item
                .as_mapping()
                .ok_or_else(|| ChatError::config(format!("messages[{i}] must be a mapping")))?;
            let role = map
                .get("role")
                .and_then(serde_yaml::Value::as_str)
                .ok_or_else(|| ChatError::config(format!("messages[{i}] is missing a role")))?;
            let content = map
                .get("content")
                .ok_or_else(|| ChatError::config(format!("messages[{i}] is missing content")))?;
            Ok(Message::template(
                Role::parse(role)?,
                &content_string(content, i)?,
            ))
        })
        .collect()
}

/// Names referenced inside `{{ }}` expressions of the template
/// messages, including helper arguments and path segments.
fn template_names(messages: &[Message]) -> HashSet<String> {
    messages
        .iter()
        .filter(|m| m.is_template())
        .flat_map(|m| {
            MUSTACHE_RE
                .captures_iter(&m.content)
                .filter_map(|c| c.get(1))
                .flat_map(|expr| IDENT_RE.find_iter(expr.as_str()))
                .map(|name| name.as_str().to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Model arguments named by a template are template inputs, not
/// request parameters. They become variable defaults unless the
/// `variables` section already sets them.
fn lift_template_inputs(
    connection: &mut ConnectionConfig,
    variables: &mut Map<String, Value>,
    messages: &[Message],
) {
    for name in template_names(messages) {
        if let Some(value) = connection.extra_model_args.remove(&name) {
            tracing::debug!("Using model_kwargs.{} as a template variable", name);
            variables.entry(name).or_insert(value);
        }
    }
}

/// Turn a parsed document into a `Persona`, applying the connection
/// defaults and injecting the default system message when no
/// messages are configured.
pub fn validate(raw: RawConfig) -> ChatResult<Persona> {
    let prologue = match raw.prologue {
        None | Some(serde_yaml::Value::Null) => None,
        Some(serde_yaml::Value::String(s)) => Some(s),
        Some(_) => return Err(ChatError::config("prologue must be a string")),
    };

    let mut connection = connection(raw.model_kwargs)?;
    let mut variables = variables(raw.variables)?;
    let messages = messages(raw.messages)?;
    lift_template_inputs(&mut connection, &mut variables, &messages);

    Ok(Persona {
        prologue,
        connection,
        variables,
        transcript: Transcript::new_with_messages(messages),
    })
}
