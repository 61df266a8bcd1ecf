use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::ai::chat::Sink;
use crate::core::{ChatError, ChatResult};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "user")]
    User,
}

/// A message as it goes over the wire to an OpenAI compatible API.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Message {
            role,
            content: content.to_string(),
        }
    }
}

/// Join the base URL (which already includes any version prefix like
/// `/v1`) with a resource path.
pub fn endpoint(base_url: &str, resource: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        resource.trim_start_matches('/')
    )
}

fn payload(
    messages: &[Message],
    model: &str,
    extra_args: &Map<String, Value>,
    stream: bool,
) -> Value {
    let mut payload = Map::new();
    // Extra args go first so they can't clobber the required fields
    for (k, v) in extra_args {
        payload.insert(k.clone(), v.clone());
    }
    payload.insert("model".to_string(), json!(model));
    payload.insert("messages".to_string(), json!(messages));
    if stream {
        payload.insert("stream".to_string(), json!(true));
    }
    Value::Object(payload)
}

async fn ensure_success(response: reqwest::Response) -> ChatResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ChatError::transport(format!(
        "Request failed with status {status}: {body}"
    )))
}

/// Buffered chat completion. Returns the assistant's text.
pub async fn completion(
    client: &reqwest::Client,
    messages: &[Message],
    api_base_url: &str,
    api_key: &str,
    model: &str,
    extra_args: &Map<String, Value>,
) -> ChatResult<String> {
    let url = endpoint(api_base_url, "chat/completions");
    tracing::debug!("Sending completion request to {} for model {}", url, model);

    let response = client
        .post(url)
        .bearer_auth(api_key)
        .header("Content-Type", "application/json")
        .timeout(Duration::from_secs(60 * 10))
        .json(&payload(messages, model, extra_args, false))
        .send()
        .await?;
    let resp: Value = ensure_success(response).await?.json().await?;

    resp["choices"][0]["message"]["content"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| ChatError::transport(format!("No message received. Resp:\n\n {resp}")))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Delta {
    Content { content: String },

    Reasoning { reasoning: String },

    // Role-only deltas, `content: null` and the empty final delta
    Other {},
}

#[derive(Debug, Deserialize)]
struct CompletionChunkChoice {
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChunkChoice>,
}

/// Splits an SSE byte stream into `data:` payloads. Bytes are kept
/// until a full event (terminated by a blank line) is available so an
/// event or a UTF-8 sequence split across frames is reassembled.
#[derive(Default)]
struct SseBuffer {
    buf: Vec<u8>,
}

impl SseBuffer {
    fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next_event(&mut self) -> Option<Result<String, ChatError>> {
        let (end, sep_len) = find_event_end(&self.buf)?;
        let event: Vec<u8> = self.buf.drain(..end + sep_len).take(end).collect();
        Some(
            String::from_utf8(event)
                .map_err(|e| ChatError::transport(format!("Invalid UTF-8 in stream: {e}"))),
        )
    }
}

fn find_event_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Pull the joined `data:` lines out of an SSE event.
fn event_data(event: &str) -> Option<String> {
    let lines: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|d| d.strip_prefix(' ').unwrap_or(d))
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(lines.join("\n"))
}

enum Step {
    Continue,
    Done,
}

fn process_data(data: &str, content_buf: &mut String, sink: &mut dyn Sink) -> ChatResult<Step> {
    // Handle the end of the stream
    if data == "[DONE]" {
        return Ok(Step::Done);
    }

    let chunk = serde_json::from_str::<CompletionChunk>(data).map_err(|e| {
        tracing::error!("Parsing completion chunk failed for {}\nError:{}", data, e);
        ChatError::transport(format!("Malformed completion chunk: {e}"))
    })?;

    // Usage-only chunks have no choices
    let Some(choice) = chunk.choices.first() else {
        return Ok(Step::Continue);
    };

    match &choice.delta {
        Delta::Content { content } if !content.is_empty() => {
            sink.write(content);
            content_buf.push_str(content);
        }
        // Reasoning isn't part of the reply
        Delta::Reasoning { reasoning } => {
            tracing::debug!("Skipping reasoning delta: {}", reasoning);
        }
        _ => {}
    }

    if choice.finish_reason.is_some() {
        return Ok(Step::Done);
    }
    Ok(Step::Continue)
}

/// Streaming chat completion. Each content delta is forwarded to
/// `sink` as soon as it is parsed. Returns the concatenation of every
/// forwarded chunk once the stream ends.
///
/// On a transport failure the chunks already forwarded stay with the
/// sink and the error is returned.
pub async fn completion_stream(
    client: &reqwest::Client,
    sink: &mut dyn Sink,
    messages: &[Message],
    api_base_url: &str,
    api_key: &str,
    model: &str,
    extra_args: &Map<String, Value>,
) -> ChatResult<String> {
    let url = endpoint(api_base_url, "chat/completions");
    tracing::debug!("Sending streaming request to {} for model {}", url, model);

    let response = client
        .post(url)
        .bearer_auth(api_key)
        .header("Content-Type", "application/json")
        .timeout(Duration::from_secs(60 * 5))
        .json(&payload(messages, model, extra_args, true))
        .send()
        .await?;
    let mut stream = ensure_success(response).await?.bytes_stream();

    let mut content_buf = String::new();
    let mut buffer = SseBuffer::default();

    'outer: while let Some(chunk) = stream.next().await {
        buffer.extend(&chunk?);

        // Process all complete SSE events from the buffer
        while let Some(event) = buffer.next_event() {
            let Some(data) = event_data(event?.trim()) else {
                continue;
            };
            let data = data.trim();
            // Data can sometimes be empty
            if data.is_empty() {
                continue;
            }
            if let Step::Done = process_data(data, &mut content_buf, sink)? {
                break 'outer;
            }
        }
    }

    Ok(content_buf)
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<ModelInfo>,
}

/// Lists the model ids advertised by the endpoint in response order.
pub async fn list_models(
    client: &reqwest::Client,
    api_base_url: &str,
    api_key: &str,
) -> ChatResult<Vec<String>> {
    let url = endpoint(api_base_url, "models");
    let mut request = client
        .get(url)
        .header("Content-Type", "application/json")
        .timeout(Duration::from_secs(30));
    if !api_key.is_empty() {
        request = request.bearer_auth(api_key);
    }

    let response = ensure_success(request.send().await?).await?;
    let models = response.json::<ModelsResponse>().await?;
    Ok(models.data.into_iter().map(|m| m.id).collect())
}
