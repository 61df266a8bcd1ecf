use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use super::models::{ConnectionConfig, Message, Role, Transcript};
use super::sink::Sink;
use crate::ai::prompt::{PromptBuilder, RenderedPrompt, Variables};
use crate::core::{ChatError, ChatResult, Persona};
use crate::openai::{completion, completion_stream};

/// A connection to the model endpoint bound to one set of connection
/// parameters.
#[derive(Debug)]
pub struct ModelHandle {
    client: reqwest::Client,
    config: ConnectionConfig,
    api_key: String,
}

impl ModelHandle {
    fn connect(config: &ConnectionConfig) -> ChatResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(ChatError::MissingCredential)?;

        if config.provider != "openai" {
            tracing::warn!(
                "Provider {} is treated as an OpenAI compatible endpoint",
                config.provider
            );
        }
        tracing::info!(
            "Connecting to model {} at {}",
            config.model_id,
            config.endpoint_url
        );

        Ok(Self {
            client: reqwest::Client::new(),
            config: config.clone(),
            api_key,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.config.model_id
    }

    pub fn endpoint_url(&self) -> &str {
        &self.config.endpoint_url
    }

    pub async fn complete(&self, prompt: &RenderedPrompt) -> ChatResult<String> {
        completion(
            &self.client,
            &prompt.messages,
            &self.config.endpoint_url,
            &self.api_key,
            &self.config.model_id,
            &self.config.extra_model_args,
        )
        .await
    }

    pub async fn complete_stream(
        &self,
        prompt: &RenderedPrompt,
        sink: &mut dyn Sink,
    ) -> ChatResult<String> {
        completion_stream(
            &self.client,
            sink,
            &prompt.messages,
            &self.config.endpoint_url,
            &self.api_key,
            &self.config.model_id,
            &self.config.extra_model_args,
        )
        .await
    }
}

/// The model is only constructed on first use and then reused until
/// the connection parameters change.
#[derive(Debug)]
enum ModelState {
    Unbound,
    Bound(Arc<ModelHandle>),
}

#[derive(Debug)]
struct Session {
    connection: ConnectionConfig,
    model: ModelState,
}

/// A single conversation with an LLM through an OpenAI compatible
/// API.
///
/// Each turn appends the user's message, sends the whole transcript
/// and appends the reply. Turns are serialized: a second call waits
/// until the previous one has finished (successfully or not) before
/// touching the transcript. Readers see the last committed state
/// through `transcript()` without waiting for a turn in flight.
pub struct ChatClient {
    session: Mutex<Session>,
    transcript: Mutex<Transcript>,
    committed: watch::Sender<Transcript>,
    prompts: PromptBuilder<'static>,
    variables: Variables,
    prologue: Option<String>,
}

impl ChatClient {
    pub fn new(persona: Persona) -> Self {
        Self {
            session: Mutex::new(Session {
                connection: persona.connection,
                model: ModelState::Unbound,
            }),
            committed: watch::Sender::new(persona.transcript.clone()),
            transcript: Mutex::new(persona.transcript),
            prompts: PromptBuilder::new(),
            variables: persona.variables,
            prologue: persona.prologue,
        }
    }

    pub fn prologue(&self) -> Option<&str> {
        self.prologue.as_deref()
    }

    /// Snapshot of the committed transcript.
    pub fn transcript(&self) -> Transcript {
        self.committed.borrow().clone()
    }

    fn commit(&self, transcript: &mut Transcript, msg: Message) {
        transcript.push(msg);
        self.committed.send_replace(transcript.clone());
    }

    pub async fn connection(&self) -> ConnectionConfig {
        self.session.lock().await.connection.clone()
    }

    /// Returns the cached model handle, constructing it first if
    /// needed. Fails with `MissingCredential` when no API key is set.
    pub async fn ensure_model(&self) -> ChatResult<Arc<ModelHandle>> {
        let mut session = self.session.lock().await;
        if let ModelState::Bound(handle) = &session.model {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(ModelHandle::connect(&session.connection)?);
        session.model = ModelState::Bound(Arc::clone(&handle));
        Ok(handle)
    }

    /// Switch to a different model. The next turn connects again.
    pub async fn set_model(&self, model_id: &str) {
        let mut session = self.session.lock().await;
        tracing::info!(
            "Switching model from {} to {}",
            session.connection.model_id,
            model_id
        );
        session.connection.model_id = model_id.to_string();
        session.model = ModelState::Unbound;
    }

    /// Supply credentials, e.g. after a `MissingCredential` error.
    pub async fn set_api_key(&self, api_key: &str) {
        let mut session = self.session.lock().await;
        session.connection.api_key = Some(api_key.to_string()).filter(|k| !k.is_empty());
        session.model = ModelState::Unbound;
    }

    fn variables_for(&self, user_input: Option<&str>, variables: &Variables) -> Variables {
        let mut merged = self.variables.clone();
        if let Some(input) = user_input {
            merged.insert("user_input".to_string(), input.into());
        }
        for (k, v) in variables {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Checks credentials and renders the turn before anything is
    /// appended, so a failure here leaves the transcript as it was.
    async fn prepare_turn(
        &self,
        transcript: &Transcript,
        human: &Message,
        variables: &Variables,
    ) -> ChatResult<(Arc<ModelHandle>, RenderedPrompt)> {
        let model = self.ensure_model().await?;
        let variables = self.variables_for(Some(human.content.as_str()), variables);
        let prompt = self
            .prompts
            .render(&transcript.with(human.clone()), &variables)?;
        Ok((model, prompt))
    }

    /// Runs a turn and waits for the complete reply.
    pub async fn invoke(&self, user_input: &str, variables: &Variables) -> ChatResult<String> {
        let mut transcript = self.transcript.lock().await;
        let human = Message::new(Role::Human, user_input);
        let (model, prompt) = self.prepare_turn(&transcript, &human, variables).await?;
        self.commit(&mut transcript, human);

        let reply = model.complete(&prompt).await.inspect_err(|e| {
            tracing::error!("Chat turn failed: {}", e);
        })?;

        self.commit(&mut transcript, Message::new(Role::Assistant, &reply));
        Ok(reply)
    }

    /// Runs a turn, forwarding each chunk of the reply to `sink` as
    /// it arrives. The reply is appended once, as a single message,
    /// after the stream completes.
    ///
    /// If the stream fails part way the user's turn stays in the
    /// transcript but nothing is appended for the reply. Dropping the
    /// returned future has the same effect.
    pub async fn invoke_stream(
        &self,
        user_input: &str,
        sink: &mut dyn Sink,
        variables: &Variables,
    ) -> ChatResult<()> {
        let mut transcript = self.transcript.lock().await;
        let human = Message::new(Role::Human, user_input);
        let (model, prompt) = self.prepare_turn(&transcript, &human, variables).await?;
        self.commit(&mut transcript, human);

        let reply = model
            .complete_stream(&prompt, sink)
            .await
            .inspect_err(|e| {
                tracing::error!("Streaming chat turn failed: {}", e);
            })?;

        self.commit(&mut transcript, Message::new(Role::Assistant, &reply));
        Ok(())
    }

    /// Asks the model to open the conversation from the persona's
    /// messages alone, streaming the reply to `sink`.
    pub async fn greet(&self, sink: &mut dyn Sink, variables: &Variables) -> ChatResult<String> {
        let mut transcript = self.transcript.lock().await;
        let model = self.ensure_model().await?;
        let prompt = self
            .prompts
            .render(&transcript, &self.variables_for(None, variables))?;

        let reply = model.complete_stream(&prompt, sink).await?;
        self.commit(&mut transcript, Message::new(Role::Assistant, &reply));
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::ai::chat::DEFAULT_SYSTEM_MESSAGE;

    fn persona(base_url: &str, api_key: Option<&str>) -> Persona {
        let key = api_key
            .map(|k| format!("  api_key: {k}\n"))
            .unwrap_or_default();
        Persona::from_yaml(&format!(
            "model_kwargs:\n  model: gpt-4\n  base_url: {base_url}\n{key}messages: []\n"
        ))
        .unwrap()
    }

    fn completion_body(content: &str) -> String {
        json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
        })
        .to_string()
    }

    fn sse_body(chunks: &[&str]) -> String {
        let mut body = String::new();
        for c in chunks {
            let data = json!({"choices": [{"index": 0, "delta": {"content": c}, "finish_reason": null}]});
            body.push_str(&format!("data: {data}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn contents(transcript: &Transcript) -> Vec<(Role, String)> {
        transcript
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_invoke_appends_both_turns() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "gpt-4",
                "messages": [
                    {"role": "system", "content": DEFAULT_SYSTEM_MESSAGE},
                    {"role": "user", "content": "2+2?"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("4"))
            .create_async()
            .await;

        let chat = ChatClient::new(persona(&format!("{}/v1", server.url()), Some("k")));
        let reply = chat.invoke("2+2?", &Variables::new()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reply, "4");
        assert_eq!(
            contents(&chat.transcript()),
            vec![
                (Role::System, DEFAULT_SYSTEM_MESSAGE.to_string()),
                (Role::Human, "2+2?".to_string()),
                (Role::Assistant, "4".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_invoke_stream_concatenates_chunks() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse_body(&["The ", "answer ", "is 4."]))
            .create_async()
            .await;

        let chat = ChatClient::new(persona(&format!("{}/v1", server.url()), Some("k")));
        let mut sink: Vec<String> = Vec::new();
        chat.invoke_stream("2+2?", &mut sink, &Variables::new())
            .await
            .unwrap();

        assert_eq!(sink, vec!["The ", "answer ", "is 4."]);
        let transcript = chat.transcript();
        assert_eq!(transcript.len(), 3);
        let last = transcript.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, sink.concat());
    }

    #[tokio::test]
    async fn test_missing_api_key_leaves_transcript_untouched() {
        let chat = ChatClient::new(persona("http://127.0.0.1:9/v1", None));

        let result = chat.invoke("hello", &Variables::new()).await;
        assert!(matches!(result, Err(ChatError::MissingCredential)));

        let mut sink: Vec<String> = Vec::new();
        let result = chat
            .invoke_stream("hello", &mut sink, &Variables::new())
            .await;
        assert!(matches!(result, Err(ChatError::MissingCredential)));

        assert_eq!(chat.transcript().len(), 1);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_set_api_key_recovers_from_missing_credential() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer late-key")
            .with_status(200)
            .with_body(completion_body("ok"))
            .create_async()
            .await;

        let chat = ChatClient::new(persona(&format!("{}/v1", server.url()), None));
        assert!(chat.ensure_model().await.is_err());

        chat.set_api_key("late-key").await;
        assert_eq!(chat.invoke("hi", &Variables::new()).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_ensure_model_is_cached() {
        let chat = ChatClient::new(persona("http://127.0.0.1:9/v1", Some("k")));
        let first = chat.ensure_model().await.unwrap();
        let second = chat.ensure_model().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.model_id(), "gpt-4");
    }

    #[tokio::test]
    async fn test_set_model_rebinds_handle() {
        let chat = ChatClient::new(persona("http://127.0.0.1:9/v1", Some("k")));
        let first = chat.ensure_model().await.unwrap();

        chat.set_model("gpt-4o").await;
        let second = chat.ensure_model().await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.model_id(), "gpt-4o");
        assert_eq!(chat.connection().await.model_id, "gpt-4o");
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_only_user_turn() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let chat = ChatClient::new(persona(&format!("{}/v1", server.url()), Some("k")));
        let mut sink: Vec<String> = Vec::new();
        let result = chat
            .invoke_stream("hello", &mut sink, &Variables::new())
            .await;

        assert!(matches!(result, Err(ChatError::Transport { .. })));
        let transcript = chat.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.last().unwrap().role, Role::Human);
    }

    #[tokio::test]
    async fn test_partial_stream_then_error() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(
            "data: {}\n\ndata: not-json\n\n",
            json!({"choices": [{"index": 0, "delta": {"content": "Hel"}, "finish_reason": null}]})
        );
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let chat = ChatClient::new(persona(&format!("{}/v1", server.url()), Some("k")));
        let mut sink: Vec<String> = Vec::new();
        let result = chat
            .invoke_stream("hello", &mut sink, &Variables::new())
            .await;

        assert!(matches!(result, Err(ChatError::Transport { .. })));
        assert_eq!(sink, vec!["Hel"]);
        assert_eq!(chat.transcript().last().unwrap().role, Role::Human);
    }

    #[tokio::test]
    async fn test_abandoned_stream_appends_no_reply() {
        let mut server = mockito::Server::new_async().await;
        let first = json!({"choices": [{"index": 0, "delta": {"content": "Hel"}, "finish_reason": null}]});
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_chunked_body(move |w| {
                w.write_all(format!("data: {first}\n\n").as_bytes())?;
                w.flush()?;
                std::thread::sleep(Duration::from_secs(1));
                w.write_all(b"data: [DONE]\n\n")
            })
            .create_async()
            .await;

        let chat = ChatClient::new(persona(&format!("{}/v1", server.url()), Some("k")));
        let mut sink: Vec<String> = Vec::new();
        let result = tokio::time::timeout(
            Duration::from_millis(200),
            chat.invoke_stream("hello", &mut sink, &Variables::new()),
        )
        .await;

        assert!(result.is_err());
        // The first chunk was delivered while the stream was still open
        assert_eq!(sink, vec!["Hel"]);
        let transcript = chat.transcript();
        assert!(
            transcript
                .iter()
                .all(|m| m.role != Role::Assistant)
        );
    }

    #[tokio::test]
    async fn test_transcript_readable_during_turn() {
        let mut server = mockito::Server::new_async().await;
        let first = json!({"choices": [{"index": 0, "delta": {"content": "Hel"}, "finish_reason": null}]});
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_chunked_body(move |w| {
                w.write_all(format!("data: {first}\n\n").as_bytes())?;
                w.flush()?;
                std::thread::sleep(Duration::from_millis(500));
                w.write_all(b"data: [DONE]\n\n")
            })
            .create_async()
            .await;

        let chat = Arc::new(ChatClient::new(persona(
            &format!("{}/v1", server.url()),
            Some("k"),
        )));
        let turn = {
            let chat = Arc::clone(&chat);
            tokio::spawn(async move {
                let mut sink: Vec<String> = Vec::new();
                chat.invoke_stream("hello", &mut sink, &Variables::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Only the committed user turn is visible while the reply streams
        let during = chat.transcript();
        assert_eq!(during.len(), 2);
        assert_eq!(during.last().unwrap().role, Role::Human);

        turn.await.unwrap().unwrap();
        let after = chat.transcript();
        assert_eq!(after.len(), 3);
        assert_eq!(after.last().unwrap().content, "Hel");
    }

    #[tokio::test]
    async fn test_template_inputs_from_model_kwargs_are_not_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::Json(json!({
                "model": "gpt-4",
                "temperature": 0.2,
                "messages": [
                    {"role": "system", "content": "Hi Ada"},
                    {"role": "user", "content": "x"}
                ]
            })))
            .with_status(200)
            .with_body(completion_body("hello"))
            .create_async()
            .await;

        let yaml = format!(
            "model_kwargs:\n  model: gpt-4\n  base_url: {}/v1\n  api_key: k\n  temperature: 0.2\n  name: Ada\nmessages:\n  - role: system\n    content: \"Hi {{{{name}}}}\"\n",
            server.url()
        );
        let chat = ChatClient::new(Persona::from_yaml(&yaml).unwrap());

        assert_eq!(chat.invoke("x", &Variables::new()).await.unwrap(), "hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_turns_do_not_interleave() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(completion_body("ack"))
            .expect(2)
            .create_async()
            .await;

        let chat = Arc::new(ChatClient::new(persona(
            &format!("{}/v1", server.url()),
            Some("k"),
        )));
        let vars = Variables::new();
        let (a, b) = tokio::join!(chat.invoke("one", &vars), chat.invoke("two", &vars));
        a.unwrap();
        b.unwrap();

        let roles: Vec<Role> = chat.transcript().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::Human,
                Role::Assistant,
                Role::Human,
                Role::Assistant
            ]
        );
    }

    #[tokio::test]
    async fn test_template_variables_and_user_input() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({
                "messages": [
                    {"role": "system", "content": "Talk like a pirate to Ada about: ships"},
                    {"role": "user", "content": "ships"}
                ]
            })))
            .with_status(200)
            .with_body(completion_body("Arr"))
            .create_async()
            .await;

        let yaml = format!(
            "model_kwargs:\n  base_url: {}/v1\n  api_key: k\nvariables:\n  name: Bob\nmessages:\n  - role: system\n    content: \"Talk like a pirate to {{{{name}}}} about: {{{{user_input}}}}\"\n",
            server.url()
        );
        let chat = ChatClient::new(Persona::from_yaml(&yaml).unwrap());

        let vars = json!({"name": "Ada"}).as_object().unwrap().clone();
        assert_eq!(chat.invoke("ships", &vars).await.unwrap(), "Arr");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_template_error_leaves_transcript_untouched() {
        let yaml = "model_kwargs:\n  api_key: k\nmessages:\n  - role: system\n    content: \"Hi {{missing}}\"\n";
        let chat = ChatClient::new(Persona::from_yaml(yaml).unwrap());

        let result = chat.invoke("hello", &Variables::new()).await;
        assert!(matches!(result, Err(ChatError::Template { .. })));
        assert_eq!(chat.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_greet_appends_opening_reply() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse_body(&["Ahoy", "!"]))
            .create_async()
            .await;

        let chat = ChatClient::new(persona(&format!("{}/v1", server.url()), Some("k")));
        let mut sink = String::new();
        let reply = chat.greet(&mut sink, &Variables::new()).await.unwrap();

        assert_eq!(reply, "Ahoy!");
        assert_eq!(sink, "Ahoy!");
        let transcript = chat.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.last().unwrap().role, Role::Assistant);
    }
}
