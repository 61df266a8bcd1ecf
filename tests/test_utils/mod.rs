//! Test utilities for integration tests
#![allow(dead_code)]

use std::sync::{Arc, RwLock};

use axum::{Router, body::Body};

use palaver::ai::chat::ChatClient;
use palaver::ai::directory::ModelDirectory;
use palaver::api::AppState;
use palaver::api::app;
use palaver::core::{AppConfig, Persona};

/// Creates a test application router whose model endpoint is
/// `base_url`, usually a `mockito` server.
pub fn test_app(base_url: &str, api_key: Option<&str>) -> Router {
    let mut yaml = format!(
        r#"
prologue: Welcome to the test persona
model_kwargs:
  model: test-model
  base_url: {base_url}
messages:
  - role: system
    content: You are a test assistant.
"#
    );
    if let Some(key) = api_key {
        yaml = yaml.replace(
            "  model: test-model\n",
            &format!("  model: test-model\n  api_key: {key}\n"),
        );
    }
    test_app_from_yaml(&yaml)
}

/// Creates a test application router from a persona document
pub fn test_app_from_yaml(yaml: &str) -> Router {
    let persona = Persona::from_yaml(yaml).expect("Failed to parse test persona");

    let app_config = AppConfig {
        prompt_path: String::from("test_prompt.yaml"),
        web_ui_path: format!("{}/web-ui", env!("CARGO_MANIFEST_DIR")),
        openai_api_key: None,
    };
    let models = ModelDirectory::for_connection(&persona.connection);
    let chat = ChatClient::new(persona);
    let app_state = AppState::new(chat, models, app_config);
    app(Arc::new(RwLock::new(app_state)))
}

pub async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("Body is not utf-8")
}

/// A streamed chat completion body made of `chunks`
pub fn sse_body(chunks: &[&str]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": chunk}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}
