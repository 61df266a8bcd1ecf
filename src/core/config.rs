use std::env;
use std::path::Path;

use crate::core::{ChatResult, Persona};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub prompt_path: String,
    pub web_ui_path: String,
    pub openai_api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let prompt_path =
            env::var("PALAVER_PROMPT_PATH").unwrap_or_else(|_| "./prompt.yaml".to_string());
        let web_ui_path =
            env::var("PALAVER_WEB_UI_PATH").unwrap_or_else(|_| "./web-ui".to_string());
        let openai_api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

        Self {
            prompt_path,
            web_ui_path,
            openai_api_key,
        }
    }
}

impl AppConfig {
    /// Load the persona file. An API key in the file wins over the
    /// one from the environment.
    pub fn load_persona(&self) -> ChatResult<Persona> {
        let mut persona = Persona::load(Path::new(&self.prompt_path))?;
        if persona.connection.api_key.is_none() {
            persona.connection.api_key = self.openai_api_key.clone();
        }
        Ok(persona)
    }
}
