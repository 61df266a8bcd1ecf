use std::sync::{Arc, RwLock};

use crate::ai::chat::ChatClient;
use crate::ai::directory::ModelDirectory;
use crate::core::AppConfig;

pub type SharedState = Arc<RwLock<AppState>>;

pub struct AppState {
    // One conversation per server process
    pub chat: Arc<ChatClient>,
    pub models: Arc<ModelDirectory>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(chat: ChatClient, models: ModelDirectory, config: AppConfig) -> Self {
        Self {
            chat: Arc::new(chat),
            models: Arc::new(models),
            config,
        }
    }
}
