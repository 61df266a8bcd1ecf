//! Session-scoped cache of the models an endpoint advertises.
//!
//! Listing is advisory so every failure degrades to an empty list.
//! A non-empty listing is fetched once and then reused; an empty one
//! is not cached so a later call can try again. The API key is taken
//! per call so credentials supplied mid-session are used.

use serde::Serialize;
use tokio::sync::OnceCell;

use crate::ai::chat::ConnectionConfig;
use crate::openai;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModelDirectoryEntry {
    pub index: usize,
    pub id: String,
}

pub struct ModelDirectory {
    client: reqwest::Client,
    endpoint_url: String,
    cache: OnceCell<Vec<ModelDirectoryEntry>>,
}

impl ModelDirectory {
    pub fn new(endpoint_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint_url: endpoint_url.to_string(),
            cache: OnceCell::new(),
        }
    }

    pub fn for_connection(connection: &ConnectionConfig) -> Self {
        Self::new(&connection.endpoint_url)
    }

    /// Models in the order the endpoint listed them, indexed from 0.
    pub async fn list_models(&self, api_key: Option<&str>) -> Vec<ModelDirectoryEntry> {
        let api_key = api_key.unwrap_or_default();
        let populated = self
            .cache
            .get_or_try_init(|| async {
                let ids = openai::list_models(&self.client, &self.endpoint_url, api_key)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!("Failed to list models from {}: {}", self.endpoint_url, e);
                        Vec::new()
                    });
                if ids.is_empty() {
                    return Err(());
                }
                Ok(ids
                    .into_iter()
                    .enumerate()
                    .map(|(index, id)| ModelDirectoryEntry { index, id })
                    .collect())
            })
            .await;

        populated.cloned().unwrap_or_default()
    }

    /// Look up a model id by its index in the cached listing.
    pub fn get(&self, index: usize) -> Option<String> {
        self.cache
            .get()?
            .iter()
            .find(|entry| entry.index == index)
            .map(|entry| entry.id.clone())
    }
}
