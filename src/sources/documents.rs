use std::collections::HashMap;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use crate::AppResult;
use crate::config::SourceConfig;
use crate::error::AppError;
use crate::model::{DocumentMetadata, UNKNOWN};
use crate::sources::snippet;
use crate::sources::traits::MetadataSource;

/// Message document as returned by `GET /messages`. Everything but the id may be null.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDocument {
    id: String,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    sender_id: Option<String>,
    #[serde(default)]
    receiver_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    template_id: Option<String>,
    #[serde(default)]
    cluster_id: Option<i64>,
}

fn or_unknown(value: Option<String>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

impl From<MessageDocument> for DocumentMetadata {
    fn from(doc: MessageDocument) -> Self {
        DocumentMetadata {
            id: doc.id,
            message_type: or_unknown(doc.message_type),
            sender_id: or_unknown(doc.sender_id),
            receiver_id: or_unknown(doc.receiver_id),
            status: or_unknown(doc.status),
            template_id: doc.template_id,
            cluster_id: doc.cluster_id,
        }
    }
}

/// Reads message metadata from the document API.
#[derive(Clone)]
pub struct DocumentApiSource {
    client: reqwest::Client,
    messages_url: String,
    token: Option<String>,
}

impl DocumentApiSource {
    pub fn new(client: reqwest::Client, config: &SourceConfig) -> Self {
        Self {
            client,
            messages_url: config.messages_url(),
            token: config.api_token.clone(),
        }
    }

    #[tracing::instrument(name = "Fetching document metadata", level = "info", skip(self))]
    async fn fetch_all(&self) -> AppResult<HashMap<String, DocumentMetadata>> {
        let mut req = self.client.get(&self.messages_url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| {
            AppError::MetadataUnavailable(format!("request to {} failed: {e}", self.messages_url))
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            AppError::MetadataUnavailable(format!("failed to read response body: {e}"))
        })?;
        if !status.is_success() {
            return Err(AppError::MetadataUnavailable(format!(
                "document API returned {status}: {}",
                snippet(&text)
            )));
        }

        let de = &mut serde_json::Deserializer::from_str(&text);
        let docs: Vec<MessageDocument> = serde_path_to_error::deserialize(de).map_err(|e| {
            AppError::MetadataUnavailable(format!(
                "malformed document list at {}: {}",
                e.path(),
                e.inner()
            ))
        })?;

        let map: HashMap<String, DocumentMetadata> = docs
            .into_iter()
            .map(|doc| (doc.id.clone(), DocumentMetadata::from(doc)))
            .collect();
        debug!("Fetched metadata for {} documents", map.len());
        Ok(map)
    }
}

impl MetadataSource for DocumentApiSource {
    fn fetch_metadata(&self) -> BoxFuture<'_, AppResult<HashMap<String, DocumentMetadata>>> {
        self.fetch_all().boxed()
    }
}
