use std::collections::HashMap;

use futures::future::BoxFuture;

use crate::AppResult;
use crate::model::{DocumentMetadata, EmbeddingRecord};

/// Read-only access to the embedding store.
pub trait VectorSource: Send + Sync {
    /// Fetch every embedding record, following pagination to the end.
    /// An empty result means there is nothing to analyze.
    fn fetch_embeddings(&self) -> BoxFuture<'_, AppResult<Vec<EmbeddingRecord>>>;
}

/// Read-only access to the document API.
pub trait MetadataSource: Send + Sync {
    /// Fetch all document metadata keyed by document id.
    fn fetch_metadata(&self) -> BoxFuture<'_, AppResult<HashMap<String, DocumentMetadata>>>;
}
