use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Sentinel used wherever document metadata is missing.
pub const UNKNOWN: &str = "UNKNOWN";

/// Kind of document an embedding was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Message,
    Template,
    Transaction,
}

impl Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentType::Message => "MESSAGE",
            DocumentType::Template => "TEMPLATE",
            DocumentType::Transaction => "TRANSACTION",
        };
        write!(f, "{}", s)
    }
}

/// One embedding as stored in the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub reference_id: String,
    pub document_type: DocumentType,
    pub vector: Vec<f32>,
    pub cluster_id: Option<i64>,
    pub preview: Option<String>,
}

/// Document metadata as served by the document API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub id: String,
    pub message_type: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: String,
    pub template_id: Option<String>,
    pub cluster_id: Option<i64>,
}

/// Result of looking up an embedding's document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    Known(DocumentMetadata),
    Unknown,
}

/// An embedding joined with its metadata (or the unknown placeholder).
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub embedding: EmbeddingRecord,
    pub metadata: Metadata,
}

impl EnrichedRecord {
    pub fn message_type(&self) -> &str {
        match &self.metadata {
            Metadata::Known(doc) => &doc.message_type,
            Metadata::Unknown => UNKNOWN,
        }
    }

    pub fn sender_id(&self) -> &str {
        match &self.metadata {
            Metadata::Known(doc) => &doc.sender_id,
            Metadata::Unknown => UNKNOWN,
        }
    }

    pub fn receiver_id(&self) -> &str {
        match &self.metadata {
            Metadata::Known(doc) => &doc.receiver_id,
            Metadata::Unknown => UNKNOWN,
        }
    }

    pub fn status(&self) -> &str {
        match &self.metadata {
            Metadata::Known(doc) => &doc.status,
            Metadata::Unknown => UNKNOWN,
        }
    }

    /// Template linkage. The placeholder reports `UNKNOWN`, a matched document
    /// without a template reports `None`.
    pub fn template_id(&self) -> Option<&str> {
        match &self.metadata {
            Metadata::Known(doc) => doc.template_id.as_deref(),
            Metadata::Unknown => Some(UNKNOWN),
        }
    }

    pub fn is_unmatched(&self) -> bool {
        matches!(self.metadata, Metadata::Unknown)
    }
}

/// A record's position in the reduced space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub record_index: usize,
    pub coordinates: Vec<f64>,
}

/// A record's cluster label, dense in `0..k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub record_index: usize,
    pub cluster_label: usize,
}
