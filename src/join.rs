use std::collections::HashMap;

use tracing::debug;

use crate::model::{DocumentMetadata, EmbeddingRecord, EnrichedRecord, Metadata};

/// Attach metadata to every embedding, keeping the embedding order.
///
/// The output order is the canonical record index for every later stage.
/// Embeddings without a matching document get [`Metadata::Unknown`].
#[tracing::instrument(name = "Joining metadata", level = "debug", skip_all)]
pub fn join(
    embeddings: Vec<EmbeddingRecord>,
    metadata: &HashMap<String, DocumentMetadata>,
) -> Vec<EnrichedRecord> {
    let enriched: Vec<EnrichedRecord> = embeddings
        .into_iter()
        .map(|embedding| {
            let metadata = metadata
                .get(&embedding.reference_id)
                .cloned()
                .map_or(Metadata::Unknown, Metadata::Known);
            EnrichedRecord {
                embedding,
                metadata,
            }
        })
        .collect();
    let unmatched = enriched.iter().filter(|r| r.is_unmatched()).count();
    debug!(
        "Joined {} records, {} without metadata",
        enriched.len(),
        unmatched
    );
    enriched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{document, embedding};
    use crate::model::{DocumentType, UNKNOWN};

    #[test]
    fn preserves_order_and_marks_unmatched() {
        let embeddings = vec![
            embedding("3", DocumentType::Message, vec![1.0]),
            embedding("1", DocumentType::Template, vec![2.0]),
            embedding("2", DocumentType::Message, vec![3.0]),
        ];
        let mut metadata = HashMap::new();
        metadata.insert("doc-1".to_string(), document("1", "MT700", "BANKUS33"));
        metadata.insert("doc-3".to_string(), document("3", "MT103", "BANKDEFF"));

        let joined = join(embeddings, &metadata);

        assert_eq!(joined.len(), 3);
        let refs: Vec<&str> = joined
            .iter()
            .map(|r| r.embedding.reference_id.as_str())
            .collect();
        assert_eq!(refs, vec!["doc-3", "doc-1", "doc-2"]);
        assert_eq!(joined[0].message_type(), "MT103");
        assert_eq!(joined[1].sender_id(), "BANKUS33");
        assert!(joined[2].is_unmatched());
        assert_eq!(joined[2].sender_id(), UNKNOWN);
    }

    #[test]
    fn empty_metadata_yields_all_placeholders() {
        let embeddings = vec![
            embedding("1", DocumentType::Message, vec![1.0]),
            embedding("2", DocumentType::Message, vec![2.0]),
        ];
        let joined = join(embeddings, &HashMap::new());
        assert!(joined.iter().all(|r| r.is_unmatched()));
    }
}
