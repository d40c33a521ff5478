//! Adapters for the two upstream collaborators: the embedding store and the
//! document API. Wire shapes are validated into [`crate::model`] types here so
//! nothing downstream branches on field presence.

pub(crate) mod documents;
pub(crate) mod elastic;
pub mod traits;

pub use documents::DocumentApiSource;
pub use elastic::ElasticVectorSource;
pub use traits::{MetadataSource, VectorSource};

/// Keep error bodies short enough for a single log line.
pub(crate) fn snippet(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    let mut out: String = body.chars().take(MAX_CHARS).collect();
    if body.chars().count() > MAX_CHARS {
        out.push_str("...");
    }
    out
}
