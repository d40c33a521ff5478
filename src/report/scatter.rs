use std::collections::BTreeMap;
use std::fmt::Display;

use serde::Serialize;

use crate::AppResult;
use crate::analysis::{ReductionMethod, TargetDims};
use crate::error::AppError;
use crate::model::{ClusterAssignment, DocumentType, EnrichedRecord, ProjectedPoint};
use crate::report::{ColorBy, cluster_name};

/// Characters of the content preview kept on each point.
const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerSymbol {
    Circle,
    Star,
    Diamond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Marker {
    pub symbol: MarkerSymbol,
    pub size: u8,
}

impl Marker {
    /// Templates stand out from the messages that were generated from them.
    pub fn for_document(document_type: DocumentType, dims: TargetDims) -> Self {
        let (symbol, size) = match (document_type, dims) {
            (DocumentType::Template, TargetDims::Two) => (MarkerSymbol::Star, 20),
            (DocumentType::Template, TargetDims::Three) => (MarkerSymbol::Diamond, 15),
            (_, TargetDims::Two) => (MarkerSymbol::Circle, 10),
            (_, TargetDims::Three) => (MarkerSymbol::Circle, 8),
        };
        Marker { symbol, size }
    }
}

/// One record at its projected position, with everything needed to identify it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub record_index: usize,
    pub id: String,
    pub reference_id: String,
    pub document_type: DocumentType,
    pub coordinates: Vec<f64>,
    pub message_type: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: String,
    pub template_id: Option<String>,
    /// Cluster id recorded in the store, if any.
    pub store_cluster_id: Option<i64>,
    /// Label from this run's clustering, if it ran.
    pub cluster_label: Option<usize>,
    pub marker: Marker,
    pub preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub name: String,
    pub points: Vec<ScatterPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum TraceKey {
    Cluster(usize),
    MessageType(String),
}

impl Display for TraceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceKey::Cluster(label) => write!(f, "{}", cluster_name(*label)),
            TraceKey::MessageType(message_type) => write!(f, "{}", message_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterView {
    pub method: ReductionMethod,
    pub dims: TargetDims,
    pub color_by: ColorBy,
    /// Number of clusters, when the view carries cluster labels.
    pub cluster_count: Option<usize>,
    pub axes: Vec<String>,
    pub traces: Vec<Trace>,
}

fn misaligned(stage: &str, got: usize, expected: usize) -> AppError {
    AppError::Other(format!(
        "{stage} covers {got} records but {expected} were joined"
    ))
}

/// `labels[i]` is the cluster label of record `i`.
fn labels_by_record(
    assignments: Option<&[ClusterAssignment]>,
    n_records: usize,
) -> AppResult<Option<Vec<usize>>> {
    let Some(assignments) = assignments else {
        return Ok(None);
    };
    if assignments.len() != n_records {
        return Err(misaligned("clustering", assignments.len(), n_records));
    }
    let mut labels = vec![0; n_records];
    for assignment in assignments {
        let slot = labels
            .get_mut(assignment.record_index)
            .ok_or_else(|| misaligned("clustering", assignment.record_index + 1, n_records))?;
        *slot = assignment.cluster_label;
    }
    Ok(Some(labels))
}

impl ScatterView {
    /// Group projected records into traces.
    ///
    /// Every record becomes exactly one point, matched or not.
    #[tracing::instrument(name = "Building scatter view", level = "debug", skip(records, points, assignments))]
    pub fn build(
        records: &[EnrichedRecord],
        points: &[ProjectedPoint],
        assignments: Option<&[ClusterAssignment]>,
        method: ReductionMethod,
        dims: TargetDims,
        color_by: ColorBy,
    ) -> AppResult<Self> {
        if points.len() != records.len() {
            return Err(misaligned("projection", points.len(), records.len()));
        }
        let labels = labels_by_record(assignments, records.len())?;
        if color_by == ColorBy::Cluster && labels.is_none() {
            return Err(AppError::InvalidParameter {
                name: "color_by",
                message: "colouring by cluster needs cluster assignments".to_string(),
            });
        }

        let mut grouped: BTreeMap<TraceKey, Vec<ScatterPoint>> = BTreeMap::new();
        for point in points {
            let record = records
                .get(point.record_index)
                .ok_or_else(|| misaligned("projection", point.record_index + 1, records.len()))?;
            let cluster_label = labels.as_ref().map(|l| l[point.record_index]);
            let key = match (color_by, cluster_label) {
                (ColorBy::Cluster, Some(label)) => TraceKey::Cluster(label),
                _ => TraceKey::MessageType(record.message_type().to_string()),
            };
            let embedding = &record.embedding;
            grouped.entry(key).or_default().push(ScatterPoint {
                record_index: point.record_index,
                id: embedding.id.clone(),
                reference_id: embedding.reference_id.clone(),
                document_type: embedding.document_type,
                coordinates: point.coordinates.clone(),
                message_type: record.message_type().to_string(),
                sender_id: record.sender_id().to_string(),
                receiver_id: record.receiver_id().to_string(),
                status: record.status().to_string(),
                template_id: record.template_id().map(str::to_string),
                store_cluster_id: embedding.cluster_id,
                cluster_label,
                marker: Marker::for_document(embedding.document_type, dims),
                preview: embedding
                    .preview
                    .as_deref()
                    .map(|p| p.chars().take(PREVIEW_CHARS).collect()),
            });
        }

        let axes = (1..=dims.count())
            .map(|i| format!("{} Component {i}", method.title()))
            .collect();
        Ok(ScatterView {
            method,
            dims,
            color_by,
            cluster_count: labels.map(|l| l.iter().max().map_or(0, |m| m + 1)),
            axes,
            traces: grouped
                .into_iter()
                .map(|(key, points)| Trace {
                    name: key.to_string(),
                    points,
                })
                .collect(),
        })
    }

    pub fn point_count(&self) -> usize {
        self.traces.iter().map(|t| t.points.len()).sum()
    }
}

/// The same records under both projections, side by side in 2D.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonView {
    pub panels: Vec<ScatterView>,
}

impl ComparisonView {
    pub fn new(neighbor_preserving: ScatterView, linear_variance: ScatterView) -> Self {
        ComparisonView {
            panels: vec![neighbor_preserving, linear_variance],
        }
    }

    pub fn title(&self) -> String {
        let names: Vec<&str> = self.panels.iter().map(|p| p.method.title()).collect();
        format!("Cluster Comparison: {}", names.join(" vs "))
    }
}
