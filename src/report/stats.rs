use ndarray::Array2;
use serde::Serialize;

use crate::AppResult;
use crate::analysis::ClusterOutcome;
use crate::error::AppError;
use crate::model::{ClusterAssignment, EnrichedRecord};
use crate::report::{CountEntry, cluster_name, count_by};

const TOP_SENDERS: usize = 10;
const TOP_CLUSTER_SENDERS: usize = 3;

/// Independent tallies over the joined records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatisticsView {
    pub by_message_type: Vec<CountEntry>,
    /// Per label of this run's clustering, in label order. Empty when clustering did not run.
    pub by_cluster: Vec<CountEntry>,
    /// Per cluster id recorded in the store, for records that carry one.
    pub by_store_cluster: Vec<CountEntry>,
    pub top_senders: Vec<CountEntry>,
    pub by_document_type: Vec<CountEntry>,
}

fn cluster_sizes(assignments: &[ClusterAssignment]) -> Vec<usize> {
    let k = assignments
        .iter()
        .map(|a| a.cluster_label + 1)
        .max()
        .unwrap_or(0);
    let mut sizes = vec![0; k];
    for assignment in assignments {
        sizes[assignment.cluster_label] += 1;
    }
    sizes
}

impl StatisticsView {
    #[tracing::instrument(name = "Building statistics view", level = "debug", skip_all)]
    pub fn build(records: &[EnrichedRecord], assignments: Option<&[ClusterAssignment]>) -> Self {
        let mut top_senders = count_by(records.iter().map(|r| r.sender_id()));
        top_senders.truncate(TOP_SENDERS);

        let by_cluster = assignments
            .map(cluster_sizes)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(label, count)| CountEntry {
                label: cluster_name(label),
                count,
            })
            .collect();

        StatisticsView {
            by_message_type: count_by(records.iter().map(|r| r.message_type())),
            by_cluster,
            by_store_cluster: count_by(
                records
                    .iter()
                    .filter_map(|r| r.embedding.cluster_id)
                    .map(|id| id.to_string()),
            ),
            top_senders,
            by_document_type: count_by(
                records
                    .iter()
                    .map(|r| r.embedding.document_type.to_string()),
            ),
        }
    }
}

/// Composition of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterDetail {
    pub cluster_label: usize,
    pub name: String,
    pub size: usize,
    /// Fraction of all records that fell in this cluster.
    pub share: f64,
    /// Within-cluster sum of squared distances to the centroid.
    pub wcss: f64,
    pub message_types: Vec<CountEntry>,
    pub top_senders: Vec<CountEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterDetailsView {
    pub cluster_count: usize,
    /// Total of every cluster's `wcss`, lower means tighter clusters.
    pub inertia: f64,
    pub clusters: Vec<ClusterDetail>,
}

impl ClusterDetailsView {
    #[tracing::instrument(name = "Building cluster details", level = "debug", skip_all)]
    pub fn build(
        records: &[EnrichedRecord],
        outcome: &ClusterOutcome,
        data: &Array2<f64>,
    ) -> AppResult<Self> {
        let assignments = outcome.assignments.as_slice();
        if assignments.len() != records.len() {
            return Err(AppError::Other(format!(
                "clustering covers {} records but {} were joined",
                assignments.len(),
                records.len()
            )));
        }
        let sizes = cluster_sizes(assignments);
        let wcss = outcome.wcss(data)?;
        let mut members: Vec<Vec<&EnrichedRecord>> = vec![Vec::new(); sizes.len()];
        for assignment in assignments {
            let record = records.get(assignment.record_index).ok_or_else(|| {
                AppError::Other(format!(
                    "cluster assignment for record {} is out of range",
                    assignment.record_index
                ))
            })?;
            members[assignment.cluster_label].push(record);
        }

        let total = records.len().max(1) as f64;
        let clusters = members
            .into_iter()
            .enumerate()
            .map(|(label, members)| {
                let mut top_senders = count_by(members.iter().map(|r| r.sender_id()));
                top_senders.truncate(TOP_CLUSTER_SENDERS);
                ClusterDetail {
                    cluster_label: label,
                    name: cluster_name(label),
                    size: members.len(),
                    share: members.len() as f64 / total,
                    wcss: wcss.get(label).copied().unwrap_or_default(),
                    message_types: count_by(members.iter().map(|r| r.message_type())),
                    top_senders,
                }
            })
            .collect();

        Ok(ClusterDetailsView {
            cluster_count: sizes.len(),
            inertia: outcome.inertia,
            clusters,
        })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::model::fixtures::{document, embedding};
    use crate::model::{DocumentType, Metadata, UNKNOWN};

    fn record(id: &str, doc_type: DocumentType, meta: Option<(&str, &str)>) -> EnrichedRecord {
        EnrichedRecord {
            embedding: embedding(id, doc_type, vec![0.0; 2]),
            metadata: meta.map_or(Metadata::Unknown, |(t, s)| {
                Metadata::Known(document(id, t, s))
            }),
        }
    }

    fn sample() -> Vec<EnrichedRecord> {
        let mut records = vec![
            record("1", DocumentType::Template, Some(("MT700", "BANKUS33"))),
            record("2", DocumentType::Message, Some(("MT700", "BANKUS33"))),
            record("3", DocumentType::Message, Some(("MT103", "BANKDEFF"))),
            record("4", DocumentType::Message, None),
        ];
        records[1].embedding.cluster_id = Some(3);
        records[2].embedding.cluster_id = Some(3);
        records
    }

    fn assignments(labels: &[usize]) -> Vec<ClusterAssignment> {
        labels
            .iter()
            .enumerate()
            .map(|(record_index, &cluster_label)| ClusterAssignment {
                record_index,
                cluster_label,
            })
            .collect()
    }

    /// One feature per record, `[0, 1, 5, 2]` for the sample.
    fn features() -> Array2<f64> {
        array![[0.0], [1.0], [5.0], [2.0]]
    }

    fn outcome(labels: &[usize], centroids: Array2<f64>) -> ClusterOutcome {
        ClusterOutcome {
            assignments: assignments(labels),
            k: centroids.nrows(),
            inertia: 2.0,
            centroids,
        }
    }

    fn entry(label: &str, count: usize) -> CountEntry {
        CountEntry {
            label: label.to_string(),
            count,
        }
    }

    #[test]
    fn statistics_count_every_dimension() {
        let labels = assignments(&[0, 1, 1, 0]);
        let view = StatisticsView::build(&sample(), Some(&labels));
        assert_eq!(
            view.by_message_type,
            vec![entry("MT700", 2), entry("MT103", 1), entry(UNKNOWN, 1)]
        );
        assert_eq!(view.by_cluster, vec![entry("Cluster 0", 2), entry("Cluster 1", 2)]);
        assert_eq!(view.by_store_cluster, vec![entry("3", 2)]);
        assert_eq!(view.top_senders[0], entry("BANKUS33", 2));
        assert_eq!(
            view.by_document_type,
            vec![entry("MESSAGE", 3), entry("TEMPLATE", 1)]
        );
    }

    #[test]
    fn statistics_without_clustering_leave_cluster_table_empty() {
        let view = StatisticsView::build(&sample(), None);
        assert!(view.by_cluster.is_empty());
        let total: usize = view.by_message_type.iter().map(|e| e.count).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn top_senders_are_capped_at_ten() {
        let records: Vec<EnrichedRecord> = (0..15)
            .map(|i| {
                let sender = format!("BANK{i:02}");
                record(&i.to_string(), DocumentType::Message, Some(("MT103", sender.as_str())))
            })
            .collect();
        let view = StatisticsView::build(&records, None);
        assert_eq!(view.top_senders.len(), 10);
    }

    #[test]
    fn cluster_details_describe_each_label() {
        let fit = outcome(&[0, 0, 1, 0], array![[1.0], [5.0]]);
        let view = ClusterDetailsView::build(&sample(), &fit, &features()).unwrap();
        assert_eq!(view.cluster_count, 2);
        assert!((view.inertia - 2.0).abs() < 1e-12);

        let first = &view.clusters[0];
        assert_eq!(first.name, "Cluster 0");
        assert_eq!(first.size, 3);
        assert!((first.share - 0.75).abs() < 1e-12);
        assert_eq!(first.message_types[0], entry("MT700", 2));
        assert_eq!(first.top_senders, vec![entry("BANKUS33", 2), entry(UNKNOWN, 1)]);
        // (0 - 1)^2 + (1 - 1)^2 + (2 - 1)^2
        assert!((first.wcss - 2.0).abs() < 1e-12);

        let second = &view.clusters[1];
        assert_eq!(second.size, 1);
        assert_eq!(second.top_senders, vec![entry("BANKDEFF", 1)]);
        assert!(second.wcss.abs() < 1e-12);
    }

    #[test]
    fn cluster_details_reject_partial_assignments() {
        let fit = outcome(&[0, 1], array![[0.5], [5.0]]);
        assert!(ClusterDetailsView::build(&sample(), &fit, &features()).is_err());
    }

    #[test]
    fn cluster_details_reject_a_matrix_the_fit_never_saw() {
        let fit = outcome(&[0, 0, 1, 0], array![[1.0], [5.0]]);
        let wider = array![[0.0, 0.0], [1.0, 0.0], [5.0, 0.0], [2.0, 0.0]];
        assert!(ClusterDetailsView::build(&sample(), &fit, &wider).is_err());
    }
}
