use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use clap::ValueEnum;
use futures::future::{try_join, try_join_all};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, info, warn};

use crate::AppResult;
use crate::analysis::convert::records_to_ndarray;
use crate::analysis::{
    self, ClusterOutcome, ClusterParams, ReductionMethod, ReductionParams, TargetDims,
};
use crate::model::{EnrichedRecord, ProjectedPoint};
use crate::report::{
    ClusterDetailsView, ColorBy, ComparisonView, Report, ScatterView, StatisticsView, View,
};
use crate::sources::{MetadataSource, VectorSource};

/// Which views `visualize` should produce.
#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    /// Scatter plot for the chosen method and dimensions
    Scatter,
    /// t-SNE and PCA side by side in 2D
    Comparison,
    /// Counts by type, cluster, sender and document kind
    Stats,
    /// Size and composition of each cluster
    Clusters,
    /// Everything above
    All,
}

/// One scatter view to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterSpec {
    pub method: ReductionMethod,
    pub dims: TargetDims,
    pub color_by: ColorBy,
}

/// Everything a run needs besides the sources.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub scatters: Vec<ScatterSpec>,
    pub comparison: bool,
    pub statistics: bool,
    pub cluster_details: bool,
    pub reduction: ReductionParams,
    pub clustering: ClusterParams,
}

impl RunOptions {
    /// Views of the `visualize` command.
    pub fn visualize(
        method: ReductionMethod,
        dims: TargetDims,
        views: &[ViewKind],
        color_by: ColorBy,
    ) -> Self {
        let wants = |kind: ViewKind| views.contains(&kind) || views.contains(&ViewKind::All);
        let scatters = if wants(ViewKind::Scatter) {
            vec![ScatterSpec {
                method,
                dims,
                color_by,
            }]
        } else {
            Vec::new()
        };
        RunOptions {
            scatters,
            comparison: wants(ViewKind::Comparison),
            statistics: wants(ViewKind::Stats),
            cluster_details: wants(ViewKind::Clusters),
            reduction: ReductionParams::default(),
            clustering: ClusterParams::default(),
        }
    }

    /// Views of the `cluster` command: both 2D projections coloured by cluster,
    /// plus the per-cluster breakdown.
    pub fn clusters() -> Self {
        let scatters = [
            ReductionMethod::NeighborPreserving,
            ReductionMethod::LinearVariance,
        ]
        .into_iter()
        .map(|method| ScatterSpec {
            method,
            dims: TargetDims::Two,
            color_by: ColorBy::Cluster,
        })
        .collect();
        RunOptions {
            scatters,
            comparison: false,
            statistics: false,
            cluster_details: true,
            reduction: ReductionParams::default(),
            clustering: ClusterParams::default(),
        }
    }

    fn projections(&self) -> BTreeSet<(ReductionMethod, TargetDims)> {
        let mut needed: BTreeSet<_> = self.scatters.iter().map(|s| (s.method, s.dims)).collect();
        if self.comparison {
            needed.insert((ReductionMethod::NeighborPreserving, TargetDims::Two));
            needed.insert((ReductionMethod::LinearVariance, TargetDims::Two));
        }
        needed
    }

    /// Views that cannot be built without cluster labels.
    fn requires_clustering(&self) -> bool {
        self.cluster_details || self.scatters.iter().any(|s| s.color_by == ColorBy::Cluster)
    }

    /// The statistics view only adds a per-cluster table, so it clusters when
    /// there are enough records and otherwise leaves that table empty.
    fn needs_clustering(&self, n_records: usize) -> bool {
        if self.requires_clustering() {
            return true;
        }
        let k = self.clustering.k_for(n_records);
        if self.statistics && n_records < k {
            debug!("Skipping clustering of {n_records} records into {k} groups, statistics will have no cluster table");
            return false;
        }
        self.statistics
    }
}

/// What a run produced. Nothing here has been written yet.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub reports: Vec<Report>,
    pub record_count: usize,
    pub metadata_degraded: bool,
}

type Projections = BTreeMap<(ReductionMethod, TargetDims), Vec<ProjectedPoint>>;

/// Fetch, join, analyze and build every requested view.
///
/// A metadata failure degrades the run to placeholder metadata; any other error
/// aborts it before a single report exists.
#[tracing::instrument(name = "Running analysis", level = "info", skip_all)]
pub async fn run(
    vectors: &dyn VectorSource,
    metadata: &dyn MetadataSource,
    options: &RunOptions,
) -> AppResult<RunOutcome> {
    let (embeddings, documents) =
        tokio::join!(vectors.fetch_embeddings(), metadata.fetch_metadata());
    let embeddings = embeddings?;
    let (documents, metadata_degraded) = match documents {
        Ok(documents) => (documents, false),
        Err(e) if e.is_recoverable() => {
            warn!("{e} Continuing with placeholder metadata.");
            (HashMap::new(), true)
        }
        Err(e) => return Err(e),
    };

    if embeddings.is_empty() {
        info!("No embeddings found, nothing to analyze.");
        return Ok(RunOutcome {
            reports: Vec::new(),
            record_count: 0,
            metadata_degraded,
        });
    }

    let records = crate::join::join(embeddings, &documents);
    let data = Arc::new(records_to_ndarray(&records)?);
    let (projections, clusters) = analyze(Arc::clone(&data), options).await?;
    let reports = build_reports(
        &records,
        &data,
        &projections,
        clusters.as_ref(),
        options,
        metadata_degraded,
    )?;
    info!("Built {} reports for {} records", reports.len(), records.len());

    Ok(RunOutcome {
        reports,
        record_count: records.len(),
        metadata_degraded,
    })
}

/// Every reduction and the clustering run on their own blocking worker over the
/// same read-only matrix.
async fn analyze(
    data: Arc<Array2<f64>>,
    options: &RunOptions,
) -> AppResult<(Projections, Option<ClusterOutcome>)> {
    let reductions = options.projections().into_iter().map(|(method, dims)| {
        let data = Arc::clone(&data);
        let params = options.reduction.clone();
        let span = Span::current();
        let handle = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            analysis::reduce(&data, dims, method, &params)
        });
        async move { Ok::<_, crate::AppError>(((method, dims), handle.await??)) }
    });

    let clustering = options.needs_clustering(data.nrows()).then(|| {
        let data = Arc::clone(&data);
        let params = options.clustering.clone();
        let span = Span::current();
        tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            analysis::cluster(&data, &params)
        })
    });
    let clustering = async move {
        match clustering {
            Some(handle) => Ok::<_, crate::AppError>(Some(handle.await??)),
            None => Ok(None),
        }
    };

    let (projections, clusters) = try_join(try_join_all(reductions), clustering).await?;
    Ok((projections.into_iter().collect(), clusters))
}

fn build_reports(
    records: &[EnrichedRecord],
    data: &Array2<f64>,
    projections: &Projections,
    clusters: Option<&ClusterOutcome>,
    options: &RunOptions,
    metadata_degraded: bool,
) -> AppResult<Vec<Report>> {
    let assignments = clusters.map(|c| c.assignments.as_slice());
    let scatter = |method: ReductionMethod, dims: TargetDims, color_by: ColorBy| {
        let points = projections
            .get(&(method, dims))
            .map(Vec::as_slice)
            .unwrap_or_default();
        ScatterView::build(records, points, assignments, method, dims, color_by)
    };

    let mut views = Vec::new();
    for spec in &options.scatters {
        views.push(View::Scatter(scatter(spec.method, spec.dims, spec.color_by)?));
    }
    if options.comparison {
        views.push(View::Comparison(ComparisonView::new(
            scatter(ReductionMethod::NeighborPreserving, TargetDims::Two, ColorBy::Type)?,
            scatter(ReductionMethod::LinearVariance, TargetDims::Two, ColorBy::Type)?,
        )));
    }
    if options.statistics {
        views.push(View::Statistics(StatisticsView::build(records, assignments)));
    }
    if let (true, Some(clusters)) = (options.cluster_details, clusters) {
        views.push(View::ClusterDetails(ClusterDetailsView::build(records, clusters, data)?));
    }

    Ok(views
        .into_iter()
        .map(|view| Report::new(view, records.len(), metadata_degraded))
        .collect())
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use futures::future::BoxFuture;

    use super::*;
    use crate::error::AppError;
    use crate::model::fixtures::{document, embedding};
    use crate::model::{DocumentMetadata, DocumentType, EmbeddingRecord, UNKNOWN};

    struct FixedVectors(Vec<EmbeddingRecord>);

    impl VectorSource for FixedVectors {
        fn fetch_embeddings(&self) -> BoxFuture<'_, AppResult<Vec<EmbeddingRecord>>> {
            let records = self.0.clone();
            async move { Ok(records) }.boxed()
        }
    }

    struct DownVectors;

    impl VectorSource for DownVectors {
        fn fetch_embeddings(&self) -> BoxFuture<'_, AppResult<Vec<EmbeddingRecord>>> {
            async {
                Err(AppError::SourceUnavailable {
                    adapter: "elasticsearch",
                    reason: "connection refused".into(),
                })
            }
            .boxed()
        }
    }

    struct FixedMetadata(HashMap<String, DocumentMetadata>);

    impl MetadataSource for FixedMetadata {
        fn fetch_metadata(&self) -> BoxFuture<'_, AppResult<HashMap<String, DocumentMetadata>>> {
            let map = self.0.clone();
            async move { Ok(map) }.boxed()
        }
    }

    struct DownMetadata;

    impl MetadataSource for DownMetadata {
        fn fetch_metadata(&self) -> BoxFuture<'_, AppResult<HashMap<String, DocumentMetadata>>> {
            async { Err(AppError::MetadataUnavailable("401 Unauthorized".into())) }.boxed()
        }
    }

    fn embeddings(n: usize) -> Vec<EmbeddingRecord> {
        (0..n)
            .map(|i| {
                let doc_type = if i % 4 == 0 {
                    DocumentType::Template
                } else {
                    DocumentType::Message
                };
                let base = if i % 2 == 0 { 1.0 } else { -1.0 };
                let vector = (0..6)
                    .map(|j| base + ((i * 3 + j * 5) % 7) as f32 * 0.1)
                    .collect();
                embedding(&i.to_string(), doc_type, vector)
            })
            .collect()
    }

    fn metadata_for(n: usize) -> HashMap<String, DocumentMetadata> {
        (0..n)
            .map(|i| {
                let message_type = if i % 2 == 0 { "MT700" } else { "MT103" };
                let doc = document(&i.to_string(), message_type, &format!("BANK{}", i % 3));
                (doc.id.clone(), doc)
            })
            .collect()
    }

    fn all_views() -> RunOptions {
        let mut options = RunOptions::visualize(
            ReductionMethod::LinearVariance,
            TargetDims::Two,
            &[ViewKind::All],
            ColorBy::Type,
        );
        options.reduction.tsne_iterations = 250;
        options
    }

    fn statistics(outcome: &RunOutcome) -> &StatisticsView {
        outcome
            .reports
            .iter()
            .find_map(|r| match &r.view {
                View::Statistics(stats) => Some(stats),
                _ => None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn metadata_outage_degrades_to_unknown_senders() {
        let outcome = run(&FixedVectors(embeddings(5)), &DownMetadata, &all_views())
            .await
            .unwrap();

        assert!(outcome.metadata_degraded);
        assert_eq!(outcome.record_count, 5);
        assert!(outcome.reports.iter().all(|r| r.metadata_degraded));
        let stats = statistics(&outcome);
        assert_eq!(stats.top_senders.len(), 1);
        assert_eq!(stats.top_senders[0].label, UNKNOWN);
        assert_eq!(stats.top_senders[0].count, 5);
    }

    #[tokio::test]
    async fn all_views_are_built_in_order() {
        let outcome = run(&FixedVectors(embeddings(12)), &FixedMetadata(metadata_for(12)), &all_views())
            .await
            .unwrap();
        let kinds: Vec<&str> = outcome
            .reports
            .iter()
            .map(|r| match r.view {
                View::Scatter(_) => "scatter",
                View::Comparison(_) => "comparison",
                View::Statistics(_) => "statistics",
                View::ClusterDetails(_) => "clusters",
            })
            .collect();
        assert_eq!(kinds, vec!["scatter", "comparison", "statistics", "clusters"]);
        assert!(!outcome.metadata_degraded);
    }

    #[tokio::test]
    async fn unmatched_records_are_still_plotted() {
        let mut metadata = metadata_for(8);
        metadata.remove("doc-3");
        let options = RunOptions::visualize(
            ReductionMethod::LinearVariance,
            TargetDims::Three,
            &[ViewKind::Scatter],
            ColorBy::Type,
        );

        let outcome = run(&FixedVectors(embeddings(8)), &FixedMetadata(metadata), &options)
            .await
            .unwrap();

        assert_eq!(outcome.reports.len(), 1);
        let View::Scatter(scatter) = &outcome.reports[0].view else {
            panic!("expected a scatter view");
        };
        assert_eq!(scatter.point_count(), 8);
        let unknown = scatter.traces.iter().find(|t| t.name == UNKNOWN).unwrap();
        assert_eq!(unknown.points.len(), 1);
        assert_eq!(unknown.points[0].reference_id, "doc-3");
    }

    #[tokio::test]
    async fn statistics_are_identical_across_runs() {
        let vectors = FixedVectors(embeddings(15));
        let metadata = FixedMetadata(metadata_for(15));
        let first = run(&vectors, &metadata, &all_views()).await.unwrap();
        let second = run(&vectors, &metadata, &all_views()).await.unwrap();
        assert_eq!(statistics(&first), statistics(&second));
        assert_eq!(
            serde_json::to_string(&first.reports).unwrap(),
            serde_json::to_string(&second.reports).unwrap()
        );
    }

    #[tokio::test]
    async fn cluster_command_colours_both_projections_by_cluster() {
        let outcome = run(&FixedVectors(embeddings(10)), &FixedMetadata(metadata_for(10)), &{
            let mut options = RunOptions::clusters();
            options.reduction.tsne_iterations = 250;
            options
        })
        .await
        .unwrap();

        assert_eq!(outcome.reports.len(), 3);
        for report in &outcome.reports[..2] {
            let View::Scatter(scatter) = &report.view else {
                panic!("expected a scatter view");
            };
            assert_eq!(scatter.color_by, ColorBy::Cluster);
            assert_eq!(scatter.cluster_count, Some(2));
        }
    }

    #[tokio::test]
    async fn statistics_of_a_single_record_skip_the_cluster_table() {
        let options = RunOptions::visualize(
            ReductionMethod::LinearVariance,
            TargetDims::Two,
            &[ViewKind::Stats],
            ColorBy::Type,
        );

        let outcome = run(&FixedVectors(embeddings(1)), &FixedMetadata(metadata_for(1)), &options)
            .await
            .unwrap();

        assert_eq!(outcome.reports.len(), 1);
        let stats = statistics(&outcome);
        assert!(stats.by_cluster.is_empty());
        assert_eq!(stats.by_message_type.len(), 1);
        assert_eq!(stats.by_message_type[0].count, 1);
        assert_eq!(stats.by_document_type[0].label, "TEMPLATE");
    }

    #[tokio::test]
    async fn cluster_details_with_fewer_records_than_clusters_are_fatal() {
        let options = RunOptions::visualize(
            ReductionMethod::LinearVariance,
            TargetDims::Two,
            &[ViewKind::Stats, ViewKind::Clusters],
            ColorBy::Type,
        );

        let err = run(&FixedVectors(embeddings(1)), &FixedMetadata(metadata_for(1)), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientData { .. }));
    }

    #[tokio::test]
    async fn cluster_details_report_fit_quality() {
        let outcome = run(&FixedVectors(embeddings(12)), &FixedMetadata(metadata_for(12)), &all_views())
            .await
            .unwrap();
        let details = outcome
            .reports
            .iter()
            .find_map(|r| match &r.view {
                View::ClusterDetails(details) => Some(details),
                _ => None,
            })
            .unwrap();
        let total: f64 = details.clusters.iter().map(|c| c.wcss).sum();
        assert!(details.inertia > 0.0);
        assert!((total - details.inertia).abs() < 1e-9 * details.inertia);
    }

    #[tokio::test]
    async fn empty_store_yields_no_reports() {
        let outcome = run(&FixedVectors(Vec::new()), &FixedMetadata(HashMap::new()), &all_views())
            .await
            .unwrap();
        assert!(outcome.reports.is_empty());
    }

    #[tokio::test]
    async fn store_outage_is_fatal() {
        let err = run(&DownVectors, &FixedMetadata(HashMap::new()), &all_views())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn too_few_records_for_pca_is_fatal() {
        let err = run(&FixedVectors(embeddings(2)), &DownMetadata, &all_views())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientData { .. }));
    }

    #[tokio::test]
    async fn ragged_vectors_are_fatal() {
        let mut records = embeddings(6);
        records[4].vector.push(0.0);
        let err = run(&FixedVectors(records), &DownMetadata, &all_views())
            .await
            .unwrap_err();
        match err {
            AppError::DimensionMismatch { record_ids, .. } => assert_eq!(record_ids, vec!["emb-4"]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
