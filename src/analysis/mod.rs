pub(crate) mod convert;
pub mod kmeans;
pub(crate) mod linalg;
pub mod pca;
pub mod traits;
pub mod tsne;

use std::fmt::Display;

use clap::ValueEnum;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::AppResult;
use crate::analysis::kmeans::KMeans;
use crate::analysis::pca::Pca;
use crate::analysis::traits::{Clusterer, Reducer};
use crate::analysis::tsne::Tsne;
use crate::error::AppError;
use crate::model::{ClusterAssignment, ProjectedPoint};

/// Seed shared by every stochastic stage of a run.
pub const DEFAULT_SEED: u64 = 42;

/// Projection used to bring embeddings down to 2 or 3 dimensions.
#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReductionMethod {
    /// t-SNE: keeps local neighbourhoods, seeded and iterative
    #[value(name = "tsne")]
    #[serde(rename = "tsne")]
    NeighborPreserving,
    /// PCA: orthogonal directions of maximum variance, deterministic
    #[value(name = "pca")]
    #[serde(rename = "pca")]
    LinearVariance,
}

impl ReductionMethod {
    /// Short name used in artifact file names.
    pub fn label(&self) -> &'static str {
        match self {
            ReductionMethod::NeighborPreserving => "tsne",
            ReductionMethod::LinearVariance => "pca",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ReductionMethod::NeighborPreserving => "t-SNE",
            ReductionMethod::LinearVariance => "PCA",
        }
    }
}

impl Display for ReductionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetDims {
    #[value(name = "2d")]
    #[serde(rename = "2d")]
    Two,
    #[value(name = "3d")]
    #[serde(rename = "3d")]
    Three,
}

impl TargetDims {
    pub fn count(&self) -> usize {
        match self {
            TargetDims::Two => 2,
            TargetDims::Three => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TargetDims::Two => "2d",
            TargetDims::Three => "3d",
        }
    }
}

impl Display for TargetDims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Knobs for the reduction stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionParams {
    pub seed: u64,
    pub perplexity: f64,
    pub tsne_iterations: usize,
}

impl Default for ReductionParams {
    fn default() -> Self {
        let tsne = Tsne::default();
        ReductionParams {
            seed: DEFAULT_SEED,
            perplexity: tsne.perplexity,
            tsne_iterations: tsne.max_iter,
        }
    }
}

impl ReductionParams {
    fn reducer(&self, method: ReductionMethod) -> Box<dyn Reducer> {
        match method {
            ReductionMethod::NeighborPreserving => {
                let mut tsne = Tsne::default();
                tsne.set_perplexity(self.perplexity)
                    .set_max_iter(self.tsne_iterations)
                    .set_seed(self.seed);
                Box::new(tsne)
            }
            ReductionMethod::LinearVariance => Box::new(Pca),
        }
    }
}

/// Project the rows of `data`. Point `i` always describes row `i`.
pub fn reduce(
    data: &Array2<f64>,
    dims: TargetDims,
    method: ReductionMethod,
    params: &ReductionParams,
) -> AppResult<Vec<ProjectedPoint>> {
    let projected = params.reducer(method).reduce(data, dims)?; // (n_records, dims)
    debug!(
        "Reduced {} records to {} with {}",
        projected.nrows(),
        dims,
        method.title()
    );
    Ok(projected
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(record_index, row)| ProjectedPoint {
            record_index,
            coordinates: row.to_vec(),
        })
        .collect())
}

/// Cluster count used when none is requested: `clamp(n / 10, 2, 5)`.
///
/// An exploratory rule of thumb kept for parity with earlier reports, not a
/// model-selection criterion. Override it with an explicit count.
pub fn auto_k(n_records: usize) -> usize {
    (n_records / 10).clamp(2, 5)
}

/// Knobs for the clustering stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterParams {
    /// `None` falls back to [`auto_k`].
    pub k: Option<usize>,
    pub seed: u64,
    pub n_init: usize,
    pub max_iterations: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        let kmeans = KMeans::new(0);
        ClusterParams {
            k: None,
            seed: DEFAULT_SEED,
            n_init: kmeans.init.n_init(),
            max_iterations: kmeans.max_iterations,
        }
    }
}

impl ClusterParams {
    /// Cluster count a run over `n_records` records would use.
    pub fn k_for(&self, n_records: usize) -> usize {
        self.k.unwrap_or_else(|| auto_k(n_records))
    }

    fn clusterer(&self, n_records: usize) -> KMeans {
        let mut kmeans = KMeans::new(self.k_for(n_records));
        kmeans
            .set_n_init(self.n_init)
            .set_max_iterations(self.max_iterations)
            .set_seed(self.seed);
        kmeans
    }
}

/// Labels, centroids and fit quality of a clustering run.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub assignments: Vec<ClusterAssignment>,
    /// `(k, n_features)`, row `c` is the centroid of label `c`.
    pub centroids: Array2<f64>,
    pub k: usize,
    /// Sum of squared distances of every record to its centroid.
    pub inertia: f64,
}

impl ClusterOutcome {
    /// Within-cluster sum of squares per label, over the matrix that was clustered.
    pub fn wcss(&self, data: &Array2<f64>) -> AppResult<Vec<f64>> {
        if self.assignments.len() != data.nrows() || self.centroids.ncols() != data.ncols() {
            return Err(AppError::Other(format!(
                "clustering of {} records with {} features does not match a {}x{} matrix",
                self.assignments.len(),
                self.centroids.ncols(),
                data.nrows(),
                data.ncols()
            )));
        }
        let mut per_cluster = vec![0.0; self.centroids.nrows()];
        for assignment in &self.assignments {
            let label = assignment.cluster_label;
            if label >= self.centroids.nrows() || assignment.record_index >= data.nrows() {
                return Err(AppError::Other(format!(
                    "assignment of record {} to label {label} is out of range",
                    assignment.record_index
                )));
            }
            let diff = &data.row(assignment.record_index) - &self.centroids.row(label);
            per_cluster[label] += diff.mapv(|v| v * v).sum();
        }
        Ok(per_cluster)
    }
}

pub fn cluster_with(clusterer: &dyn Clusterer, data: &Array2<f64>) -> AppResult<ClusterOutcome> {
    let fit = clusterer.fit(data)?;
    debug!(
        "Clustered {} records into {} groups of sizes {:?} after {} iterations ({} relocations), inertia {:.4}",
        fit.labels.len(),
        fit.centers.nrows(),
        fit.sizes(),
        fit.n_iter,
        fit.relocations,
        fit.inertia
    );
    let assignments = fit
        .labels
        .iter()
        .enumerate()
        .map(|(record_index, &cluster_label)| ClusterAssignment {
            record_index,
            cluster_label,
        })
        .collect();
    Ok(ClusterOutcome {
        assignments,
        k: fit.centers.nrows(),
        centroids: fit.centers,
        inertia: fit.inertia,
    })
}

/// k-means over the rows of `data`.
pub fn cluster(data: &Array2<f64>, params: &ClusterParams) -> AppResult<ClusterOutcome> {
    cluster_with(&params.clusterer(data.nrows()), data)
}
