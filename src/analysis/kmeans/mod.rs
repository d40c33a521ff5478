mod lloyd;
mod utils;

use std::collections::HashSet;

use ndarray::prelude::*;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::seq::index::sample;
use ndarray_rand::rand::{Rng, SeedableRng};
use tracing::{debug, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::AppResult;
use crate::analysis::DEFAULT_SEED;
use crate::analysis::linalg::{euclidean_distances, row_norms};
use crate::analysis::traits::Clusterer;
use crate::error::AppError;
use crate::logging::progress_style;

static DEFAULT_N_INIT: usize = 10;
static DEFAULT_MAX_ITER: usize = 300;
static DEFAULT_TOLERANCE: f64 = 1e-4;

/// Centroid seeding strategy, carrying the number of initializations to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KMeansInit {
    Random(usize),
    KMeansPlusPlus(usize),
}

/// Greedy k-means++: each new center is the best of a few candidates drawn with
/// probability proportional to the squared distance to the nearest existing center.
fn kmeans_plus_plus(
    x: &Array2<f64>, // x = (n_samples, n_features)
    n_clusters: usize,
    x_squared_norms: &Array1<f64>, // x_squared_norms = (n_samples,)
    rng: &mut StdRng,
    n_local_trials: Option<usize>,
) -> (Array2<f64>, Vec<usize>) {
    let n_samples = x.nrows();
    let n_local_trials = n_local_trials.unwrap_or(2 + (n_clusters as f64).ln() as usize);
    let mut centers: Array2<f64> = Array2::<f64>::zeros((n_clusters, x.ncols()));
    let mut indices: Vec<usize> = Vec::with_capacity(n_clusters);

    let first = rng.random_range(0..n_samples);
    centers.row_mut(0).assign(&x.row(first));
    indices.push(first);

    // closest_dist_sq = (n_samples,)
    let mut closest_dist_sq: Array1<f64> =
        euclidean_distances(&x.slice(s![first..first + 1, ..]), x, Some(x_squared_norms), true)
            .row(0)
            .to_owned();
    let mut current_pot = closest_dist_sq.sum();

    for c in 1..n_clusters {
        let rand_vals: Array1<f64> =
            (0..n_local_trials).map(|_| rng.random::<f64>() * current_pot).collect();
        let cumulative = utils::cumsum(&closest_dist_sq);
        let candidate_ids: Vec<usize> = utils::searchsorted(&cumulative, &rand_vals)
            .into_iter()
            .map(|id| id.min(n_samples - 1))
            .collect();

        // distance_to_candidates = (n_local_trials, n_samples)
        let mut distance_to_candidates = euclidean_distances(
            &x.select(Axis(0), &candidate_ids),
            x,
            Some(x_squared_norms),
            true,
        );
        for mut row in distance_to_candidates.axis_iter_mut(Axis(0)) {
            row.zip_mut_with(&closest_dist_sq, |d, &closest| *d = d.min(closest));
        }
        let candidates_pot = distance_to_candidates.sum_axis(Axis(1)); // (n_local_trials,)
        let best = utils::argmin(candidates_pot.iter()).unwrap_or(0);

        current_pot = candidates_pot[best];
        closest_dist_sq = distance_to_candidates.row(best).to_owned();
        let best_candidate = candidate_ids[best];
        centers.row_mut(c).assign(&x.row(best_candidate));
        indices.push(best_candidate);
    }
    (centers, indices)
}

impl KMeansInit {
    pub fn n_init(&self) -> usize {
        match self {
            KMeansInit::Random(n) | KMeansInit::KMeansPlusPlus(n) => *n,
        }
    }

    pub fn set_n_init(&mut self, n_init: usize) {
        match self {
            KMeansInit::Random(n) | KMeansInit::KMeansPlusPlus(n) => *n = n_init,
        }
    }

    fn init_centroids(
        &self,
        x: &Array2<f64>,               // x = (n_samples, n_features)
        x_squared_norms: &Array1<f64>, // x_squared_norms = (n_samples,)
        rng: &mut StdRng,
        n_clusters: usize,
    ) -> Array2<f64> {
        match self {
            KMeansInit::Random(_) => {
                let seeds = sample(rng, x.nrows(), n_clusters).into_vec();
                x.select(Axis(0), &seeds)
            }
            KMeansInit::KMeansPlusPlus(_) => {
                kmeans_plus_plus(x, n_clusters, x_squared_norms, rng, None).0
            }
        }
    }
}

impl Default for KMeansInit {
    fn default() -> Self {
        KMeansInit::KMeansPlusPlus(DEFAULT_N_INIT)
    }
}

/// Best of several seeded Lloyd runs.
#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// Dense labels in `0..k`, one per input row.
    pub labels: Array1<usize>,
    pub centers: Array2<f64>,
    /// Weighted within-cluster sum of squares.
    pub inertia: f64,
    pub n_iter: usize,
    pub relocations: usize,
}

impl KMeansFit {
    /// Within-cluster sum of squares for each cluster.
    /// Returns `None` if `x` does not match the fitted labels.
    pub fn wcss(&self, x: &Array2<f64>) -> Option<Array1<f64>> {
        if self.labels.len() != x.nrows() || self.centers.ncols() != x.ncols() {
            return None;
        }
        let mut per_cluster = Array1::<f64>::zeros(self.centers.nrows());
        for (idx, &label) in self.labels.iter().enumerate() {
            let diff = &x.row(idx) - &self.centers.row(label);
            per_cluster[label] += diff.mapv(|v| v * v).sum();
        }
        Some(per_cluster)
    }

    /// Number of rows carrying each label.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centers.nrows()];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }
}

#[derive(Debug, Clone)]
pub struct KMeans {
    pub k: usize,
    pub init: KMeansInit,
    pub max_iterations: usize,
    /// Relative to the mean feature variance.
    pub tolerance: f64,
    pub seed: u64,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        KMeans {
            k,
            init: KMeansInit::default(),
            max_iterations: DEFAULT_MAX_ITER,
            tolerance: DEFAULT_TOLERANCE,
            seed: DEFAULT_SEED,
        }
    }

    pub fn set_n_init(&mut self, n_init: usize) -> &mut Self {
        self.init.set_n_init(n_init);
        self
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> &mut Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn set_seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    fn validate(&self, n_samples: usize) -> AppResult<()> {
        if self.k == 0 {
            return Err(AppError::InvalidParameter {
                name: "clusters",
                message: "must be at least 1".to_string(),
            });
        }
        if self.init.n_init() == 0 {
            return Err(AppError::InvalidParameter {
                name: "n_init",
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_iterations == 0 {
            return Err(AppError::InvalidParameter {
                name: "max_iterations",
                message: "must be at least 1".to_string(),
            });
        }
        if n_samples < self.k {
            return Err(AppError::InsufficientData {
                stage: "clustering",
                required: self.k,
                actual: n_samples,
            });
        }
        Ok(())
    }

    #[tracing::instrument(name = "Performing k-means", level = "info", skip(self, x), fields(k = self.k))]
    pub fn fit(&self, x: &Array2<f64>) -> AppResult<KMeansFit> {
        self.validate(x.nrows())?;

        let sample_weight = Array1::<f64>::ones(x.nrows()); // sample_weight = (n_samples,)
        let x_mean: Array1<f64> = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::<f64>::zeros(x.ncols())); // x_mean = (n_features,)
        let centered = x - &x_mean;
        let x_squared_norms = row_norms(&centered, true); // x_squared_norms = (n_samples,)
        let tol = self.tolerance * centered.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<lloyd::LloydRun> = None;

        let n_init = self.init.n_init();
        let span = info_span!("Trying initializations");
        span.pb_set_style(&progress_style());
        span.pb_set_length(n_init as u64);
        let span_enter = span.enter();

        for _ in 0..n_init {
            let centers_init =
                self.init
                    .init_centroids(&centered, &x_squared_norms, &mut rng, self.k); // centers_init = (k, n_features)
            let run = lloyd::kmeans_single_lloyd(
                &centered,
                &sample_weight,
                &centers_init,
                self.max_iterations,
                tol,
            );
            debug!(
                "Initialization finished after {} iterations with inertia {:.4}",
                run.n_iter, run.inertia
            );
            if best.as_ref().is_none_or(|b| run.inertia < b.inertia) {
                best = Some(run);
            }
            span.pb_inc(1);
        }
        std::mem::drop(span_enter);
        std::mem::drop(span);

        let Some(best) = best else {
            return Err(AppError::Other("k-means produced no run".to_string()));
        };
        let centers = best.centers + &x_mean;
        let distinct_clusters = best.labels.iter().collect::<HashSet<_>>().len();
        if distinct_clusters < self.k {
            warn!(
                "Number of distinct clusters ({}) found smaller than n_clusters ({}).",
                distinct_clusters, self.k
            );
        }

        Ok(KMeansFit {
            labels: best.labels,
            centers,
            inertia: best.inertia,
            n_iter: best.n_iter,
            relocations: best.relocations,
        })
    }
}

impl Clusterer for KMeans {
    fn fit(&self, data: &Array2<f64>) -> AppResult<KMeansFit> {
        KMeans::fit(self, data)
    }
}
