use ndarray::Zip;
use ndarray::prelude::*;
use ndarray_rand::RandomExt;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand_distr::Normal;
use tracing::{debug, info_span, trace};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::AppResult;
use crate::analysis::linalg::euclidean_distances;
use crate::analysis::traits::Reducer;
use crate::analysis::{DEFAULT_SEED, TargetDims};
use crate::error::AppError;
use crate::logging::progress_style;

const DEFAULT_PERPLEXITY: f64 = 30.0;
const DEFAULT_MAX_ITER: usize = 1000;
const DEFAULT_EARLY_EXAGGERATION: f64 = 12.0;
const DEFAULT_EXAGGERATION_ITER: usize = 250;

const MACHINE_EPSILON: f64 = f64::EPSILON;
const PERPLEXITY_STEPS: usize = 100;
const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const MIN_GAIN: f64 = 0.01;
const MIN_GRAD_NORM: f64 = 1e-7;
const INIT_STD: f64 = 1e-4;
const CHECKPOINT_EVERY: usize = 50;

/// Exact t-SNE with a seeded random start.
///
/// Cost is quadratic in the number of records, which is fine for the few thousand
/// embeddings a store page-through returns.
#[derive(Debug, Clone)]
pub struct Tsne {
    /// Target neighbourhood size. Clamped to `n - 1` at fit time.
    pub perplexity: f64,
    pub max_iter: usize,
    pub early_exaggeration: f64,
    /// Iterations run with exaggerated attraction and low momentum.
    pub exaggeration_iter: usize,
    /// `None` picks `max(n / early_exaggeration / 4, 50)`.
    pub learning_rate: Option<f64>,
    pub seed: u64,
}

impl Default for Tsne {
    fn default() -> Self {
        Tsne {
            perplexity: DEFAULT_PERPLEXITY,
            max_iter: DEFAULT_MAX_ITER,
            early_exaggeration: DEFAULT_EARLY_EXAGGERATION,
            exaggeration_iter: DEFAULT_EXAGGERATION_ITER,
            learning_rate: None,
            seed: DEFAULT_SEED,
        }
    }
}

impl Tsne {
    pub const MIN_RECORDS: usize = 2;

    pub fn set_perplexity(&mut self, perplexity: f64) -> &mut Self {
        self.perplexity = perplexity;
        self
    }

    pub fn set_max_iter(&mut self, max_iter: usize) -> &mut Self {
        self.max_iter = max_iter;
        self
    }

    pub fn set_seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> AppResult<()> {
        if !(self.perplexity.is_finite() && self.perplexity > 0.0) {
            return Err(AppError::InvalidParameter {
                name: "perplexity",
                message: format!("must be a positive number, got {}", self.perplexity),
            });
        }
        if !(self.early_exaggeration.is_finite() && self.early_exaggeration >= 1.0) {
            return Err(AppError::InvalidParameter {
                name: "early_exaggeration",
                message: format!("must be at least 1, got {}", self.early_exaggeration),
            });
        }
        match self.learning_rate {
            Some(lr) if !(lr.is_finite() && lr > 0.0) => Err(AppError::InvalidParameter {
                name: "learning_rate",
                message: format!("must be a positive number, got {lr}"),
            }),
            _ => Ok(()),
        }
    }

    /// Perplexity actually used for `n_samples` records.
    pub fn effective_perplexity(&self, n_samples: usize) -> f64 {
        self.perplexity.min(n_samples.saturating_sub(1) as f64)
    }

    fn learning_rate_for(&self, n_samples: usize) -> f64 {
        self.learning_rate
            .unwrap_or_else(|| (n_samples as f64 / self.early_exaggeration / 4.0).max(50.0))
    }

    #[tracing::instrument(name = "Performing t-SNE", level = "info", skip(self, data))]
    pub fn embed(&self, data: &Array2<f64>, n_components: usize) -> AppResult<Array2<f64>> {
        let n_samples = data.nrows();
        if n_samples < Self::MIN_RECORDS {
            return Err(AppError::InsufficientData {
                stage: "neighbor-preserving projection",
                required: Self::MIN_RECORDS,
                actual: n_samples,
            });
        }
        self.validate()?;

        let perplexity = self.effective_perplexity(n_samples);
        if perplexity < self.perplexity {
            debug!(
                "Perplexity {} clamped to {} for {} records",
                self.perplexity, perplexity, n_samples
            );
        }

        let distances = euclidean_distances(data, data, None, true); // (n_samples, n_samples)
        let p = joint_probabilities(&distances, perplexity);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let init = Normal::new(0.0, INIT_STD).map_err(|e| AppError::Other(e.to_string()))?;
        let y = Array2::<f64>::random_using((n_samples, n_components), init, &mut rng);

        Ok(self.optimize(&p, y))
    }

    fn optimize(&self, p: &Array2<f64>, mut y: Array2<f64>) -> Array2<f64> {
        let n_samples = y.nrows();
        let learning_rate = self.learning_rate_for(n_samples);
        let mut update = Array2::<f64>::zeros(y.dim());
        let mut gains = Array2::<f64>::ones(y.dim());

        let span = info_span!("Optimizing layout");
        span.pb_set_style(&progress_style());
        span.pb_set_length(self.max_iter as u64);
        let span_enter = span.enter();

        for iter in 0..self.max_iter {
            let exaggerated = iter < self.exaggeration_iter;
            let (exaggeration, momentum) = if exaggerated {
                (self.early_exaggeration, INITIAL_MOMENTUM)
            } else {
                (1.0, FINAL_MOMENTUM)
            };

            let grad = kl_gradient(p, &y, exaggeration);

            Zip::from(&mut gains)
                .and(&update)
                .and(&grad)
                .for_each(|gain, &u, &g| {
                    *gain = if u * g < 0.0 { *gain + 0.2 } else { *gain * 0.8 };
                    *gain = gain.max(MIN_GAIN);
                });
            Zip::from(&mut update)
                .and(&gains)
                .and(&grad)
                .for_each(|u, &gain, &g| *u = momentum * *u - learning_rate * gain * g);
            y += &update;
            if let Some(mean) = y.mean_axis(Axis(0)) {
                y -= &mean;
            }
            span.pb_inc(1);

            if (iter + 1) % CHECKPOINT_EVERY == 0 {
                trace!("Iteration {}: KL divergence {:.4}", iter + 1, kl_divergence(p, &y));
            }
            let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
            if !exaggerated && grad_norm < MIN_GRAD_NORM {
                debug!("Gradient vanished after {} iterations", iter + 1);
                break;
            }
        }

        std::mem::drop(span_enter);
        std::mem::drop(span);
        y
    }
}

impl Reducer for Tsne {
    fn reduce(&self, data: &Array2<f64>, dims: TargetDims) -> AppResult<Array2<f64>> {
        self.embed(data, dims.count())
    }
}

/// Row-conditional neighbour probabilities whose entropy matches `ln(perplexity)`.
///
/// Each row's precision is found by bisection on squared distances shifted by the
/// row minimum, so the nearest neighbour always contributes `exp(0)` and the sum
/// cannot underflow.
fn conditional_probabilities(distances: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let n = distances.nrows();
    let desired_entropy = perplexity.ln();
    let mut p = Array2::<f64>::zeros((n, n));

    for (i, mut p_row) in p.axis_iter_mut(Axis(0)).enumerate() {
        let row = distances.row(i);
        let nearest = row
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, d)| *d)
            .fold(f64::INFINITY, f64::min);
        if !nearest.is_finite() {
            continue;
        }

        let mut beta = 1.0;
        let mut beta_min = f64::NEG_INFINITY;
        let mut beta_max = f64::INFINITY;
        for _ in 0..PERPLEXITY_STEPS {
            let mut sum_p = 0.0;
            let mut sum_dp = 0.0;
            for (j, pj) in p_row.iter_mut().enumerate() {
                if j == i {
                    *pj = 0.0;
                    continue;
                }
                let d = row[j] - nearest;
                *pj = (-d * beta).exp();
                sum_p += *pj;
                sum_dp += d * *pj;
            }
            let entropy = sum_p.ln() + beta * sum_dp / sum_p;
            p_row.mapv_inplace(|v| v / sum_p);

            let diff = entropy - desired_entropy;
            if diff.abs() <= PERPLEXITY_TOLERANCE {
                break;
            }
            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max.is_infinite() {
                    beta * 2.0
                } else {
                    (beta + beta_max) / 2.0
                };
            } else {
                beta_max = beta;
                beta = if beta_min.is_infinite() {
                    beta / 2.0
                } else {
                    (beta + beta_min) / 2.0
                };
            }
        }
    }
    p
}

/// Symmetrized, globally normalized affinities.
fn joint_probabilities(distances: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let conditional = conditional_probabilities(distances, perplexity);
    let joint = &conditional + &conditional.t();
    let total = joint.sum().max(MACHINE_EPSILON);
    joint / total
}

/// Student-t kernel of the layout with a zero diagonal.
fn student_t_kernel(y: &Array2<f64>) -> Array2<f64> {
    let mut num = euclidean_distances(y, y, None, true); // (n_samples, n_samples)
    num.mapv_inplace(|d| 1.0 / (1.0 + d));
    num.diag_mut().fill(0.0);
    num
}

fn kl_gradient(p: &Array2<f64>, y: &Array2<f64>, exaggeration: f64) -> Array2<f64> {
    let num = student_t_kernel(y);
    let sum_num = num.sum().max(MACHINE_EPSILON);
    let q = num.mapv(|v| (v / sum_num).max(MACHINE_EPSILON));
    let pq: Array2<f64> = (p * exaggeration - &q) * &num; // (n_samples, n_samples)
    let weights = pq.sum_axis(Axis(1)).insert_axis(Axis(1)); // (n_samples, 1)
    (y * &weights - pq.dot(y)) * 4.0
}

fn kl_divergence(p: &Array2<f64>, y: &Array2<f64>) -> f64 {
    let num = student_t_kernel(y);
    let sum_num = num.sum().max(MACHINE_EPSILON);
    Zip::from(p).and(&num).fold(0.0, |acc, &pij, &nij| {
        let qij = (nij / sum_num).max(MACHINE_EPSILON);
        acc + pij * (pij.max(MACHINE_EPSILON) / qij).ln()
    })
}
