use ndarray::prelude::*;
use tracing::debug;

use crate::analysis::kmeans::utils::argmin;
use crate::analysis::linalg::{euclidean_distances, row_norms};

static CHUNK_SIZE: usize = 256;

/// Outcome of one Lloyd run from a single initialization.
#[derive(Debug, Clone)]
pub struct LloydRun {
    pub labels: Array1<usize>,
    pub inertia: f64,
    pub centers: Array2<f64>,
    pub n_iter: usize,
    /// Points moved into clusters that had emptied out.
    pub relocations: usize,
}

/// Compute the inertia (sum of squared distances) for the current labels.
fn inertia_dense(
    x: &Array2<f64>,             // x = (n_samples, n_features)
    sample_weight: &Array1<f64>, // sample_weight = (n_samples,)
    centers: &Array2<f64>,       // centers = (n_clusters, n_features)
    labels: &Array1<usize>,      // labels = (n_samples,)
) -> f64 {
    labels
        .iter()
        .enumerate()
        .map(|(i, &label)| {
            let diff = &x.row(i) - &centers.row(label);
            diff.mapv(|v| v * v).sum() * sample_weight[i]
        })
        .sum()
}

/// Nearest center and its squared distance for every row of the chunk.
fn assign_chunk_dense(
    x_chunk: ArrayView2<f64>,            // x_chunk = (chunk_size, n_features)
    centers: &Array2<f64>,               // centers = (n_clusters, n_features)
    centers_squared_norms: &Array1<f64>, // centers_squared_norms = (n_clusters,)
) -> (Array1<usize>, Array1<f64>) {
    // pairwise = (chunk_size, n_clusters)
    let pairwise = euclidean_distances(&x_chunk, centers, Some(centers_squared_norms), true);
    let mut labels_chunk = Array1::<usize>::zeros(x_chunk.nrows());
    let mut distances_chunk = Array1::<f64>::zeros(x_chunk.nrows());
    for (i, row) in pairwise.axis_iter(Axis(0)).enumerate() {
        let label = argmin(row.iter()).unwrap_or(0);
        labels_chunk[i] = label;
        distances_chunk[i] = row[label];
    }
    (labels_chunk, distances_chunk)
}

/// Assignment step, split into chunks to limit temporary allocations.
fn assign_chunked_dense(
    x: &Array2<f64>,       // x = (n_samples, n_features)
    centers: &Array2<f64>, // centers = (n_clusters, n_features)
) -> (Array1<usize>, Array1<f64>) {
    let n_samples = x.nrows();
    let centers_squared_norms = row_norms(centers, true);
    let mut labels = Array1::<usize>::zeros(n_samples);
    let mut distances = Array1::<f64>::zeros(n_samples);

    let mut start = 0;
    while start < n_samples {
        let end = (start + CHUNK_SIZE).min(n_samples);
        let (labels_chunk, distances_chunk) =
            assign_chunk_dense(x.slice(s![start..end, ..]), centers, &centers_squared_norms);
        labels.slice_mut(s![start..end]).assign(&labels_chunk);
        distances.slice_mut(s![start..end]).assign(&distances_chunk);
        start = end;
    }
    (labels, distances)
}

/// Give every empty cluster the farthest point whose own cluster can spare it.
///
/// Needs `n_samples >= n_clusters`; then there are always enough spare points.
/// Returns the number of points moved.
pub(super) fn relocate_empty_clusters(
    labels: &mut Array1<usize>,  // labels = (n_samples,)
    distances: &mut Array1<f64>, // distances = (n_samples,)
    n_clusters: usize,
) -> usize {
    let mut counts = vec![0_usize; n_clusters];
    for &label in labels.iter() {
        counts[label] += 1;
    }
    let empty: Vec<usize> = (0..n_clusters).filter(|&c| counts[c] == 0).collect();
    if empty.is_empty() {
        return 0;
    }

    let mut by_distance: Vec<usize> = (0..labels.len()).collect();
    by_distance.sort_by(|&a, &b| distances[b].total_cmp(&distances[a]).then(a.cmp(&b)));
    let mut candidates = by_distance.into_iter();

    let mut moved = 0;
    for &cluster in &empty {
        let Some(idx) = candidates.find(|&i| counts[labels[i]] > 1) else {
            break;
        };
        debug!(
            "Cluster {} emptied out, relocating point {} from cluster {}",
            cluster, idx, labels[idx]
        );
        counts[labels[idx]] -= 1;
        counts[cluster] = 1;
        labels[idx] = cluster;
        distances[idx] = 0.0;
        moved += 1;
    }
    moved
}

/// Weighted mean of the points carrying each label.
fn update_centers(
    x: &Array2<f64>,             // x = (n_samples, n_features)
    sample_weight: &Array1<f64>, // sample_weight = (n_samples,)
    labels: &Array1<usize>,      // labels = (n_samples,)
    centers_old: &Array2<f64>,   // centers_old = (n_clusters, n_features)
) -> Array2<f64> {
    let mut centers_new = Array2::<f64>::zeros(centers_old.dim());
    let mut weight_in_clusters = Array1::<f64>::zeros(centers_old.nrows());
    for (i, &label) in labels.iter().enumerate() {
        let weight = sample_weight[i];
        weight_in_clusters[label] += weight;
        centers_new
            .row_mut(label)
            .scaled_add(weight, &x.row(i));
    }
    for (cluster, mut center) in centers_new.axis_iter_mut(Axis(0)).enumerate() {
        let weight = weight_in_clusters[cluster];
        if weight > 0.0 {
            center /= weight;
        } else {
            // zero-weight cluster keeps its previous center
            center.assign(&centers_old.row(cluster));
        }
    }
    centers_new
}

/// Run a single K-Means using Lloyd's algorithm.
pub fn kmeans_single_lloyd(
    x: &Array2<f64>,             // x = (n_samples, n_features)
    sample_weight: &Array1<f64>, // sample_weight = (n_samples,)
    centers_init: &Array2<f64>,  // centers_init = (n_clusters, n_features)
    max_iter: usize,
    tol: f64,
) -> LloydRun {
    let n_samples = x.nrows();
    let n_clusters = centers_init.nrows();

    let mut centers = centers_init.clone();
    let mut labels = Array1::<usize>::zeros(n_samples);
    let mut labels_old = Array1::<usize>::from_elem(n_samples, usize::MAX);
    let mut strict_convergence = false;
    let mut iterations = 0;
    let mut relocations = 0;

    for i in 0..max_iter {
        let (mut new_labels, mut distances) = assign_chunked_dense(x, &centers);
        relocations += relocate_empty_clusters(&mut new_labels, &mut distances, n_clusters);
        iterations = i + 1;

        if new_labels == labels_old {
            labels = new_labels;
            strict_convergence = true;
            break;
        }

        let centers_new = update_centers(x, sample_weight, &new_labels, &centers);
        let center_shift_tot: f64 = (&centers - &centers_new).mapv(|v| v * v).sum();

        centers = centers_new;
        labels = new_labels.clone();
        labels_old = new_labels;

        if center_shift_tot <= tol {
            break;
        }
    }

    if !strict_convergence {
        // Ensure labels reflect final centers
        let (mut refreshed, mut distances) = assign_chunked_dense(x, &centers);
        let moved = relocate_empty_clusters(&mut refreshed, &mut distances, n_clusters);
        if moved > 0 {
            centers = update_centers(x, sample_weight, &refreshed, &centers);
            relocations += moved;
        }
        labels = refreshed;
    }

    let inertia = inertia_dense(x, sample_weight, &centers, &labels);

    LloydRun {
        labels,
        inertia,
        centers,
        n_iter: iterations,
        relocations,
    }
}
