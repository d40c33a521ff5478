use ndarray::prelude::*;
use ndarray_linalg::SVD;
use tracing::{debug, trace};

use crate::AppResult;
use crate::analysis::TargetDims;
use crate::analysis::linalg::center_columns;
use crate::analysis::traits::Reducer;
use crate::error::AppError;

/// Linear-variance projection onto the leading principal axes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pca;

impl Pca {
    /// Fewest records that still allow a variance estimate along `n_components` axes.
    pub fn min_records(n_components: usize) -> usize {
        n_components + 1
    }
}

impl Reducer for Pca {
    fn reduce(&self, data: &Array2<f64>, dims: TargetDims) -> AppResult<Array2<f64>> {
        pca_reduce(data, dims.count())
    }
}

/// Relative slack under which two loadings count as equally large.
const PIVOT_TOLERANCE: f64 = 1e-9;

/// Principal axes as columns, `(n_features, n_components)`, from the right
/// singular vectors of the centered data.
fn principal_axes(centered: &Array2<f64>, n_components: usize) -> AppResult<Array2<f64>> {
    let (_, singular, vt) = centered.svd(false, true)?;
    let vt = vt.ok_or_else(|| AppError::Other("SVD returned no right singular vectors".into()))?;
    trace!(
        "Leading singular values: {:?}",
        singular.slice(s![..n_components.min(singular.len())])
    );
    let mut axes: Array2<f64> = vt.slice(s![..n_components, ..]).t().to_owned(); // (n_features, n_components)
    flip_signs(&mut axes);
    Ok(axes)
}

/// Orient every axis so its largest loading is positive.
///
/// Loadings within [`PIVOT_TOLERANCE`] of the largest count as ties, and the first
/// of them wins, so rounding noise in the solver cannot decide the sign.
fn flip_signs(axes: &mut Array2<f64>) {
    for mut axis in axes.axis_iter_mut(Axis(1)) {
        let largest = axis.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let pivot = axis
            .iter()
            .copied()
            .find(|v| v.abs() >= largest * (1.0 - PIVOT_TOLERANCE))
            .unwrap_or(0.0);
        if pivot < 0.0 {
            axis.mapv_inplace(|v| -v);
        }
    }
}

#[tracing::instrument(name = "Performing PCA", level = "info", skip(data))]
pub fn pca_reduce(data: &Array2<f64>, n_components: usize) -> AppResult<Array2<f64>> {
    let (n_samples, n_features) = data.dim();
    let required = Pca::min_records(n_components);
    if n_samples < required {
        return Err(AppError::InsufficientData {
            stage: "linear-variance projection",
            required,
            actual: n_samples,
        });
    }
    if n_features < n_components {
        return Err(AppError::InvalidParameter {
            name: "dimensions",
            message: format!(
                "cannot project {n_features}-dimensional vectors onto {n_components} axes"
            ),
        });
    }

    let (centered, _) = center_columns(data);
    let axes = principal_axes(&centered, n_components)?;
    let projected: Array2<f64> = centered.dot(&axes); // (n_samples, n_components)
    debug!("Projected {} records onto {} axes", n_samples, n_components);
    Ok(projected)
}
