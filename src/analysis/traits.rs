use ndarray::Array2;

use crate::AppResult;
use crate::analysis::TargetDims;
use crate::analysis::kmeans::KMeansFit;

/// Maps `(n_records, n_features)` onto `(n_records, dims)`.
pub trait Reducer: Send + Sync {
    fn reduce(&self, data: &Array2<f64>, dims: TargetDims) -> AppResult<Array2<f64>>;
}

/// Partitions the rows of a matrix into dense labels `0..k`.
pub trait Clusterer: Send + Sync {
    fn fit(&self, data: &Array2<f64>) -> AppResult<KMeansFit>;
}
