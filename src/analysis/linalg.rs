use ndarray::prelude::*;
use ndarray::Data;

pub fn row_norms<S>(x: &ArrayBase<S, Ix2>, squared: bool) -> Array1<f64>
where
    S: Data<Elem = f64>,
{
    let sum: Array1<f64> = x.mapv(|v| v * v).sum_axis(Axis(1));
    if squared { sum } else { sum.mapv(f64::sqrt) }
}

/// Pairwise distances between the rows of `a` and the rows of `b`.
pub fn euclidean_distances<S1, S2>(
    a: &ArrayBase<S1, Ix2>,               // a = (n_a, n_features)
    b: &ArrayBase<S2, Ix2>,               // b = (n_b, n_features)
    b_norm_squared: Option<&Array1<f64>>, // b_norm_squared = (n_b,)
    squared: bool,
) -> Array2<f64>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    let aa = row_norms(a, true); // (n_a,)
    let bb = match b_norm_squared {
        Some(norms) => norms.clone(),
        None => row_norms(b, true),
    }; // (n_b,)
    let mut distances: Array2<f64> = a.dot(&b.t()) * -2.0; // (n_a, n_b)
    distances += &aa.insert_axis(Axis(1));
    distances += &bb.insert_axis(Axis(0));
    distances.mapv_inplace(|d| if d > 0.0 { d } else { 0.0 });
    if !squared {
        distances.mapv_inplace(f64::sqrt);
    }
    distances
}

/// Subtract the column means. Returns the centered copy and the means.
pub fn center_columns(x: &Array2<f64>) -> (Array2<f64>, Array1<f64>) {
    let mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::<f64>::zeros(x.ncols())); // (n_features,)
    let centered = x - &mean;
    (centered, mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_norms_squared_and_unsquared() {
        let x = array![[3.0, 4.0], [1.0, 2.0]]; // norms: 5 and sqrt(5)
        let squared = row_norms(&x, true);
        let unsquared = row_norms(&x, false);
        assert_eq!(squared, arr1(&[25.0, 5.0]));
        assert!((unsquared[0] - 5.0).abs() < 1e-10);
        assert!((unsquared[1] - 5.0_f64.sqrt()).abs() < 1e-10);
    }

    #[test]
    fn euclidean_distances_self_matches_manual() {
        let a = array![[0.0, 0.0], [3.0, 4.0]];
        let dists = euclidean_distances(&a, &a, None, true);
        let expected = array![[0.0, 25.0], [25.0, 0.0]];
        assert_eq!(dists, expected);
    }

    #[test]
    fn euclidean_distances_between_different_sets() {
        let x = array![[0.0], [2.0]];
        let y = array![[1.0]];
        let dists = euclidean_distances(&x, &y, None, false);
        assert_eq!(dists, array![[1.0], [1.0]]);
    }

    #[test]
    fn centering_removes_column_means() {
        let x = array![[1.0, 10.0], [3.0, 20.0]];
        let (centered, mean) = center_columns(&x);
        assert_eq!(mean, arr1(&[2.0, 15.0]));
        assert_eq!(centered, array![[-1.0, -5.0], [1.0, 5.0]]);
    }
}
