use ndarray::prelude::*;

/// Running sum of a 1-D array.
pub fn cumsum(values: &Array1<f64>) -> Array1<f64> {
    let mut acc = 0.0;
    values.mapv(|v| {
        acc += v;
        acc
    })
}

/// Left insertion points of `needles` into the ascending `haystack`.
pub fn searchsorted(haystack: &Array1<f64>, needles: &Array1<f64>) -> Vec<usize> {
    let sorted = haystack.as_slice();
    needles
        .iter()
        .map(|&needle| match sorted {
            Some(slice) => slice.partition_point(|&x| x < needle),
            None => haystack.iter().take_while(|&&x| x < needle).count(),
        })
        .collect()
}

/// Index of the smallest value, first one on ties.
pub fn argmin<'a, I>(values: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a f64>,
{
    values
        .into_iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
}
