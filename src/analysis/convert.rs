use ndarray::prelude::*;
use tracing::trace;

use crate::AppResult;
use crate::error::AppError;
use crate::model::EnrichedRecord;

/// Stack vectors into an `(n_records, n_features)` matrix.
///
/// `ids` names each row in errors. Ragged input fails with every offending id; the
/// expected length is the first row's.
fn stack<'a, I>(rows: &[&[f32]], ids: I) -> AppResult<Array2<f64>>
where
    I: Fn(usize) -> &'a str,
{
    let Some(first) = rows.first() else {
        return Ok(Array2::<f64>::zeros((0, 0)));
    };
    let cols = first.len();

    let mismatched: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.len() != cols)
        .map(|(i, _)| i)
        .collect();
    if let Some(&i) = mismatched.first() {
        return Err(AppError::DimensionMismatch {
            expected: cols,
            found: rows[i].len(),
            record_ids: mismatched.iter().map(|&i| ids(i).to_string()).collect(),
        });
    }

    let mut arr: Array2<f64> = Array2::<f64>::zeros((rows.len(), cols));
    trace!("Initialized ndarray with shape: {:?}", arr.dim());
    for (i, mut row) in arr.axis_iter_mut(Axis(0)).enumerate() {
        for (val, &src) in row.iter_mut().zip(rows[i]) {
            if !src.is_finite() {
                return Err(AppError::NonFiniteValue {
                    record_id: ids(i).to_string(),
                });
            }
            *val = src as f64;
        }
    }
    Ok(arr)
}

/// Validate and stack every record's vector, in record order.
#[tracing::instrument(name = "Converting embeddings", level = "debug", skip(records))]
pub fn records_to_ndarray(records: &[EnrichedRecord]) -> AppResult<Array2<f64>> {
    let rows: Vec<&[f32]> = records
        .iter()
        .map(|r| r.embedding.vector.as_slice())
        .collect();
    stack(&rows, |i| records[i].embedding.id.as_str())
}
