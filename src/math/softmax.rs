//! Softmax cross-entropy over class logits.

use ndarray::{Array2, ArrayView2, Axis};

/// Mean cross-entropy of `logits` against `labels`, and the gradient of
/// that mean with respect to the logits.
///
/// Rows are shifted by their maximum before exponentiation so large logits
/// do not overflow. Labels must be valid column indices.
pub fn softmax_cross_entropy(logits: ArrayView2<'_, f32>, labels: &[usize]) -> (f32, Array2<f32>) {
    let n = logits.nrows().max(1) as f32;
    let mut grad = logits.to_owned();
    let mut loss = 0.0f32;

    for (mut row, &label) in grad.axis_iter_mut(Axis(0)).zip(labels) {
        let max = row.fold(f32::NEG_INFINITY, |m, &z| m.max(z));
        row.mapv_inplace(|z| (z - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|e| e / sum);
        // -log p_y, clamped so a saturated softmax does not yield inf
        loss -= row[label].max(f32::MIN_POSITIVE).ln();
        row[label] -= 1.0;
        row.mapv_inplace(|g| g / n);
    }

    (loss / n, grad)
}

/// Index of the largest logit in each row.
pub fn argmax_rows(logits: ArrayView2<'_, f32>) -> Vec<usize> {
    logits
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
                    if v > bv {
                        (i, v)
                    } else {
                        (bi, bv)
                    }
                })
                .0
        })
        .collect()
}
