//! Norm computations for vectors.
//!
//! Used to report the size of each client's local update and to check
//! that parameter vectors stay finite.

/// Compute the L2 (Euclidean) norm of an f32 slice.
pub fn l2_norm(v: &[f32]) -> f32 {
    l2_norm_sq(v).sqrt()
}

/// Compute the squared L2 norm of an f32 slice (avoids sqrt).
pub fn l2_norm_sq(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum()
}

/// L2 distance between two equal-length slices.
///
/// Extra trailing elements of the longer slice are ignored.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Whether every element is neither NaN nor infinite.
pub fn all_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}
