//! Parameter codec: model weights to and from a flat vector.
//!
//! Parameters are concatenated in the model's enumeration order, each in
//! logical row-major order. [`unflatten`] copies values into the existing
//! arrays; it never replaces them, so anything holding on to a parameter
//! array keeps seeing the live weights.

use crate::error::{FedError, Result};
use crate::model::Model;

/// Total number of trainable values.
pub fn num_params<M: Model + ?Sized>(model: &M) -> usize {
    model.parameters().iter().map(|p| p.len()).sum()
}

/// Copy every trainable value into a new flat vector.
///
/// The vector owns its data; mutating it leaves the model untouched.
pub fn flatten<M: Model + ?Sized>(model: &M) -> Vec<f32> {
    let params = model.parameters();
    let mut flat = Vec::with_capacity(params.iter().map(|p| p.len()).sum());
    for p in &params {
        flat.extend(p.iter().copied());
    }
    flat
}

/// Overwrite the model's parameter values with `flat`.
///
/// Fails with [`FedError::ShapeMismatch`] before touching the model when
/// the length is wrong.
pub fn unflatten<M: Model + ?Sized>(model: &mut M, flat: &[f32]) -> Result<()> {
    let expected = num_params(model);
    if flat.len() != expected {
        return Err(FedError::ShapeMismatch {
            expected,
            actual: flat.len(),
        });
    }

    let mut offset = 0;
    for mut p in model.parameters_mut() {
        let len = p.len();
        for (dst, &src) in p.iter_mut().zip(&flat[offset..offset + len]) {
            *dst = src;
        }
        offset += len;
    }
    Ok(())
}
