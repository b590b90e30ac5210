//! Federated Averaging (McMahan et al., 2017).
//!
//! The new global vector is the convex combination of the client vectors
//! weighted by their local sample counts:
//! `result[j] = Σ_k w[k]·params[k][j] / Σ_k w[k]`.

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use crate::aggregators::AggregationStrategy;
use crate::error::{AggregationInputError, Result};

/// Check `params` and `weights` against every aggregation precondition.
///
/// Returns the weight sum on success.
pub fn validate_inputs<P: AsRef<[f32]>>(
    params: &[P],
    weights: &[f64],
) -> std::result::Result<f64, AggregationInputError> {
    let first = params.first().ok_or(AggregationInputError::NoClients)?;
    if weights.len() != params.len() {
        return Err(AggregationInputError::WeightCountMismatch {
            params: params.len(),
            weights: weights.len(),
        });
    }

    let dim = first.as_ref().len();
    for (client, p) in params.iter().enumerate() {
        let p = p.as_ref();
        if p.len() != dim {
            return Err(AggregationInputError::LengthMismatch {
                client,
                expected: dim,
                actual: p.len(),
            });
        }
        if let Some(index) = p.iter().position(|v| !v.is_finite()) {
            return Err(AggregationInputError::NonFiniteParameter { client, index });
        }
    }

    for (client, &w) in weights.iter().enumerate() {
        if !w.is_finite() {
            return Err(AggregationInputError::NonFiniteWeight { client });
        }
        if w < 0.0 {
            return Err(AggregationInputError::NegativeWeight { client });
        }
    }

    let total: f64 = weights.iter().sum();
    if !total.is_finite() {
        return Err(AggregationInputError::WeightSumOverflow);
    }
    if total <= 0.0 {
        return Err(AggregationInputError::ZeroWeightSum);
    }
    Ok(total)
}

/// Weighted FedAvg, picking the path with [`AggregationStrategy::Auto`].
///
/// # Arguments
///
/// * `params` - One flat parameter vector per client, all the same length
/// * `weights` - One non-negative weight per client, typically its sample count
///
/// # Example
///
/// ```rust
/// use fedavg_sim::aggregators::fedavg;
///
/// let params = vec![vec![1.0f32, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
/// let result = fedavg(&params, &[100.0, 200.0]).unwrap();
/// assert!((result[0] - 3.0).abs() < 1e-6);
/// ```
pub fn fedavg<P: AsRef<[f32]> + Sync>(params: &[P], weights: &[f64]) -> Result<Vec<f32>> {
    fedavg_with(AggregationStrategy::Auto, params, weights)
}

/// Weighted FedAvg on an explicit path.
pub fn fedavg_with<P: AsRef<[f32]> + Sync>(
    strategy: AggregationStrategy,
    params: &[P],
    weights: &[f64],
) -> Result<Vec<f32>> {
    let total = validate_inputs(params, weights)?;
    let normalised: Vec<f64> = weights.iter().map(|w| w / total).collect();
    Ok(match strategy.resolve(params.len()) {
        AggregationStrategy::Streaming => streaming(params, &normalised),
        _ => dense(params, &normalised),
    })
}

/// Dense path: stack the vectors as columns of a `dim × n` matrix and
/// multiply by the normalised weight vector.
pub fn fedavg_dense<P: AsRef<[f32]> + Sync>(params: &[P], weights: &[f64]) -> Result<Vec<f32>> {
    fedavg_with(AggregationStrategy::Dense, params, weights)
}

/// Streaming path: accumulate each coordinate over the clients in
/// parallel, never holding more than the output vector.
pub fn fedavg_streaming<P: AsRef<[f32]> + Sync>(params: &[P], weights: &[f64]) -> Result<Vec<f32>> {
    fedavg_with(AggregationStrategy::Streaming, params, weights)
}

fn dense<P: AsRef<[f32]>>(params: &[P], normalised: &[f64]) -> Vec<f32> {
    let dim = params[0].as_ref().len();
    let n = params.len();
    let mut stacked = Array2::<f64>::zeros((dim, n));
    for (mut column, p) in stacked.columns_mut().into_iter().zip(params) {
        for (dst, &src) in column.iter_mut().zip(p.as_ref()) {
            *dst = src as f64;
        }
    }
    let w = Array1::from(normalised.to_vec());
    stacked.dot(&w).iter().map(|&v| v as f32).collect()
}

fn streaming<P: AsRef<[f32]> + Sync>(params: &[P], normalised: &[f64]) -> Vec<f32> {
    let dim = params[0].as_ref().len();
    (0..dim)
        .into_par_iter()
        .map(|j| {
            params
                .iter()
                .zip(normalised)
                .map(|(p, &w)| w * p.as_ref()[j] as f64)
                .sum::<f64>() as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FedError;

    fn input_error(err: FedError) -> AggregationInputError {
        match err {
            FedError::InvalidAggregationInput(e) => e,
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_fedavg_weighted_by_samples() {
        let params = vec![vec![1.0f32, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        for strategy in [AggregationStrategy::Dense, AggregationStrategy::Streaming] {
            let result = fedavg_with(strategy, &params, &[100.0, 200.0]).unwrap();
            for (got, want) in result.iter().zip([3.0f32, 4.0, 5.0]) {
                assert!((got - want).abs() < 1e-6, "{:?}: {} vs {}", strategy, got, want);
            }
        }
    }

    #[test]
    fn test_fedavg_single_client() {
        let params = vec![vec![42.0f32, 7.0]];
        let result = fedavg(&params, &[3.0]).unwrap();
        assert_eq!(result, vec![42.0, 7.0]);
    }

    #[test]
    fn test_zero_weight_client_is_ignored() {
        let params = vec![vec![1.0f32], vec![100.0]];
        let result = fedavg(&params, &[5.0, 0.0]).unwrap();
        assert!((result[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_order_invariance() {
        let params = vec![vec![0.1f32, -2.0], vec![3.5, 0.25], vec![-1.0, 9.0]];
        let weights = [10.0, 30.0, 7.0];
        let forward = fedavg(&params, &weights).unwrap();

        let rev_params: Vec<Vec<f32>> = params.iter().rev().cloned().collect();
        let rev_weights: Vec<f64> = weights.iter().rev().copied().collect();
        let backward = fedavg(&rev_params, &rev_weights).unwrap();

        for (a, b) in forward.iter().zip(&backward) {
            assert!((a - b).abs() <= 1e-6 * a.abs().max(1.0));
        }
    }

    #[test]
    fn test_dense_matches_streaming() {
        let params: Vec<Vec<f32>> = (0..40)
            .map(|k| (0..64).map(|j| ((k * 31 + j * 7) % 17) as f32 * 0.37 - 3.0).collect())
            .collect();
        let weights: Vec<f64> = (0..40).map(|k| (k % 5 + 1) as f64 * 60.0).collect();
        let d = fedavg_dense(&params, &weights).unwrap();
        let s = fedavg_streaming(&params, &weights).unwrap();
        for (a, b) in d.iter().zip(&s) {
            assert!((a - b).abs() <= 1e-6 * a.abs().max(1.0));
        }
    }

    #[test]
    fn test_empty_input() {
        let params: Vec<Vec<f32>> = vec![];
        let err = input_error(fedavg(&params, &[]).unwrap_err());
        assert_eq!(err, AggregationInputError::NoClients);
    }

    #[test]
    fn test_unequal_lengths() {
        let params = vec![vec![1.0f32, 2.0], vec![1.0]];
        let err = input_error(fedavg(&params, &[1.0, 1.0]).unwrap_err());
        assert_eq!(
            err,
            AggregationInputError::LengthMismatch {
                client: 1,
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_nan_parameter() {
        let params = vec![vec![1.0f32, 2.0], vec![1.0, f32::NAN]];
        let err = input_error(fedavg(&params, &[1.0, 1.0]).unwrap_err());
        assert_eq!(
            err,
            AggregationInputError::NonFiniteParameter {
                client: 1,
                index: 1
            }
        );
    }

    #[test]
    fn test_negative_weight() {
        let params = vec![vec![1.0f32], vec![2.0]];
        let err = input_error(fedavg(&params, &[1.0, -1.0]).unwrap_err());
        assert_eq!(err, AggregationInputError::NegativeWeight { client: 1 });
    }

    #[test]
    fn test_all_zero_weights() {
        let params = vec![vec![1.0f32], vec![2.0]];
        let err = input_error(fedavg(&params, &[0.0, 0.0]).unwrap_err());
        assert_eq!(err, AggregationInputError::ZeroWeightSum);
    }

    #[test]
    fn test_overflowing_weight_sum() {
        let params = vec![vec![1.0f32], vec![2.0]];
        let err = input_error(fedavg(&params, &[f64::MAX, f64::MAX]).unwrap_err());
        assert_eq!(err, AggregationInputError::WeightSumOverflow);
    }

    #[test]
    fn test_weight_count_and_nan_weight() {
        let params = vec![vec![1.0f32], vec![2.0]];
        let err = input_error(fedavg(&params, &[1.0]).unwrap_err());
        assert_eq!(
            err,
            AggregationInputError::WeightCountMismatch {
                params: 2,
                weights: 1
            }
        );
        let err = input_error(fedavg(&params, &[1.0, f64::NAN]).unwrap_err());
        assert_eq!(err, AggregationInputError::NonFiniteWeight { client: 1 });
    }
}
