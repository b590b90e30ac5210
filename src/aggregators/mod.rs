//! Server-side aggregation of client parameter vectors.
//!
//! | Path | Memory | Best for |
//! |------|--------|----------|
//! | [`AggregationStrategy::Dense`] | `dim × n` matrix | few clients per round |
//! | [`AggregationStrategy::Streaming`] | `dim` accumulator | many clients per round |
//!
//! Both paths compute the same sample-weighted mean in `f64` and round
//! once to `f32`, so they agree to within float rounding of the final sum
//! (relative error around `1e-6`), not bit for bit.

pub mod fedavg;

pub use fedavg::{fedavg, fedavg_dense, fedavg_streaming, fedavg_with, validate_inputs};

use serde::{Deserialize, Serialize};

/// Client count at which [`AggregationStrategy::Auto`] switches from the
/// dense to the streaming path.
pub const DENSE_CLIENT_THRESHOLD: usize = 32;

/// Which FedAvg implementation to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Dense below [`DENSE_CLIENT_THRESHOLD`] clients, streaming otherwise
    #[default]
    Auto,
    /// Stack client vectors into a matrix and take a matrix-vector product
    Dense,
    /// Accumulate coordinate-wise without materialising the matrix
    Streaming,
}

impl AggregationStrategy {
    /// The concrete path used for `n_clients` inputs.
    pub fn resolve(self, n_clients: usize) -> Self {
        match self {
            AggregationStrategy::Auto if n_clients < DENSE_CLIENT_THRESHOLD => {
                AggregationStrategy::Dense
            }
            AggregationStrategy::Auto => AggregationStrategy::Streaming,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_resolves_by_client_count() {
        assert_eq!(AggregationStrategy::Auto.resolve(10), AggregationStrategy::Dense);
        assert_eq!(
            AggregationStrategy::Auto.resolve(DENSE_CLIENT_THRESHOLD),
            AggregationStrategy::Streaming
        );
        assert_eq!(
            AggregationStrategy::Streaming.resolve(2),
            AggregationStrategy::Streaming
        );
    }

    #[test]
    fn test_strategy_json() {
        let s: AggregationStrategy = serde_json::from_str("\"streaming\"").unwrap();
        assert_eq!(s, AggregationStrategy::Streaming);
    }
}
