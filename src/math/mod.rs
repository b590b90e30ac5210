//! Mathematical primitives shared by training and aggregation.
//!
//! - [`norms`] — L2 norms of parameter vectors and updates
//! - [`softmax`] — numerically stable softmax cross-entropy on logits

pub mod norms;
pub mod softmax;

pub use norms::{all_finite, l2_distance, l2_norm, l2_norm_sq};
pub use softmax::{argmax_rows, softmax_cross_entropy};
