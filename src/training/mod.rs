//! Client-side computation.
//!
//! - [`optimizer`] — plain and momentum SGD
//! - [`client`] — E local epochs on one client's partition
//! - [`evaluate`] — held-out accuracy of a global model

pub mod client;
pub mod evaluate;
pub mod optimizer;

pub use client::{ClientTrainer, LocalSchedule, LocalUpdate};
pub use evaluate::{evaluate, Evaluation};
pub use optimizer::Sgd;
