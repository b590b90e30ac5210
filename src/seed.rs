//! Deterministic seed derivation.
//!
//! Every source of randomness in an experiment draws from its own
//! `StdRng`, seeded from `(experiment_seed, stream, round, client)`.
//! Nothing shares a mutable RNG, so clients trained in parallel produce
//! the same values no matter how the thread pool schedules them.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Independent randomness streams of one experiment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedStream {
    /// Partitioning of the training set across clients
    Partition,
    /// Per-round client sampling
    Sampling,
    /// Client sampling used by the one-time learning-rate search
    LrSelection,
    /// Batch shuffling inside one client's local training
    ClientTraining,
    /// Weight initialisation of the global model
    ModelInit,
    /// Synthetic dataset generation
    Data,
}

impl SeedStream {
    fn tag(self) -> u64 {
        match self {
            SeedStream::Partition => 0x5041_5254,
            SeedStream::Sampling => 0x5341_4d50,
            SeedStream::LrSelection => 0x4c52_5345,
            SeedStream::ClientTraining => 0x434c_4e54,
            SeedStream::ModelInit => 0x494e_4954,
            SeedStream::Data => 0x4441_5441,
        }
    }
}

/// SplitMix64 finalizer.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Derive the seed for `stream` at `(round, client)`.
///
/// Streams that are not per-round or per-client pass `0` for the unused
/// coordinate.
pub fn derive_seed(experiment_seed: u64, stream: SeedStream, round: usize, client: usize) -> u64 {
    let mut h = mix(experiment_seed ^ stream.tag());
    h = mix(h ^ round as u64);
    mix(h ^ (client as u64).rotate_left(32))
}

/// Build an RNG for `stream` at `(round, client)`.
pub fn rng_for(experiment_seed: u64, stream: SeedStream, round: usize, client: usize) -> StdRng {
    StdRng::seed_from_u64(derive_seed(experiment_seed, stream, round, client))
}
