//! Splitting an experiment's rounds into chunks.

use std::ops::RangeInclusive;

use crate::error::{FedError, Result};

/// Inclusive round ranges of at most `chunk_size` rounds, from `start` up
/// to `total_rounds`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    next: usize,
    total_rounds: usize,
    chunk_size: usize,
}

impl ChunkPlan {
    /// Plan rounds `start..=total_rounds` in chunks of `chunk_size`.
    pub fn new(start: usize, total_rounds: usize, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(FedError::InvalidConfig(
                "ChunkRunner: chunk size must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            next: start.max(1),
            total_rounds,
            chunk_size,
        })
    }

    /// Rounds per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Iterator for ChunkPlan {
    type Item = RangeInclusive<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.total_rounds {
            return None;
        }
        let start = self.next;
        let end = (start + self.chunk_size - 1).min(self.total_rounds);
        self.next = end + 1;
        Some(start..=end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_covers_rounds() {
        let plan: Vec<_> = ChunkPlan::new(1, 120, 50).unwrap().collect();
        assert_eq!(plan, vec![1..=50, 51..=100, 101..=120]);
    }

    #[test]
    fn test_plan_from_middle() {
        let plan: Vec<_> = ChunkPlan::new(51, 100, 50).unwrap().collect();
        assert_eq!(plan, vec![51..=100]);
        assert_eq!(ChunkPlan::new(101, 100, 50).unwrap().count(), 0);
    }

    #[test]
    fn test_zero_chunk_size() {
        assert!(ChunkPlan::new(1, 10, 0).is_err());
    }
}
