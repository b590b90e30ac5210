//! Rounds-to-target tracking.
//!
//! Missing the target is an expected outcome, reported as
//! [`RoundsToTarget::NotReached`] rather than an error.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Literal used for [`RoundsToTarget::NotReached`] in logs.
pub const NOT_REACHED_LITERAL: &str = "not_reached";

/// Possibly fractional round at which accuracy first reached the target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RoundsToTarget {
    /// Interpolated round index
    Reached(f64),
    /// The target was never reached in the history seen so far
    NotReached,
}

impl RoundsToTarget {
    /// The round, if the target was reached.
    pub fn value(&self) -> Option<f64> {
        match *self {
            RoundsToTarget::Reached(r) => Some(r),
            RoundsToTarget::NotReached => None,
        }
    }

    /// Whether the target was reached.
    pub fn is_reached(&self) -> bool {
        matches!(self, RoundsToTarget::Reached(_))
    }
}

impl fmt::Display for RoundsToTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundsToTarget::Reached(r) => write!(f, "{:.3}", r),
            RoundsToTarget::NotReached => f.write_str(NOT_REACHED_LITERAL),
        }
    }
}

impl Serialize for RoundsToTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            RoundsToTarget::Reached(r) => serializer.serialize_f64(r),
            RoundsToTarget::NotReached => serializer.serialize_str(NOT_REACHED_LITERAL),
        }
    }
}

struct RoundsToTargetVisitor;

impl<'de> Visitor<'de> for RoundsToTargetVisitor {
    type Value = RoundsToTarget;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a round number or \"{}\"", NOT_REACHED_LITERAL)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<RoundsToTarget, E> {
        if v.is_finite() {
            Ok(RoundsToTarget::Reached(v))
        } else {
            Ok(RoundsToTarget::NotReached)
        }
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<RoundsToTarget, E> {
        Ok(RoundsToTarget::Reached(v as f64))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<RoundsToTarget, E> {
        Ok(RoundsToTarget::Reached(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RoundsToTarget, E> {
        let v = v.trim();
        if v.is_empty() || v == NOT_REACHED_LITERAL {
            return Ok(RoundsToTarget::NotReached);
        }
        v.parse::<f64>()
            .map(RoundsToTarget::Reached)
            .map_err(|_| E::custom(format!("invalid rounds-to-target '{}'", v)))
    }

    fn visit_none<E: de::Error>(self) -> Result<RoundsToTarget, E> {
        Ok(RoundsToTarget::NotReached)
    }

    fn visit_unit<E: de::Error>(self) -> Result<RoundsToTarget, E> {
        Ok(RoundsToTarget::NotReached)
    }
}

impl<'de> Deserialize<'de> for RoundsToTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RoundsToTargetVisitor)
    }
}

/// First (interpolated) round whose accuracy reaches `target`.
///
/// `history` must be in increasing round order. When the first entry
/// already meets the target, or an entry meets it exactly, that round is
/// returned as is; otherwise the crossing is linearly interpolated
/// between the last round below the target and the first at or above it.
pub fn rounds_to_target(history: &[(usize, f32)], target: f32) -> RoundsToTarget {
    let hit = match history.iter().position(|&(_, acc)| acc >= target) {
        Some(i) => i,
        None => return RoundsToTarget::NotReached,
    };
    let (r_curr, acc_curr) = history[hit];
    if hit == 0 || acc_curr == target {
        return RoundsToTarget::Reached(r_curr as f64);
    }

    let (r_prev, acc_prev) = history[hit - 1];
    let (r_prev, acc_prev) = (r_prev as f64, acc_prev as f64);
    let (r_curr, acc_curr) = (r_curr as f64, acc_curr as f64);
    let target = target as f64;
    RoundsToTarget::Reached(r_prev + (target - acc_prev) * (r_curr - r_prev) / (acc_curr - acc_prev))
}

/// Accuracy curve of one experiment, with its rounds-to-target.
#[derive(Clone, Debug)]
pub struct ConvergenceTracker {
    target: f32,
    history: Vec<(usize, f32)>,
}

impl ConvergenceTracker {
    /// Empty tracker for `target`.
    pub fn new(target: f32) -> Self {
        Self {
            target,
            history: Vec::new(),
        }
    }

    /// Record the accuracy of `round`.
    ///
    /// Rounds at or below the last recorded one replace the tail, so a
    /// round that is re-run after a restart overwrites its earlier value.
    pub fn record(&mut self, round: usize, accuracy: f32) {
        while self.history.last().is_some_and(|&(r, _)| r >= round) {
            self.history.pop();
        }
        self.history.push((round, accuracy));
    }

    /// Rounds-to-target over everything recorded so far.
    pub fn rounds_to_target(&self) -> RoundsToTarget {
        rounds_to_target(&self.history, self.target)
    }

    /// Target accuracy.
    pub fn target(&self) -> f32 {
        self.target
    }

    /// `(round, accuracy)` pairs in round order.
    pub fn history(&self) -> &[(usize, f32)] {
        &self.history
    }

    /// Highest accuracy seen so far.
    pub fn best(&self) -> Option<f32> {
        self.history.iter().map(|&(_, a)| a).reduce(f32::max)
    }
}
