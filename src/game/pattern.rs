//! Pattern generation and comparison
//!
//! A pattern is the rhythm of one round: a list of millisecond delays where
//! element 0 is always 0 (the first pulse fires immediately) and each later
//! element is the gap to the previous pulse.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ordered sequence of inter-pulse delays in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern(Vec<u64>);

impl Pattern {
    /// Draws a fresh random pattern.
    ///
    /// Length is chosen uniformly from `sizes`, element 0 is fixed at 0, and
    /// each remaining element is drawn independently and uniformly from
    /// `gaps_ms`. Both sets must be non-empty; config validation guarantees
    /// that before a round ever starts.
    pub fn generate(sizes: &[usize], gaps_ms: &[u64], rng: &mut impl Rng) -> Self {
        let size = *sizes.choose(rng).unwrap_or(&2);

        let mut delays = Vec::with_capacity(size);
        delays.push(0);
        for _ in 1..size {
            delays.push(*gaps_ms.choose(rng).unwrap_or(&500));
        }

        debug!("Generated pattern: {:?}", delays);
        Self(delays)
    }

    pub fn from_delays(delays: Vec<u64>) -> Self {
        Self(delays)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Delay sequence, millisecond per element.
    pub fn delays(&self) -> &[u64] {
        &self.0
    }

    /// Elementwise comparison against a recorded sequence.
    ///
    /// True iff both have the same length and every element deviates by at
    /// most `tolerance_ms`.
    pub fn matches_within(&self, recorded: &[u64], tolerance_ms: u64) -> bool {
        if recorded.len() != self.0.len() {
            return false;
        }
        self.0
            .iter()
            .zip(recorded)
            .all(|(target, user)| target.abs_diff(*user) <= tolerance_ms)
    }
}
