// logsift/src/state/reservoir.rs
//
// Fixed-capacity reservoir of past per-interval request counts.
// Once full, every new value overwrites a uniformly random slot, so the
// contents stay a fair sample of the whole history while memory is bounded.
//
// Serialised as {"data": [...], "cap": N} inside the bot analysis state.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleReservoir<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    cap:  usize,
}

impl<T: Clone> SampleReservoir<T> {
    pub fn new(cap: usize) -> Self {
        Self { data: Vec::with_capacity(cap), cap }
    }

    /// Add a value and return the size after insertion.
    /// A zero-capacity reservoir accepts nothing and returns 0.
    pub fn add(&mut self, item: T) -> usize {
        self.add_with(item, &mut rand::thread_rng())
    }

    pub fn add_with<R: Rng + ?Sized>(&mut self, item: T, rng: &mut R) -> usize {
        if self.cap == 0 {
            return 0;
        }
        if self.data.len() < self.cap {
            self.data.push(item);
        } else {
            let slot = rng.gen_range(0..self.data.len());
            self.data[slot] = item;
        }
        self.data.len()
    }

    /// Shrinking keeps the first `cap` values, growing keeps everything.
    pub fn resize(&mut self, cap: usize) {
        self.data.truncate(cap);
        self.cap = cap;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn all(&self) -> &[T] {
        &self.data
    }
}

impl SampleReservoir<u64> {
    pub fn mean(&self) -> Option<f64> {
        if self.data.is_empty() {
            return None;
        }
        let sum: u64 = self.data.iter().sum();
        Some(sum as f64 / self.data.len() as f64)
    }
}
