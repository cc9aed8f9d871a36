use crate::error::{Result, ScheduleError};
use crate::prng::Prng;
use crate::source::{Pull, Source};

// ─────────────────────────────────────────────────────────────────────────
// Weighted sampling with replacement.
// ─────────────────────────────────────────────────────────────────────────

/// Draws items independently, proportional to their normalised weights.
/// Unbounded unless `max_items` is set.
#[derive(Debug, Clone)]
pub struct WeightedSampler<T> {
    items: Vec<T>,
    cumulative: Vec<f64>,
    max_items: Option<usize>,
    drawn: usize,
    rng: Prng,
}

/// Build a [`WeightedSampler`]. Weights need not sum to one; `None` means uniform.
pub fn random_queue<T: Clone>(
    items: Vec<T>,
    weights: Option<&[f64]>,
    max_items: Option<usize>,
    seed: u64,
) -> Result<WeightedSampler<T>> {
    if items.is_empty() {
        return Err(ScheduleError::EmptyItems);
    }
    let probabilities = match weights {
        Some(w) => normalize_weights(w, items.len())?,
        None => vec![1.0 / items.len() as f64; items.len()],
    };

    let mut acc = 0.0;
    let cumulative = probabilities
        .iter()
        .map(|p| {
            acc += p;
            acc
        })
        .collect();

    Ok(WeightedSampler {
        items,
        cumulative,
        max_items,
        drawn: 0,
        rng: Prng::new(seed),
    })
}

/// Divide each weight by the total. Rejects anything that is not a finite,
/// non-negative vector with positive mass and one entry per item.
pub fn normalize_weights(weights: &[f64], n_items: usize) -> Result<Vec<f64>> {
    if weights.len() != n_items {
        return Err(ScheduleError::InvalidWeights(format!(
            "{} weights for {} items",
            weights.len(),
            n_items
        )));
    }
    if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(ScheduleError::InvalidWeights(format!(
            "weight {w} is not a finite non-negative number"
        )));
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(ScheduleError::InvalidWeights(
            "weights sum to zero".to_string(),
        ));
    }
    Ok(weights.iter().map(|w| w / total).collect())
}

impl<T: Clone> WeightedSampler<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn drawn(&self) -> usize {
        self.drawn
    }
}

impl<T: Clone> Iterator for WeightedSampler<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.max_items.is_some_and(|m| self.drawn >= m) {
            return None;
        }
        let idx = self.rng.pick_cumulative(&self.cumulative);
        self.drawn += 1;
        Some(self.items[idx].clone())
    }
}

impl<T: Clone> Source for WeightedSampler<T> {
    type Item = T;

    fn pull(&mut self) -> Result<Pull<T>> {
        Ok(self.next().map_or(Pull::Exhausted, Pull::Item))
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Block repetition: R full passes, optionally shuffled as a whole.
// ─────────────────────────────────────────────────────────────────────────

/// A single pass over `items` repeated `repetitions` times.
///
/// Not restartable: build a fresh one to start over.
#[derive(Debug, Clone)]
pub struct BlockSequence<T> {
    sequence: std::vec::IntoIter<T>,
    len: usize,
}

pub fn block_queue<T: Clone>(
    items: Vec<T>,
    repetitions: usize,
    shuffle: bool,
    seed: u64,
) -> BlockSequence<T> {
    let mut repeated = Vec::with_capacity(items.len() * repetitions);
    for _ in 0..repetitions {
        repeated.extend(items.iter().cloned());
    }

    if shuffle {
        Prng::new(seed).shuffle(&mut repeated);
    }

    BlockSequence {
        len: repeated.len(),
        sequence: repeated.into_iter(),
    }
}

impl<T> BlockSequence<T> {
    /// Total number of items in the pass, consumed or not.
    pub fn total(&self) -> usize {
        self.len
    }

    pub fn remaining(&self) -> usize {
        self.sequence.len()
    }
}

impl<T> Iterator for BlockSequence<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.sequence.next()
    }
}

impl<T> Source for BlockSequence<T> {
    type Item = T;

    fn pull(&mut self) -> Result<Pull<T>> {
        Ok(self.sequence.next().map_or(Pull::Exhausted, Pull::Item))
    }
}
