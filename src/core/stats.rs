use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::source::Outcome;

const RECENT_WINDOW: usize = 100;

/// Running tally of reported outcomes for one block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub correct: u32,
    pub incorrect: u32,
    pub no_response: u32,
    recent: VecDeque<bool>,
}

impl OutcomeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: Outcome) {
        if outcome.no_response {
            // Misses count separately and stay out of accuracy.
            self.no_response += 1;
            return;
        }
        if outcome.correct {
            self.correct += 1;
        } else {
            self.incorrect += 1;
        }

        self.recent.push_back(outcome.correct);
        if self.recent.len() > RECENT_WINDOW {
            self.recent.pop_front();
        }
    }

    pub fn trials(&self) -> u32 {
        self.correct + self.incorrect + self.no_response
    }

    pub fn accuracy(&self) -> f32 {
        let total = self.correct + self.incorrect;
        if total == 0 {
            0.5
        } else {
            self.correct as f32 / total as f32
        }
    }

    /// Accuracy over the last hundred responded trials.
    pub fn recent_rate(&self) -> f32 {
        if self.recent.is_empty() {
            return 0.5;
        }
        let correct_count = self.recent.iter().filter(|&&x| x).count();
        correct_count as f32 / self.recent.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misses_do_not_touch_accuracy() {
        let mut s = OutcomeStats::new();
        s.record(Outcome::correct());
        s.record(Outcome::incorrect());
        s.record(Outcome::no_response());
        assert_eq!(s.trials(), 3);
        assert_eq!(s.accuracy(), 0.5);
        assert_eq!(s.no_response, 1);
    }

    #[test]
    fn recent_rate_uses_a_sliding_window() {
        let mut s = OutcomeStats::new();
        for _ in 0..RECENT_WINDOW {
            s.record(Outcome::incorrect());
        }
        for _ in 0..RECENT_WINDOW {
            s.record(Outcome::correct());
        }
        assert_eq!(s.recent_rate(), 1.0);
        assert_eq!(s.accuracy(), 0.5);
    }
}
