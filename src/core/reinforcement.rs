use crate::config::ReinforcementConfig;
use crate::error::Result;
use crate::prng::Prng;

/// Decides whether a response is consequated.
///
/// Incorrect responses are always consequated; the schedule only thins out
/// reinforcement of correct ones.
#[derive(Debug, Clone)]
pub struct ReinforcementSchedule {
    config: ReinforcementConfig,
    cumulative_correct: u32,
    threshold: u32,
    rng: Prng,
}

impl Default for ReinforcementSchedule {
    fn default() -> Self {
        Self::continuous()
    }
}

impl ReinforcementSchedule {
    pub fn new(config: ReinforcementConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let mut s = Self {
            config,
            cumulative_correct: 0,
            threshold: 1,
            rng: Prng::new(seed),
        };
        s.rearm();
        Ok(s)
    }

    pub fn continuous() -> Self {
        Self {
            config: ReinforcementConfig::Continuous,
            cumulative_correct: 0,
            threshold: 1,
            rng: Prng::new(0),
        }
    }

    pub fn config(&self) -> &ReinforcementConfig {
        &self.config
    }

    /// Correct responses still needed before the next reinforcement.
    pub fn remaining(&self) -> u32 {
        self.threshold.saturating_sub(self.cumulative_correct)
    }

    fn rearm(&mut self) {
        self.cumulative_correct = 0;
        self.threshold = match self.config {
            ReinforcementConfig::FixedRatio { ratio } => ratio.max(1),
            ReinforcementConfig::VariableRatio { ratio } => {
                let ratio = ratio.max(1) as usize;
                self.rng.gen_range_usize(1, 2 * ratio) as u32
            }
            _ => 1,
        };
    }

    pub fn consequate(&mut self, correct: bool) -> bool {
        match self.config {
            ReinforcementConfig::Continuous => true,
            ReinforcementConfig::Percent { probability } => {
                !correct || self.rng.chance(probability)
            }
            ReinforcementConfig::FixedRatio { .. } | ReinforcementConfig::VariableRatio { .. } => {
                if !correct {
                    self.cumulative_correct = 0;
                    return true;
                }
                self.cumulative_correct += 1;
                if self.cumulative_correct >= self.threshold {
                    self.rearm();
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuous_consequates_everything() {
        let mut s = ReinforcementSchedule::default();
        assert!(s.consequate(true));
        assert!(s.consequate(false));
    }

    #[test]
    fn fixed_ratio_rewards_every_nth_correct() {
        let mut s = ReinforcementSchedule::new(ReinforcementConfig::FixedRatio { ratio: 3 }, 0).unwrap();
        let got: Vec<_> = (0..6).map(|_| s.consequate(true)).collect();
        assert_eq!(got, vec![false, false, true, false, false, true]);

        s.consequate(true);
        assert!(s.consequate(false));
        assert_eq!(s.remaining(), 3);
    }

    #[test]
    fn variable_ratio_threshold_stays_in_range() {
        let mut s =
            ReinforcementSchedule::new(ReinforcementConfig::VariableRatio { ratio: 4 }, 8).unwrap();
        let mut run = 0;
        for _ in 0..500 {
            run += 1;
            if s.consequate(true) {
                assert!((1..8).contains(&run), "run {run}");
                run = 0;
            }
        }
    }

    #[test]
    fn percent_always_consequates_errors() {
        let mut s =
            ReinforcementSchedule::new(ReinforcementConfig::Percent { probability: 0.0 }, 1).unwrap();
        assert!(!s.consequate(true));
        assert!(s.consequate(false));
    }
}
