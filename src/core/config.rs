//! Setup-time parameters for queues, procedures and reinforcement.
//!
//! Every struct deserializes with defaults for missing fields, so a driver
//! can hand over a partial JSON object. Parsing files is the driver's job.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};
use crate::policy::{block_queue, random_queue};
use crate::source::Source;

/// Which sampling policy a [`crate::queue::QueueHandler`] should build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueConfig {
    Random {
        #[serde(default)]
        weights: Option<Vec<f64>>,
        #[serde(default)]
        max_items: Option<usize>,
    },
    Block {
        #[serde(default = "default_repetitions")]
        repetitions: usize,
        #[serde(default)]
        shuffle: bool,
    },
}

fn default_repetitions() -> usize {
    1
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::Random {
            weights: None,
            max_items: None,
        }
    }
}

impl QueueConfig {
    pub fn random(max_items: Option<usize>) -> Self {
        Self::Random {
            weights: None,
            max_items,
        }
    }

    pub fn weighted(weights: Vec<f64>, max_items: Option<usize>) -> Self {
        Self::Random {
            weights: Some(weights),
            max_items,
        }
    }

    pub fn block(repetitions: usize, shuffle: bool) -> Self {
        Self::Block {
            repetitions,
            shuffle,
        }
    }

    /// Instantiate the policy over `items`.
    pub fn build<T: Clone + 'static>(
        &self,
        items: Vec<T>,
        seed: u64,
    ) -> Result<Box<dyn Source<Item = T>>> {
        if let Self::Block { repetitions: 0, .. } = self {
            return Err(ScheduleError::InvalidConfig(
                "block queue needs at least one repetition".to_string(),
            ));
        }
        Ok(match self {
            Self::Random { weights, max_items } => Box::new(random_queue(
                items,
                weights.as_deref(),
                *max_items,
                seed,
            )?),
            Self::Block {
                repetitions,
                shuffle,
            } => Box::new(block_queue(items, *repetitions, *shuffle, seed)),
        })
    }
}

/// Stopping rule for the fixed-step staircase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritMethod {
    /// Count issued trials.
    Trials,
    /// Count reversals of the response trend.
    Reversals,
}

impl CritMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trials => "trials",
            Self::Reversals => "reversals",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KaernbachConfig {
    pub start_val: f64,
    pub stepsize_up: f64,
    pub stepsize_dn: f64,
    /// `None` leaves that side open.
    pub min_val: Option<f64>,
    pub max_val: Option<f64>,
    pub crit: u32,
    pub crit_method: CritMethod,
}

impl Default for KaernbachConfig {
    fn default() -> Self {
        Self {
            start_val: 100.0,
            stepsize_up: 3.0,
            stepsize_dn: 1.0,
            min_val: Some(0.0),
            max_val: Some(100.0),
            crit: 100,
            crit_method: CritMethod::Trials,
        }
    }
}

impl KaernbachConfig {
    pub fn with_start(mut self, start_val: f64) -> Self {
        self.start_val = start_val;
        self
    }

    pub fn with_steps(mut self, up: f64, down: f64) -> Self {
        self.stepsize_up = up;
        self.stepsize_dn = down;
        self
    }

    pub fn with_bounds(mut self, min_val: f64, max_val: f64) -> Self {
        self.min_val = Some(min_val);
        self.max_val = Some(max_val);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.min_val = None;
        self.max_val = None;
        self
    }

    pub fn with_criterion(mut self, crit: u32, method: CritMethod) -> Self {
        self.crit = crit;
        self.crit_method = method;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let finite_or_open = |v: Option<f64>| v.map_or(true, f64::is_finite);
        if !finite_or_open(self.min_val) || !finite_or_open(self.max_val) {
            return Err(ScheduleError::InvalidConfig(
                "staircase bounds must be finite".to_string(),
            ));
        }
        if let (Some(lo), Some(hi)) = (self.min_val, self.max_val) {
            if lo > hi {
                return Err(ScheduleError::InvalidConfig(format!(
                    "staircase bounds [{lo}, {hi}] are empty"
                )));
            }
        }
        if !self.start_val.is_finite() {
            return Err(ScheduleError::InvalidConfig(
                "staircase start value must be finite".to_string(),
            ));
        }
        for (name, step) in [("up", self.stepsize_up), ("down", self.stepsize_dn)] {
            if !step.is_finite() || step < 0.0 {
                return Err(ScheduleError::InvalidConfig(format!(
                    "staircase {name} step {step} must be finite and non-negative"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoubleStaircaseConfig {
    /// Step size as a fraction of the current bracket width.
    pub rate_constant: f64,
    pub seed: u64,
}

impl Default for DoubleStaircaseConfig {
    fn default() -> Self {
        Self {
            rate_constant: 0.05,
            seed: 0,
        }
    }
}

impl DoubleStaircaseConfig {
    pub fn with_rate(mut self, rate_constant: f64) -> Self {
        self.rate_constant = rate_constant;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.rate_constant > 0.0 && self.rate_constant <= 1.0) {
            return Err(ScheduleError::InvalidConfig(format!(
                "rate_constant {} must lie in (0, 1]",
                self.rate_constant
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReinforcedConfig {
    pub staircase: DoubleStaircaseConfig,
    /// Fraction of trials that are real bisection probes.
    pub probe_rate: f64,
    /// Draw easy trials from the log-shaped distribution instead of uniformly.
    pub sample_log: bool,
}

impl Default for ReinforcedConfig {
    fn default() -> Self {
        Self {
            staircase: DoubleStaircaseConfig::default(),
            probe_rate: 0.1,
            sample_log: false,
        }
    }
}

impl ReinforcedConfig {
    pub fn with_probe_rate(mut self, probe_rate: f64) -> Self {
        self.probe_rate = probe_rate;
        self
    }

    pub fn with_log_sampling(mut self, sample_log: bool) -> Self {
        self.sample_log = sample_log;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.staircase.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.staircase.validate()?;
        if !(0.0..=1.0).contains(&self.probe_rate) {
            return Err(ScheduleError::InvalidConfig(format!(
                "probe_rate {} must lie in [0, 1]",
                self.probe_rate
            )));
        }
        Ok(())
    }
}

/// When a response earns its consequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReinforcementConfig {
    /// Every response is consequated.
    #[default]
    Continuous,
    /// Every `ratio`-th consecutive correct response is reinforced.
    FixedRatio { ratio: u32 },
    /// Like fixed ratio, with the run length redrawn from `[1, 2*ratio)`.
    VariableRatio { ratio: u32 },
    /// Correct responses are reinforced with the given probability.
    Percent { probability: f64 },
}

impl ReinforcementConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Percent { probability } if !(0.0..=1.0).contains(probability) => {
                Err(ScheduleError::InvalidConfig(format!(
                    "reinforcement probability {probability} must lie in [0, 1]"
                )))
            }
            _ => Ok(()),
        }
    }
}
