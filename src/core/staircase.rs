use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{CritMethod, KaernbachConfig};
use crate::error::{Result, ScheduleError};
use crate::source::{Handshake, Outcome, Pull, Source};

/// Fixed-step staircase after Kaernbach (1991).
///
/// Larger values are assumed easier: a correct response lowers the level by
/// `stepsize_dn`, an incorrect one raises it by `stepsize_up`. The level is
/// clamped to `[min_val, max_val]` after every step.
#[derive(Debug, Clone)]
pub struct KaernbachStaircase {
    state: KaernbachState,
    handshake: Handshake,
}

/// Everything a [`KaernbachStaircase`] needs to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KaernbachState {
    pub value: f64,
    pub stepsize_up: f64,
    pub stepsize_dn: f64,
    pub min_val: Option<f64>,
    pub max_val: Option<f64>,
    pub crit: u32,
    pub crit_method: CritMethod,
    pub counter: u32,
    pub going_up: bool,
}

impl KaernbachState {
    pub fn validate(&self) -> Result<()> {
        if !self.value.is_finite() {
            return Err(ScheduleError::InvalidConfig(format!(
                "staircase value {} must be finite",
                self.value
            )));
        }
        for step in [self.stepsize_up, self.stepsize_dn] {
            if !step.is_finite() || step < 0.0 {
                return Err(ScheduleError::InvalidConfig(format!(
                    "staircase step {step} must be finite and non-negative"
                )));
            }
        }
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
        Ok(())
    }
}

impl KaernbachStaircase {
    pub const NAME: &'static str = "kaernbach staircase";

    pub fn new(cfg: &KaernbachConfig) -> Result<Self> {
        cfg.validate()?;
        Self::from_state(KaernbachState {
            value: clamp_to_rails(cfg.start_val, cfg.min_val, cfg.max_val),
            stepsize_up: cfg.stepsize_up,
            stepsize_dn: cfg.stepsize_dn,
            min_val: cfg.min_val,
            max_val: cfg.max_val,
            crit: cfg.crit,
            crit_method: cfg.crit_method,
            counter: 0,
            going_up: false,
        })
    }

    /// Resume from a saved state. The handshake starts armed.
    pub fn from_state(state: KaernbachState) -> Result<Self> {
        state.validate()?;
        Ok(Self {
            state,
            handshake: Handshake::new(Self::NAME),
        })
    }

    pub fn state(&self) -> &KaernbachState {
        &self.state
    }

    pub fn value(&self) -> f64 {
        self.state.value
    }

    pub fn counter(&self) -> u32 {
        self.state.counter
    }

    pub fn is_updated(&self) -> bool {
        self.handshake.is_updated()
    }
}

fn clamp_to_rails(value: f64, min_val: Option<f64>, max_val: Option<f64>) -> f64 {
    match (min_val, max_val) {
        (_, Some(max)) if value > max => max,
        (Some(min), _) if value < min => min,
        _ => value,
    }
}

impl Source for KaernbachStaircase {
    type Item = f64;

    fn pull(&mut self) -> Result<Pull<f64>> {
        self.handshake.check()?;
        let s = &mut self.state;
        if s.counter > s.crit {
            return Ok(Pull::Exhausted);
        }
        self.handshake.issue();
        if s.crit_method == CritMethod::Trials {
            s.counter += 1;
        }
        Ok(Pull::Item(s.value))
    }

    fn report_outcome(&mut self, outcome: Outcome) -> Result<()> {
        self.handshake.acknowledge();
        let s = &mut self.state;

        if outcome.correct {
            s.value -= s.stepsize_dn;
        } else {
            s.value += s.stepsize_up;
        }

        if s.crit_method == CritMethod::Reversals && outcome.correct == s.going_up {
            s.counter += 1;
            s.going_up = !s.going_up;
        }

        // Stop at the rails.
        s.value = clamp_to_rails(s.value, s.min_val, s.max_val);

        if s.counter > s.crit {
            info!(
                value = s.value,
                counter = s.counter,
                method = s.crit_method.as_str(),
                "staircase reached its criterion"
            );
        }
        Ok(())
    }

    fn is_adaptive(&self) -> bool {
        true
    }
}
