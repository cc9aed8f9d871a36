//! Bisection ("double") staircases over an ordered stimulus continuum.
//!
//! Index 0 is the easiest "left" stimulus and the last index the easiest
//! "right" one. The goal is the subject's 50% crossover point.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::condition::Condition;
use crate::config::{DoubleStaircaseConfig, ReinforcedConfig};
use crate::error::{Result, ScheduleError};
use crate::prng::Prng;
use crate::source::{Handshake, Outcome, Pull, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn label(self) -> &'static str {
        match self {
            Side::Left => "L",
            Side::Right => "R",
        }
    }
}

/// One selection from a bisection procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub side: Side,
    pub index: usize,
    pub stimulus: String,
}

impl Condition for Probe {
    fn name(&self) -> &str {
        self.side.label()
    }

    fn response(&self) -> Option<&str> {
        Some(self.side.label())
    }

    fn get(&self) -> String {
        self.stimulus.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Log-shaped reshaping of a uniform draw.
// ─────────────────────────────────────────────────────────────────────────

/// Sharpness of the log-shaped distribution.
pub const LOG_SHAPE_ALPHA: f64 = 10.0;

/// Map a uniform `u` in [0, 1] to [0, 1] with density proportional to
/// `ln(1 + alpha * x)`: rare near 0, increasingly likely towards 1.
///
/// The result is the inverse of the CDF
///
/// ```text
/// F(x) = ((1 + a x) ln(1 + a x) - a x) / ((1 + a) ln(1 + a) - a)
/// ```
///
/// found by bisection, so it is monotonic in `u` and exact to ~1e-15.
pub fn log_shape(u: f64) -> f64 {
    log_shape_with(u, LOG_SHAPE_ALPHA)
}

pub fn log_shape_with(u: f64, alpha: f64) -> f64 {
    let g = |x: f64| {
        let a = 1.0 + alpha * x;
        a * a.ln() - alpha * x
    };
    let target = u.clamp(0.0, 1.0) * g(1.0);
    let (mut lo, mut hi) = (0.0f64, 1.0f64);
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        if g(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

// ─────────────────────────────────────────────────────────────────────────
// Double staircase
// ─────────────────────────────────────────────────────────────────────────

/// Narrows `[low_idx, high_idx]` by probing just inside either bound. A correct
/// response moves the probed bound onto the probed index; anything else
/// leaves the bracket alone. Exhausted once the bounds are adjacent.
#[derive(Debug, Clone)]
pub struct DoubleStaircase {
    state: DoubleStaircaseState,
    pending: Option<(Side, usize)>,
    handshake: Handshake,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleStaircaseState {
    pub stimuli: Vec<String>,
    pub rate_constant: f64,
    pub low_idx: usize,
    pub high_idx: usize,
    pub rng: Prng,
}

impl DoubleStaircaseState {
    /// Requires `low_idx <= high_idx < stimuli.len()` and a rate in (0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.stimuli.is_empty() {
            return Err(ScheduleError::EmptyItems);
        }
        if self.low_idx > self.high_idx || self.high_idx >= self.stimuli.len() {
            return Err(ScheduleError::InvalidConfig(format!(
                "bracket [{}, {}] does not fit {} stimuli",
                self.low_idx,
                self.high_idx,
                self.stimuli.len()
            )));
        }
        let r = self.rate_constant;
        if !(r > 0.0 && r <= 1.0) {
            return Err(ScheduleError::InvalidConfig(format!(
                "rate constant {r} must be in (0, 1]"
            )));
        }
        Ok(())
    }
}

impl DoubleStaircase {
    pub const NAME: &'static str = "double staircase";

    pub fn new(stimuli: Vec<String>, cfg: &DoubleStaircaseConfig) -> Result<Self> {
        cfg.validate()?;
        if stimuli.is_empty() {
            return Err(ScheduleError::EmptyItems);
        }
        let high_idx = stimuli.len() - 1;
        Self::from_state(DoubleStaircaseState {
            stimuli,
            rate_constant: cfg.rate_constant,
            low_idx: 0,
            high_idx,
            rng: Prng::new(cfg.seed),
        })
    }

    /// Resume from a saved state, which must describe a bracket inside the
    /// stimulus list.
    pub fn from_state(state: DoubleStaircaseState) -> Result<Self> {
        state.validate()?;
        Ok(Self {
            state,
            pending: None,
            handshake: Handshake::new(Self::NAME),
        })
    }

    pub fn state(&self) -> &DoubleStaircaseState {
        &self.state
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.state.low_idx, self.state.high_idx)
    }

    pub fn is_converged(&self) -> bool {
        self.state.high_idx - self.state.low_idx <= 1
    }

    pub fn is_updated(&self) -> bool {
        self.handshake.is_updated()
    }

    /// Drop the pending probe without moving either bound.
    pub fn no_response(&mut self) {
        self.pending = None;
    }
}

impl Source for DoubleStaircase {
    type Item = Probe;

    fn pull(&mut self) -> Result<Pull<Probe>> {
        self.handshake.check()?;
        if self.is_converged() {
            return Ok(Pull::Exhausted);
        }
        self.handshake.issue();

        let s = &mut self.state;
        let gap = s.high_idx - s.low_idx;
        let delta = (s.rate_constant * gap as f64).ceil() as usize;
        let (side, index) = if s.rng.chance(0.5) {
            (Side::Left, s.low_idx + delta)
        } else {
            (Side::Right, s.high_idx - delta)
        };
        self.pending = Some((side, index));

        Ok(Pull::Item(Probe {
            side,
            index,
            stimulus: s.stimuli[index].clone(),
        }))
    }

    fn report_outcome(&mut self, outcome: Outcome) -> Result<()> {
        self.handshake.acknowledge();
        if outcome.no_response {
            self.no_response();
            return Ok(());
        }

        if let (true, Some((side, index))) = (outcome.correct, self.pending.take()) {
            match side {
                Side::Left => self.state.low_idx = index,
                Side::Right => self.state.high_idx = index,
            }
            debug!(
                low = self.state.low_idx,
                high = self.state.high_idx,
                "double staircase bracket narrowed"
            );
            if self.is_converged() {
                info!(
                    low = self.state.low_idx,
                    high = self.state.high_idx,
                    "double staircase converged"
                );
            }
        }
        self.pending = None;
        Ok(())
    }

    fn is_adaptive(&self) -> bool {
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Reinforced double staircase
// ─────────────────────────────────────────────────────────────────────────

/// A [`DoubleStaircase`] diluted with easy trials drawn from outside the
/// current bracket, so the subject keeps earning rewards while only a
/// `probe_rate` fraction of trials move the estimate.
///
/// Never exhausts: once the inner staircase converges probing stops for
/// good and every trial is an easy one.
#[derive(Debug, Clone)]
pub struct ReinforcedDoubleStaircase {
    inner: DoubleStaircase,
    probe_rate: f64,
    sample_log: bool,
    rng: Prng,
    last_probe: bool,
    handshake: Handshake,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinforcedState {
    pub staircase: DoubleStaircaseState,
    pub probe_rate: f64,
    pub sample_log: bool,
    pub rng: Prng,
}

impl ReinforcedState {
    pub fn validate(&self) -> Result<()> {
        self.staircase.validate()?;
        let p = self.probe_rate;
        if !(0.0..=1.0).contains(&p) {
            return Err(ScheduleError::InvalidConfig(format!(
                "probe rate {p} must be in [0, 1]"
            )));
        }
        Ok(())
    }
}

impl ReinforcedDoubleStaircase {
    pub const NAME: &'static str = "reinforced double staircase";

    pub fn new(stimuli: Vec<String>, cfg: &ReinforcedConfig) -> Result<Self> {
        cfg.validate()?;
        let inner = DoubleStaircase::new(stimuli, &cfg.staircase)?;
        Ok(Self {
            inner,
            probe_rate: cfg.probe_rate,
            sample_log: cfg.sample_log,
            // Keep the easy-trial stream independent of the probe stream.
            rng: Prng::new(cfg.staircase.seed ^ 0x5DEE_CE66_D1CE_4E5B),
            last_probe: false,
            handshake: Handshake::new(Self::NAME),
        })
    }

    pub fn from_state(state: ReinforcedState) -> Result<Self> {
        state.validate()?;
        Ok(Self {
            inner: DoubleStaircase::from_state(state.staircase)?,
            probe_rate: state.probe_rate,
            sample_log: state.sample_log,
            rng: state.rng,
            last_probe: false,
            handshake: Handshake::new(Self::NAME),
        })
    }

    pub fn to_state(&self) -> ReinforcedState {
        ReinforcedState {
            staircase: self.inner.state().clone(),
            probe_rate: self.probe_rate,
            sample_log: self.sample_log,
            rng: self.rng.clone(),
        }
    }

    pub fn staircase(&self) -> &DoubleStaircase {
        &self.inner
    }

    pub fn probe_rate(&self) -> f64 {
        self.probe_rate
    }

    /// Whether the selection awaiting its outcome is a real probe.
    pub fn last_was_probe(&self) -> bool {
        self.last_probe
    }

    pub fn is_updated(&self) -> bool {
        self.handshake.is_updated()
    }

    fn easy_trial(&mut self) -> Probe {
        let s = self.inner.state();
        let n = s.stimuli.len();
        let (low, high) = (s.low_idx, s.high_idx);

        // Left easy trials come from [0, low_idx); index 0 is the only
        // choice once the lower bound sits at the start of the continuum.
        let (side, index) = if self.rng.chance(0.5) {
            let index = if low == 0 {
                0
            } else if self.sample_log {
                let x = log_shape(self.rng.next_f64_01());
                (((1.0 - x) * low as f64) as usize).min(low - 1)
            } else {
                self.rng.gen_range_usize(0, low)
            };
            (Side::Left, index)
        } else {
            let index = if self.sample_log {
                let x = log_shape(self.rng.next_f64_01());
                high + (x * (n - high) as f64) as usize
            } else {
                self.rng.gen_range_usize(high, n)
            };
            (Side::Right, index.min(n - 1))
        };

        Probe {
            side,
            index,
            stimulus: self.inner.state().stimuli[index].clone(),
        }
    }
}

impl Source for ReinforcedDoubleStaircase {
    type Item = Probe;

    fn pull(&mut self) -> Result<Pull<Probe>> {
        self.handshake.check()?;

        if self.rng.chance(self.probe_rate) {
            match self.inner.pull()? {
                Pull::Item(probe) => {
                    self.handshake.issue();
                    self.last_probe = true;
                    return Ok(Pull::Item(probe));
                }
                Pull::Exhausted => {
                    info!("bisection converged; serving easy trials only");
                    self.probe_rate = 0.0;
                }
            }
        }

        self.handshake.issue();
        self.last_probe = false;
        Ok(Pull::Item(self.easy_trial()))
    }

    fn report_outcome(&mut self, outcome: Outcome) -> Result<()> {
        self.handshake.acknowledge();
        // Probe outcomes always reach the inner staircase, including misses,
        // so its own handshake is re-armed.
        if self.last_probe {
            self.inner.report_outcome(outcome)?;
        }
        self.last_probe = false;
        Ok(())
    }

    fn is_adaptive(&self) -> bool {
        true
    }
}
