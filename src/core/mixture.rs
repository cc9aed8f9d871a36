use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bisection::{DoubleStaircase, Probe, ReinforcedDoubleStaircase};
use crate::condition::Condition;
use crate::error::{Result, ScheduleError};
use crate::persist::{ProcedureState, Snapshot};
use crate::prng::Prng;
use crate::source::{Handshake, Outcome, Pull, Source};
use crate::staircase::KaernbachStaircase;

/// Output of any adaptive procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selection {
    /// A staircase level.
    Level(f64),
    Probe(Probe),
}

impl Selection {
    pub fn level(&self) -> Option<f64> {
        match self {
            Selection::Level(v) => Some(*v),
            Selection::Probe(_) => None,
        }
    }

    pub fn probe(&self) -> Option<&Probe> {
        match self {
            Selection::Probe(p) => Some(p),
            Selection::Level(_) => None,
        }
    }
}

impl Condition for Selection {
    fn name(&self) -> &str {
        match self {
            Selection::Level(_) => "level",
            Selection::Probe(p) => p.name(),
        }
    }

    fn response(&self) -> Option<&str> {
        match self {
            Selection::Level(_) => None,
            Selection::Probe(p) => p.response(),
        }
    }

    fn get(&self) -> String {
        match self {
            Selection::Level(v) => v.to_string(),
            Selection::Probe(p) => p.get(),
        }
    }
}

/// Any adaptive procedure, behind one item type.
#[derive(Debug, Clone)]
pub enum Procedure {
    Kaernbach(KaernbachStaircase),
    Double(DoubleStaircase),
    Reinforced(ReinforcedDoubleStaircase),
    Mixed(Box<MixedAdaptiveQueue>),
}

impl Procedure {
    pub fn name(&self) -> &'static str {
        match self {
            Procedure::Kaernbach(_) => KaernbachStaircase::NAME,
            Procedure::Double(_) => DoubleStaircase::NAME,
            Procedure::Reinforced(_) => ReinforcedDoubleStaircase::NAME,
            Procedure::Mixed(_) => MixedAdaptiveQueue::NAME,
        }
    }

    pub fn is_updated(&self) -> bool {
        match self {
            Procedure::Kaernbach(p) => p.is_updated(),
            Procedure::Double(p) => p.is_updated(),
            Procedure::Reinforced(p) => p.is_updated(),
            Procedure::Mixed(p) => p.is_updated(),
        }
    }
}

impl Source for Procedure {
    type Item = Selection;

    fn pull(&mut self) -> Result<Pull<Selection>> {
        Ok(match self {
            Procedure::Kaernbach(p) => p.pull()?.map(Selection::Level),
            Procedure::Double(p) => p.pull()?.map(Selection::Probe),
            Procedure::Reinforced(p) => p.pull()?.map(Selection::Probe),
            Procedure::Mixed(p) => p.pull()?,
        })
    }

    fn report_outcome(&mut self, outcome: Outcome) -> Result<()> {
        match self {
            Procedure::Kaernbach(p) => p.report_outcome(outcome),
            Procedure::Double(p) => p.report_outcome(outcome),
            Procedure::Reinforced(p) => p.report_outcome(outcome),
            Procedure::Mixed(p) => p.report_outcome(outcome),
        }
    }

    fn is_adaptive(&self) -> bool {
        true
    }
}

impl From<KaernbachStaircase> for Procedure {
    fn from(p: KaernbachStaircase) -> Self {
        Procedure::Kaernbach(p)
    }
}

impl From<DoubleStaircase> for Procedure {
    fn from(p: DoubleStaircase) -> Self {
        Procedure::Double(p)
    }
}

impl From<ReinforcedDoubleStaircase> for Procedure {
    fn from(p: ReinforcedDoubleStaircase) -> Self {
        Procedure::Reinforced(p)
    }
}

impl From<MixedAdaptiveQueue> for Procedure {
    fn from(p: MixedAdaptiveQueue) -> Self {
        Procedure::Mixed(Box::new(p))
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Mixture of procedures
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SubProcedure {
    name: String,
    procedure: Procedure,
    exhausted: bool,
}

/// Interleaves named sub-procedures, picking one uniformly at random per
/// trial and routing the outcome back to it.
///
/// A sub-procedure that runs out is retired and the draw falls back to the
/// remaining ones; the mixture is exhausted once all are retired. Wrap it in
/// [`crate::persist::Persistent`] to save it after every update.
#[derive(Debug, Clone)]
pub struct MixedAdaptiveQueue {
    subs: Vec<SubProcedure>,
    rng: Prng,
    selected: Option<usize>,
    handshake: Handshake,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixedState {
    pub subs: Vec<SubProcedureState>,
    pub rng: Prng,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubProcedureState {
    pub name: String,
    pub exhausted: bool,
    pub procedure: ProcedureState,
}

impl MixedState {
    pub fn validate(&self) -> Result<()> {
        if self.subs.is_empty() {
            return Err(ScheduleError::EmptyItems);
        }
        self.subs.iter().try_for_each(|s| s.procedure.validate())
    }
}

impl MixedAdaptiveQueue {
    pub const NAME: &'static str = "mixed adaptive queue";

    /// `probabilities` is reserved for weighted selection, which is not
    /// supported: passing any is a configuration error.
    pub fn new(
        subs: Vec<(String, Procedure)>,
        probabilities: Option<Vec<f64>>,
        seed: u64,
    ) -> Result<Self> {
        if probabilities.is_some() {
            return Err(ScheduleError::WeightedMixtureUnsupported);
        }
        if subs.is_empty() {
            return Err(ScheduleError::EmptyItems);
        }
        Ok(Self {
            subs: subs
                .into_iter()
                .map(|(name, procedure)| SubProcedure {
                    name,
                    procedure,
                    exhausted: false,
                })
                .collect(),
            rng: Prng::new(seed),
            selected: None,
            handshake: Handshake::new(Self::NAME),
        })
    }

    pub fn from_state(state: MixedState) -> Result<Self> {
        state.validate()?;
        let subs = state
            .subs
            .into_iter()
            .map(|s| {
                Ok(SubProcedure {
                    name: s.name,
                    procedure: Procedure::restore(s.procedure)?,
                    exhausted: s.exhausted,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            subs,
            rng: state.rng,
            selected: None,
            handshake: Handshake::new(Self::NAME),
        })
    }

    pub fn to_state(&self) -> MixedState {
        MixedState {
            subs: self
                .subs
                .iter()
                .map(|s| SubProcedureState {
                    name: s.name.clone(),
                    exhausted: s.exhausted,
                    procedure: s.procedure.snapshot(),
                })
                .collect(),
            rng: self.rng.clone(),
        }
    }

    /// Name of the sub-procedure whose selection awaits an outcome.
    pub fn last_selected(&self) -> Option<&str> {
        self.selected.map(|i| self.subs[i].name.as_str())
    }

    pub fn sub_procedure(&self, name: &str) -> Option<&Procedure> {
        self.subs
            .iter()
            .find(|s| s.name == name)
            .map(|s| &s.procedure)
    }

    pub fn live_count(&self) -> usize {
        self.subs.iter().filter(|s| !s.exhausted).count()
    }

    pub fn is_updated(&self) -> bool {
        self.handshake.is_updated()
    }
}

impl Source for MixedAdaptiveQueue {
    type Item = Selection;

    fn pull(&mut self) -> Result<Pull<Selection>> {
        self.handshake.check()?;
        loop {
            let live: Vec<usize> = (0..self.subs.len())
                .filter(|&i| !self.subs[i].exhausted)
                .collect();
            if live.is_empty() {
                return Ok(Pull::Exhausted);
            }

            let idx = live[self.rng.gen_range_usize(0, live.len())];
            let sub = &mut self.subs[idx];
            match sub.procedure.pull()? {
                Pull::Item(selection) => {
                    self.selected = Some(idx);
                    self.handshake.issue();
                    return Ok(Pull::Item(selection));
                }
                Pull::Exhausted => {
                    info!(sub_procedure = %sub.name, "sub-procedure exhausted; retiring it");
                    sub.exhausted = true;
                }
            }
        }
    }

    fn report_outcome(&mut self, outcome: Outcome) -> Result<()> {
        self.handshake.acknowledge();
        if let Some(idx) = self.selected.take() {
            self.subs[idx].procedure.report_outcome(outcome)?;
        }
        Ok(())
    }

    fn is_adaptive(&self) -> bool {
        true
    }
}
