//! The pull/report contract shared by sampling policies, adaptive procedures,
//! and everything layered on top of them.

use crate::error::{Result, ScheduleError};

/// Result of pulling from a [`Source`].
#[derive(Debug, Clone, PartialEq)]
pub enum Pull<T> {
    Item(T),
    /// The sequence is finished. Expected control flow, not a fault.
    Exhausted,
}

impl<T> Pull<T> {
    pub fn item(self) -> Option<T> {
        match self {
            Pull::Item(v) => Some(v),
            Pull::Exhausted => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Pull::Exhausted)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Pull<U> {
        match self {
            Pull::Item(v) => Pull::Item(f(v)),
            Pull::Exhausted => Pull::Exhausted,
        }
    }
}

/// What the subject did on one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome {
    pub correct: bool,
    pub no_response: bool,
}

impl Outcome {
    pub fn new(correct: bool, no_response: bool) -> Self {
        Self {
            correct,
            no_response,
        }
    }

    pub fn correct() -> Self {
        Self::new(true, false)
    }

    pub fn incorrect() -> Self {
        Self::new(false, false)
    }

    pub fn no_response() -> Self {
        Self::new(false, true)
    }
}

/// Something the scheduler can pull selections from.
///
/// Sampling policies ignore outcomes. Adaptive procedures return `true` from
/// [`Source::is_adaptive`] and require exactly one `report_outcome` between
/// consecutive pulls.
pub trait Source {
    type Item;

    fn pull(&mut self) -> Result<Pull<Self::Item>>;

    fn report_outcome(&mut self, _outcome: Outcome) -> Result<()> {
        Ok(())
    }

    fn is_adaptive(&self) -> bool {
        false
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    type Item = S::Item;

    fn pull(&mut self) -> Result<Pull<Self::Item>> {
        (**self).pull()
    }

    fn report_outcome(&mut self, outcome: Outcome) -> Result<()> {
        (**self).report_outcome(outcome)
    }

    fn is_adaptive(&self) -> bool {
        (**self).is_adaptive()
    }
}

/// Single-slot pull/update handshake.
///
/// `updated` is true exactly when the last issued selection has been
/// acknowledged. It is runtime-only and never persisted: a restored
/// procedure always starts armed.
#[derive(Debug, Clone)]
pub struct Handshake {
    procedure: &'static str,
    updated: bool,
}

impl Handshake {
    pub fn new(procedure: &'static str) -> Self {
        Self {
            procedure,
            updated: true,
        }
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Fails if the previous selection is still awaiting its outcome.
    pub fn check(&self) -> Result<()> {
        if self.updated {
            Ok(())
        } else {
            Err(ScheduleError::NotUpdated {
                procedure: self.procedure,
            })
        }
    }

    /// Marks a selection as issued.
    pub fn issue(&mut self) {
        self.updated = false;
    }

    pub fn acknowledge(&mut self) {
        self.updated = true;
    }
}
