//! One-item lookahead over any [`Source`], so callers can ask whether a
//! queue is finished before pulling from it.

use std::fmt;

use tracing::debug;

use crate::config::QueueConfig;
use crate::error::{Result, ScheduleError};
use crate::prng::Prng;
use crate::source::{Outcome, Pull, Source};

/// Builds a fresh source. Called once at construction and again on every
/// [`QueueHandler::reset`].
pub type SourceFactory<T> = Box<dyn FnMut() -> Result<Box<dyn Source<Item = T>>>>;

enum OnDeck<T> {
    Ready(T),
    /// An adaptive source issued an item and cannot produce the next one
    /// until the outcome arrives.
    AwaitingOutcome,
    Consumed,
}

pub struct QueueHandler<T> {
    factory: SourceFactory<T>,
    source: Box<dyn Source<Item = T>>,
    on_deck: OnDeck<T>,
}

impl<T: 'static> QueueHandler<T> {
    /// Build the source with `factory` and prime the lookahead.
    pub fn new(
        mut factory: impl FnMut() -> Result<Box<dyn Source<Item = T>>> + 'static,
    ) -> Result<Self> {
        let source = factory()?;
        let mut queue = Self {
            factory: Box::new(factory),
            source,
            on_deck: OnDeck::Consumed,
        };
        queue.refill()?;
        Ok(queue)
    }

    /// Queue over a sampling policy. Each rebuild draws a new seed from a
    /// generator seeded with `seed`, so a reset gives a fresh order.
    pub fn from_config(items: Vec<T>, config: QueueConfig, seed: u64) -> Result<Self>
    where
        T: Clone,
    {
        let mut seeds = Prng::new(seed);
        Self::new(move || config.build(items.clone(), seeds.next_u64()))
    }

    /// Queue over a source built by `make`, typically an adaptive procedure.
    pub fn from_source<S>(mut make: impl FnMut() -> Result<S> + 'static) -> Result<Self>
    where
        S: Source<Item = T> + 'static,
    {
        Self::new(move || Ok(Box::new(make()?) as Box<dyn Source<Item = T>>))
    }

    fn refill(&mut self) -> Result<()> {
        self.on_deck = match self.source.pull()? {
            Pull::Item(item) => OnDeck::Ready(item),
            Pull::Exhausted => OnDeck::Consumed,
        };
        Ok(())
    }

    /// True once the source has run dry. A pull will report exhaustion.
    pub fn is_consumed(&self) -> bool {
        matches!(self.on_deck, OnDeck::Consumed)
    }

    pub fn is_awaiting_outcome(&self) -> bool {
        matches!(self.on_deck, OnDeck::AwaitingOutcome)
    }

    /// Throw the source away, build a new one and prime it again.
    pub fn reset(&mut self) -> Result<()> {
        self.source = (self.factory)()?;
        self.refill()?;
        debug!(consumed = self.is_consumed(), "queue rebuilt");
        Ok(())
    }
}

impl<T: 'static> Source for QueueHandler<T> {
    type Item = T;

    fn pull(&mut self) -> Result<Pull<T>> {
        match std::mem::replace(&mut self.on_deck, OnDeck::Consumed) {
            OnDeck::Ready(item) => {
                if self.source.is_adaptive() {
                    self.on_deck = OnDeck::AwaitingOutcome;
                } else {
                    self.refill()?;
                }
                Ok(Pull::Item(item))
            }
            OnDeck::AwaitingOutcome => {
                self.on_deck = OnDeck::AwaitingOutcome;
                Err(ScheduleError::NotUpdated {
                    procedure: "queue handler",
                })
            }
            OnDeck::Consumed => Ok(Pull::Exhausted),
        }
    }

    fn report_outcome(&mut self, outcome: Outcome) -> Result<()> {
        if !self.source.is_adaptive() {
            return self.source.report_outcome(outcome);
        }
        if !self.is_awaiting_outcome() {
            return Err(ScheduleError::NoPendingTrial);
        }
        // Refill even when the report fails. A source that applied the
        // outcome before failing (a persistent one whose save broke) is ready
        // again; one that did not refuses the pull and stays awaiting.
        let reported = self.source.report_outcome(outcome);
        let refilled = self.refill();
        reported.and(refilled)
    }

    fn is_adaptive(&self) -> bool {
        self.source.is_adaptive()
    }
}

impl<T> fmt::Debug for QueueHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.on_deck {
            OnDeck::Ready(_) => "ready",
            OnDeck::AwaitingOutcome => "awaiting outcome",
            OnDeck::Consumed => "consumed",
        };
        f.debug_struct("QueueHandler")
            .field("on_deck", &state)
            .field("adaptive", &self.source.is_adaptive())
            .finish_non_exhaustive()
    }
}
