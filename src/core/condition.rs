use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::error::{Result, ScheduleError};
use crate::prng::Prng;

/// A named pool of stimuli with its consequation policy.
///
/// `get` takes `&self`: any sampling bookkeeping is the implementor's
/// business, kept behind interior mutability.
pub trait Condition {
    fn name(&self) -> &str;

    /// The desired response, if the condition has one.
    fn response(&self) -> Option<&str> {
        None
    }

    fn is_rewarded(&self) -> bool {
        true
    }

    fn is_punished(&self) -> bool {
        true
    }

    /// One stimulus identifier.
    fn get(&self) -> String;
}

impl<C: Condition + ?Sized> Condition for Rc<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn response(&self) -> Option<&str> {
        (**self).response()
    }

    fn is_rewarded(&self) -> bool {
        (**self).is_rewarded()
    }

    fn is_punished(&self) -> bool {
        (**self).is_punished()
    }

    fn get(&self) -> String {
        (**self).get()
    }
}

/// A condition over an explicit list of stimulus identifiers.
///
/// Without replacement, stimuli come out in (optionally shuffled) order and
/// the order is rebuilt once every stimulus has been used. With
/// replacement each call draws uniformly.
#[derive(Debug)]
pub struct StimulusCondition {
    name: String,
    response: Option<String>,
    is_rewarded: bool,
    is_punished: bool,
    stimuli: Vec<String>,
    shuffle: bool,
    replacement: bool,
    cursor: RefCell<StimulusCursor>,
}

#[derive(Debug)]
struct StimulusCursor {
    order: Vec<usize>,
    rng: Prng,
}

impl StimulusCondition {
    pub fn new(name: impl Into<String>, stimuli: Vec<String>) -> Result<Self> {
        if stimuli.is_empty() {
            return Err(ScheduleError::EmptyItems);
        }
        let c = Self {
            name: name.into(),
            response: None,
            is_rewarded: true,
            is_punished: true,
            stimuli,
            shuffle: true,
            replacement: false,
            cursor: RefCell::new(StimulusCursor {
                order: Vec::new(),
                rng: Prng::new(0),
            }),
        };
        debug!(condition = %c.name, stimuli = c.stimuli.len(), "created condition");
        Ok(c)
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn with_consequences(mut self, rewarded: bool, punished: bool) -> Self {
        self.is_rewarded = rewarded;
        self.is_punished = punished;
        self
    }

    pub fn with_sampling(mut self, shuffle: bool, replacement: bool) -> Self {
        self.shuffle = shuffle;
        self.replacement = replacement;
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.cursor.borrow_mut().rng = Prng::new(seed);
        self
    }

    pub fn stimuli(&self) -> &[String] {
        &self.stimuli
    }
}

impl Condition for StimulusCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    fn is_rewarded(&self) -> bool {
        self.is_rewarded
    }

    fn is_punished(&self) -> bool {
        self.is_punished
    }

    fn get(&self) -> String {
        let mut cursor = self.cursor.borrow_mut();
        let n = self.stimuli.len();

        let index = if self.replacement {
            cursor.rng.gen_range_usize(0, n)
        } else {
            if cursor.order.is_empty() {
                // Reverse so `pop` hands out the front of the order.
                let mut order: Vec<usize> = (0..n).rev().collect();
                if self.shuffle {
                    cursor.rng.shuffle(&mut order);
                }
                cursor.order = order;
            }
            cursor.order.pop().unwrap_or(0)
        };

        debug!(condition = %self.name, "selected stimulus {} of {}", index + 1, n);
        self.stimuli[index].clone()
    }
}
