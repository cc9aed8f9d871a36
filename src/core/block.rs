//! Trials, blocks, and the handlers that sequence or interleave blocks.

use std::rc::Rc;

use hashbrown::HashMap;
use tracing::{debug, info};

use crate::condition::Condition;
use crate::config::QueueConfig;
use crate::error::{Result, ScheduleError};
use crate::queue::QueueHandler;
use crate::reinforcement::ReinforcementSchedule;
use crate::source::{Outcome, Pull, Source};
use crate::stats::OutcomeStats;

/// Which block produced a trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub label: Rc<str>,
    /// Position among sibling blocks, 1-based once a handler has issued it.
    pub index: usize,
}

/// One fully formed trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial<T> {
    /// 1-based, increasing by one per issued trial.
    pub index: u32,
    pub condition: T,
    pub block: BlockRef,
}

/// Running trial index. Only successful pulls advance it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrialCounter {
    issued: u32,
}

impl TrialCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the trial about to be issued.
    pub fn advance(&mut self) -> u32 {
        self.issued += 1;
        self.issued
    }

    pub fn issued(&self) -> u32 {
        self.issued
    }

    pub fn reset(&mut self) {
        self.issued = 0;
    }
}

/// What the apparatus should do after a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Consequence {
    pub reward: bool,
    pub punish: bool,
}

// ─────────────────────────────────────────────────────────────────────────
// Block
// ─────────────────────────────────────────────────────────────────────────

/// A queue of conditions plus a reinforcement schedule, producing [`Trial`]s.
#[derive(Debug)]
pub struct Block<T> {
    label: Rc<str>,
    index: usize,
    queue: QueueHandler<T>,
    reinforcement: ReinforcementSchedule,
    counter: TrialCounter,
    stats: OutcomeStats,
}

impl<T: 'static> Block<T> {
    pub fn new(label: &str, queue: QueueHandler<T>) -> Self {
        debug!(block = label, adaptive = queue.is_adaptive(), "block initialized");
        Self {
            label: Rc::from(label),
            index: 0,
            queue,
            reinforcement: ReinforcementSchedule::continuous(),
            counter: TrialCounter::new(),
            stats: OutcomeStats::new(),
        }
    }

    /// Block over `conditions` sampled by the policy in `config`.
    pub fn from_conditions(
        label: &str,
        conditions: Vec<T>,
        config: QueueConfig,
        seed: u64,
    ) -> Result<Self>
    where
        T: Clone,
    {
        Ok(Self::new(label, QueueHandler::from_config(conditions, config, seed)?))
    }

    pub fn with_reinforcement(mut self, reinforcement: ReinforcementSchedule) -> Self {
        self.reinforcement = reinforcement;
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            label: Rc::clone(&self.label),
            index: self.index,
        }
    }

    pub fn stats(&self) -> &OutcomeStats {
        &self.stats
    }

    pub fn trials_issued(&self) -> u32 {
        self.counter.issued()
    }

    pub fn is_adaptive(&self) -> bool {
        self.queue.is_adaptive()
    }

    /// Next trial, indexed by the block's own counter.
    pub fn next_trial(&mut self) -> Result<Pull<Trial<T>>> {
        let mut counter = self.counter;
        let pulled = self.next_trial_with(&mut counter);
        self.counter = counter;
        pulled
    }

    /// Next trial, indexed by a counter owned by the caller.
    pub fn next_trial_with(&mut self, counter: &mut TrialCounter) -> Result<Pull<Trial<T>>> {
        Ok(match self.queue.pull()? {
            Pull::Item(condition) => Pull::Item(Trial {
                index: counter.advance(),
                condition,
                block: self.block_ref(),
            }),
            Pull::Exhausted => Pull::Exhausted,
        })
    }

    /// Forward the outcome of the last trial to the queue and tally it.
    pub fn report_outcome(&mut self, outcome: Outcome) -> Result<()> {
        self.queue.report_outcome(outcome)?;
        self.stats.record(outcome);
        Ok(())
    }

    /// True once the queue has run dry.
    pub fn check_completion(&self) -> bool {
        self.queue.is_consumed()
    }

    /// Rebuild the queue and restart the trial count.
    pub fn reset(&mut self) -> Result<()> {
        self.queue.reset()?;
        self.counter.reset();
        debug!(block = %self.label, "block reset");
        Ok(())
    }

    fn restart(&mut self, index: usize) -> Result<()> {
        if self.queue.is_consumed() {
            self.queue.reset()?;
        }
        self.index = index;
        self.counter.reset();
        Ok(())
    }
}

impl<T: Condition + 'static> Block<T> {
    /// Apply the block's reinforcement schedule to a response on `trial`.
    /// Misses are never consequated.
    pub fn consequate(&mut self, trial: &Trial<T>, outcome: Outcome) -> Consequence {
        if outcome.no_response {
            return Consequence::default();
        }
        let fires = self.reinforcement.consequate(outcome.correct);
        if outcome.correct {
            Consequence {
                reward: fires && trial.condition.is_rewarded(),
                punish: false,
            }
        } else {
            Consequence {
                reward: false,
                punish: fires && trial.condition.is_punished(),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Sequential blocks
// ─────────────────────────────────────────────────────────────────────────

/// Hands out blocks one after another in the order chosen by a policy over
/// block positions.
#[derive(Debug)]
pub struct BlockHandler<T> {
    blocks: Vec<Block<T>>,
    order: QueueHandler<usize>,
    current: Option<usize>,
    served: usize,
}

impl<T: 'static> BlockHandler<T> {
    /// Play every block once, in the given order.
    pub fn new(blocks: Vec<Block<T>>) -> Result<Self> {
        Self::with_order(blocks, QueueConfig::block(1, false), 0)
    }

    pub fn with_order(blocks: Vec<Block<T>>, order: QueueConfig, seed: u64) -> Result<Self> {
        let positions = (0..blocks.len()).collect();
        Ok(Self {
            order: QueueHandler::from_config(positions, order, seed)?,
            blocks,
            current: None,
            served: 0,
        })
    }

    pub fn blocks(&self) -> &[Block<T>] {
        &self.blocks
    }

    pub fn current(&self) -> Option<&Block<T>> {
        self.current.map(|i| &self.blocks[i])
    }

    fn advance(&mut self) -> Result<Option<usize>> {
        let Pull::Item(position) = self.order.pull()? else {
            self.current = None;
            return Ok(None);
        };
        self.served += 1;
        let block = &mut self.blocks[position];
        block.restart(self.served)?;
        debug!(block = %block.label, index = self.served, "starting block");
        self.current = Some(position);
        Ok(Some(position))
    }

    /// Next block, stamped with its 1-based position in the session and
    /// with its trial count restarted. A block that was already played
    /// through is rebuilt first.
    pub fn next_block(&mut self) -> Result<Pull<&mut Block<T>>> {
        Ok(match self.advance()? {
            Some(position) => Pull::Item(&mut self.blocks[position]),
            None => Pull::Exhausted,
        })
    }

    /// Next trial of the current block, moving on to the next block when the
    /// current one runs dry.
    pub fn next_trial(&mut self) -> Result<Pull<Trial<T>>> {
        let mut came_up_empty = vec![false; self.blocks.len()];
        loop {
            if let Some(position) = self.current {
                if let Pull::Item(trial) = self.blocks[position].next_trial()? {
                    return Ok(Pull::Item(trial));
                }
            }
            let Some(position) = self.advance()? else {
                return Ok(Pull::Exhausted);
            };
            if self.blocks[position].check_completion() {
                came_up_empty[position] = true;
                if came_up_empty.iter().all(|&empty| empty) {
                    return Err(ScheduleError::InvalidConfig(
                        "every block is empty".to_string(),
                    ));
                }
            }
        }
    }

    /// Forward an outcome to the block that issued the last trial.
    pub fn report_outcome(&mut self, outcome: Outcome) -> Result<()> {
        let position = self.current.ok_or(ScheduleError::NoPendingTrial)?;
        self.blocks[position].report_outcome(outcome)
    }

    /// True once the block order has run dry.
    pub fn check_completion(&self) -> bool {
        self.order.is_consumed()
    }

    pub fn reset(&mut self) -> Result<()> {
        self.order.reset()?;
        for block in &mut self.blocks {
            block.reset()?;
        }
        self.current = None;
        self.served = 0;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Interleaved blocks
// ─────────────────────────────────────────────────────────────────────────

/// Named blocks the driver pulls from by name, sharing one trial counter.
#[derive(Debug)]
pub struct MixedBlockHandler<T> {
    blocks: HashMap<String, Block<T>>,
    counter: TrialCounter,
}

impl<T> Default for MixedBlockHandler<T> {
    fn default() -> Self {
        Self {
            blocks: HashMap::new(),
            counter: TrialCounter::new(),
        }
    }
}

impl<T: 'static> MixedBlockHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block under its label, replacing any block with the same label.
    pub fn insert(&mut self, block: Block<T>) -> Option<Block<T>> {
        self.blocks.insert(block.label().to_string(), block)
    }

    pub fn with_block(mut self, block: Block<T>) -> Self {
        self.insert(block);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    pub fn block(&self, name: &str) -> Option<&Block<T>> {
        self.blocks.get(name)
    }

    pub fn trials_issued(&self) -> u32 {
        self.counter.issued()
    }

    fn block_mut(&mut self, name: &str) -> Result<&mut Block<T>> {
        self.blocks
            .get_mut(name)
            .ok_or_else(|| ScheduleError::UnknownBlock(name.to_string()))
    }

    /// Next trial from the named block, indexed by the shared counter.
    pub fn next_trial(&mut self, name: &str) -> Result<Pull<Trial<T>>> {
        let block = self
            .blocks
            .get_mut(name)
            .ok_or_else(|| ScheduleError::UnknownBlock(name.to_string()))?;
        block.next_trial_with(&mut self.counter)
    }

    pub fn report_outcome(&mut self, name: &str, outcome: Outcome) -> Result<()> {
        self.block_mut(name)?.report_outcome(outcome)
    }

    /// `None` asks whether every block is complete; `Some(name)` asks about
    /// one block.
    pub fn check_completion(&self, name: Option<&str>) -> Result<bool> {
        match name {
            None => Ok(self.blocks.values().all(Block::check_completion)),
            Some(name) => self
                .blocks
                .get(name)
                .map(Block::check_completion)
                .ok_or_else(|| ScheduleError::UnknownBlock(name.to_string())),
        }
    }

    /// Consequate `trial` with the schedule of the block that issued it.
    pub fn consequate(&mut self, trial: &Trial<T>, outcome: Outcome) -> Result<Consequence>
    where
        T: Condition,
    {
        Ok(self.block_mut(&trial.block.label)?.consequate(trial, outcome))
    }

    /// Rebuild every block and restart the shared trial count.
    pub fn reset(&mut self) -> Result<()> {
        for block in self.blocks.values_mut() {
            block.reset()?;
        }
        self.counter.reset();
        info!(blocks = self.blocks.len(), "mixed blocks reset");
        Ok(())
    }

    /// Rebuild one block. The shared trial count carries on.
    pub fn reset_one(&mut self, name: &str) -> Result<()> {
        self.block_mut(name)?.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bisection::{Probe, ReinforcedDoubleStaircase};
    use crate::condition::StimulusCondition;
    use crate::config::{ReinforcedConfig, ReinforcementConfig};
    use crate::error::ErrorKind;
    use crate::persist::tests::temp_store;
    use crate::persist::Persistent;

    fn numbered(label: &str, n: usize) -> Block<usize> {
        Block::from_conditions(label, (0..n).collect(), QueueConfig::block(1, false), 0).unwrap()
    }

    fn mixed_3_and_5() -> MixedBlockHandler<usize> {
        MixedBlockHandler::new()
            .with_block(numbered("pecking", 3))
            .with_block(numbered("playback", 5))
    }

    #[test]
    fn block_numbers_its_trials() {
        let mut b = numbered("train", 3);
        let mut indices = Vec::new();
        while let Pull::Item(t) = b.next_trial().unwrap() {
            assert_eq!(&*t.block.label, "train");
            indices.push(t.index);
            b.report_outcome(Outcome::correct()).unwrap();
        }
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(b.check_completion());
        assert_eq!(b.stats().correct, 3);

        b.reset().unwrap();
        assert!(!b.check_completion());
        assert_eq!(b.next_trial().unwrap().item().unwrap().index, 1);
    }

    #[test]
    fn mixed_blocks_complete_independently() {
        let mut h = mixed_3_and_5();
        for _ in 0..3 {
            assert!(!h.check_completion(None).unwrap());
            h.next_trial("pecking").unwrap();
        }
        assert!(h.check_completion(Some("pecking")).unwrap());
        assert!(!h.check_completion(Some("playback")).unwrap());
        assert!(!h.check_completion(None).unwrap());

        for _ in 0..5 {
            h.next_trial("playback").unwrap();
        }
        assert!(h.check_completion(None).unwrap());
        assert!(h.next_trial("playback").unwrap().is_exhausted());
    }

    #[test]
    fn interleaved_indices_increase_by_one() {
        let mut h = mixed_3_and_5();
        let schedule = ["playback", "pecking", "playback", "playback", "pecking", "pecking"];
        let mut indices = Vec::new();
        for name in schedule {
            let t = h.next_trial(name).unwrap().item().unwrap();
            assert_eq!(&*t.block.label, name);
            indices.push(t.index);
        }
        // An exhausted pull does not advance the count.
        assert!(h.next_trial("pecking").unwrap().is_exhausted());
        indices.push(h.next_trial("playback").unwrap().item().unwrap().index);

        assert_eq!(indices, (1..=7).collect::<Vec<u32>>());
        assert_eq!(h.trials_issued(), 7);
    }

    #[test]
    fn unknown_block_is_a_usage_error() {
        let mut h = mixed_3_and_5();
        for err in [
            h.next_trial("singing").unwrap_err(),
            h.check_completion(Some("singing")).unwrap_err(),
            h.reset_one("singing").unwrap_err(),
        ] {
            assert!(matches!(err, ScheduleError::UnknownBlock(_)));
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
    }

    #[test]
    fn reset_one_leaves_the_counter_alone() {
        let mut h = mixed_3_and_5();
        for _ in 0..3 {
            h.next_trial("pecking").unwrap();
        }
        h.reset_one("pecking").unwrap();
        assert!(!h.check_completion(Some("pecking")).unwrap());
        assert_eq!(h.next_trial("pecking").unwrap().item().unwrap().index, 4);

        h.reset().unwrap();
        assert_eq!(h.next_trial("playback").unwrap().item().unwrap().index, 1);
    }

    #[test]
    fn block_handler_stamps_and_restarts_blocks() {
        let mut h = BlockHandler::new(vec![numbered("a", 2), numbered("b", 3)]).unwrap();

        let block = h.next_block().unwrap().item().unwrap();
        assert_eq!((block.label(), block.index()), ("a", 1));
        while let Pull::Item(_) = block.next_trial().unwrap() {}

        let block = h.next_block().unwrap().item().unwrap();
        assert_eq!((block.label(), block.index()), ("b", 2));
        assert!(h.check_completion());
        assert!(h.next_block().unwrap().is_exhausted());
    }

    #[test]
    fn repeated_blocks_are_rebuilt() {
        let mut h = BlockHandler::with_order(
            vec![numbered("a", 2), numbered("b", 1)],
            QueueConfig::block(2, false),
            0,
        )
        .unwrap();

        let mut seen = Vec::new();
        while let Pull::Item(t) = h.next_trial().unwrap() {
            seen.push((t.block.label.to_string(), t.block.index, t.index, t.condition));
            h.report_outcome(Outcome::correct()).unwrap();
        }
        let want = [
            ("a", 1, 1, 0),
            ("a", 1, 2, 1),
            ("b", 2, 1, 0),
            ("a", 3, 1, 0),
            ("a", 3, 2, 1),
            ("b", 4, 1, 0),
        ];
        let want: Vec<(String, usize, u32, usize)> = want
            .iter()
            .map(|&(l, b, i, c)| (l.to_string(), b, i, c))
            .collect();
        assert_eq!(seen, want);
        assert_eq!(h.blocks()[0].stats().trials(), 4);
    }

    #[test]
    fn consequences_follow_schedule_and_condition() {
        let go = Rc::new(StimulusCondition::new("go", vec!["a.wav".into()]).unwrap());
        let probe = Rc::new(
            StimulusCondition::new("probe", vec!["p.wav".into()])
                .unwrap()
                .with_consequences(false, false),
        );
        let schedule =
            ReinforcementSchedule::new(ReinforcementConfig::FixedRatio { ratio: 2 }, 0).unwrap();
        let mut b = Block::from_conditions(
            "ratio",
            vec![go, probe],
            QueueConfig::block(4, false),
            0,
        )
        .unwrap()
        .with_reinforcement(schedule);

        let mut got = Vec::new();
        let outcomes = [
            Outcome::correct(),
            Outcome::correct(),
            Outcome::correct(),
            Outcome::no_response(),
        ];
        for outcome in outcomes {
            let trial = b.next_trial().unwrap().item().unwrap();
            b.report_outcome(outcome).unwrap();
            got.push(b.consequate(&trial, outcome));
        }
        let reward = |r| Consequence { reward: r, punish: false };
        // Second correct completes the ratio but the probe is never rewarded.
        assert_eq!(got, vec![reward(false), reward(false), reward(false), Consequence::default()]);

        let trial = b.next_trial().unwrap().item().unwrap();
        assert_eq!(
            b.consequate(&trial, Outcome::incorrect()),
            Consequence { reward: false, punish: true }
        );
        assert_eq!(b.stats().no_response, 1);
    }

    #[test]
    fn mixed_handler_consequates_with_the_issuing_block() {
        let go = Rc::new(StimulusCondition::new("go", vec!["a.wav".into()]).unwrap());
        let never = ReinforcementSchedule::new(ReinforcementConfig::Percent { probability: 0.0 }, 0)
            .unwrap();
        let mut h = MixedBlockHandler::new()
            .with_block(
                Block::from_conditions("lean", vec![Rc::clone(&go)], QueueConfig::random(None), 0)
                    .unwrap()
                    .with_reinforcement(never),
            )
            .with_block(
                Block::from_conditions("rich", vec![go], QueueConfig::random(None), 0).unwrap(),
            );

        let lean = h.next_trial("lean").unwrap().item().unwrap();
        let rich = h.next_trial("rich").unwrap().item().unwrap();
        assert!(!h.consequate(&lean, Outcome::correct()).unwrap().reward);
        assert!(h.consequate(&rich, Outcome::correct()).unwrap().reward);
    }

    #[test]
    fn adaptive_block_waits_for_each_outcome() {
        let store = temp_store("block");
        let stimuli: Vec<String> = (0..24).map(|i| format!("morph_{i:02}.wav")).collect();
        let cfg = ReinforcedConfig::default().with_probe_rate(1.0).with_seed(2);
        let queue = QueueHandler::from_source(move || {
            Persistent::load_or_create(store.clone(), "bird_7", || {
                ReinforcedDoubleStaircase::new(stimuli.clone(), &cfg)
            })
        })
        .unwrap();
        let mut b = Block::new("bisection", queue);
        assert!(b.is_adaptive());

        let first: Trial<Probe> = b.next_trial().unwrap().item().unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(b.next_trial().unwrap_err().kind(), ErrorKind::Usage);

        b.report_outcome(Outcome::correct()).unwrap();
        let second = b.next_trial().unwrap().item().unwrap();
        assert_eq!(second.index, 2);
        assert!(second.condition.response().is_some());
        assert!(!b.check_completion());
    }
}
