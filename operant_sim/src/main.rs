//! Operant simulator - drives the scheduler with a simulated subject
//!
//! Runs two sessions back to back:
//! - bisection on a persistent reinforced double staircase, resumed from
//!   the subject's last snapshot when there is one
//! - interleaved pecking and playback blocks
//!
//! Environment:
//! - OPERANT_STATE_DIR: snapshot directory (default: platform data dir)
//! - OPERANT_SEED: seed for the subject and the schedulers (default: 1)
//! - OPERANT_TRIALS: bisection trials per run (default: 200)

use std::error::Error;
use std::rc::Rc;
use std::str::FromStr;

use operant::prelude::*;
use operant::prng::Prng;
use tracing::{debug, info, warn};

mod paths;

use paths::AppPaths;

const SUBJECT: &str = "sim_bird";
const MORPH_STEPS: usize = 48;

/// Simulated subject whose chance of answering "right" follows a logistic
/// psychometric function over the morph continuum.
struct Observer {
    threshold: f64,
    slope: f64,
    lapse: f64,
    rng: Prng,
}

impl Observer {
    fn new(seed: u64) -> Self {
        Self {
            threshold: MORPH_STEPS as f64 * 0.4,
            slope: 2.5,
            lapse: 0.02,
            rng: Prng::new(seed),
        }
    }

    fn respond(&mut self, probe: &Probe) -> Outcome {
        if self.rng.chance(self.lapse) {
            return Outcome::no_response();
        }
        let p_right = 1.0 / (1.0 + (-(probe.index as f64 - self.threshold) / self.slope).exp());
        let answered_right = self.rng.chance(p_right);
        Outcome::new(answered_right == (probe.side == Side::Right), false)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}", name, raw);
            default
        }),
        Err(_) => default,
    }
}

fn run_bisection(
    store: &SnapshotStore,
    seed: u64,
    trials: u32,
    observer: &mut Observer,
) -> Result<(), Box<dyn Error>> {
    let stimuli: Vec<String> = (0..MORPH_STEPS)
        .map(|i| format!("morph_{i:02}.wav"))
        .collect();
    let cfg = ReinforcedConfig::default()
        .with_probe_rate(0.25)
        .with_log_sampling(true)
        .with_seed(seed);

    let queue_store = store.clone();
    let queue = QueueHandler::from_source(move || {
        Persistent::load_or_create(queue_store.clone(), SUBJECT, || {
            ReinforcedDoubleStaircase::new(stimuli.clone(), &cfg)
        })
    })?;
    let mut block = Block::new("bisection", queue);

    let mut rewards = 0u32;
    for _ in 0..trials {
        let Pull::Item(trial) = block.next_trial()? else {
            break;
        };
        let outcome = observer.respond(&trial.condition);
        block.report_outcome(outcome)?;
        let consequence = block.consequate(&trial, outcome);
        rewards += u32::from(consequence.reward);
        debug!(
            trial = trial.index,
            stimulus = %trial.condition.get(),
            side = trial.condition.side.label(),
            correct = outcome.correct,
            no_response = outcome.no_response,
            "bisection trial"
        );
    }

    let stats = block.stats();
    info!(
        "Bisection: {} trials, accuracy {:.2}, {} rewards",
        stats.trials(),
        stats.accuracy(),
        rewards
    );
    if let Some(ProcedureState::Reinforced(state)) = store.load(SUBJECT)? {
        info!(
            "Bracket [{}, {}] of {}, probe rate {}",
            state.staircase.low_idx,
            state.staircase.high_idx,
            state.staircase.stimuli.len(),
            state.probe_rate
        );
    }
    Ok(())
}

fn run_pecking_and_playback(seed: u64) -> Result<(), Box<dyn Error>> {
    let peck = Rc::new(StimulusCondition::new("peck", vec!["center_light".to_string()])?);
    let song_a = Rc::new(
        StimulusCondition::new("song_a", (0..4).map(|i| format!("a_{i}.wav")).collect())?
            .with_response("L")
            .with_seed(seed),
    );
    let song_b = Rc::new(
        StimulusCondition::new("song_b", (0..4).map(|i| format!("b_{i}.wav")).collect())?
            .with_response("R")
            .with_seed(seed.wrapping_add(1)),
    );

    let pecking = Block::from_conditions("pecking", vec![peck], QueueConfig::random(Some(10)), seed)?;
    let playback = Block::from_conditions(
        "playback",
        vec![song_a, song_b],
        QueueConfig::block(3, true),
        seed,
    )?
    .with_reinforcement(ReinforcementSchedule::new(
        ReinforcementConfig::VariableRatio { ratio: 2 },
        seed,
    )?);

    let mut handler = MixedBlockHandler::new()
        .with_block(pecking)
        .with_block(playback);
    let names = ["pecking", "playback"];
    let mut rng = Prng::new(seed ^ 0xA5A5);

    while !handler.check_completion(None)? {
        let name = names[rng.gen_range_usize(0, names.len())];
        let Pull::Item(trial) = handler.next_trial(name)? else {
            continue;
        };
        let stimulus = trial.condition.get();
        let outcome = Outcome::new(rng.chance(0.8), false);
        handler.report_outcome(name, outcome)?;
        let consequence = handler.consequate(&trial, outcome)?;
        debug!(
            trial = trial.index,
            block = name,
            stimulus = %stimulus,
            reward = consequence.reward,
            punish = consequence.punish,
            "mixed trial"
        );
    }

    info!("Pecking/playback: {} trials", handler.trials_issued());
    for name in names {
        if let Some(block) = handler.block(name) {
            info!(
                "  {}: {} trials, accuracy {:.2}",
                name,
                block.stats().trials(),
                block.stats().accuracy()
            );
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let seed: u64 = env_or("OPERANT_SEED", 1);
    let trials: u32 = env_or("OPERANT_TRIALS", 200);

    let paths = AppPaths::new()?;
    info!("State directory: {:?}", paths.state_dir());
    let store = SnapshotStore::new(paths.state_dir())?;

    let mut observer = Observer::new(seed);
    run_bisection(&store, seed, trials, &mut observer)?;
    run_pecking_and_playback(seed)?;

    let state = store.load(SUBJECT)?;
    if let Some(state) = state {
        debug!("Final snapshot: {}", serde_json::to_string(&state)?);
    }
    Ok(())
}
