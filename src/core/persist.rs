//! Crash-resumable adaptive procedures.
//!
//! Each procedure serializes to a [`ProcedureState`]; a [`SnapshotStore`]
//! keeps one snapshot file per key, and [`Persistent`] rewrites it after
//! every reported outcome.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bisection::{DoubleStaircase, DoubleStaircaseState, ReinforcedDoubleStaircase, ReinforcedState};
use crate::error::{Result, ScheduleError};
use crate::mixture::{MixedAdaptiveQueue, MixedState, Procedure};
use crate::source::{Outcome, Pull, Source};
use crate::staircase::{KaernbachStaircase, KaernbachState};
use crate::storage;

pub const MAGIC: &[u8; 8] = b"OPQSTATE";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;
pub const SNAPSHOT_EXTENSION: &str = "opq";

const TAG_PROCEDURE: [u8; 4] = *b"PROC";

/// Saved state of any adaptive procedure.
///
/// Holds every numeric field plus RNG state. The pull/update handshake and
/// pending per-trial bookkeeping are not saved: a restored procedure always
/// starts ready for a pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "procedure", rename_all = "snake_case")]
pub enum ProcedureState {
    Kaernbach(KaernbachState),
    Double(DoubleStaircaseState),
    Reinforced(ReinforcedState),
    Mixed(MixedState),
}

impl ProcedureState {
    pub fn variant_name(&self) -> &'static str {
        match self {
            ProcedureState::Kaernbach(_) => KaernbachStaircase::NAME,
            ProcedureState::Double(_) => DoubleStaircase::NAME,
            ProcedureState::Reinforced(_) => ReinforcedDoubleStaircase::NAME,
            ProcedureState::Mixed(_) => MixedAdaptiveQueue::NAME,
        }
    }

    /// Check the invariants a procedure relies on when pulling.
    pub fn validate(&self) -> Result<()> {
        match self {
            ProcedureState::Kaernbach(s) => s.validate(),
            ProcedureState::Double(s) => s.validate(),
            ProcedureState::Reinforced(s) => s.validate(),
            ProcedureState::Mixed(s) => s.validate(),
        }
    }
}

/// Conversion to and from [`ProcedureState`].
pub trait Snapshot: Sized {
    fn snapshot(&self) -> ProcedureState;
    fn restore(state: ProcedureState) -> Result<Self>;
}

fn mismatch(expected: &'static str, found: &ProcedureState) -> ScheduleError {
    ScheduleError::StateMismatch {
        expected,
        found: found.variant_name(),
    }
}

impl Snapshot for KaernbachStaircase {
    fn snapshot(&self) -> ProcedureState {
        ProcedureState::Kaernbach(self.state().clone())
    }

    fn restore(state: ProcedureState) -> Result<Self> {
        match state {
            ProcedureState::Kaernbach(s) => Self::from_state(s),
            other => Err(mismatch(Self::NAME, &other)),
        }
    }
}

impl Snapshot for DoubleStaircase {
    fn snapshot(&self) -> ProcedureState {
        ProcedureState::Double(self.state().clone())
    }

    fn restore(state: ProcedureState) -> Result<Self> {
        match state {
            ProcedureState::Double(s) => Self::from_state(s),
            other => Err(mismatch(Self::NAME, &other)),
        }
    }
}

impl Snapshot for ReinforcedDoubleStaircase {
    fn snapshot(&self) -> ProcedureState {
        ProcedureState::Reinforced(self.to_state())
    }

    fn restore(state: ProcedureState) -> Result<Self> {
        match state {
            ProcedureState::Reinforced(s) => Self::from_state(s),
            other => Err(mismatch(Self::NAME, &other)),
        }
    }
}

impl Snapshot for MixedAdaptiveQueue {
    fn snapshot(&self) -> ProcedureState {
        ProcedureState::Mixed(self.to_state())
    }

    fn restore(state: ProcedureState) -> Result<Self> {
        match state {
            ProcedureState::Mixed(s) => Self::from_state(s),
            other => Err(mismatch(Self::NAME, &other)),
        }
    }
}

impl Snapshot for Procedure {
    fn snapshot(&self) -> ProcedureState {
        match self {
            Procedure::Kaernbach(p) => p.snapshot(),
            Procedure::Double(p) => p.snapshot(),
            Procedure::Reinforced(p) => p.snapshot(),
            Procedure::Mixed(p) => p.snapshot(),
        }
    }

    fn restore(state: ProcedureState) -> Result<Self> {
        Ok(match state {
            ProcedureState::Kaernbach(s) => Procedure::Kaernbach(KaernbachStaircase::from_state(s)?),
            ProcedureState::Double(s) => Procedure::Double(DoubleStaircase::from_state(s)?),
            ProcedureState::Reinforced(s) => {
                Procedure::Reinforced(ReinforcedDoubleStaircase::from_state(s)?)
            }
            ProcedureState::Mixed(s) => Procedure::Mixed(Box::new(MixedAdaptiveQueue::from_state(s)?)),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────

pub fn encode_state(state: &ProcedureState) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(state)?;
    let mut out = Vec::with_capacity(json.len() / 2 + 32);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION_CURRENT.to_le_bytes());
    storage::write_chunk_lz4(&mut out, TAG_PROCEDURE, &json)
        .map_err(|e| ScheduleError::io(PathBuf::new(), e))?;
    Ok(out)
}

/// Decode a snapshot. `path` is only used in error messages.
pub fn decode_state<R: Read>(r: &mut R, path: &Path) -> Result<ProcedureState> {
    let corrupt = |reason: String| ScheduleError::CorruptSnapshot {
        path: path.to_path_buf(),
        reason,
    };
    let io_err = |e: io::Error| match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => corrupt(e.to_string()),
        _ => ScheduleError::io(path, e),
    };

    let magic = storage::read_exact::<8, _>(r).map_err(io_err)?;
    if &magic != MAGIC {
        return Err(corrupt("bad magic".to_string()));
    }
    let version = storage::read_u32_le(r).map_err(io_err)?;
    if version != VERSION_V1 {
        return Err(corrupt(format!("unsupported version {version}")));
    }

    let mut payload = None;
    loop {
        let (tag, len) = match storage::read_chunk_header(r) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(io_err(e)),
        };
        let body = storage::read_chunk_lz4(r, len).map_err(io_err)?;
        if tag == TAG_PROCEDURE {
            payload = Some(body);
        }
    }

    let payload = payload.ok_or_else(|| corrupt("missing procedure chunk".to_string()))?;
    let state: ProcedureState =
        serde_json::from_slice(&payload).map_err(|e| corrupt(e.to_string()))?;
    state.validate().map_err(|e| corrupt(e.to_string()))?;
    Ok(state)
}

// ─────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────

/// A directory holding one snapshot file per key.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| ScheduleError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(ScheduleError::InvalidConfig(format!(
                "snapshot key {key:?} must be a plain file stem"
            )));
        }
        Ok(self.dir.join(format!("{key}.{SNAPSHOT_EXTENSION}")))
    }

    /// `Ok(None)` when nothing has been saved under `key`.
    pub fn load(&self, key: &str) -> Result<Option<ProcedureState>> {
        let path = self.path_for(key)?;
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ScheduleError::io(&path, e)),
        };
        let mut reader = BufReader::new(file);
        decode_state(&mut reader, &path).map(Some)
    }

    pub fn save(&self, key: &str, state: &ProcedureState) -> Result<()> {
        let path = self.path_for(key)?;
        let bytes = encode_state(state)?;
        storage::atomic_write(&path, &bytes).map_err(|e| ScheduleError::io(&path, e))?;
        debug!(key, bytes = bytes.len(), "snapshot saved");
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ScheduleError::io(&path, e)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Wrapper
// ─────────────────────────────────────────────────────────────────────────

/// An adaptive procedure that is saved under `key` after every outcome.
#[derive(Debug)]
pub struct Persistent<P> {
    inner: P,
    store: SnapshotStore,
    key: String,
}

impl<P: Snapshot> Persistent<P> {
    /// Resume the procedure saved under `key`, or build one with `create`
    /// and save it straight away.
    ///
    /// A snapshot that exists but cannot be decoded is an error rather than
    /// a silent restart, so a subject's progress is never thrown away.
    pub fn load_or_create(
        store: SnapshotStore,
        key: impl Into<String>,
        create: impl FnOnce() -> Result<P>,
    ) -> Result<Self> {
        let key = key.into();
        let inner = match store.load(&key)? {
            Some(state) => {
                info!(key = %key, procedure = state.variant_name(), "resumed procedure from snapshot");
                P::restore(state)?
            }
            None => {
                let p = create()?;
                info!(key = %key, "no snapshot found; created a fresh procedure");
                p
            }
        };
        let wrapped = Self { inner, store, key };
        wrapped.save()?;
        Ok(wrapped)
    }

    pub fn save(&self) -> Result<()> {
        self.store.save(&self.key, &self.inner.snapshot())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: Snapshot + Source> Source for Persistent<P> {
    type Item = P::Item;

    fn pull(&mut self) -> Result<Pull<P::Item>> {
        self.inner.pull()
    }

    /// The outcome is applied before the save. A storage error therefore
    /// leaves the procedure stepped and ready for its next pull; reporting
    /// the same outcome again would apply it twice.
    fn report_outcome(&mut self, outcome: Outcome) -> Result<()> {
        self.inner.report_outcome(outcome)?;
        self.save()
    }

    fn is_adaptive(&self) -> bool {
        self.inner.is_adaptive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{KaernbachConfig, ReinforcedConfig};
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub(crate) fn temp_store(tag: &str) -> SnapshotStore {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        let dir = std::env::temp_dir().join(format!(
            "operant-{tag}-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_dir_all(&dir);
        SnapshotStore::new(dir).unwrap()
    }

    fn stims(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s{i}")).collect()
    }

    #[test]
    fn kaernbach_resumes_after_restart() {
        let store = temp_store("kaernbach");
        let cfg = KaernbachConfig::default().with_bounds(0.0, 200.0);
        let mut p = Persistent::load_or_create(store.clone(), "bird_42", || {
            KaernbachStaircase::new(&cfg)
        })
        .unwrap();

        let outcomes = [true, false, true, true, false];
        for correct in outcomes {
            p.pull().unwrap();
            p.report_outcome(Outcome::new(correct, false)).unwrap();
        }
        // Mid-trial crash: pulled but never updated.
        p.pull().unwrap();
        let before = p.get().state().clone();
        drop(p);

        let mut reloaded =
            Persistent::<KaernbachStaircase>::load_or_create(store, "bird_42", || {
                panic!("snapshot should have been found")
            })
            .unwrap();
        let after = reloaded.get().state();
        assert_eq!(after.value, before.value);
        assert_eq!(after.value, 100.0 - 1.0 + 3.0 - 1.0 - 1.0 + 3.0);
        assert_eq!(after.stepsize_up, before.stepsize_up);
        assert_eq!(after.stepsize_dn, before.stepsize_dn);
        assert_eq!(after.going_up, before.going_up);
        // The last pull happened after the last save.
        assert_eq!(after.counter, 5);
        assert!(reloaded.get().is_updated());
        assert!(reloaded.pull().is_ok());
    }

    #[test]
    fn fresh_procedure_is_saved_immediately() {
        let store = temp_store("fresh");
        let _p = Persistent::load_or_create(store.clone(), "k", || {
            KaernbachStaircase::new(&KaernbachConfig::default())
        })
        .unwrap();
        assert!(store.load("k").unwrap().is_some());
        assert!(store.path_for("k").unwrap().exists());
    }

    #[test]
    fn reinforced_staircase_replays_identically_after_reload() {
        let store = temp_store("reinforced");
        let cfg = ReinforcedConfig::default().with_probe_rate(0.5).with_seed(31);
        let mut live = Persistent::load_or_create(store.clone(), "rds", || {
            ReinforcedDoubleStaircase::new(stims(40), &cfg)
        })
        .unwrap();
        for _ in 0..12 {
            live.pull().unwrap();
            live.report_outcome(Outcome::correct()).unwrap();
        }

        let mut resumed =
            Persistent::<ReinforcedDoubleStaircase>::load_or_create(store, "rds", || {
                unreachable!()
            })
            .unwrap();
        assert_eq!(resumed.get().to_state(), live.get().to_state());
        for _ in 0..20 {
            assert_eq!(live.pull().unwrap(), resumed.pull().unwrap());
            live.report_outcome(Outcome::incorrect()).unwrap();
            resumed.report_outcome(Outcome::incorrect()).unwrap();
        }
    }

    #[test]
    fn mixed_queue_round_trips_nested_states() {
        let store = temp_store("mixed");
        let build = || {
            let a = DoubleStaircase::new(stims(20), &Default::default())?;
            let b = KaernbachStaircase::new(&KaernbachConfig::default())?;
            MixedAdaptiveQueue::new(
                vec![("ds".to_string(), a.into()), ("kb".to_string(), b.into())],
                None,
                8,
            )
        };
        let mut q = Persistent::load_or_create(store.clone(), "mix", build).unwrap();
        for _ in 0..6 {
            q.pull().unwrap();
            q.report_outcome(Outcome::correct()).unwrap();
        }
        let saved = store.load("mix").unwrap().unwrap();
        assert_eq!(saved, q.get().snapshot());

        let json = serde_json::to_string(&saved).unwrap();
        assert!(json.contains("\"procedure\":\"mixed\""));
    }

    #[test]
    fn wrong_variant_is_a_storage_error() {
        let store = temp_store("mismatch");
        let _k = Persistent::load_or_create(store.clone(), "k", || {
            KaernbachStaircase::new(&KaernbachConfig::default())
        })
        .unwrap();
        let err = Persistent::<DoubleStaircase>::load_or_create(store, "k", || unreachable!())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::StateMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn corrupt_snapshot_is_detected() {
        let store = temp_store("corrupt");
        let path = store.path_for("bad").unwrap();
        std::fs::write(&path, b"not a snapshot at all").unwrap();
        let err = store.load("bad").unwrap_err();
        assert!(matches!(err, ScheduleError::CorruptSnapshot { .. }));

        let state = KaernbachStaircase::new(&KaernbachConfig::default())
            .unwrap()
            .snapshot();
        let mut bytes = encode_state(&state).unwrap();
        assert_eq!(&bytes[..8], MAGIC);
        assert_eq!(bytes[8..12], VERSION_CURRENT.to_le_bytes());
        bytes.truncate(bytes.len() - 2);
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            store.load("bad").unwrap_err(),
            ScheduleError::CorruptSnapshot { .. }
        ));
    }

    #[test]
    fn inconsistent_snapshot_is_corrupt_not_a_panic() {
        let store = temp_store("inconsistent");
        let broken = ProcedureState::Double(DoubleStaircaseState {
            stimuli: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            rate_constant: 0.05,
            low_idx: 0,
            high_idx: 10,
            rng: crate::prng::Prng::new(1),
        });
        store.save("bird", &broken).unwrap();

        let err = Persistent::<DoubleStaircase>::load_or_create(store.clone(), "bird", || {
            unreachable!()
        })
        .unwrap_err();
        assert!(matches!(err, ScheduleError::CorruptSnapshot { .. }));
        assert_eq!(err.kind(), ErrorKind::Storage);

        // A rate out of range nested inside a mixture is caught the same way.
        let cfg = ReinforcedConfig::default();
        let mut inner = ReinforcedDoubleStaircase::new(stims(10), &cfg).unwrap().to_state();
        inner.probe_rate = 1.5;
        let mixed = ProcedureState::Mixed(MixedState {
            subs: vec![crate::mixture::SubProcedureState {
                name: "rds".to_string(),
                exhausted: false,
                procedure: ProcedureState::Reinforced(inner),
            }],
            rng: crate::prng::Prng::new(2),
        });
        store.save("flock", &mixed).unwrap();
        assert!(matches!(
            store.load("flock").unwrap_err(),
            ScheduleError::CorruptSnapshot { .. }
        ));
    }

    #[test]
    fn mixed_queue_resumes_after_mid_trial_crash() {
        let store = temp_store("mixed-crash");
        let build = || {
            let a = ReinforcedDoubleStaircase::new(stims(30), &ReinforcedConfig::default().with_seed(5))?;
            let b = KaernbachStaircase::new(&KaernbachConfig::default())?;
            MixedAdaptiveQueue::new(
                vec![("rds".to_string(), a.into()), ("kb".to_string(), b.into())],
                None,
                12,
            )
        };
        let mut q = Persistent::load_or_create(store.clone(), "mix", build).unwrap();
        for _ in 0..8 {
            q.pull().unwrap();
            q.report_outcome(Outcome::correct()).unwrap();
        }
        let saved = q.get().snapshot();
        // Mid-trial crash: the selected sub-procedure was pulled but never updated.
        q.pull().unwrap();
        assert!(!q.get().is_updated());
        drop(q);

        let mut reloaded =
            Persistent::<MixedAdaptiveQueue>::load_or_create(store, "mix", || unreachable!())
                .unwrap();
        assert_eq!(reloaded.get().snapshot(), saved);
        assert!(reloaded.get().is_updated());
        for _ in 0..5 {
            assert!(matches!(reloaded.pull().unwrap(), Pull::Item(_)));
            reloaded.report_outcome(Outcome::incorrect()).unwrap();
        }
    }

    #[test]
    fn keys_must_be_plain_file_stems() {
        let store = temp_store("keys");
        for key in ["", "../escape", "a/b", ".hidden"] {
            assert_eq!(
                store.path_for(key).unwrap_err().kind(),
                ErrorKind::Configuration
            );
        }
        assert!(store.remove("never_saved").is_ok());
    }
}
