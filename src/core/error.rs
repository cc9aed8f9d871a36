use std::io;
use std::path::PathBuf;

/// Broad classes of [`ScheduleError`], so a driver can decide whether to abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A programming fault in the driver (pull without update, unknown block).
    Usage,
    /// Invalid parameters detected at setup.
    Configuration,
    /// Snapshot I/O or decoding failed.
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("{procedure} hasn't been updated since last trial")]
    NotUpdated { procedure: &'static str },

    #[error("outcome reported but no trial is awaiting one")]
    NoPendingTrial,

    #[error("cannot initialize a queue with 0 items")]
    EmptyItems,

    #[error("no block named {0:?}")]
    UnknownBlock(String),

    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("weighted sub-procedure selection is not supported")]
    WeightedMixtureUnsupported,

    #[error("snapshot holds a {found} state, expected {expected}")]
    StateMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("snapshot i/o failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt snapshot {path:?}: {reason}")]
    CorruptSnapshot { path: PathBuf, reason: String },

    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ScheduleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotUpdated { .. }
            | Self::NoPendingTrial
            | Self::EmptyItems
            | Self::UnknownBlock(_) => ErrorKind::Usage,
            Self::InvalidWeights(_) | Self::InvalidConfig(_) | Self::WeightedMixtureUnsupported => {
                ErrorKind::Configuration
            }
            Self::StateMismatch { .. }
            | Self::Io { .. }
            | Self::CorruptSnapshot { .. }
            | Self::Encode(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = ScheduleError> = std::result::Result<T, E>;
