//! Where the simulator keeps its snapshots.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    state_dir: PathBuf,
}

impl AppPaths {
    /// `OPERANT_STATE_DIR` wins over the platform data directory.
    pub fn new() -> Result<Self, String> {
        let state_dir = match std::env::var_os("OPERANT_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => Self::default_state_dir()?,
        };
        Ok(Self { state_dir })
    }

    fn default_state_dir() -> Result<PathBuf, String> {
        let base = dirs::data_dir().ok_or("Could not determine data directory")?;
        Ok(base.join("operant").join("snapshots"))
    }

    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }
}
