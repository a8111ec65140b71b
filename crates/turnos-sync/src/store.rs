//! Best-effort persistence of the admin's session state in a single JSON
//! file. Every failure is logged and swallowed: a failed read is a cache
//! miss, a failed write is forgotten.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use thiserror::Error;
use tracing::{debug, warn};
use turnos_proto::SessionState;

pub const STORE_DIR: &str = "turnos";
pub const STORE_FILE: &str = "mini_turnos_state.json";

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] io::Error),
    #[error("store payload invalid: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/turnos/mini_turnos_state.json`, when the platform has a
    /// data directory.
    pub fn default_path() -> Option<PathBuf> {
        BaseDirs::new().map(|base| base.data_dir().join(STORE_DIR).join(STORE_FILE))
    }

    pub fn open_default() -> Option<Self> {
        Self::default_path().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<SessionState> {
        match self.try_load() {
            Ok(state) => state,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring unreadable local state");
                None
            }
        }
    }

    pub fn save(&self, state: &SessionState) {
        if let Err(err) = self.try_save(state) {
            warn!(path = %self.path.display(), error = %err, "failed to persist local state");
        }
    }

    fn try_load(&self) -> Result<Option<SessionState>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no local state yet");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let mut state: SessionState = serde_json::from_str(&text)?;
        state.normalize();
        Ok(Some(state))
    }

    fn try_save(&self, state: &SessionState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), combatants = state.party.len(), "local state saved");
        Ok(())
    }
}
