use std::path::PathBuf;
use std::time::Duration;

use turnos_proto::PeerRole;

use crate::backoff::Backoff;

pub const DEFAULT_HUB_URL: &str = "ws://127.0.0.1:8787/ws";

/// Timings and identity for one sync agent.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub url: String,
    pub role: PeerRole,
    pub token: Option<String>,
    /// How long an admin waits for the hub to push its state after opening
    /// before seeding the hub with the local state. Viewers never seed.
    pub seed_window: Duration,
    /// Quiet period after the last local edit before a broadcast goes out.
    pub debounce: Duration,
    pub backoff: Backoff,
    /// Local store file; `None` disables persistence. Only admins persist.
    pub store_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_HUB_URL.to_string(),
            role: PeerRole::Viewer,
            token: None,
            seed_window: Duration::from_millis(1200),
            debounce: Duration::from_millis(120),
            backoff: Backoff::default(),
            store_path: None,
        }
    }
}

impl SyncConfig {
    pub fn admin(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: PeerRole::Admin,
            ..Self::default()
        }
    }

    pub fn viewer(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == PeerRole::Admin
    }
}
