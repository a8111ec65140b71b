use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::cli::ServeArgs;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub listen_addr: SocketAddr,
    pub admin_token: Option<String>,
    pub admin_writes_only: bool,
    pub max_message_bytes: usize,
    pub sweep_interval: Duration,
    pub idle_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8787)),
            admin_token: None,
            admin_writes_only: false,
            max_message_bytes: 1024 * 1024,
            sweep_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl HubConfig {
    /// `true` when an admin hello carrying `token` is acceptable.
    pub fn admin_token_matches(&self, token: Option<&str>) -> bool {
        match &self.admin_token {
            Some(expected) => token == Some(expected.as_str()),
            None => true,
        }
    }

    /// Whether `state` from non-admins is refused. A configured admin token
    /// implies it; otherwise any viewer could publish without the token.
    pub fn writes_restricted(&self) -> bool {
        self.admin_writes_only || self.admin_token.is_some()
    }
}

impl TryFrom<ServeArgs> for HubConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;
        if args.max_message_bytes == 0 {
            bail!("max message size must be greater than zero");
        }
        if args.sweep_interval_secs == 0 || args.idle_timeout_secs == 0 {
            bail!("sweep interval and idle timeout must be greater than zero");
        }
        Ok(HubConfig {
            listen_addr,
            admin_token: args.admin_token.filter(|token| !token.is_empty()),
            admin_writes_only: args.admin_writes_only,
            max_message_bytes: args.max_message_bytes,
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        })
    }
}
