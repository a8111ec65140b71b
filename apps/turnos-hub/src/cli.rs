use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use turnos_sync::config::DEFAULT_HUB_URL;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8787";

#[derive(Debug, Parser)]
#[command(
    name = "turnos-hub",
    author,
    version,
    about = "Relay hub for the Turnos initiative tracker",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

impl Cli {
    /// Running without a subcommand serves the hub.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the relay hub (default)
    Serve(ServeArgs),
    /// Connect as a viewer and log every snapshot the hub relays
    Watch(WatchArgs),
    /// Import an encounter file and push it to the hub as admin
    Seed(SeedArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to bind the HTTP/websocket listener to.
    #[arg(long, env = "TURNOS_HUB_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: String,

    /// Token admins must present in their hello. Unset accepts any admin.
    /// When set, only admins may publish state.
    #[arg(long, env = "TURNOS_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// Only admins may publish state, even without an admin token.
    #[arg(long, env = "TURNOS_ADMIN_WRITES_ONLY", default_value_t = false)]
    pub admin_writes_only: bool,

    /// Largest websocket message accepted, in bytes.
    #[arg(long, env = "TURNOS_MAX_MESSAGE_BYTES", default_value_t = 1024 * 1024)]
    pub max_message_bytes: usize,

    /// Seconds between liveness sweeps.
    #[arg(long, env = "TURNOS_SWEEP_INTERVAL_SECS", default_value_t = 20)]
    pub sweep_interval_secs: u64,

    /// Seconds without any inbound frame before a peer is dropped.
    #[arg(long, env = "TURNOS_IDLE_TIMEOUT_SECS", default_value_t = 60)]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Hub websocket URL
    #[arg(short, long, env = "TURNOS_HUB_URL", default_value = DEFAULT_HUB_URL)]
    pub url: String,

    #[arg(long, env = "TURNOS_TOKEN")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct SeedArgs {
    /// Hub websocket URL
    #[arg(short, long, env = "TURNOS_HUB_URL", default_value = DEFAULT_HUB_URL)]
    pub url: String,

    #[arg(long, env = "TURNOS_TOKEN")]
    pub token: Option<String>,

    /// Encounter export (or bare session state) to publish
    #[arg(short, long)]
    pub file: PathBuf,

    /// Give up if the hub cannot be reached within this many seconds.
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["turnos-hub", "--listen-addr", "127.0.0.1:9000"]).unwrap();
        match cli.into_command() {
            Command::Serve(args) => {
                assert_eq!(args.listen_addr, "127.0.0.1:9000");
                assert_eq!(args.max_message_bytes, 1024 * 1024);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn seed_requires_a_file() {
        assert!(Cli::try_parse_from(["turnos-hub", "seed"]).is_err());
        let cli = Cli::try_parse_from([
            "turnos-hub",
            "seed",
            "--url",
            "ws://hub:8787/ws",
            "--file",
            "encuentro.json",
            "--token",
            "dm",
        ])
        .unwrap();
        match cli.into_command() {
            Command::Seed(args) => {
                assert_eq!(args.file, PathBuf::from("encuentro.json"));
                assert_eq!(args.token.as_deref(), Some("dm"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn watch_defaults_to_the_sync_agent_hub_url() {
        let cli = Cli::try_parse_from(["turnos-hub", "watch"]).unwrap();
        match cli.into_command() {
            Command::Watch(args) => {
                assert_eq!(args.url, turnos_sync::SyncConfig::default().url);
                assert!(args.token.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
