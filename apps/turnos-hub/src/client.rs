//! Command-line clients built on the sync agent: `watch` logs every relayed
//! snapshot, `seed` publishes an encounter file.

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::time::timeout;
use tracing::{info, warn};
use turnos_proto::{EncounterFile, SessionState};
use turnos_sync::{LinkStatus, SyncAgent, SyncConfig, WsConnector};

use crate::cli::{SeedArgs, WatchArgs};

pub async fn run_watch(args: WatchArgs) -> Result<()> {
    let config = SyncConfig::viewer(args.url.clone()).with_token(args.token);
    let handle = SyncAgent::spawn(config, WsConnector, SessionState::default());
    let mut snapshots = handle.subscribe();
    let mut status = handle.status_updates();
    info!(url = %args.url, "watching hub");

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = snapshots.borrow_and_update().clone();
                println!("{}", render_table(&state));
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                match current {
                    LinkStatus::Backoff { attempt, delay } => {
                        warn!(attempt, delay_ms = delay.as_millis() as u64, "hub unreachable; retrying");
                    }
                    other => info!(status = ?other, "link status"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    handle.shutdown();
    Ok(())
}

pub async fn run_seed(args: SeedArgs) -> Result<()> {
    let state = EncounterFile::read(&args.file)
        .with_context(|| format!("failed to import {}", args.file.display()))?;
    let combatants = state.party.len();
    let config = SyncConfig::admin(args.url.clone()).with_token(args.token);
    let handle = SyncAgent::spawn(config, WsConnector, state.clone());

    let pushed = timeout(Duration::from_secs(args.timeout_secs), async {
        loop {
            handle.wait_open().await?;
            if handle.push(state.clone()).await {
                return Ok::<_, anyhow::Error>(());
            }
        }
    })
    .await
    .map_err(|_| anyhow!("hub at {} not reachable within {}s", args.url, args.timeout_secs))?;
    pushed?;

    handle.shutdown();
    let mut status = handle.status_updates();
    while *status.borrow_and_update() != LinkStatus::Stopped {
        if status.changed().await.is_err() {
            break;
        }
    }
    info!(url = %args.url, combatants, "encounter published");
    Ok(())
}

/// Plain-text view of the visible party, one row per combatant, the active
/// one marked with `>`.
pub fn render_table(state: &SessionState) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "  {:<24} {:>4} {:>4} {:>9} {:>11}  conditions",
        "name", "ini", "ca", "pv", "mov"
    );
    for row in state.visible_party() {
        let c = row.combatant;
        let marker = if row.active { '>' } else { ' ' };
        let pv = format!("{}/{}", c.pv.cur, c.pv.max);
        let mov = format!("{}/{}", c.mov.cur, c.mov.max);
        let _ = writeln!(
            out,
            "{marker} {:<24} {:>4} {:>4} {:>9} {:>11}  {}",
            c.nombre,
            c.ini,
            c.ca,
            pv,
            mov,
            c.condiciones.join(", ")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnos_proto::Combatant;

    #[test_timeout::timeout]
    fn table_marks_active_row_and_hides_hidden_combatants() {
        let mut grerin = Combatant::new("Grerin");
        grerin.condiciones.push("envenenado".into());
        let mut hidden = Combatant::new("Asesino");
        hidden.visible = false;
        let mut state = SessionState::new(vec![grerin, hidden, Combatant::new("Ogro")]);
        state.active_idx = 2;

        let table = render_table(&state);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("  Grerin"));
        assert!(lines[1].ends_with("envenenado"));
        assert!(lines[2].starts_with("> Ogro"));
        assert!(!table.contains("Asesino"));
    }
}
