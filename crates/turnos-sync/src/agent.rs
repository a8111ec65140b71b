//! The sync agent: one task that owns the local session state, keeps a link
//! to the hub open, resolves the seed race after every (re)connect and
//! debounces outgoing snapshots.
//!
//! ```text
//! CONNECTING --ok--> OPEN --closed/error--> BACKOFF(min(k*step, cap)) --> CONNECTING
//!      \--error--------------------------------^
//! ```
//!
//! Local edits are accepted in every phase; only sending needs `OPEN`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};
use turnos_proto::{ClientMessage, PeerRole, ServerMessage, SessionState};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::LocalStore;
use crate::transport::{Connector, Link};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Open,
    Backoff { attempt: u32, delay: Duration },
    Stopped,
}

type Edit = Box<dyn FnOnce(&mut SessionState) + Send>;

enum Command {
    Replace(SessionState),
    Edit(Edit),
    Flush(oneshot::Sender<bool>),
    Push(SessionState, oneshot::Sender<bool>),
    Shutdown,
}

/// Cloneable handle to a running agent. The agent stops once every handle
/// has been dropped or [`SyncHandle::shutdown`] is called.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    status: watch::Receiver<LinkStatus>,
}

impl SyncHandle {
    /// Replaces the local state as a local edit: persisted, published and
    /// broadcast after the debounce.
    pub fn publish(&self, state: SessionState) -> SyncResult<()> {
        self.send(Command::Replace(state))
    }

    /// Applies `edit` to the agent's current state as a local edit.
    pub fn update<F>(&self, edit: F) -> SyncResult<()>
    where
        F: FnOnce(&mut SessionState) + Send + 'static,
    {
        self.send(Command::Edit(Box::new(edit)))
    }

    /// Broadcasts the current state immediately, bypassing the debounce.
    /// Resolves to `false` when the link is not open.
    pub async fn flush(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Flush(tx)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Replaces the local state and broadcasts it in one step, so no inbound
    /// snapshot can land between the two. Resolves to `false` when the link
    /// is not open; the local state is replaced either way.
    pub async fn push(&self, state: SessionState) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Push(state, tx)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    pub fn status_updates(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Waits until the link reports `Open`. Errors if the agent stops first.
    pub async fn wait_open(&self) -> SyncResult<()> {
        let mut status = self.status.clone();
        loop {
            match *status.borrow_and_update() {
                LinkStatus::Open => return Ok(()),
                LinkStatus::Stopped => return Err(SyncError::Stopped),
                _ => {}
            }
            status.changed().await.map_err(|_| SyncError::Stopped)?;
        }
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        self.commands.send(command).map_err(|_| SyncError::Stopped)
    }
}

pub struct SyncAgent;

impl SyncAgent {
    /// Spawns the agent on the current tokio runtime. For admins with a
    /// configured store, a previously persisted state wins over `initial`.
    pub fn spawn<C: Connector>(config: SyncConfig, connector: C, initial: SessionState) -> SyncHandle {
        let store = match (&config.role, &config.store_path) {
            (PeerRole::Admin, Some(path)) => Some(LocalStore::new(path.clone())),
            _ => None,
        };
        let state = store
            .as_ref()
            .and_then(LocalStore::load)
            .unwrap_or(initial);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(state.clone());
        let (status_tx, status_rx) = watch::channel(LinkStatus::Connecting);

        let driver = Driver {
            config,
            connector: Arc::new(connector),
            store,
            state,
            commands: commands_rx,
            state_tx,
            status_tx,
            attempt: 0,
            debounce: None,
        };
        tokio::spawn(driver.run());

        SyncHandle {
            commands: commands_tx,
            state: state_rx,
            status: status_rx,
        }
    }
}

enum Exit {
    Disconnected,
    Shutdown,
}

struct Driver<C: Connector> {
    config: SyncConfig,
    connector: Arc<C>,
    store: Option<LocalStore>,
    state: SessionState,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<SessionState>,
    status_tx: watch::Sender<LinkStatus>,
    attempt: u32,
    debounce: Option<Instant>,
}

impl<C: Connector> Driver<C> {
    async fn run(mut self) {
        info!(url = %self.config.url, role = %self.config.role, "sync agent started");
        loop {
            match self.connect().await {
                Some(Ok(link)) => {
                    if let Exit::Shutdown = self.drive(link).await {
                        break;
                    }
                }
                Some(Err(err)) => {
                    warn!(url = %self.config.url, error = %err, "hub connection failed");
                }
                None => break,
            }
            if !self.backoff().await {
                break;
            }
        }
        self.status_tx.send_replace(LinkStatus::Stopped);
        info!(url = %self.config.url, "sync agent stopped");
    }

    /// `None` when shutdown was requested while connecting.
    async fn connect(&mut self) -> Option<SyncResult<C::Link>> {
        self.status_tx.send_replace(LinkStatus::Connecting);
        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let connect = async move { connector.connect(&url).await };
        tokio::pin!(connect);
        loop {
            tokio::select! {
                result = &mut connect => return Some(result),
                command = self.commands.recv() => {
                    if !self.handle_offline(command) {
                        return None;
                    }
                }
                _ = wait_for(self.debounce) => self.drop_debounced(),
            }
        }
    }

    /// `false` when shutdown was requested while waiting.
    async fn backoff(&mut self) -> bool {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.config.backoff.delay(self.attempt);
        self.status_tx.send_replace(LinkStatus::Backoff {
            attempt: self.attempt,
            delay,
        });
        debug!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        let retry_at = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(retry_at) => return true,
                command = self.commands.recv() => {
                    if !self.handle_offline(command) {
                        return false;
                    }
                }
                _ = wait_for(self.debounce) => self.drop_debounced(),
            }
        }
    }

    async fn drive(&mut self, mut link: C::Link) -> Exit {
        let hello = ClientMessage::hello(self.config.role, self.config.token.clone());
        let sent = match hello.encode() {
            Ok(text) => link.send(text).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = sent {
            warn!(error = %err, "failed to send hello");
            link.close().await;
            return Exit::Disconnected;
        }

        self.attempt = 0;
        self.status_tx.send_replace(LinkStatus::Open);
        info!(url = %self.config.url, role = %self.config.role, "link open");

        let mut seed_deadline = match self.config.role {
            PeerRole::Admin => Some(Instant::now() + self.config.seed_window),
            PeerRole::Viewer => None,
        };

        loop {
            tokio::select! {
                frame = link.recv() => match frame {
                    Some(Ok(text)) => self.handle_inbound(&text, &mut seed_deadline),
                    Some(Err(err)) => {
                        warn!(error = %err, "link error");
                        link.close().await;
                        return Exit::Disconnected;
                    }
                    None => {
                        info!("hub closed the link");
                        return Exit::Disconnected;
                    }
                },
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        link.close().await;
                        return Exit::Shutdown;
                    }
                    Some(Command::Replace(state)) => self.apply_local(|current| *current = state),
                    Some(Command::Edit(edit)) => self.apply_local(edit),
                    Some(Command::Flush(ack)) => {
                        self.debounce = None;
                        let sent = self.broadcast(&mut link, &mut seed_deadline).await;
                        let _ = ack.send(sent);
                        if !sent {
                            link.close().await;
                            return Exit::Disconnected;
                        }
                    }
                    Some(Command::Push(state, ack)) => {
                        self.apply_local(|current| *current = state);
                        self.debounce = None;
                        let sent = self.broadcast(&mut link, &mut seed_deadline).await;
                        let _ = ack.send(sent);
                        if !sent {
                            link.close().await;
                            return Exit::Disconnected;
                        }
                    }
                },
                _ = wait_for(self.debounce) => {
                    self.debounce = None;
                    if !self.broadcast(&mut link, &mut seed_deadline).await {
                        link.close().await;
                        return Exit::Disconnected;
                    }
                }
                _ = wait_for(seed_deadline) => {
                    info!(combatants = self.state.party.len(), "hub sent no state; seeding it");
                    if !self.broadcast(&mut link, &mut seed_deadline).await {
                        link.close().await;
                        return Exit::Disconnected;
                    }
                }
            }
        }
    }

    /// Handles a command while no link is open. `false` means stop.
    fn handle_offline(&mut self, command: Option<Command>) -> bool {
        match command {
            None | Some(Command::Shutdown) => false,
            Some(Command::Replace(state)) => {
                self.apply_local(|current| *current = state);
                true
            }
            Some(Command::Edit(edit)) => {
                self.apply_local(edit);
                true
            }
            Some(Command::Flush(ack)) => {
                let _ = ack.send(false);
                true
            }
            Some(Command::Push(state, ack)) => {
                self.apply_local(|current| *current = state);
                let _ = ack.send(false);
                true
            }
        }
    }

    fn handle_inbound(&mut self, text: &str, seed_deadline: &mut Option<Instant>) {
        let Some(message) = ServerMessage::decode(text) else {
            debug!(len = text.len(), "ignoring malformed hub message");
            return;
        };
        match message {
            ServerMessage::State { state } => {
                match serde_json::from_value::<SessionState>(state) {
                    Ok(state) => {
                        if seed_deadline.take().is_some() {
                            debug!("hub state arrived inside the seed window");
                        }
                        // A remote snapshot supersedes any pending local edit.
                        self.debounce = None;
                        self.state = state;
                        self.publish_local();
                        debug!(combatants = self.state.party.len(), active = self.state.active_idx, "adopted hub state");
                    }
                    Err(err) => debug!(error = %err, "ignoring undecodable state"),
                }
            }
            ServerMessage::Pong => trace!("pong"),
            ServerMessage::Error { error } => warn!(error = %error, "hub reported an error"),
        }
    }

    fn apply_local<F: FnOnce(&mut SessionState)>(&mut self, edit: F) {
        edit(&mut self.state);
        self.publish_local();
        self.debounce = Some(Instant::now() + self.config.debounce);
    }

    fn publish_local(&mut self) {
        self.state_tx.send_replace(self.state.clone());
        if let Some(store) = &self.store {
            store.save(&self.state);
        }
    }

    fn drop_debounced(&mut self) {
        self.debounce = None;
        debug!("link not open; dropping debounced broadcast");
    }

    /// Sends the local state. Once the hub holds it there is nothing left to
    /// seed, so any send also closes the seed window.
    async fn broadcast(&mut self, link: &mut C::Link, seed_deadline: &mut Option<Instant>) -> bool {
        seed_deadline.take();
        let text = match ClientMessage::state(&self.state).and_then(|message| message.encode()) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "failed to encode state");
                return true;
            }
        };
        match link.send(text).await {
            Ok(()) => {
                trace!(combatants = self.state.party.len(), "state broadcast");
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to send state");
                false
            }
        }
    }
}

/// Sleeps until `deadline`, or forever when there is none.
fn wait_for(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
