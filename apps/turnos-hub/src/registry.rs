//! Connected peers plus the single last-known-state slot.
//!
//! Everything lives behind one `parking_lot::Mutex`: storing a snapshot and
//! queueing it for every other peer happen in the same critical section, as
//! do a hello and the push of the stored snapshot. Per-peer queues are
//! unbounded so a connected recipient never loses a snapshot, and nothing
//! awaits while the lock is held.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message};
use metrics::counter;
use parking_lot::Mutex;
use slab::Slab;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use turnos_proto::PeerRole;
use uuid::Uuid;

use crate::telemetry::METRIC_IDLE_PRUNED_TOTAL;

/// Slab slot plus connection id, so a recycled slot never matches a peer
/// that has already left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerKey {
    slot: usize,
    pub id: Uuid,
}

pub struct Registration {
    pub key: PeerKey,
    pub receiver: mpsc::UnboundedReceiver<Message>,
    pub active: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub pruned: usize,
}

struct Peer {
    id: Uuid,
    role: PeerRole,
    sender: mpsc::UnboundedSender<Message>,
    last_seen: Instant,
}

#[derive(Default)]
struct Inner {
    peers: Slab<Peer>,
    last_state: Option<String>,
}

impl Inner {
    fn peer(&self, key: PeerKey) -> Option<&Peer> {
        self.peers.get(key.slot).filter(|peer| peer.id == key.id)
    }

    fn peer_mut(&mut self, key: PeerKey) -> Option<&mut Peer> {
        self.peers.get_mut(key.slot).filter(|peer| peer.id == key.id)
    }
}

#[derive(Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// New peers start as viewers and receive nothing until they say hello.
    pub fn register(&self) -> Registration {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock();
        let slot = inner.peers.insert(Peer {
            id,
            role: PeerRole::Viewer,
            sender,
            last_seen: Instant::now(),
        });
        Registration {
            key: PeerKey { slot, id },
            receiver,
            active: inner.peers.len(),
        }
    }

    /// Returns the number of peers still connected.
    pub fn unregister(&self, key: PeerKey) -> usize {
        let mut inner = self.inner.lock();
        if inner.peer(key).is_some() {
            inner.peers.remove(key.slot);
        }
        inner.peers.len()
    }

    pub fn touch(&self, key: PeerKey) {
        if let Some(peer) = self.inner.lock().peer_mut(key) {
            peer.last_seen = Instant::now();
        }
    }

    pub fn role(&self, key: PeerKey) -> Option<PeerRole> {
        self.inner.lock().peer(key).map(|peer| peer.role)
    }

    /// Records the role and queues the stored snapshot, if any, for this
    /// peer. Returns whether a snapshot was pushed.
    pub fn hello(&self, key: PeerKey, role: PeerRole) -> bool {
        let mut inner = self.inner.lock();
        let stored = inner.last_state.clone();
        let Some(peer) = inner.peer_mut(key) else {
            return false;
        };
        peer.role = role;
        match stored {
            Some(text) => peer.sender.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    /// Stores `text` as the last-known-state and queues it, unchanged, for
    /// every peer except `source`. Returns how many peers it was queued for.
    pub fn publish_state(&self, source: PeerKey, text: String) -> usize {
        let mut inner = self.inner.lock();
        let mut delivered = 0;
        for (slot, peer) in inner.peers.iter() {
            if slot == source.slot && peer.id == source.id {
                continue;
            }
            if peer.sender.send(Message::Text(text.clone())).is_ok() {
                delivered += 1;
            }
        }
        inner.last_state = Some(text);
        delivered
    }

    /// Queues a frame for one peer.
    pub fn send(&self, key: PeerKey, message: Message) -> bool {
        self.inner
            .lock()
            .peer(key)
            .map(|peer| peer.sender.send(message).is_ok())
            .unwrap_or(false)
    }

    /// Queues a close frame and forgets the peer. Its writer drains what is
    /// already queued, sends the close and stops.
    pub fn close(&self, key: PeerKey, code: u16, reason: &'static str) -> usize {
        let mut inner = self.inner.lock();
        if let Some(peer) = inner.peer(key) {
            let _ = peer.sender.send(close_message(code, reason));
            inner.peers.remove(key.slot);
        }
        inner.peers.len()
    }

    pub fn peer_count(&self) -> usize {
        self.inner.lock().peers.len()
    }

    pub fn has_state(&self) -> bool {
        self.inner.lock().last_state.is_some()
    }

    /// The stored `state` message exactly as it was received.
    pub fn last_state(&self) -> Option<String> {
        self.inner.lock().last_state.clone()
    }

    /// Pings every live peer and closes the ones silent for longer than
    /// `idle_timeout` with a policy close.
    pub fn sweep(&self, now: Instant, idle_timeout: Duration) -> SweepReport {
        let mut report = SweepReport::default();
        let mut inner = self.inner.lock();
        let idle: Vec<usize> = inner
            .peers
            .iter()
            .filter(|(_, peer)| now.saturating_duration_since(peer.last_seen) > idle_timeout)
            .map(|(slot, _)| slot)
            .collect();
        for slot in idle {
            let peer = inner.peers.remove(slot);
            let _ = peer.sender.send(close_message(close_code::POLICY, "idle timeout"));
            counter!(METRIC_IDLE_PRUNED_TOTAL, 1);
            info!(peer_id = %peer.id, role = %peer.role, "dropping idle peer");
            report.pruned += 1;
        }
        for (_, peer) in inner.peers.iter() {
            if peer.sender.send(Message::Ping(Vec::new())).is_ok() {
                report.pinged += 1;
            }
        }
        report
    }

    pub fn spawn_sweeper(&self, every: Duration, idle_timeout: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        let mut interval = tokio::time::interval(every);
        tokio::spawn(async move {
            interval.tick().await;
            loop {
                interval.tick().await;
                let report = registry.sweep(Instant::now(), idle_timeout);
                debug!(pinged = report.pinged, pruned = report.pruned, "liveness sweep");
            }
        })
    }
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    }))
}
