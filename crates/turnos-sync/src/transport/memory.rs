//! In-process connector for driving an agent without a network. Each
//! successful `connect` hands the far end of the link to whoever holds the
//! [`MemoryHub`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Connector, Link};
use crate::error::{SyncError, SyncResult};

#[derive(Default)]
struct Shared {
    refuse: bool,
    attempts: Vec<Instant>,
}

#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Mutex<Shared>>,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

/// Test-side view of a [`MemoryConnector`].
pub struct MemoryHub {
    shared: Arc<Mutex<Shared>>,
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Far end of one memory link.
pub struct MemoryPeer {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

pub struct MemoryLink {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryConnector {
    pub fn pair() -> (MemoryConnector, MemoryHub) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryConnector {
                shared: Arc::clone(&shared),
                accepted: tx,
            },
            MemoryHub {
                shared,
                accepted: rx,
            },
        )
    }
}

impl MemoryHub {
    /// While set, every connect attempt fails.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.lock().refuse = refuse;
    }

    /// Instants of every connect attempt so far, refused ones included.
    pub fn attempts(&self) -> Vec<Instant> {
        self.shared.lock().attempts.clone()
    }

    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }
}

impl MemoryPeer {
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.to_client
            .as_ref()
            .map(|tx| tx.send(text.into()).is_ok())
            .unwrap_or(false)
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Ends the link from the hub side; the agent sees the peer close.
    pub fn close(&mut self) {
        self.to_client = None;
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Link = MemoryLink;

    async fn connect(&self, _url: &str) -> SyncResult<MemoryLink> {
        {
            let mut shared = self.shared.lock();
            shared.attempts.push(Instant::now());
            if shared.refuse {
                return Err(SyncError::Refused("memory hub refusing connections".into()));
            }
        }
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.accepted
            .send(MemoryPeer {
                to_client: Some(to_client),
                from_client,
            })
            .map_err(|_| SyncError::Refused("memory hub dropped".into()))?;
        Ok(MemoryLink { outbound, inbound })
    }
}

#[async_trait]
impl Link for MemoryLink {
    async fn send(&mut self, text: String) -> SyncResult<()> {
        self.outbound.send(text).map_err(|_| SyncError::Closed)
    }

    async fn recv(&mut self) -> Option<SyncResult<String>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}
