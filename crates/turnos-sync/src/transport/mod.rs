//! The agent talks to the hub through a [`Link`]: one open connection that
//! carries text frames. [`Connector`] opens a fresh link per attempt.

use async_trait::async_trait;

use crate::error::SyncResult;

pub mod memory;
mod websocket;

pub use websocket::{WsConnector, WsLink};

#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, text: String) -> SyncResult<()>;

    /// Next inbound text frame. `None` once the peer has closed. Must be
    /// cancel-safe: the agent polls it inside `select!`.
    async fn recv(&mut self) -> Option<SyncResult<String>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Link: Link + 'static;

    async fn connect(&self, url: &str) -> SyncResult<Self::Link>;
}
