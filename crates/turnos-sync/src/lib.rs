//! Client side of the Turnos relay: one [`SyncAgent`] per page keeps a local
//! [`SessionState`](turnos_proto::SessionState) in step with the hub.

pub mod agent;
pub mod backoff;
pub mod config;
pub mod error;
pub mod store;
pub mod transport;

pub use agent::{LinkStatus, SyncAgent, SyncHandle};
pub use backoff::Backoff;
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use store::LocalStore;
pub use transport::{Connector, Link, WsConnector};
