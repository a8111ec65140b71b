//! Shared types for the Turnos turn tracker.
//!
//! `wire` holds the JSON messages exchanged with the relay hub, `state` the
//! encounter snapshot that travels inside them, `catalog` the read-only
//! reference data used to label conditions and pre-fill combatants, and
//! `encounter` the file envelope used for export/import.

pub mod catalog;
pub mod encounter;
pub mod error;
pub mod state;
pub mod wire;

pub use catalog::{ConditionCatalog, ConditionChip, ConditionEntry, Template, TemplateIndex};
pub use encounter::EncounterFile;
pub use error::ProtoError;
pub use state::{ActionSlot, Combatant, HitPoints, Movement, SessionState, VisibleRow};
pub use wire::{ClientMessage, PeerRole, ServerMessage};
