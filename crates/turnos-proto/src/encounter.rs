//! File export/import envelope for a whole encounter. Never sent on the wire.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{ProtoError, ProtoResult};
use crate::state::SessionState;

pub const ENCOUNTER_TYPE: &str = "encounter";
pub const ENCOUNTER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterFile {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub exported_at: OffsetDateTime,
    pub state: SessionState,
}

impl EncounterFile {
    pub fn new(state: SessionState) -> Self {
        Self {
            kind: ENCOUNTER_TYPE.to_string(),
            version: ENCOUNTER_VERSION,
            exported_at: OffsetDateTime::now_utc(),
            state,
        }
    }

    pub fn exported_at_rfc3339(&self) -> ProtoResult<String> {
        self.exported_at
            .format(&Rfc3339)
            .map_err(|err| ProtoError::Timestamp(err.to_string()))
    }

    pub fn to_json_pretty(&self) -> ProtoResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Accepts either an envelope or a bare session state. The returned state
    /// is normalized.
    pub fn import_str(text: &str) -> ProtoResult<SessionState> {
        let value: Value = serde_json::from_str(text)?;
        Self::import_value(value)
    }

    pub fn import_value(value: Value) -> ProtoResult<SessionState> {
        let object = value.as_object().ok_or(ProtoError::NotAnEncounter)?;
        let mut state = match object.get("type").and_then(Value::as_str) {
            Some(ENCOUNTER_TYPE) => {
                let version = object
                    .get("version")
                    .and_then(Value::as_u64)
                    .ok_or(ProtoError::NotAnEncounter)?;
                if version != u64::from(ENCOUNTER_VERSION) {
                    return Err(ProtoError::UnsupportedVersion(version));
                }
                let state = object.get("state").cloned().ok_or(ProtoError::NotAnEncounter)?;
                if !state.is_object() {
                    return Err(ProtoError::NotAnEncounter);
                }
                serde_json::from_value::<SessionState>(state)?
            }
            Some(_) => return Err(ProtoError::NotAnEncounter),
            None if object.contains_key("party") => serde_json::from_value::<SessionState>(value)?,
            None => return Err(ProtoError::NotAnEncounter),
        };
        state.normalize();
        Ok(state)
    }

    pub fn read(path: impl AsRef<Path>) -> ProtoResult<SessionState> {
        let text = fs::read_to_string(path)?;
        Self::import_str(&text)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> ProtoResult<()> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}
