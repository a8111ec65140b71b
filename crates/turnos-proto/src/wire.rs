use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ProtoResult;
use crate::state::SessionState;

/// Role a client announces in its hello. Anything that is not `admin`
/// (case-insensitive) is treated as a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeerRole {
    Admin,
    #[default]
    Viewer,
}

impl PeerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerRole::Admin => "admin",
            PeerRole::Viewer => "viewer",
        }
    }

    pub fn from_wire(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("admin") {
            PeerRole::Admin
        } else {
            PeerRole::Viewer
        }
    }
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PeerRole {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PeerRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(PeerRole::from_wire).unwrap_or_default())
    }
}

/// Messages sent from a client to the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sent once per connection, immediately after open
    Hello {
        #[serde(default)]
        role: PeerRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// Full snapshot; the hub keeps it and forwards it verbatim
    State { state: Value },
    /// Application-level keepalive
    Ping,
}

/// Messages sent from the hub to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    State { state: Value },
    Pong,
    Error { error: String },
}

impl ClientMessage {
    pub fn hello(role: PeerRole, token: Option<String>) -> Self {
        ClientMessage::Hello {
            role,
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn state(state: &SessionState) -> ProtoResult<Self> {
        Ok(ClientMessage::State {
            state: serde_json::to_value(state)?,
        })
    }

    /// Parses one text frame. Malformed JSON, unknown `type` values and
    /// `state` payloads that are not objects all yield `None`.
    pub fn decode(text: &str) -> Option<Self> {
        let message = serde_json::from_str::<ClientMessage>(text).ok()?;
        match &message {
            ClientMessage::State { state } if !state.is_object() => None,
            _ => Some(message),
        }
    }

    pub fn encode(&self) -> ProtoResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn error(reason: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: reason.into(),
        }
    }

    pub fn decode(text: &str) -> Option<Self> {
        let message = serde_json::from_str::<ServerMessage>(text).ok()?;
        match &message {
            ServerMessage::State { state } if !state.is_object() => None,
            _ => Some(message),
        }
    }

    pub fn encode(&self) -> ProtoResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Typed view of a `state` message.
    pub fn into_session_state(self) -> Option<ProtoResult<SessionState>> {
        match self {
            ServerMessage::State { state } => {
                Some(serde_json::from_value(state).map_err(Into::into))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn hello_role_is_case_insensitive_and_defaults_to_viewer() {
        let msg = ClientMessage::decode(r#"{"type":"hello","role":"ADMIN","token":"t"}"#);
        assert_eq!(
            msg,
            Some(ClientMessage::Hello {
                role: PeerRole::Admin,
                token: Some("t".into())
            })
        );

        let msg = ClientMessage::decode(r#"{"type":"hello"}"#);
        assert_eq!(
            msg,
            Some(ClientMessage::Hello {
                role: PeerRole::Viewer,
                token: None
            })
        );

        let msg = ClientMessage::decode(r#"{"type":"hello","role":"dm"}"#);
        assert!(matches!(
            msg,
            Some(ClientMessage::Hello {
                role: PeerRole::Viewer,
                ..
            })
        ));
    }

    #[test_timeout::timeout]
    fn hello_omits_empty_token() {
        let text = ClientMessage::hello(PeerRole::Admin, Some(String::new()))
            .encode()
            .unwrap();
        assert_eq!(text, r#"{"type":"hello","role":"admin"}"#);
    }

    #[test_timeout::timeout]
    fn malformed_and_unknown_messages_are_ignored() {
        assert!(ClientMessage::decode("not json").is_none());
        assert!(ClientMessage::decode(r#"{"type":"shout"}"#).is_none());
        assert!(ClientMessage::decode(r#"{"role":"admin"}"#).is_none());
        assert!(ClientMessage::decode(r#"{"type":"state","state":[1,2]}"#).is_none());
        assert!(ClientMessage::decode(r#"{"type":"state"}"#).is_none());
        assert!(ServerMessage::decode(r#"{"type":"state","state":null}"#).is_none());
    }

    #[test_timeout::timeout]
    fn state_message_carries_camel_case_snapshot() {
        let state = SessionState::default();
        let text = ClientMessage::state(&state).unwrap().encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type":"state","state":{"activeIdx":0,"party":[]}}));

        let server = ServerMessage::decode(&text).unwrap();
        let typed = server.into_session_state().unwrap().unwrap();
        assert_eq!(typed, state);
    }

    #[test_timeout::timeout]
    fn error_and_pong_have_stable_shapes() {
        assert_eq!(
            ServerMessage::error("unauthorized").encode().unwrap(),
            r#"{"type":"error","error":"unauthorized"}"#
        );
        assert_eq!(ServerMessage::Pong.encode().unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(
            ClientMessage::decode(r#"{"type":"ping"}"#),
            Some(ClientMessage::Ping)
        );
    }
}
