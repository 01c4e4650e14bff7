use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::progress::TimerView;

/// Action sent by an observer over the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Bind the connection to the user behind `session_id`.
    Authenticate { session_id: String },
}

/// Raw `{action, ...}` envelope before the action is interpreted.
#[derive(Debug, Deserialize)]
struct ActionEnvelope {
    action: String,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

impl ClientMessage {
    /// Decode a text frame.
    ///
    /// Returns `Ok(None)` for well-formed envelopes carrying an action this
    /// server does not know; those are ignored by the caller.
    pub fn parse(raw: &str) -> Result<Option<Self>, ProtocolError> {
        let envelope: ActionEnvelope = serde_json::from_str(raw)?;
        match envelope.action.as_str() {
            "authenticate" => {
                let session_id = envelope
                    .session_id
                    .ok_or(ProtocolError::MissingField("sessionId"))?;
                Ok(Some(Self::Authenticate { session_id }))
            }
            _ => Ok(None),
        }
    }
}

/// Timer update pushed to observers: `{"type": ..., "payload": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TimerUpdate {
    /// Full snapshot, sent after every mutation and on authentication.
    AllTimers(Vec<TimerView>),
    /// Currently running timers, sent on every tick.
    ActiveTimers(Vec<TimerView>),
}

/// Every frame the server writes to a socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ServerMessage {
    Update(TimerUpdate),
    Error { error: String },
}

impl ServerMessage {
    pub fn all_timers(views: Vec<TimerView>) -> Self {
        Self::Update(TimerUpdate::AllTimers(views))
    }

    pub fn active_timers(views: Vec<TimerView>) -> Self {
        Self::Update(TimerUpdate::ActiveTimers(views))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::compute_view;
    use crate::timer::Timer;
    use crate::types::UserId;
    use chrono::Utc;

    #[test]
    fn test_parse_authenticate() {
        let msg = ClientMessage::parse(r#"{"action":"authenticate","sessionId":"abc"}"#).unwrap();
        assert_eq!(
            msg,
            Some(ClientMessage::Authenticate {
                session_id: "abc".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_action_ignored() {
        let msg = ClientMessage::parse(r#"{"action":"dance"}"#).unwrap();
        assert!(msg.is_none());
    }

    #[test]
    fn test_authenticate_without_session_id() {
        let err = ClientMessage::parse(r#"{"action":"authenticate"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("sessionId")));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ClientMessage::parse("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"sessionId":"abc"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_update_envelope_shape() {
        let now = Utc::now();
        let timer = Timer::new(UserId::new(), "brew coffee", Some(300_000), now);
        let msg = ServerMessage::all_timers(vec![compute_view(&timer, now)]);

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "all_timers");
        assert_eq!(value["payload"][0]["description"], "brew coffee");
        assert_eq!(value["payload"][0]["elapsed"], 0);

        let active = ServerMessage::active_timers(vec![]).to_json().unwrap();
        assert_eq!(active, r#"{"type":"active_timers","payload":[]}"#);
    }

    #[test]
    fn test_error_envelope_shape() {
        let json = ServerMessage::error("Authentication failed").to_json().unwrap();
        assert_eq!(json, r#"{"error":"Authentication failed"}"#);
    }
}
