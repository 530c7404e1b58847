//! Relay wire protocol.
//!
//! Every frame is a JSON text message with a `type` discriminator. Frames
//! from the relay carry their payload under `data`. Outbound frames are
//! built from [`Outbound`]; inbound text is decoded by [`Inbound::parse`]
//! into one typed payload per message type, so a frame whose `type` is
//! known but whose payload has the wrong shape surfaces as
//! [`Error::Malformed`] rather than a half-read message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

// ── Shared payloads ──────────────────────────────────────────────────

/// One `{id, state}` pair as the relay reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectState {
    pub id: String,
    pub state: bool,
}

// ── Outbound ─────────────────────────────────────────────────────────

/// A frame sent from this client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outbound {
    Heartbeat,
    Close,
    StateUpdate {
        airport: String,
        data: StateUpdateData,
    },
    GetState {
        airport: String,
        /// Unix epoch milliseconds at the time of the request.
        timestamp: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateData {
    pub object_id: String,
    pub state: bool,
}

impl Outbound {
    pub fn state_update(airport: impl Into<String>, object_id: impl Into<String>, state: bool) -> Self {
        Self::StateUpdate {
            airport: airport.into(),
            data: StateUpdateData {
                object_id: object_id.into(),
                state,
            },
        }
    }

    pub fn get_state(airport: impl Into<String>, timestamp: i64) -> Self {
        Self::GetState {
            airport: airport.into(),
            timestamp,
        }
    }

    /// Wire name of this frame's `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat => "HEARTBEAT",
            Self::Close => "CLOSE",
            Self::StateUpdate { .. } => "STATE_UPDATE",
            Self::GetState { .. } => "GET_STATE",
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Inbound ──────────────────────────────────────────────────────────

/// A decoded frame received from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Heartbeat,
    InitialState(InitialState),
    StateUpdate(RemoteStateUpdate),
    StateSnapshot(StateSnapshot),
    ControllerConnect(ControllerPresence),
    ControllerDisconnect(ControllerPresence),
    Error(RelayError),
}

/// Full object list sent once after the link opens.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialState {
    #[serde(default)]
    pub connection_type: Option<String>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub objects: Vec<ObjectState>,
}

/// A single object change relayed from some controller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStateUpdate {
    pub object_id: String,
    pub state: bool,
    /// Originating controller, absent for relay-generated updates.
    #[serde(default)]
    pub controller_id: Option<String>,
}

/// Reply to `GET_STATE`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(default, deserialize_with = "nullable_vec")]
    pub objects: Vec<ObjectState>,
    #[serde(default)]
    pub offline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerPresence {
    pub controller_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayError {
    pub message: String,
}

/// Envelope shared by every inbound frame; `data` is decoded per type.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl Inbound {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let frame: RawFrame = serde_json::from_str(text).map_err(|e| Error::malformed(&e, text))?;

        let message = match frame.kind.as_str() {
            "HEARTBEAT" => Self::Heartbeat,
            "INITIAL_STATE" => Self::InitialState(decode_data(frame.data, text)?),
            "STATE_UPDATE" => Self::StateUpdate(decode_data(frame.data, text)?),
            "STATE_SNAPSHOT" => Self::StateSnapshot(decode_data(frame.data, text)?),
            "CONTROLLER_CONNECT" => Self::ControllerConnect(decode_data(frame.data, text)?),
            "CONTROLLER_DISCONNECT" => Self::ControllerDisconnect(decode_data(frame.data, text)?),
            "ERROR" => Self::Error(decode_data(frame.data, text)?),
            _ => return Err(Error::UnknownMessageType { kind: frame.kind }),
        };
        Ok(message)
    }

    /// Wire name of this frame's `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat => "HEARTBEAT",
            Self::InitialState(_) => "INITIAL_STATE",
            Self::StateUpdate(_) => "STATE_UPDATE",
            Self::StateSnapshot(_) => "STATE_SNAPSHOT",
            Self::ControllerConnect(_) => "CONTROLLER_CONNECT",
            Self::ControllerDisconnect(_) => "CONTROLLER_DISCONNECT",
            Self::Error(_) => "ERROR",
        }
    }
}

fn decode_data<T: DeserializeOwned>(data: serde_json::Value, body: &str) -> Result<T, Error> {
    serde_json::from_value(data).map_err(|e| Error::malformed(&e, body))
}

/// `null` and a missing field both decode to an empty list.
fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn to_value(frame: &Outbound) -> serde_json::Value {
        serde_json::from_str(&frame.to_json().unwrap()).unwrap()
    }

    #[test]
    fn heartbeat_and_close_are_bare() {
        assert_eq!(to_value(&Outbound::Heartbeat), json!({ "type": "HEARTBEAT" }));
        assert_eq!(to_value(&Outbound::Close), json!({ "type": "CLOSE" }));
    }

    #[test]
    fn state_update_wire_shape() {
        let frame = Outbound::state_update("EGLL", "S1", false);
        assert_eq!(
            to_value(&frame),
            json!({
                "type": "STATE_UPDATE",
                "airport": "EGLL",
                "data": { "objectId": "S1", "state": false }
            })
        );
        assert_eq!(frame.kind(), "STATE_UPDATE");
    }

    #[test]
    fn get_state_wire_shape() {
        let frame = Outbound::get_state("KJFK", 1_700_000_000_000);
        assert_eq!(
            to_value(&frame),
            json!({ "type": "GET_STATE", "airport": "KJFK", "timestamp": 1_700_000_000_000_i64 })
        );
    }

    #[test]
    fn parse_heartbeat_without_data() {
        assert_eq!(Inbound::parse(r#"{"type":"HEARTBEAT"}"#).unwrap(), Inbound::Heartbeat);
    }

    #[test]
    fn parse_initial_state() {
        let text = json!({
            "type": "INITIAL_STATE",
            "data": {
                "connectionType": "controller",
                "objects": [{ "id": "S1", "state": true }, { "id": "S2", "state": false }]
            }
        })
        .to_string();

        let Inbound::InitialState(initial) = Inbound::parse(&text).unwrap() else {
            panic!("expected INITIAL_STATE");
        };
        assert_eq!(initial.connection_type.as_deref(), Some("controller"));
        assert_eq!(
            initial.objects,
            vec![
                ObjectState { id: "S1".into(), state: true },
                ObjectState { id: "S2".into(), state: false },
            ]
        );
    }

    #[test]
    fn parse_initial_state_with_null_objects() {
        let text = r#"{"type":"INITIAL_STATE","data":{"objects":null}}"#;
        let Inbound::InitialState(initial) = Inbound::parse(text).unwrap() else {
            panic!("expected INITIAL_STATE");
        };
        assert!(initial.objects.is_empty());
        assert!(initial.connection_type.is_none());
    }

    #[test]
    fn parse_state_update_with_and_without_controller() {
        let with = r#"{"type":"STATE_UPDATE","data":{"objectId":"S1","state":false,"controllerId":"ctl-2"}}"#;
        let Inbound::StateUpdate(update) = Inbound::parse(with).unwrap() else {
            panic!("expected STATE_UPDATE");
        };
        assert_eq!(update.object_id, "S1");
        assert!(!update.state);
        assert_eq!(update.controller_id.as_deref(), Some("ctl-2"));

        let without = r#"{"type":"STATE_UPDATE","data":{"objectId":"S1","state":true}}"#;
        let Inbound::StateUpdate(update) = Inbound::parse(without).unwrap() else {
            panic!("expected STATE_UPDATE");
        };
        assert!(update.controller_id.is_none());
    }

    #[test]
    fn parse_snapshot_defaults_offline() {
        let text = r#"{"type":"STATE_SNAPSHOT","data":{"objects":[{"id":"S1","state":true}]}}"#;
        let Inbound::StateSnapshot(snapshot) = Inbound::parse(text).unwrap() else {
            panic!("expected STATE_SNAPSHOT");
        };
        assert!(!snapshot.offline);
        assert_eq!(snapshot.objects.len(), 1);
    }

    #[test]
    fn parse_presence_and_error() {
        let connect = r#"{"type":"CONTROLLER_CONNECT","data":{"controllerId":"ctl-9"}}"#;
        assert_eq!(
            Inbound::parse(connect).unwrap(),
            Inbound::ControllerConnect(ControllerPresence {
                controller_id: "ctl-9".into()
            })
        );

        let error = r#"{"type":"ERROR","data":{"message":"bad key"}}"#;
        assert_eq!(
            Inbound::parse(error).unwrap(),
            Inbound::Error(RelayError {
                message: "bad key".into()
            })
        );
    }

    #[test]
    fn unknown_type_is_reported() {
        let err = Inbound::parse(r#"{"type":"PING","data":{}}"#).unwrap_err();
        assert!(matches!(err, Error::UnknownMessageType { ref kind } if kind == "PING"));
    }

    #[test]
    fn wrong_payload_shape_is_malformed() {
        let text = r#"{"type":"STATE_UPDATE","data":{"objectId":"S1","state":"on"}}"#;
        let err = Inbound::parse(text).unwrap_err();
        match err {
            Error::Malformed { body, .. } => assert_eq!(body, text),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(Inbound::parse("not json"), Err(Error::Malformed { .. })));
    }
}
