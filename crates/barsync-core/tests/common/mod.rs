#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;

use barsync_api::mock::{MockConnector, MockRemote};
use barsync_core::{AirportCode, ConnectionSession, DeviceRegistry, SyncConfig};
use serde_json::{Value, json};

pub const CONTROLLER_ID: &str = "ctl-test";

pub fn egll() -> AirportCode {
    AirportCode::new("EGLL")
}

pub fn config() -> SyncConfig {
    SyncConfig::default().with_api_key("test-key")
}

/// Connect a fresh EGLL session and return it with the relay's end.
pub async fn connect(registry: &DeviceRegistry, connector: &MockConnector) -> (ConnectionSession, MockRemote) {
    let session = ConnectionSession::new(
        "EGLL",
        CONTROLLER_ID,
        &config(),
        Arc::new(connector.clone()),
        registry.clone(),
    );
    session.connect().await.unwrap();
    let remote = connector.accept().await.unwrap();
    (session, remote)
}

fn objects(states: &[(&str, bool)]) -> Value {
    states
        .iter()
        .map(|(id, state)| json!({ "id": id, "state": state }))
        .collect()
}

pub fn initial_state(states: &[(&str, bool)]) -> Value {
    json!({
        "type": "INITIAL_STATE",
        "data": { "connectionType": "controller", "objects": objects(states) }
    })
}

pub fn snapshot(states: &[(&str, bool)]) -> Value {
    json!({ "type": "STATE_SNAPSHOT", "data": { "objects": objects(states) } })
}

pub fn remote_update(id: &str, state: bool, controller_id: &str) -> Value {
    json!({
        "type": "STATE_UPDATE",
        "data": { "objectId": id, "state": state, "controllerId": controller_id }
    })
}

/// `(objectId, state)` of an outbound `STATE_UPDATE` frame.
pub fn update_of(frame: &Value) -> (String, bool) {
    assert_eq!(frame["type"], "STATE_UPDATE");
    assert_eq!(frame["airport"], "EGLL");
    (
        frame["data"]["objectId"].as_str().unwrap().to_owned(),
        frame["data"]["state"].as_bool().unwrap(),
    )
}

pub fn update(id: &str, state: bool) -> (String, bool) {
    (id.to_owned(), state)
}

/// Push `INITIAL_STATE` and wait for the follow-up snapshot request.
pub async fn handshake(remote: &mut MockRemote, states: &[(&str, bool)]) {
    remote.push(&initial_state(states));
    remote.recv_kind("GET_STATE").await.unwrap();
}
