//! End-to-end tests of the bridge: lifecycle events, bridge requests and
//! the dispatch loop.

mod common;

use std::time::Duration;

use common::{wait_until, Harness, BULB, SPOT};
use meshbridge_core::BridgeEvent;
use meshbridge_devices::{
    BusMessage, CallKind, Cluster, ConfigurationStatus, DeviceInfo, EndpointInfo, Ieee, RadioEvent,
    RequestKind,
};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};

fn attributes(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

fn response(h: &Harness, kind: &str) -> Value {
    h.bus
        .last(&format!("zigbee2mqtt/bridge/response/device/{}", kind))
        .map(|p| p.json())
        .unwrap_or(Value::Null)
}

#[tokio::test]
async fn test_start_and_stop_announce_bridge_state() {
    let h = Harness::new();
    h.bridge.start().await.unwrap();

    assert_eq!(h.bus.subscriptions(), vec!["zigbee2mqtt/#"]);
    let state = h.bus.last("zigbee2mqtt/bridge/state").unwrap();
    assert_eq!(state.text(), "online");
    assert!(state.options.retain);

    h.bridge.stop().await.unwrap();
    assert_eq!(h.bus.last("zigbee2mqtt/bridge/state").unwrap().text(), "offline");
    assert!(!h.ctx().queue.is_running());
}

#[tokio::test]
async fn test_bind_request_echoes_transaction() {
    let h = Harness::new();
    let request = json!({
        "from": "remote",
        "to": "living/bulb",
        "clusters": ["genOnOff"],
        "transaction": "t-1",
    });
    h.bridge.respond(RequestKind::Bind, request.to_string().as_bytes()).await;

    assert_eq!(
        response(&h, "bind"),
        json!({
            "data": {
                "from": "remote",
                "to": "living/bulb",
                "clusters": ["genOnOff"],
                "failed": [],
            },
            "status": "ok",
            "transaction": "t-1",
        })
    );
}

#[tokio::test]
async fn test_failed_bind_request() {
    let h = Harness::new();
    h.radio.fail_device(CallKind::Bind, &Ieee::new(common::REMOTE));
    h.bridge
        .respond(RequestKind::Bind, br#"{"from": "remote", "to": "living/bulb"}"#)
        .await;

    let response = response(&h, "bind");
    assert_eq!(response["status"], json!("error"));
    assert_eq!(response["error"], json!("Failed to bind"));
    assert_eq!(response["data"]["failed"].as_array().map(Vec::len), Some(3));
    assert!(response.get("transaction").is_none());
}

#[tokio::test]
async fn test_invalid_requests_get_one_error_response() {
    let h = Harness::new();
    h.bridge.respond(RequestKind::Unbind, br#"{"to": "living/bulb"}"#).await;
    h.bridge
        .respond(RequestKind::Bind, br#"{"from": "ghost", "to": "living/bulb", "transaction": 7}"#)
        .await;

    let unbind = h.bus.published_to("zigbee2mqtt/bridge/response/device/unbind");
    assert_eq!(unbind.len(), 1);
    let unbind = unbind[0].json();
    assert_eq!(unbind["status"], json!("error"));
    assert!(unbind["error"].as_str().unwrap().starts_with("Invalid request"));

    let bind = response(&h, "bind");
    assert_eq!(bind["error"], json!("Source 'ghost' does not exist"));
    assert_eq!(bind["transaction"], json!(7));
}

#[tokio::test]
async fn test_configure_request() {
    let h = Harness::new();
    h.bridge.respond(RequestKind::Configure, b"spot").await;
    assert_eq!(response(&h, "configure"), json!({ "data": { "id": "spot" }, "status": "ok" }));
    assert_eq!(
        h.ctx().runtime.configuration(&Ieee::new(SPOT)),
        ConfigurationStatus::Configured
    );

    h.bridge
        .respond(RequestKind::Configure, br#"{"id": "ghost"}"#)
        .await;
    assert_eq!(response(&h, "configure")["error"], json!("Entity 'ghost' does not exist"));

    // The remote's model has nothing to configure.
    h.bridge
        .respond(RequestKind::Configure, br#"{"id": "remote"}"#)
        .await;
    let error = response(&h, "configure")["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("Cannot configure 'remote'"));
}

#[tokio::test]
async fn test_configure_request_failure() {
    let h = Harness::new();
    h.radio.fail(CallKind::Bind, None);
    h.bridge
        .respond(RequestKind::Configure, br#"{"id": "spot", "transaction": "x"}"#)
        .await;

    let response = response(&h, "configure");
    assert_eq!(response["status"], json!("error"));
    assert!(response["error"]
        .as_str()
        .unwrap()
        .starts_with("Failed to configure 'spot'"));
    assert_eq!(response["transaction"], json!("x"));
}

#[tokio::test]
async fn test_rename_moves_availability() {
    let h = Harness::new();
    h.bridge.availability().seen(&Ieee::new(SPOT)).await;
    let mut renames = h
        .bridge
        .events()
        .subscribe_filtered(|event| matches!(event, BridgeEvent::DeviceRenamed { .. }));

    h.bridge
        .respond(RequestKind::Rename, br#"{"from": "spot", "to": "desk"}"#)
        .await;
    assert_eq!(
        response(&h, "rename"),
        json!({ "data": { "from": "spot", "to": "desk" }, "status": "ok" })
    );

    let old = h.bus.last("zigbee2mqtt/spot/availability").unwrap();
    assert!(old.payload.is_empty());
    assert!(old.options.retain);
    assert_eq!(
        h.bus.last("zigbee2mqtt/desk/availability").unwrap().json(),
        json!({ "state": "online" })
    );

    h.set("desk", json!({ "state": "ON" })).await;
    assert_eq!(h.state("desk"), json!({ "state": "ON" }));
    assert!(h.send("zigbee2mqtt/spot/set", b"ON").await.is_err());

    match renames.try_recv() {
        Some((BridgeEvent::DeviceRenamed { ieee, from, to, .. }, _)) => {
            assert_eq!(ieee, SPOT);
            assert_eq!((from.as_str(), to.as_str()), ("spot", "desk"));
        }
        other => panic!("expected a rename event, got {:?}", other),
    }
    assert!(renames.try_recv().is_none());
}

#[tokio::test]
async fn test_rename_to_taken_alias_fails() {
    let h = Harness::new();
    h.bridge
        .respond(RequestKind::Rename, br#"{"from": "spot", "to": "remote"}"#)
        .await;

    assert_eq!(
        response(&h, "rename")["error"],
        json!("Friendly name 'remote' is already in use")
    );
    assert!(h.ctx().entities.resolve("spot").is_some());
}

#[tokio::test]
async fn test_new_device_joins_and_configures() {
    let h = Harness::new();
    let mut events = h.bridge.events().subscribe();
    let ieee = Ieee::new("0x00158d0000000009");
    h.radio.add_device(common::light(ieee.as_str()));

    h.bridge
        .handle_radio_event(RadioEvent::DeviceJoined { ieee: ieee.clone() })
        .await;
    // Unconfigured aliases are the address itself.
    assert_eq!(
        h.bus.last("zigbee2mqtt/0x00158d0000000009/availability").unwrap().json(),
        json!({ "state": "online" })
    );
    let mut joined = false;
    while let Some((event, _)) = events.try_recv() {
        joined |= matches!(event, BridgeEvent::DeviceJoined { .. });
    }
    assert!(joined);

    h.bridge
        .handle_radio_event(RadioEvent::DeviceInterview {
            ieee: ieee.clone(),
            completed: true,
        })
        .await;
    let runtime = h.ctx().runtime.clone();
    wait_until(|| runtime.configuration(&ieee) == ConfigurationStatus::Configured).await;
}

#[tokio::test]
async fn test_first_message_publishes_state_and_configures() {
    let h = Harness::new();
    h.bridge
        .handle_radio_event(RadioEvent::MessageReceived {
            ieee: Ieee::new(BULB),
            endpoint: 11,
            cluster: Cluster::OnOff,
            attributes: attributes(json!({ "onOff": 1 })),
        })
        .await;

    assert_eq!(h.state("living/bulb"), json!({ "state": "ON" }));
    assert_eq!(
        h.bus.last("zigbee2mqtt/living/bulb/availability").unwrap().json(),
        json!({ "state": "online" })
    );
    let runtime = h.ctx().runtime.clone();
    wait_until(|| runtime.configuration(&Ieee::new(BULB)) == ConfigurationStatus::Configured).await;
}

#[tokio::test]
async fn test_announce_resets_configuration() {
    let h = Harness::new();
    let spot = Ieee::new(SPOT);
    h.bridge.respond(RequestKind::Configure, b"spot").await;
    let epoch = h.ctx().runtime.epoch(&spot);

    h.bridge
        .handle_radio_event(RadioEvent::DeviceAnnounced { ieee: spot.clone() })
        .await;

    assert_eq!(h.ctx().runtime.configuration(&spot), ConfigurationStatus::Unset);
    assert_ne!(h.ctx().runtime.epoch(&spot), epoch);
}

#[tokio::test]
async fn test_device_left_clears_everything() {
    let h = Harness::new();
    let spot = Ieee::new(SPOT);
    h.bridge.availability().seen(&spot).await;
    h.set("spot", json!({ "state": "ON" })).await;

    h.bridge
        .handle_radio_event(RadioEvent::DeviceLeft { ieee: spot.clone() })
        .await;

    assert!(h.ctx().entities.resolve("spot").is_none());
    assert!(!h.ctx().runtime.contains(&spot));
    assert!(h.bus.last("zigbee2mqtt/spot/availability").unwrap().payload.is_empty());
    let group = h.ctx().entities.resolve("living").unwrap();
    assert!(matches!(
        group,
        meshbridge_devices::Entity::Group(g) if !g.has_member(&spot)
    ));
}

#[tokio::test]
async fn test_interview_failure_does_not_configure() {
    let h = Harness::new();
    let ieee = Ieee::new("0x00158d000000000a");
    h.radio.add_device(
        DeviceInfo::new(ieee.clone(), common::LIGHT_MODEL)
            .with_endpoint(EndpointInfo::new(1).with_inputs([Cluster::OnOff])),
    );
    h.bridge
        .handle_radio_event(RadioEvent::DeviceInterview {
            ieee: ieee.clone(),
            completed: false,
        })
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.ctx().runtime.configuration(&ieee), ConfigurationStatus::Unset);
    assert!(h.radio.calls().is_empty());
}

#[tokio::test]
async fn test_dispatch_loop_end_to_end() {
    let h = Harness::new();
    h.bridge.start().await.unwrap();

    let (radio_tx, radio_rx) = mpsc::channel(16);
    let (bus_tx, bus_rx) = mpsc::channel(16);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let bridge = h.bridge.clone();
    let running = tokio::spawn(async move {
        bridge
            .run(radio_rx, bus_rx, async {
                let _ = stop_rx.await;
            })
            .await
    });

    // Bind the remote to the bulb.
    let request = json!({ "from": "remote", "to": "living/bulb", "transaction": "bind-1" });
    bus_tx
        .send(BusMessage::new(
            "zigbee2mqtt/bridge/request/device/bind",
            request.to_string(),
        ))
        .await
        .unwrap();
    wait_until(|| !response(&h, "bind").is_null()).await;
    let bind = response(&h, "bind");
    assert_eq!(bind["status"], json!("ok"));
    assert_eq!(bind["transaction"], json!("bind-1"));

    // A button press switches the bulb; the bulb reports it.
    radio_tx
        .send(RadioEvent::MessageReceived {
            ieee: Ieee::new(BULB),
            endpoint: 11,
            cluster: Cluster::OnOff,
            attributes: attributes(json!({ "onOff": 1 })),
        })
        .await
        .unwrap();
    wait_until(|| h.state("living/bulb")["state"] == json!("ON")).await;

    // And the bus turns it off again.
    bus_tx
        .send(BusMessage::new("zigbee2mqtt/living/bulb/set", "OFF"))
        .await
        .unwrap();
    wait_until(|| h.state("living/bulb")["state"] == json!("OFF")).await;

    // Messages on foreign or own state topics are ignored.
    bus_tx
        .send(BusMessage::new("zigbee2mqtt/living/bulb", r#"{"state":"ON"}"#))
        .await
        .unwrap();

    stop_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
    h.bridge.stop().await.unwrap();

    assert_eq!(h.state("living/bulb")["state"], json!("OFF"));
    assert_eq!(h.bus.last("zigbee2mqtt/bridge/state").unwrap().text(), "offline");
}
