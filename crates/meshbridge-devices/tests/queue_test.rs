//! Radio queue against a simulated radio with air time: callers on several
//! tasks share one FIFO and the radio never sees two calls at once.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{light, BULB, SPOT};
use meshbridge_devices::{
    CallKind, Cluster, EndpointAddr, Ieee, RadioCall, RadioDriver, RadioQueue, RadioTarget,
    SimulatedRadio,
};
use serde_json::{json, Value};

fn target(ieee: &str) -> RadioTarget {
    RadioTarget::Endpoint(EndpointAddr::new(Ieee::new(ieee), 11))
}

#[tokio::test(start_paused = true)]
async fn test_calls_reach_radio_in_enqueue_order() {
    let radio = Arc::new(
        SimulatedRadio::new()
            .with_device(light(BULB))
            .with_device(light(SPOT))
            .with_latency(Duration::from_millis(100)),
    );
    let queue = RadioQueue::default();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut receivers = Vec::new();
    for level in 1..=6u64 {
        let ieee = if level % 2 == 0 { BULB } else { SPOT };
        let radio = radio.clone();
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        receivers.push(queue.enqueue(format!("level {}", level), async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let payload = json!({ "level": level, "transtime": 0 });
            let result = radio
                .command(&target(ieee), &Cluster::LevelCtrl, "moveToLevelWithOnOff", &payload)
                .await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            result.map(|_| level)
        }));
    }

    let started = tokio::time::Instant::now();
    let mut completed = Vec::new();
    for rx in receivers {
        completed.push(rx.await.unwrap().unwrap());
    }

    assert_eq!(completed, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    // Serialized air time: six calls of 100ms each.
    assert!(started.elapsed() >= Duration::from_millis(600));

    let levels: Vec<Value> = radio
        .calls_of(CallKind::Command)
        .into_iter()
        .filter_map(|call| match call {
            RadioCall::Command { payload, .. } => Some(payload["level"].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(levels, (1..=6).map(|l| json!(l)).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_callers_on_separate_tasks_share_the_fifo() {
    let radio = Arc::new(
        SimulatedRadio::new()
            .with_device(light(BULB))
            .with_latency(Duration::from_millis(50)),
    );
    let queue = RadioQueue::default();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for caller in 0..4u64 {
        let queue = queue.clone();
        let radio = radio.clone();
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..3 {
                let radio = radio.clone();
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                queue
                    .run(format!("caller {}", caller), async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        let result = radio.ping(&Ieee::new(BULB)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        result
                    })
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(radio.calls_of(CallKind::Ping).len(), 12);
    assert_eq!(queue.executed(), 12);
}
