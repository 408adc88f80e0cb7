//! Configuration state machine tests.

mod common;

use common::{wait_until, Harness, BULB, REMOTE, SPOT};
use meshbridge_core::{BridgeEvent, EntityOptions};
use meshbridge_devices::{
    CallKind, Cluster, ConfigurationStatus, ConfigureOutcome, Ieee, RadioCall, RadioTarget, Trigger,
    MAX_CONFIGURE_ATTEMPTS,
};

#[tokio::test]
async fn test_startup_configures_lights() {
    let h = Harness::new();
    h.bridge.start().await.unwrap();

    let runtime = h.ctx().runtime.clone();
    wait_until(|| {
        runtime.configuration(&Ieee::new(BULB)) == ConfigurationStatus::Configured
            && runtime.configuration(&Ieee::new(SPOT)) == ConfigurationStatus::Configured
    })
    .await;

    // The remote's model has no configure routine.
    assert_eq!(runtime.configuration(&Ieee::new(REMOTE)), ConfigurationStatus::Unset);

    let coordinator = RadioTarget::Endpoint(h.ctx().radio.coordinator());
    let bulb_binds: Vec<Cluster> = h
        .radio
        .calls_of(CallKind::Bind)
        .into_iter()
        .filter_map(|call| match call {
            RadioCall::Bind { source, cluster, target } if source.ieee == Ieee::new(BULB) => {
                assert_eq!(target, coordinator);
                Some(cluster)
            }
            _ => None,
        })
        .collect();
    assert_eq!(bulb_binds, vec![Cluster::OnOff, Cluster::LevelCtrl, Cluster::ColorCtrl]);

    let info = h.ctx().radio.device(&Ieee::new(BULB)).await.unwrap();
    let endpoint = info.endpoint(11).unwrap();
    assert!(endpoint.reporting(&Cluster::ColorCtrl, "colorTemperature").is_some());
    assert!(endpoint.reporting(&Cluster::ColorCtrl, "currentX").is_some());
    assert_eq!(
        endpoint.reporting(&Cluster::OnOff, "onOff").map(|r| r.max_interval),
        Some(3600)
    );
}

#[tokio::test]
async fn test_failing_triggers_stop_after_max_attempts() {
    let h = Harness::new();
    h.radio.fail(CallKind::Bind, None);
    let bulb = Ieee::new(BULB);
    let configurator = h.bridge.configurator();

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(configurator.configure(&bulb, Trigger::FirstMessage).await.unwrap());
    }

    assert!(matches!(outcomes[0], ConfigureOutcome::Failed { attempts: 1, .. }));
    assert!(matches!(outcomes[1], ConfigureOutcome::Failed { attempts: 2, .. }));
    assert!(matches!(
        outcomes[2],
        ConfigureOutcome::Exhausted { attempts: MAX_CONFIGURE_ATTEMPTS, .. }
    ));
    assert!(matches!(outcomes[3], ConfigureOutcome::Skipped(_)));
    assert!(matches!(outcomes[4], ConfigureOutcome::Skipped(_)));

    assert_eq!(h.radio.calls_of(CallKind::Bind).len(), 3);
    assert_eq!(h.ctx().runtime.configuration(&bulb), ConfigurationStatus::Failed);
    assert!(!configurator.is_eligible(&bulb, Trigger::Startup));
    assert!(configurator.is_eligible(&bulb, Trigger::Operator));
}

#[tokio::test]
async fn test_operator_retries_exhausted_device() {
    let h = Harness::new();
    let bulb = Ieee::new(BULB);
    h.radio.fail(CallKind::Bind, None);
    for _ in 0..MAX_CONFIGURE_ATTEMPTS {
        h.bridge.configurator().configure(&bulb, Trigger::Startup).await.unwrap();
    }
    assert_eq!(h.ctx().runtime.configuration(&bulb), ConfigurationStatus::Failed);

    h.radio.clear_failures();
    let outcome = h.bridge.configurator().configure(&bulb, Trigger::Operator).await.unwrap();
    assert_eq!(outcome, ConfigureOutcome::Configured);
    assert_eq!(h.ctx().runtime.configure_attempts(&bulb), 0);
}

#[tokio::test]
async fn test_rejoin_resets_configuration() {
    let h = Harness::new();
    let bulb = Ieee::new(BULB);
    let configurator = h.bridge.configurator();
    assert_eq!(
        configurator.configure(&bulb, Trigger::Interview).await.unwrap(),
        ConfigureOutcome::Configured
    );
    assert!(!configurator.is_eligible(&bulb, Trigger::FirstMessage));

    h.ctx().runtime.rejoin(&bulb);
    assert_eq!(h.ctx().runtime.configuration(&bulb), ConfigurationStatus::Unset);
    assert!(configurator.is_eligible(&bulb, Trigger::FirstMessage));

    // Reporting is already in place, so the second run sends nothing new.
    let binds = h.radio.calls_of(CallKind::Bind).len();
    assert_eq!(
        configurator.configure(&bulb, Trigger::FirstMessage).await.unwrap(),
        ConfigureOutcome::Configured
    );
    assert_eq!(h.radio.calls_of(CallKind::Bind).len(), binds);
}

#[tokio::test]
async fn test_concurrent_trigger_is_rejected() {
    let h = Harness::new();
    let bulb = Ieee::new(BULB);
    h.ctx()
        .runtime
        .with(&bulb, |rt| rt.configuration = ConfigurationStatus::Configuring);

    let configurator = h.bridge.configurator();
    assert!(!configurator.is_eligible(&bulb, Trigger::Operator));
    assert_eq!(
        configurator.configure(&bulb, Trigger::Operator).await.unwrap(),
        ConfigureOutcome::AlreadyConfiguring
    );
    assert!(h.radio.calls().is_empty());
}

#[tokio::test]
async fn test_skipped_triggers_do_not_count() {
    let mut settings = common::settings();
    settings.devices[2].options = EntityOptions {
        disable_configure: true,
        ..Default::default()
    };
    let h = Harness::with_settings(settings);
    let configurator = h.bridge.configurator();

    let spot = Ieee::new(SPOT);
    assert!(matches!(
        configurator.configure(&spot, Trigger::Startup).await.unwrap(),
        ConfigureOutcome::Skipped(_)
    ));
    assert_eq!(h.ctx().runtime.configure_attempts(&spot), 0);

    let bulb = Ieee::new(BULB);
    h.radio
        .update_device(&bulb, |device| device.interview_completed = false);
    assert!(matches!(
        configurator.configure(&bulb, Trigger::Startup).await.unwrap(),
        ConfigureOutcome::Skipped(_)
    ));
    assert_eq!(h.ctx().runtime.configure_attempts(&bulb), 0);
    assert!(h.radio.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_device_is_an_error() {
    let h = Harness::new();
    let result = h
        .bridge
        .configurator()
        .configure(&Ieee::new("0x00158d00000000ff"), Trigger::Operator)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_status_changes_are_announced_on_event_bus() {
    let h = Harness::new();
    let mut events = h.bridge.events().configuration_events();
    let bulb = Ieee::new(BULB);
    h.radio.fail_times(CallKind::Bind, None, 1);
    let configurator = h.bridge.configurator();

    let first = configurator.configure(&bulb, Trigger::FirstMessage).await.unwrap();
    assert!(matches!(first, ConfigureOutcome::Failed { attempts: 1, .. }));
    configurator.configure(&bulb, Trigger::FirstMessage).await.unwrap();
    assert_eq!(h.ctx().runtime.configuration(&bulb), ConfigurationStatus::Configured);

    let mut changes = Vec::new();
    while let Some((event, _)) = events.try_recv() {
        match event {
            BridgeEvent::ConfigurationChanged { ieee, status, attempts, .. } => {
                assert_eq!(ieee, BULB);
                changes.push((status, attempts));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(
        changes,
        vec![
            ("configuring".to_string(), 0),
            ("unset".to_string(), 1),
            ("configuring".to_string(), 1),
            ("configured".to_string(), 0),
        ]
    );
}
