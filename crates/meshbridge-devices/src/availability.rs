//! Availability monitor.
//!
//! Every device gets a timer that is rearmed to `timeout + margin` whenever
//! the device is seen. When it fires, mains-powered (active) devices are
//! pinged through the radio queue with one retry; battery-powered (passive)
//! devices are declared offline directly. Availability is published retained
//! on `<base>/<alias>/availability`, only when it changed.

use std::time::Duration;

use meshbridge_core::{AvailabilityState, BridgeEvent};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::PublishOptions;
use crate::context::Context;
use crate::radio::{DeviceInfo, Ieee, RadioResult};
use crate::runtime::Classification;

/// Liveness monitor of all devices.
#[derive(Clone)]
pub struct AvailabilityMonitor {
    ctx: Context,
}

impl AvailabilityMonitor {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub fn classify(info: &DeviceInfo) -> Classification {
        if info.is_mains_powered() {
            Classification::Active
        } else {
            Classification::Passive
        }
    }

    fn is_monitored(&self, ieee: &Ieee) -> bool {
        self.ctx.settings.availability.enabled
            && self
                .ctx
                .entities
                .device(ieee)
                .is_none_or(|d| d.options.availability)
    }

    /// Timer delay for a device: entity timeout, else the global timeout of
    /// its class, plus the margin.
    fn delay(&self, ieee: &Ieee, classification: Classification) -> Duration {
        let settings = &self.ctx.settings.availability;
        let timeout = self
            .ctx
            .entities
            .device(ieee)
            .and_then(|d| d.options.availability_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or_else(|| match classification {
                Classification::Active => settings.active_timeout(),
                Classification::Passive => settings.passive_timeout(),
            });
        timeout + settings.margin()
    }

    /// Classify a device and start its timer.
    pub fn track(&self, info: &DeviceInfo) {
        if !self.is_monitored(&info.ieee) {
            return;
        }
        let classification = Self::classify(info);
        self.ctx.runtime.with(&info.ieee, |rt| {
            rt.availability.classification = classification;
            rt.availability.tracked = true;
        });
        debug!(
            category = "availability",
            ieee = %info.ieee,
            ?classification,
            "Tracking device"
        );
        self.arm(&info.ieee);
    }

    /// The device showed activity: record it, declare it online and rearm.
    pub async fn seen(&self, ieee: &Ieee) {
        if !self.is_monitored(ieee) {
            return;
        }
        let tracked = self.ctx.runtime.with(ieee, |rt| rt.availability.tracked);
        if !tracked {
            let classification = match self.ctx.radio.device(ieee).await {
                Some(info) => Self::classify(&info),
                None => Classification::Passive,
            };
            self.ctx.runtime.with(ieee, |rt| {
                rt.availability.classification = classification;
                rt.availability.tracked = true;
            });
        }

        let epoch = self.ctx.runtime.with(ieee, |rt| {
            rt.availability.last_seen = Some(Instant::now());
            rt.epoch
        });
        self.arm(ieee);
        self.publish_state(ieee, epoch, AvailabilityState::Online).await;
    }

    /// Cancel the timer and drop runtime state of a removed device.
    pub fn forget(&self, ieee: &Ieee) {
        self.ctx.runtime.remove(ieee);
    }

    fn arm(&self, ieee: &Ieee) {
        let monitor = self.clone();
        let target = ieee.clone();
        self.ctx.runtime.with(ieee, |rt| {
            let delay = self.delay(ieee, rt.availability.classification);
            rt.availability.cancel_timer();
            rt.availability.timer_generation += 1;
            let generation = rt.availability.timer_generation;
            let epoch = rt.epoch;
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                monitor.expire(target, epoch, generation).await;
            });
            rt.availability.timer = Some(task.abort_handle());
        });
    }

    async fn expire(&self, ieee: Ieee, epoch: u64, generation: u64) {
        let claimed = self
            .ctx
            .runtime
            .with_current(&ieee, epoch, |rt| {
                let availability = &mut rt.availability;
                if availability.timer_generation != generation || availability.probing {
                    return None;
                }
                // Our own handle; dropping it does not abort this task.
                availability.timer = None;
                if availability.classification == Classification::Active {
                    availability.probing = true;
                }
                Some(availability.classification)
            })
            .flatten();
        let Some(classification) = claimed else {
            return;
        };

        if classification == Classification::Passive {
            debug!(category = "availability", ieee = %ieee, "Passive device timed out");
            self.publish_state(&ieee, epoch, AvailabilityState::Offline).await;
            return;
        }

        let started = Instant::now();
        let mut result = self.probe(&ieee).await;
        if let Err(e) = &result {
            debug!(category = "availability", ieee = %ieee, "Ping failed ({}), retrying", e);
            result = self.probe(&ieee).await;
        }

        let seen_meanwhile = self.ctx.runtime.with_current(&ieee, epoch, |rt| {
            rt.availability.probing = false;
            rt.availability.last_seen.is_some_and(|t| t > started)
        });
        let Some(seen_meanwhile) = seen_meanwhile else {
            return;
        };

        match result {
            Ok(()) => self.seen(&ieee).await,
            Err(_) if seen_meanwhile => {}
            Err(e) => {
                warn!(category = "availability", ieee = %ieee, "Ping failed twice: {}", e);
                self.publish_state(&ieee, epoch, AvailabilityState::Offline).await;
            }
        }
    }

    async fn probe(&self, ieee: &Ieee) -> RadioResult<()> {
        let radio = self.ctx.radio.clone();
        let target = ieee.clone();
        self.ctx
            .queue
            .run(format!("ping {}", ieee), async move { radio.ping(&target).await })
            .await
    }

    /// Record and publish a state, unless it equals the last published one.
    async fn publish_state(&self, ieee: &Ieee, epoch: u64, state: AvailabilityState) {
        let changed = self
            .ctx
            .runtime
            .with_current(ieee, epoch, |rt| {
                if rt.availability.state == state {
                    false
                } else {
                    rt.availability.state = state;
                    true
                }
            })
            .unwrap_or(false);
        if !changed {
            return;
        }

        let alias = self
            .ctx
            .entities
            .device(ieee)
            .map(|d| d.friendly_name)
            .unwrap_or_else(|| ieee.to_string());
        info!(category = "availability", ieee = %ieee, "Device '{}' is now {}", alias, state);
        self.ctx
            .publish_or_log(
                &self.ctx.topics.availability(&alias),
                &json!({ "state": state }),
                PublishOptions::retained(),
            )
            .await;
        self.ctx.emit(BridgeEvent::AvailabilityChanged {
            ieee: ieee.to_string(),
            alias,
            state,
            timestamp: chrono::Utc::now().timestamp(),
        });
    }
}
