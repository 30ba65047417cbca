//! Gimbal per-axis maximum speed and stabilization.

use std::time::Duration;

use airlink_setting::{BoundedSetting, RemoteSetting};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

use crate::change::ChangeSet;
use crate::command::transmit_via;
use crate::driver::Peripheral;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GimbalAxis {
    Yaw,
    Pitch,
    Roll,
}

impl GimbalAxis {
    pub const ALL: [GimbalAxis; 3] = [GimbalAxis::Yaw, GimbalAxis::Pitch, GimbalAxis::Roll];

    fn index(self) -> usize {
        match self {
            GimbalAxis::Yaw => 0,
            GimbalAxis::Pitch => 1,
            GimbalAxis::Roll => 2,
        }
    }

    fn max_speed_name(self) -> &'static str {
        match self {
            GimbalAxis::Yaw => "gimbal.yaw.max_speed",
            GimbalAxis::Pitch => "gimbal.pitch.max_speed",
            GimbalAxis::Roll => "gimbal.roll.max_speed",
        }
    }

    fn stabilization_name(self) -> &'static str {
        match self {
            GimbalAxis::Yaw => "gimbal.yaw.stabilization",
            GimbalAxis::Pitch => "gimbal.pitch.stabilization",
            GimbalAxis::Roll => "gimbal.roll.stabilization",
        }
    }
}

#[derive(Debug)]
pub enum GimbalRequest {
    /// Degrees per second; clamped to the axis envelope.
    SetMaxSpeed { axis: GimbalAxis, value: f64 },
    SetStabilization { axis: GimbalAxis, enabled: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GimbalCommand {
    SetMaxSpeed { axis: GimbalAxis, value: f64 },
    SetStabilization { axis: GimbalAxis, enabled: bool },
}

#[derive(Debug)]
pub enum GimbalReport {
    MaxSpeed { axis: GimbalAxis, min: Option<f64>, value: Option<f64>, max: Option<f64> },
    Stabilization { axis: GimbalAxis, enabled: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisState {
    pub axis: GimbalAxis,
    pub max_speed: f64,
    pub max_speed_min: Option<f64>,
    pub max_speed_max: Option<f64>,
    pub max_speed_updating: bool,
    pub stabilized: bool,
    pub stabilization_updating: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GimbalState {
    pub axes: Vec<AxisState>,
}

#[derive(Debug)]
pub struct GimbalCore {
    max_speed: [BoundedSetting<f64>; 3],
    stabilization: [RemoteSetting<bool>; 3],
}

impl GimbalCore {
    pub fn new(initial_speed: f64, timeout: Duration, commands: &mpsc::Sender<GimbalCommand>) -> Self {
        let max_speed = GimbalAxis::ALL.map(|axis| {
            BoundedSetting::new(axis.max_speed_name(), initial_speed, transmit_via(commands, move |v: &f64| GimbalCommand::SetMaxSpeed { axis, value: *v }))
                .with_timeout(timeout)
        });
        let stabilization = GimbalAxis::ALL.map(|axis| {
            RemoteSetting::new(axis.stabilization_name(), false, transmit_via(commands, move |e: &bool| GimbalCommand::SetStabilization { axis, enabled: *e }))
                .with_timeout(timeout)
        });
        Self { max_speed, stabilization }
    }
}

impl Peripheral for GimbalCore {
    type Request = GimbalRequest;
    type Report = GimbalReport;
    type Snapshot = GimbalState;

    const NAME: &'static str = "gimbal";

    fn handle_request(&mut self, request: GimbalRequest, now: Instant, changes: &mut ChangeSet) {
        let outcome = match request {
            GimbalRequest::SetMaxSpeed { axis, value } => self.max_speed[axis.index()].set(value, now),
            GimbalRequest::SetStabilization { axis, enabled } => self.stabilization[axis.index()].set(enabled, now),
        };
        changes.record(outcome);
    }

    fn handle_report(&mut self, report: GimbalReport, changes: &mut ChangeSet) {
        match report {
            GimbalReport::MaxSpeed { axis, min, value, max } => {
                match self.max_speed[axis.index()].update_bounds(min, value, max) {
                    Ok(changed) => changes.mark_if(changed),
                    Err(e) => warn!("gimbal: ignoring report: {}", e),
                }
            }
            GimbalReport::Stabilization { axis, enabled } => {
                changes.mark_if(self.stabilization[axis.index()].update(enabled));
            }
        }
    }

    fn poll_timeouts(&mut self, now: Instant, changes: &mut ChangeSet) {
        for s in &mut self.max_speed {
            changes.mark_if(s.poll_timeout(now));
        }
        for s in &mut self.stabilization {
            changes.mark_if(s.poll_timeout(now));
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.max_speed.iter().map(|s| s.deadline())
            .chain(self.stabilization.iter().map(|s| s.deadline()))
            .flatten()
            .min()
    }

    fn snapshot(&self) -> GimbalState {
        let axes = GimbalAxis::ALL.iter().map(|&axis| {
            let speed = &self.max_speed[axis.index()];
            let stab = &self.stabilization[axis.index()];
            AxisState {
                axis,
                max_speed: *speed.value(),
                max_speed_min: speed.min().copied(),
                max_speed_max: speed.max().copied(),
                max_speed_updating: speed.updating(),
                stabilized: *stab.value(),
                stabilization_updating: stab.updating(),
            }
        }).collect();
        GimbalState { axes }
    }
}
