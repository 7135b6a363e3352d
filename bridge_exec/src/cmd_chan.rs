//! # Command Channel
//!
//! There is exactly one link to the flight controller and it is shared by the position feed, the
//! waypoint task, the safety supervisor and the flight sequencer. The channel serialises access:
//! each operation holds the link for a single call and never across a sleep.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace, warn};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use comms_if::eqpt::autopilot::{AutopilotCmd, AutopilotLink, FlightMode, LinkError};
use util::maths::clamp;

use crate::frame::{NavigationEstimate, WaypointResult};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Mutually exclusive wrapper around the autopilot link.
pub struct CommandChannel {
    link: Mutex<Box<dyn AutopilotLink + Send>>,

    min_altitude_m: f64,

    max_altitude_m: f64,

    battery_wait: Duration,

    num_sent: AtomicU64,

    num_failed: AtomicU64,
}

/// Battery telemetry with unknown values removed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    pub voltage_v: Option<f64>,
    pub percentage: Option<f64>,
}

/// Counters of commands passed to the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStats {
    pub sent: u64,
    pub failed: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Autopilot link error: {0}")]
    LinkError(#[from] LinkError),

    #[error("Refusing to take off to a non-finite altitude ({0})")]
    InvalidAltitude(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CommandChannel {
    /// Create a new channel over `link`.
    ///
    /// Takeoff altitudes are limited to `[min_altitude_m, max_altitude_m]`, battery requests wait
    /// at most `battery_wait` for telemetry.
    pub fn new(
        link: Box<dyn AutopilotLink + Send>,
        min_altitude_m: f64,
        max_altitude_m: f64,
        battery_wait: Duration,
    ) -> Self {
        Self {
            link: Mutex::new(link),
            min_altitude_m,
            max_altitude_m,
            battery_wait,
            num_sent: AtomicU64::new(0),
            num_failed: AtomicU64::new(0),
        }
    }

    /// Send the vehicle's navigation estimate.
    pub fn send_navigation_estimate(&self, est: &NavigationEstimate) -> Result<(), ChannelError> {
        let time_usec = chrono::Utc::now().timestamp_micros().max(0) as u64;

        self.send(&AutopilotCmd::VisionPosition {
            time_usec,
            x: est.position_m.x,
            y: est.position_m.y,
            z: est.position_m.z,
            roll: est.roll,
            pitch: est.pitch,
            yaw: est.yaw,
        })
    }

    /// Send a guided waypoint.
    ///
    /// Invalid waypoints are never sent, `Ok(false)` is returned for them.
    pub fn send_relative_waypoint(&self, wp: &WaypointResult) -> Result<bool, ChannelError> {
        let wp = match wp.valid() {
            Some(wp) => wp,
            None => return Ok(false),
        };

        self.send(&AutopilotCmd::GuidedWaypoint {
            x: wp.position_m.x,
            y: wp.position_m.y,
            z: wp.position_m.z,
        })?;

        Ok(true)
    }

    pub fn set_mode(&self, mode: FlightMode) -> Result<(), ChannelError> {
        self.send(&AutopilotCmd::SetMode(mode))
    }

    pub fn arm(&self) -> Result<(), ChannelError> {
        self.send(&AutopilotCmd::Arm)
    }

    pub fn land(&self) -> Result<(), ChannelError> {
        self.send(&AutopilotCmd::Land)
    }

    /// Take off to `altitude_m`, limited to the altitude envelope.
    ///
    /// Returns the altitude actually commanded.
    pub fn takeoff(&self, altitude_m: f64) -> Result<f64, ChannelError> {
        if !altitude_m.is_finite() {
            return Err(ChannelError::InvalidAltitude(altitude_m));
        }

        let (altitude_m, clamped) = clamp(altitude_m, self.min_altitude_m, self.max_altitude_m);
        if clamped {
            warn!(
                "Takeoff altitude limited to {:.2} m (envelope [{:.2}, {:.2}] m)",
                altitude_m, self.min_altitude_m, self.max_altitude_m
            );
        }

        self.send(&AutopilotCmd::Takeoff { altitude_m })?;

        Ok(altitude_m)
    }

    /// Latest battery telemetry, or `None` if none arrived within the battery wait.
    pub fn battery_status(&self) -> Option<BatteryReading> {
        match self.lock().recv_battery(self.battery_wait) {
            Ok(Some(b)) => Some(BatteryReading {
                voltage_v: b.voltage_v(),
                percentage: b.remaining_pct(),
            }),
            Ok(None) => None,
            Err(e) => {
                debug!("Could not read battery status: {}", e);
                None
            }
        }
    }

    pub fn is_armed(&self) -> Result<bool, ChannelError> {
        Ok(self.lock().is_armed()?)
    }

    pub fn current_mode(&self) -> Result<FlightMode, ChannelError> {
        Ok(self.lock().mode()?)
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            sent: self.num_sent.load(Ordering::Relaxed),
            failed: self.num_failed.load(Ordering::Relaxed),
        }
    }

    fn send(&self, cmd: &AutopilotCmd) -> Result<(), ChannelError> {
        trace!("Autopilot <- {:?}", cmd);

        let result = self.lock().send(cmd);

        match result {
            Ok(()) => {
                self.num_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.num_failed.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    // Links hold no invariants across calls, so a panic in another holder doesn't poison ours
    fn lock(&self) -> MutexGuard<'_, Box<dyn AutopilotLink + Send>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
