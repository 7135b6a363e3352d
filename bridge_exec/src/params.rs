//! # Bridge Executable Parameters
//!
//! This module provide parameters for the bridge executable, loaded from
//! `params/bridge_exec.toml`. Every section except `net` may be omitted, in which case the
//! defaults below are used.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use std::time::Duration;

use comms_if::{eqpt::mocap::BodyId, net::NetParams};
use util::time::secs_to_duration;

use crate::safety::SafetyParams;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Status reports any faster than this would flood the log.
pub const MIN_STATUS_PERIOD_S: f64 = 1.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeParams {
    pub net: NetParams,

    #[serde(default)]
    pub bodies: BodyIds,

    #[serde(default)]
    pub tasks: TaskParams,

    #[serde(default)]
    pub safety: SafetyParams,

    #[serde(default)]
    pub follow: FollowParams,
}

/// Rigid body ids as configured in the tracking software.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BodyIds {
    pub vehicle: BodyId,
    pub target: BodyId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskParams {
    /// Units: seconds
    pub position_feed_period_s: f64,

    /// Units: seconds
    pub target_waypoint_period_s: f64,

    /// Units: seconds
    pub status_period_s: f64,

    /// Units: seconds
    pub operator_period_s: f64,

    /// Maximum time a battery request waits for telemetry.
    ///
    /// Units: seconds
    pub battery_wait_s: f64,

    /// Units: seconds
    pub mocap_connect_timeout_s: f64,

    /// Time the autopilot has to report armed after the arm command.
    ///
    /// Units: seconds
    pub arm_confirm_timeout_s: f64,
}

/// Offsets of the follow waypoint from the target.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FollowParams {
    /// Units: meters
    pub behind_m: f64,

    /// Units: meters
    pub above_m: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParamsError {
    #[error("{0} must be positive, found {1}")]
    NotPositive(&'static str, f64),

    #[error("The stale threshold ({stale} s) must not exceed the position timeout ({timeout} s)")]
    StaleAfterTimeout { stale: f64, timeout: f64 },

    #[error("The critical battery level ({critical}%) must be below the warning level ({warning}%)")]
    CriticalNotBelowWarning { critical: f64, warning: f64 },

    #[error("The minimum altitude ({min} m) must be below the maximum altitude ({max} m)")]
    MinNotBelowMax { min: f64, max: f64 },

    #[error("The precheck pass fraction must be in (0, 1], found {0}")]
    InvalidPassFraction(f64),

    #[error("At least one precheck sample is required")]
    NoPrecheckSamples,

    #[error("The status period must be at least 1 s, found {0} s")]
    StatusPeriodTooShort(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl BridgeParams {
    /// Check all sections for consistency.
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        self.safety.are_valid()?;
        self.tasks.are_valid()?;

        for &(name, v) in &[
            ("follow.behind_m", self.follow.behind_m),
            ("follow.above_m", self.follow.above_m),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(ParamsError::NotPositive(name, v));
            }
        }

        Ok(())
    }
}

impl TaskParams {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        check_positive(&[
            ("tasks.position_feed_period_s", self.position_feed_period_s),
            ("tasks.target_waypoint_period_s", self.target_waypoint_period_s),
            ("tasks.status_period_s", self.status_period_s),
            ("tasks.operator_period_s", self.operator_period_s),
            ("tasks.battery_wait_s", self.battery_wait_s),
            ("tasks.mocap_connect_timeout_s", self.mocap_connect_timeout_s),
            ("tasks.arm_confirm_timeout_s", self.arm_confirm_timeout_s),
        ])?;

        if self.status_period_s < MIN_STATUS_PERIOD_S {
            return Err(ParamsError::StatusPeriodTooShort(self.status_period_s));
        }

        Ok(())
    }

    pub fn position_feed_period(&self) -> Duration {
        secs_to_duration(self.position_feed_period_s)
    }

    pub fn target_waypoint_period(&self) -> Duration {
        secs_to_duration(self.target_waypoint_period_s)
    }

    pub fn status_period(&self) -> Duration {
        secs_to_duration(self.status_period_s)
    }

    pub fn operator_period(&self) -> Duration {
        secs_to_duration(self.operator_period_s)
    }

    pub fn battery_wait(&self) -> Duration {
        secs_to_duration(self.battery_wait_s)
    }

    pub fn mocap_connect_timeout(&self) -> Duration {
        secs_to_duration(self.mocap_connect_timeout_s)
    }

    pub fn arm_confirm_timeout(&self) -> Duration {
        secs_to_duration(self.arm_confirm_timeout_s)
    }
}

impl Default for BodyIds {
    fn default() -> Self {
        Self {
            vehicle: 5,
            target: 1,
        }
    }
}

impl Default for TaskParams {
    fn default() -> Self {
        Self {
            position_feed_period_s: 0.05,
            target_waypoint_period_s: 1.0,
            status_period_s: 2.0,
            operator_period_s: 0.1,
            battery_wait_s: 0.05,
            mocap_connect_timeout_s: 10.0,
            arm_confirm_timeout_s: 10.0,
        }
    }
}

impl Default for FollowParams {
    fn default() -> Self {
        Self {
            behind_m: 1.0,
            above_m: 1.0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Check every named value is finite and strictly positive.
pub(crate) fn check_positive(values: &[(&'static str, f64)]) -> Result<(), ParamsError> {
    for &(name, v) in values {
        if !(v.is_finite() && v > 0.0) {
            return Err(ParamsError::NotPositive(name, v));
        }
    }

    Ok(())
}
