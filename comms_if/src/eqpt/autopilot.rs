//! # Autopilot Interface
//!
//! Commands sent to, and telemetry received from, the autopilot gateway. The gateway translates
//! these into MAVLink messages on the serial link to the flight controller, so the variants here
//! map one to one onto the MAVLink messages and commands used:
//!
//! | Variant                          | MAVLink                                   |
//! |----------------------------------|-------------------------------------------|
//! | [`AutopilotCmd::VisionPosition`] | `VISION_POSITION_ESTIMATE`                |
//! | [`AutopilotCmd::SetMode`]        | `SET_MODE` (custom mode)                  |
//! | [`AutopilotCmd::Arm`]            | `MAV_CMD_COMPONENT_ARM_DISARM`            |
//! | [`AutopilotCmd::Takeoff`]        | `MAV_CMD_NAV_TAKEOFF`                     |
//! | [`AutopilotCmd::Land`]           | `MAV_CMD_NAV_LAND`                        |
//! | [`AutopilotCmd::GuidedWaypoint`] | `MISSION_ITEM` with `current = 2`         |
//! | [`AutopilotTm::Heartbeat`]       | `HEARTBEAT`                               |
//! | [`AutopilotTm::Battery`]         | `BATTERY_STATUS`                          |

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Value of `BatteryStatus::voltage_mv` when the autopilot doesn't know the cell voltage.
pub const BATTERY_VOLTAGE_UNKNOWN: u16 = u16::MAX;

/// Value of `BatteryStatus::remaining_pct` when the autopilot doesn't know the charge state.
pub const BATTERY_REMAINING_UNKNOWN: i8 = -1;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Raw battery telemetry as reported by the autopilot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    /// Voltage of the first cell group, or [`BATTERY_VOLTAGE_UNKNOWN`].
    ///
    /// Units: millivolts
    pub voltage_mv: u16,

    /// Remaining charge, or [`BATTERY_REMAINING_UNKNOWN`].
    ///
    /// Units: percent
    pub remaining_pct: i8,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Flight modes of the flight controller that the bridge uses.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightMode {
    /// Manual flight with self-levelling. Also used for "MANUAL".
    Stabilize,

    /// Externally steerable mode accepting guided waypoints
    Guided,

    /// Mission mode
    Auto,

    /// Autonomous landing at the current position
    Land,

    /// Any other custom mode reported by the controller
    Unknown(u32),
}

/// Commands sent to the autopilot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum AutopilotCmd {
    /// External navigation estimate in the local NED frame.
    VisionPosition {
        /// Timestamp (UNIX time)
        ///
        /// Units: microseconds
        time_usec: u64,
        x: f64,
        y: f64,
        z: f64,
        roll: f64,
        pitch: f64,
        yaw: f64,
    },

    /// Change the flight mode
    SetMode(FlightMode),

    /// Arm the motors
    Arm,

    /// Take off to the given altitude above home.
    Takeoff { altitude_m: f64 },

    /// Land at the current position
    Land,

    /// Single guided waypoint in the local NED frame.
    GuidedWaypoint { x: f64, y: f64, z: f64 },
}

/// Telemetry received from the autopilot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum AutopilotTm {
    Heartbeat { armed: bool, custom_mode: u32 },
    Battery(BatteryStatus),
}

/// Errors raised by an [`AutopilotLink`].
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("The link to the autopilot is not connected")]
    NotConnected,

    #[error("Could not send the command to the autopilot: {0}")]
    SendError(String),

    #[error("Could not receive telemetry from the autopilot: {0}")]
    RecvError(String),

    #[error("Could not serialize the command: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the telemetry: {0}")]
    DeserializeError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A link to the flight controller.
///
/// Implementations are not expected to be thread safe, the bridge serialises all access through
/// its command channel. Sends are fire-and-forget, no acknowledgement is waited for.
pub trait AutopilotLink {
    /// Send a single command.
    fn send(&mut self, cmd: &AutopilotCmd) -> Result<(), LinkError>;

    /// Wait at most `timeout` for battery telemetry.
    ///
    /// Returns `Ok(None)` if nothing arrived in time.
    fn recv_battery(&mut self, timeout: Duration) -> Result<Option<BatteryStatus>, LinkError>;

    /// Armed state as last reported by the autopilot.
    fn is_armed(&mut self) -> Result<bool, LinkError>;

    /// Flight mode as last reported by the autopilot.
    fn mode(&mut self) -> Result<FlightMode, LinkError>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FlightMode {
    /// ArduCopter custom mode number for this mode.
    pub fn custom_mode(&self) -> u32 {
        match self {
            FlightMode::Stabilize => 0,
            FlightMode::Auto => 3,
            FlightMode::Guided => 4,
            FlightMode::Land => 9,
            FlightMode::Unknown(m) => *m,
        }
    }

    /// Interpret an ArduCopter custom mode number.
    pub fn from_custom_mode(custom_mode: u32) -> Self {
        match custom_mode {
            0 => FlightMode::Stabilize,
            3 => FlightMode::Auto,
            4 => FlightMode::Guided,
            9 => FlightMode::Land,
            m => FlightMode::Unknown(m),
        }
    }
}

impl std::fmt::Display for FlightMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlightMode::Stabilize => write!(f, "STABILIZE"),
            FlightMode::Guided => write!(f, "GUIDED"),
            FlightMode::Auto => write!(f, "AUTO"),
            FlightMode::Land => write!(f, "LAND"),
            FlightMode::Unknown(m) => write!(f, "UNKNOWN({})", m),
        }
    }
}

impl BatteryStatus {
    /// Cell voltage in volts, or `None` if the autopilot reported it as unknown.
    pub fn voltage_v(&self) -> Option<f64> {
        if self.voltage_mv == BATTERY_VOLTAGE_UNKNOWN {
            None
        } else {
            Some(self.voltage_mv as f64 / 1000.0)
        }
    }

    /// Remaining charge in percent, or `None` if the autopilot reported it as unknown or the
    /// value is outside `[0, 100]`.
    pub fn remaining_pct(&self) -> Option<f64> {
        if (0..=100).contains(&self.remaining_pct) {
            Some(self.remaining_pct as f64)
        } else {
            None
        }
    }
}
