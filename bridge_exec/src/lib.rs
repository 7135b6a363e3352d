//! # Mocap Bridge library.
//!
//! Bridges an optical motion capture system to a flight controller: tracked poses are converted
//! into the controller's navigation frame and streamed as an external position estimate, while a
//! safety supervisor watches for tracking loss, battery depletion and loss of a followed target.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Autopilot client - sends commands to and receives telemetry from the autopilot gateway
pub mod autopilot_client;

/// Command channel - serialised access to the flight controller
pub mod cmd_chan;

/// Flight sequencing - runs one flight profile from startup to landing
pub mod flight;

/// Frame transforms - tracking frame to navigation frame conversion
pub mod frame;

/// Mocap client - receives rigid body frames from the mocap gateway
pub mod mocap_client;

pub mod params;

/// Pose cache - latest pose of every tracked rigid body
pub mod pose_cache;

/// Safety supervision - escalation state machine
pub mod safety;

/// Simulated autopilot and mocap
pub mod sim;

/// Periodic tasks
pub mod tasks;

/// Telecommand client - receives telecommands from the operator's console
pub mod tc_client;
