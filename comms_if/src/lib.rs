//! # Communications interface crate.
//!
//! Provides the interfaces between the bridge and the equipment around it: the motion-capture
//! system, the autopilot, and the operator's ground console.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Operator telecommands
pub mod tc;

/// Message and command definitions for equipment (mocap and autopilot)
pub mod eqpt;

/// Network module
pub mod net;
