//! # Equipment Interface
//!
//! This module defines the interface structures which are exchanged with the equipment gateways.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod autopilot;
pub mod mocap;
