//! # Safety Supervision
//!
//! The safety supervisor owns the flight's [`SafetyState`] and is the only component allowed to
//! decide that the flight must end. It is driven by the safety monitor task, which calls
//! [`SafetySupervisor::evaluate`] once per tick.
//!
//! ```text
//! STARTUP --> PRECHECK --> NOMINAL <--> DEGRADED
//!    |            |           |  \        |  \
//!    |            |           |   +-> EMERGENCY --> TERMINATED
//!    +------------+-----------+---------------------->
//! ```

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;
mod state;
mod supervisor;

pub use params::SafetyParams;
pub use state::{EmergencyReason, SafetyPhase, SafetyState, TerminationCause};
pub use supervisor::{SafetyError, SafetySupervisor, SafetyView, SupervisorRequest};
