//! Safety state and escalation phases

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fmt, time::Instant};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything the supervisor knows about the flight.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyState {
    pub phase: SafetyPhase,

    /// Last known battery charge
    ///
    /// Units: percent
    pub battery_pct: Option<f64>,

    pub last_vehicle_seen: Option<Instant>,

    pub last_target_seen: Option<Instant>,

    /// Start of the current DEGRADED period.
    pub degraded_since: Option<Instant>,

    /// Set on entry to TERMINATED.
    pub cause: Option<TerminationCause>,

    /// Number of implausible vehicle position jumps seen.
    pub position_jumps: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyPhase {
    Startup,
    Precheck,
    Nominal,
    Degraded,
    Emergency,
    Terminated,
}

/// Why an emergency landing was triggered.
#[derive(Debug, Clone, PartialEq)]
pub enum EmergencyReason {
    OperatorAbort(String),

    /// Remaining charge, percent
    BatteryCritical(f64),

    /// Age of the last vehicle pose, seconds
    PositionLost(f64),

    /// Age of the last target pose, seconds
    TargetLost(f64),
}

/// Why the flight ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationCause {
    StartupTimeout,
    PrecheckFailed(String),
    Emergency(EmergencyReason),
    FlightComplete,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SafetyPhase {
    /// Check whether `self -> to` is a legal transition.
    ///
    /// Phases only move forward, the exception being NOMINAL and DEGRADED which may alternate.
    pub fn can_transition_to(&self, to: SafetyPhase) -> bool {
        use SafetyPhase::*;

        match (self, to) {
            (Startup, Precheck) | (Startup, Terminated) => true,
            (Precheck, Nominal) | (Precheck, Terminated) => true,
            (Nominal, Degraded) | (Nominal, Emergency) | (Nominal, Terminated) => true,
            (Degraded, Nominal) | (Degraded, Emergency) | (Degraded, Terminated) => true,
            (Emergency, Terminated) => true,
            _ => false,
        }
    }

    /// True while the vehicle may be flying.
    pub fn is_flight(&self) -> bool {
        matches!(self, SafetyPhase::Nominal | SafetyPhase::Degraded)
    }
}

impl fmt::Display for SafetyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyPhase::Startup => "STARTUP",
            SafetyPhase::Precheck => "PRECHECK",
            SafetyPhase::Nominal => "NOMINAL",
            SafetyPhase::Degraded => "DEGRADED",
            SafetyPhase::Emergency => "EMERGENCY",
            SafetyPhase::Terminated => "TERMINATED",
        };

        write!(f, "{}", s)
    }
}

impl fmt::Display for EmergencyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmergencyReason::OperatorAbort(r) => write!(f, "Operator abort: {}", r),
            EmergencyReason::BatteryCritical(pct) => write!(f, "Battery critical ({:.0}%)", pct),
            EmergencyReason::PositionLost(age) => {
                write!(f, "Vehicle position lost (no update for {:.2} s)", age)
            }
            EmergencyReason::TargetLost(age) => {
                write!(f, "Target lost (no update for {:.2} s)", age)
            }
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCause::StartupTimeout => {
                write!(f, "Vehicle not seen by the tracking system before the startup timeout")
            }
            TerminationCause::PrecheckFailed(r) => write!(f, "Pre-flight check failed: {}", r),
            TerminationCause::Emergency(r) => write!(f, "Emergency landing: {}", r),
            TerminationCause::FlightComplete => write!(f, "Flight complete"),
        }
    }
}

impl Default for SafetyState {
    fn default() -> Self {
        Self {
            phase: SafetyPhase::Startup,
            battery_pct: None,
            last_vehicle_seen: None,
            last_target_seen: None,
            degraded_since: None,
            cause: None,
            position_jumps: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use SafetyPhase::*;

    #[test]
    fn test_transitions() {
        assert!(Startup.can_transition_to(Precheck));
        assert!(Nominal.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Nominal));
        assert!(Emergency.can_transition_to(Terminated));

        // No going back
        assert!(!Precheck.can_transition_to(Startup));
        assert!(!Nominal.can_transition_to(Precheck));
        assert!(!Emergency.can_transition_to(Nominal));
        assert!(!Startup.can_transition_to(Emergency));

        // Terminated is absorbing
        for &p in &[Startup, Precheck, Nominal, Degraded, Emergency, Terminated] {
            assert!(!Terminated.can_transition_to(p));
        }
    }

    #[test]
    fn test_reasons() {
        let cause = TerminationCause::Emergency(EmergencyReason::OperatorAbort(
            "Arming failed".into(),
        ));
        assert_eq!(
            cause.to_string(),
            "Emergency landing: Operator abort: Arming failed"
        );
        assert_eq!(
            EmergencyReason::BatteryCritical(14.0).to_string(),
            "Battery critical (14%)"
        );
    }
}
