//! # Telecommand module
//!
//! Telecommands are instructions sent to the bridge by the operator's ground console while a
//! flight is in progress. They are JSON objects tagged by a `"type"` field, for example
//! `{"type": "ABORT", "reason": "vehicle drifting"}`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A telecommand from the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tc {
    /// Abort the flight with an emergency landing.
    Abort {
        #[serde(default)]
        reason: Option<String>,
    },

    /// End the flight with a normal landing.
    Land,

    /// Request the current safety status.
    Status,
}

/// Response sent back to the console for every telecommand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TcResponse {
    /// The TC was accepted
    Ok,

    /// The TC can't be executed in the current state
    CannotExecute(String),

    /// Response to [`Tc::Status`]
    Status(StatusTm),
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum TcParseError {
    #[error("TC contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Summary of the bridge's safety state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusTm {
    /// Name of the current safety phase
    pub phase: String,

    /// Last known battery charge
    pub battery_pct: Option<f64>,

    /// Why the flight ended, if it has
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Tc {
    /// Parse a new TC from a JSON packet
    pub fn from_json(json_str: &str) -> Result<Self, TcParseError> {
        serde_json::from_str(json_str).map_err(TcParseError::InvalidJson)
    }
}
