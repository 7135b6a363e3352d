//! Safety thresholds

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use std::time::Duration;

use util::time::secs_to_duration;

use crate::params::{check_positive, ParamsError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Thresholds used by the safety supervisor.
///
/// Altitudes are heights above the navigation origin, i.e. `-z` in the navigation frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyParams {
    /// Units: meters
    pub max_altitude_m: f64,

    /// Units: meters
    pub min_altitude_m: f64,

    /// Vehicle pose age at which the flight is degraded.
    ///
    /// Units: seconds
    pub position_stale_s: f64,

    /// Vehicle pose age at which the vehicle is considered lost.
    ///
    /// Units: seconds
    pub position_timeout_s: f64,

    /// Largest believable movement between two observations.
    ///
    /// Units: meters
    pub max_position_jump_m: f64,

    /// Units: seconds
    pub target_timeout_s: f64,

    /// Units: percent
    pub battery_warning_pct: f64,

    /// Units: percent
    pub battery_critical_pct: f64,

    /// Units: seconds
    pub startup_timeout_s: f64,

    pub precheck_samples: usize,

    /// Units: seconds
    pub precheck_sample_period_s: f64,

    /// Fraction of precheck samples which must have a fresh pose.
    pub precheck_pass_fraction: f64,

    /// Units: seconds
    pub monitor_period_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SafetyParams {
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        check_positive(&[
            ("safety.max_altitude_m", self.max_altitude_m),
            ("safety.position_stale_s", self.position_stale_s),
            ("safety.position_timeout_s", self.position_timeout_s),
            ("safety.max_position_jump_m", self.max_position_jump_m),
            ("safety.target_timeout_s", self.target_timeout_s),
            ("safety.battery_warning_pct", self.battery_warning_pct),
            ("safety.battery_critical_pct", self.battery_critical_pct),
            ("safety.startup_timeout_s", self.startup_timeout_s),
            ("safety.precheck_sample_period_s", self.precheck_sample_period_s),
            ("safety.monitor_period_s", self.monitor_period_s),
        ])?;

        if !(self.min_altitude_m >= 0.0) {
            return Err(ParamsError::NotPositive(
                "safety.min_altitude_m",
                self.min_altitude_m,
            ));
        }

        if self.position_stale_s > self.position_timeout_s {
            return Err(ParamsError::StaleAfterTimeout {
                stale: self.position_stale_s,
                timeout: self.position_timeout_s,
            });
        }

        if self.battery_critical_pct >= self.battery_warning_pct {
            return Err(ParamsError::CriticalNotBelowWarning {
                critical: self.battery_critical_pct,
                warning: self.battery_warning_pct,
            });
        }

        if self.min_altitude_m >= self.max_altitude_m {
            return Err(ParamsError::MinNotBelowMax {
                min: self.min_altitude_m,
                max: self.max_altitude_m,
            });
        }

        if !(self.precheck_pass_fraction > 0.0 && self.precheck_pass_fraction <= 1.0) {
            return Err(ParamsError::InvalidPassFraction(
                self.precheck_pass_fraction,
            ));
        }

        if self.precheck_samples == 0 {
            return Err(ParamsError::NoPrecheckSamples);
        }

        Ok(())
    }

    /// Number of fresh precheck samples needed to pass.
    pub fn required_precheck_passes(&self) -> usize {
        (self.precheck_pass_fraction * self.precheck_samples as f64).ceil() as usize
    }

    pub fn position_stale(&self) -> Duration {
        secs_to_duration(self.position_stale_s)
    }

    pub fn position_timeout(&self) -> Duration {
        secs_to_duration(self.position_timeout_s)
    }

    pub fn target_timeout(&self) -> Duration {
        secs_to_duration(self.target_timeout_s)
    }

    pub fn startup_timeout(&self) -> Duration {
        secs_to_duration(self.startup_timeout_s)
    }

    pub fn precheck_sample_period(&self) -> Duration {
        secs_to_duration(self.precheck_sample_period_s)
    }

    pub fn monitor_period(&self) -> Duration {
        secs_to_duration(self.monitor_period_s)
    }
}

impl Default for SafetyParams {
    fn default() -> Self {
        Self {
            max_altitude_m: 1.0,
            min_altitude_m: 0.2,
            position_stale_s: 0.2,
            position_timeout_s: 0.5,
            max_position_jump_m: 0.5,
            target_timeout_s: 10.0,
            battery_warning_pct: 25.0,
            battery_critical_pct: 15.0,
            startup_timeout_s: 30.0,
            precheck_samples: 50,
            precheck_sample_period_s: 0.1,
            precheck_pass_fraction: 0.8,
            monitor_period_s: 0.5,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let params = SafetyParams::default();
        assert_eq!(params.are_valid(), Ok(()));
        assert_eq!(params.required_precheck_passes(), 40);
        assert_eq!(params.monitor_period(), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid() {
        let params = SafetyParams {
            position_stale_s: 0.6,
            ..Default::default()
        };
        assert!(matches!(
            params.are_valid(),
            Err(ParamsError::StaleAfterTimeout { .. })
        ));

        let params = SafetyParams {
            battery_critical_pct: 25.0,
            ..Default::default()
        };
        assert!(matches!(
            params.are_valid(),
            Err(ParamsError::CriticalNotBelowWarning { .. })
        ));

        let params = SafetyParams {
            min_altitude_m: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            params.are_valid(),
            Err(ParamsError::MinNotBelowMax { .. })
        ));

        let params = SafetyParams {
            precheck_pass_fraction: 1.5,
            ..Default::default()
        };
        assert_eq!(
            params.are_valid(),
            Err(ParamsError::InvalidPassFraction(1.5))
        );

        let params = SafetyParams {
            monitor_period_s: 0.0,
            ..Default::default()
        };
        assert_eq!(
            params.are_valid(),
            Err(ParamsError::NotPositive("safety.monitor_period_s", 0.0))
        );
    }

    #[test]
    fn test_required_passes_rounds_up() {
        let params = SafetyParams {
            precheck_samples: 7,
            precheck_pass_fraction: 0.5,
            ..Default::default()
        };
        assert_eq!(params.required_precheck_passes(), 4);
    }
}
