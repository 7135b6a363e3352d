//! # Frame Transforms
//!
//! Conversion of tracked poses from the motion capture (tracking) frame into the flight
//! controller's local navigation (NED) frame.
//!
//! The tracking frame is East-North-Up as configured in the capture software, the navigation
//! frame is North-East-Down. The two are related by a fixed rotation of 180 degrees about the
//! axis half way between tracking X and tracking Y, which swaps X and Y and flips Z.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use conquer_once::Lazy;
use nalgebra::{Matrix3, Quaternion, Vector3};
use std::f64::consts::FRAC_PI_2;

use crate::pose_cache::TrackedPose;
use util::maths::saturate;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Waypoint returned for malformed input, two meters above the navigation origin (NED).
pub const INVALID_WAYPOINT_NED: [f64; 3] = [0.0, 0.0, -2.0];

/// Allowed deviation of the quaternion norm from one.
pub const QUATERNION_NORM_TOLERANCE: f64 = 1e-3;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Rotation from the tracking frame into the navigation frame.
static TRACKING_TO_NAV: Lazy<Matrix3<f64>> = Lazy::new(|| {
    let h = std::f64::consts::FRAC_1_SQRT_2;
    quaternion_to_rotation_matrix(&Quaternion::new(0.0, h, h, 0.0))
});

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Vehicle pose as sent to the flight controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationEstimate {
    /// Position in the navigation frame.
    ///
    /// Units: meters
    pub position_m: Vector3<f64>,

    /// Units: radians
    pub roll: f64,

    /// Units: radians
    pub pitch: f64,

    /// Units: radians
    pub yaw: f64,
}

/// A position behind and above a moving target, in the navigation frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeWaypoint {
    /// Units: meters
    pub position_m: Vector3<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Outcome of a relative waypoint computation.
///
/// Malformed input never panics, instead the `Invalid` variant is returned carrying the
/// [`INVALID_WAYPOINT_NED`] fallback. Only `Valid` waypoints may be flown.
#[derive(Debug, Clone, PartialEq)]
pub enum WaypointResult {
    Valid(RelativeWaypoint),
    Invalid {
        fallback: RelativeWaypoint,
        reason: InvalidInput,
    },
}

/// Reasons a waypoint could not be computed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidInput {
    #[error("Target position is not finite: {0:?}")]
    NonFinitePosition([f64; 3]),

    #[error("Target orientation is not finite")]
    NonFiniteOrientation,

    #[error("Target orientation is not a unit quaternion (norm = {0})")]
    NonUnitQuaternion(f64),

    #[error("Waypoint offsets are not finite (behind = {behind}, above = {above})")]
    NonFiniteOffset { behind: f64, above: f64 },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NavigationEstimate {
    /// Build the estimate for a tracked pose.
    ///
    /// The Euler angles are those of the raw tracking quaternion, the flight controller expects
    /// them in this form.
    pub fn from_pose(pose: &TrackedPose) -> Self {
        let q = &pose.orientation;
        let (roll, pitch, yaw) = quaternion_to_euler(q.i, q.j, q.k, q.w);

        Self {
            position_m: tracking_to_navigation(&pose.position_m),
            roll,
            pitch,
            yaw,
        }
    }
}

impl WaypointResult {
    /// The waypoint if it is valid.
    pub fn valid(&self) -> Option<&RelativeWaypoint> {
        match self {
            WaypointResult::Valid(wp) => Some(wp),
            WaypointResult::Invalid { .. } => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid().is_some()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Rotation matrix of the quaternion `q`.
///
/// No normalisation is performed. The diagonal terms are `2w^2 + 2v^2 - 1`, so the result is
/// `|q|^2 R + (|q|^2 - 1) I` and is only a rotation for a unit `q`.
pub fn quaternion_to_rotation_matrix(q: &Quaternion<f64>) -> Matrix3<f64> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);

    Matrix3::new(
        2.0 * (w * w + x * x) - 1.0,
        2.0 * (x * y - w * z),
        2.0 * (x * z + w * y),
        2.0 * (x * y + w * z),
        2.0 * (w * w + y * y) - 1.0,
        2.0 * (y * z - w * x),
        2.0 * (x * z - w * y),
        2.0 * (y * z + w * x),
        2.0 * (w * w + z * z) - 1.0,
    )
}

/// Rotate a tracking frame position into the navigation frame, `(x, y, z) -> (y, x, -z)`.
pub fn tracking_to_navigation(position: &Vector3<f64>) -> Vector3<f64> {
    *TRACKING_TO_NAV * position
}

/// Roll, pitch and yaw (ZYX convention) of a quaternion, in radians.
///
/// Pitch saturates at +/- pi/2 when the quaternion is at (or numerically past) the gimbal lock
/// singularity, no domain error is produced.
pub fn quaternion_to_euler(qx: f64, qy: f64, qz: f64, qw: f64) -> (f64, f64, f64) {
    let sinr_cosp = 2.0 * (qw * qx + qy * qz);
    let cosr_cosp = 1.0 - 2.0 * (qx * qx + qy * qy);
    let roll = sinr_cosp.atan2(cosr_cosp);

    let sinp = 2.0 * (qw * qy - qz * qx);
    let pitch = if sinp.abs() >= 1.0 {
        saturate(sinp, 1.0).signum() * FRAC_PI_2
    } else {
        sinp.asin()
    };

    let siny_cosp = 2.0 * (qw * qz + qx * qy);
    let cosy_cosp = 1.0 - 2.0 * (qy * qy + qz * qz);
    let yaw = siny_cosp.atan2(cosy_cosp);

    (roll, pitch, yaw)
}

/// Waypoint `behind` meters behind and `above` meters above the target.
///
/// "Behind" is taken along the target's heading, which is the yaw of its tracking orientation.
pub fn relative_waypoint(
    target_position: &Vector3<f64>,
    target_orientation: &Quaternion<f64>,
    behind: f64,
    above: f64,
) -> WaypointResult {
    if let Err(reason) = check_input(target_position, target_orientation, behind, above) {
        return WaypointResult::Invalid {
            fallback: RelativeWaypoint {
                position_m: Vector3::from(INVALID_WAYPOINT_NED),
            },
            reason,
        };
    }

    let nav = tracking_to_navigation(target_position);

    let q = target_orientation;
    let (_, _, yaw) = quaternion_to_euler(q.i, q.j, q.k, q.w);

    let offset = Vector3::new(-behind * yaw.cos(), -behind * yaw.sin(), -above);

    WaypointResult::Valid(RelativeWaypoint {
        position_m: nav + offset,
    })
}

fn check_input(
    position: &Vector3<f64>,
    orientation: &Quaternion<f64>,
    behind: f64,
    above: f64,
) -> Result<(), InvalidInput> {
    if !position.iter().all(|v| v.is_finite()) {
        return Err(InvalidInput::NonFinitePosition([
            position.x, position.y, position.z,
        ]));
    }

    if !orientation.coords.iter().all(|v| v.is_finite()) {
        return Err(InvalidInput::NonFiniteOrientation);
    }

    let norm = orientation.norm();
    if (norm - 1.0).abs() > QUATERNION_NORM_TOLERANCE {
        return Err(InvalidInput::NonUnitQuaternion(norm));
    }

    if !behind.is_finite() || !above.is_finite() {
        return Err(InvalidInput::NonFiniteOffset { behind, above });
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::UnitQuaternion;
    use std::f64::consts::PI;
    use std::time::Instant;

    const EPS: f64 = 1e-9;

    fn assert_vec_eq(a: &Vector3<f64>, b: &Vector3<f64>) {
        assert!((a - b).norm() < EPS, "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_tracking_to_navigation() {
        assert_vec_eq(
            &tracking_to_navigation(&Vector3::new(1.0, 2.0, 3.0)),
            &Vector3::new(2.0, 1.0, -3.0),
        );
        assert_vec_eq(
            &tracking_to_navigation(&Vector3::new(0.0, 2.0, 1.0)),
            &Vector3::new(2.0, 0.0, -1.0),
        );

        // Norm preserving
        for v in &[
            Vector3::new(0.3, -1.2, 5.0),
            Vector3::new(-10.0, 0.0, 0.01),
            Vector3::new(1e3, 2e3, -3e3),
        ] {
            let n = tracking_to_navigation(v);
            assert!((n.norm() - v.norm()).abs() < EPS * v.norm().max(1.0));
        }
    }

    #[test]
    fn test_rotation_matrix() {
        let h = std::f64::consts::FRAC_1_SQRT_2;
        let m = quaternion_to_rotation_matrix(&Quaternion::new(0.0, h, h, 0.0));
        let expected = Matrix3::new(0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, -1.0);
        assert!((m - expected).norm() < EPS);

        // Matches nalgebra for an arbitrary unit quaternion
        let uq = UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1);
        let m = quaternion_to_rotation_matrix(uq.quaternion());
        assert!((m - uq.to_rotation_matrix().into_inner()).norm() < EPS);

        // Non-unit input is not a rotation, including scalar-only quaternions
        for q in &[
            Quaternion::new(2.0, 0.0, 0.0, 0.0),
            Quaternion::new(0.5, 0.5, 0.0, 0.0),
            Quaternion::new(0.0, 1.0, 1.0, 0.0),
        ] {
            let m = quaternion_to_rotation_matrix(q);
            assert!(
                (m * m.transpose() - Matrix3::identity()).norm() > 0.1,
                "{:?} gave an orthogonal matrix",
                q
            );
        }
        let m = quaternion_to_rotation_matrix(&Quaternion::new(2.0, 0.0, 0.0, 0.0));
        assert!((m - Matrix3::identity() * 7.0).norm() < EPS);
    }

    #[test]
    fn test_euler_round_trip() {
        let angles = [-3.0, -1.5, -0.7, 0.0, 0.2, 1.0, 1.5, 3.0];
        for &roll in &angles {
            for &pitch in &[-1.5, -0.9, 0.0, 0.4, 1.5] {
                for &yaw in &angles {
                    let q = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
                    let q = q.quaternion();
                    let (r, p, y) = quaternion_to_euler(q.i, q.j, q.k, q.w);
                    assert!((r - roll).abs() < EPS, "roll {} != {}", r, roll);
                    assert!((p - pitch).abs() < EPS, "pitch {} != {}", p, pitch);
                    assert!((y - yaw).abs() < EPS, "yaw {} != {}", y, yaw);
                }
            }
        }
    }

    #[test]
    fn test_euler_pitch_singularity() {
        // Exactly at gimbal lock only pitch is well defined
        let q = UnitQuaternion::from_euler_angles(0.4, PI / 2.0, -0.3);
        let q = q.quaternion();
        let (r, p, y) = quaternion_to_euler(q.i, q.j, q.k, q.w);
        assert!((p - PI / 2.0).abs() < 1e-6);
        assert!(r.is_finite() && y.is_finite());

        // Argument of exactly one is clamped
        let (_, p, _) = quaternion_to_euler(0.0, 0.5, 0.0, 1.0);
        assert_eq!(p, FRAC_PI_2);
        let (_, p, _) = quaternion_to_euler(0.0, -0.5, 0.0, 1.0);
        assert_eq!(p, -FRAC_PI_2);

        // Argument beyond one saturates with its sign
        let (_, p, _) = quaternion_to_euler(0.0, 1.0, 0.0, 1.0);
        assert_eq!(p, FRAC_PI_2);
        let (_, p, _) = quaternion_to_euler(0.0, -1.0, 0.0, 1.0);
        assert_eq!(p, -FRAC_PI_2);

        // Argument just below one is not clamped
        let (_, p, _) = quaternion_to_euler(0.0, 0.7, 0.0, 0.7);
        assert!((p - 0.98f64.asin()).abs() < EPS);
        assert!(p < FRAC_PI_2);
    }

    #[test]
    fn test_relative_waypoint() {
        // Target at nav (2, 0, -1) facing north
        let wp = relative_waypoint(
            &Vector3::new(0.0, 2.0, 1.0),
            &Quaternion::new(1.0, 0.0, 0.0, 0.0),
            1.0,
            1.0,
        );
        assert_vec_eq(&wp.valid().unwrap().position_m, &Vector3::new(1.0, 0.0, -2.0));

        // Facing east the waypoint moves west of the target
        let q = UnitQuaternion::from_euler_angles(0.0, 0.0, PI / 2.0);
        let wp = relative_waypoint(&Vector3::new(0.0, 2.0, 1.0), q.quaternion(), 1.0, 0.5);
        assert_vec_eq(&wp.valid().unwrap().position_m, &Vector3::new(2.0, -1.0, -1.5));
    }

    #[test]
    fn test_relative_waypoint_invalid() {
        let identity = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        let cases = vec![
            (Vector3::new(f64::NAN, 0.0, 0.0), identity),
            (Vector3::new(0.0, f64::INFINITY, 0.0), identity),
            (Vector3::zeros(), Quaternion::new(1.0, f64::NAN, 0.0, 0.0)),
            (Vector3::zeros(), Quaternion::new(1.0, 0.0, 0.0, 0.1)),
            (Vector3::zeros(), Quaternion::new(0.0, 0.0, 0.0, 0.0)),
        ];

        for (p, q) in cases {
            match relative_waypoint(&p, &q, 1.0, 1.0) {
                WaypointResult::Invalid { fallback, .. } => {
                    assert_eq!(fallback.position_m, Vector3::from(INVALID_WAYPOINT_NED))
                }
                r => panic!("Expected invalid waypoint for {:?} {:?}, got {:?}", p, q, r),
            }
        }

        assert!(!relative_waypoint(&Vector3::zeros(), &identity, f64::NAN, 1.0).is_valid());

        // Within tolerance of unit length is fine
        let q = Quaternion::new(1.0005, 0.0, 0.0, 0.0);
        assert!(relative_waypoint(&Vector3::zeros(), &q, 1.0, 1.0).is_valid());
    }

    #[test]
    fn test_navigation_estimate() {
        let q = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let pose = TrackedPose {
            position_m: Vector3::new(1.0, 2.0, 3.0),
            orientation: *q.quaternion(),
            count: 1,
            last_update: Instant::now(),
        };

        let est = NavigationEstimate::from_pose(&pose);
        assert_vec_eq(&est.position_m, &Vector3::new(2.0, 1.0, -3.0));
        assert!((est.roll - 0.1).abs() < EPS);
        assert!((est.pitch - 0.2).abs() < EPS);
        assert!((est.yaw - 0.3).abs() < EPS);
    }
}
