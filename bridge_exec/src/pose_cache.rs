//! # Pose Cache
//!
//! Latest tracked pose of every rigid body seen by the motion capture client. The cache is
//! written only from the capture callback and read by every periodic task, so all entries sit
//! behind a single reader/writer lock and are always read and written as a whole.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use nalgebra::{Quaternion, Vector3};
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, Instant},
};

use comms_if::eqpt::mocap::{BodyId, RigidBodyFrame};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Every this many updates of a body a debug message is logged.
const LOG_EVERY_N_UPDATES: u64 = 1000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The latest observation of one rigid body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPose {
    /// Position in the tracking frame.
    ///
    /// Units: meters
    pub position_m: Vector3<f64>,

    /// Orientation in the tracking frame.
    pub orientation: Quaternion<f64>,

    /// Number of updates received for this body
    pub count: u64,

    /// When the last update was received
    pub last_update: Instant,
}

/// Summary of a body for status reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyStatus {
    pub present: bool,
    pub count: u64,
    pub position_m: Option<Vector3<f64>>,
    pub orientation: Option<Quaternion<f64>>,
}

/// Thread safe store of the latest pose of each rigid body.
#[derive(Debug, Default)]
pub struct PoseCache {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    bodies: HashMap<BodyId, TrackedPose>,

    last_rx_any: Option<Instant>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PoseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new observation of `id` received now.
    pub fn update(&self, id: BodyId, position_m: Vector3<f64>, orientation: Quaternion<f64>) {
        self.update_at(id, position_m, orientation, Instant::now())
    }

    /// Record a frame from the mocap gateway, received now.
    pub fn update_from_frame(&self, frame: &RigidBodyFrame) {
        let [x, y, z, w] = frame.orientation;
        self.update(
            frame.id,
            Vector3::from(frame.position),
            Quaternion::new(w, x, y, z),
        )
    }

    /// Record a new observation of `id` received at `time`.
    pub fn update_at(
        &self,
        id: BodyId,
        position_m: Vector3<f64>,
        orientation: Quaternion<f64>,
        time: Instant,
    ) {
        let count = {
            let mut inner = self.write();

            let entry = inner.bodies.entry(id).or_insert(TrackedPose {
                position_m,
                orientation,
                count: 0,
                last_update: time,
            });
            entry.position_m = position_m;
            entry.orientation = orientation;
            entry.count += 1;
            entry.last_update = time;

            let count = entry.count;
            inner.last_rx_any = Some(time);

            count
        };

        if count == 1 {
            info!(
                "First observation of rigid body {} at ({:.3}, {:.3}, {:.3})",
                id, position_m.x, position_m.y, position_m.z
            );
        } else if count % LOG_EVERY_N_UPDATES == 0 {
            debug!("Rigid body {} updated {} times", id, count);
        }
    }

    /// Copy of the latest pose of `id`.
    pub fn get(&self, id: BodyId) -> Option<TrackedPose> {
        self.read().bodies.get(&id).copied()
    }

    pub fn has(&self, id: BodyId) -> bool {
        self.read().bodies.contains_key(&id)
    }

    /// True if `id` has not been updated within `timeout`, or has never been seen.
    pub fn is_stale(&self, id: BodyId, timeout: Duration) -> bool {
        self.is_stale_at(id, timeout, Instant::now())
    }

    /// As [`PoseCache::is_stale`] evaluated at `now`.
    pub fn is_stale_at(&self, id: BodyId, timeout: Duration, now: Instant) -> bool {
        match self.age_at(id, now) {
            Some(age) => age > timeout,
            None => true,
        }
    }

    /// Time since the last update of `id`.
    pub fn age_at(&self, id: BodyId, now: Instant) -> Option<Duration> {
        self.read()
            .bodies
            .get(&id)
            .map(|p| now.saturating_duration_since(p.last_update))
    }

    pub fn snapshot_status(&self, id: BodyId) -> BodyStatus {
        match self.get(id) {
            Some(p) => BodyStatus {
                present: true,
                count: p.count,
                position_m: Some(p.position_m),
                orientation: Some(p.orientation),
            },
            None => BodyStatus {
                present: false,
                count: 0,
                position_m: None,
                orientation: None,
            },
        }
    }

    /// Ids of all bodies seen so far, in ascending order.
    pub fn body_ids(&self) -> Vec<BodyId> {
        let mut ids: Vec<BodyId> = self.read().bodies.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Sum of the update counts of all bodies.
    pub fn total_updates(&self) -> u64 {
        self.read().bodies.values().map(|p| p.count).sum()
    }

    /// True if any body was updated within `timeout`.
    pub fn is_receiving_data(&self, timeout: Duration) -> bool {
        match self.read().last_rx_any {
            Some(t) => t.elapsed() <= timeout,
            None => false,
        }
    }

    // A panicking writer can't leave an entry half written, so poisoning is ignored
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
