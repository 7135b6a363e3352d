//! Target waypoint task, keeps the vehicle's guided waypoint behind and above the target.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use std::sync::Arc;

use comms_if::eqpt::mocap::BodyId;

use super::{TaskError, Tick};
use crate::{
    cmd_chan::CommandChannel,
    frame::{relative_waypoint, WaypointResult},
    params::FollowParams,
    pose_cache::PoseCache,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct TargetWaypoint {
    cache: Arc<PoseCache>,

    chan: Arc<CommandChannel>,

    target_id: BodyId,

    offsets: FollowParams,

    num_sent: u64,

    num_invalid: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TargetWaypoint {
    pub fn new(
        cache: Arc<PoseCache>,
        chan: Arc<CommandChannel>,
        target_id: BodyId,
        offsets: FollowParams,
    ) -> Self {
        Self {
            cache,
            chan,
            target_id,
            offsets,
            num_sent: 0,
            num_invalid: 0,
        }
    }
}

impl Tick for TargetWaypoint {
    fn name(&self) -> &'static str {
        "target_waypoint"
    }

    fn tick(&mut self) -> Result<(), TaskError> {
        let target = match self.cache.get(self.target_id) {
            Some(t) => t,
            None => return Ok(()),
        };

        let wp = relative_waypoint(
            &target.position_m,
            &target.orientation,
            self.offsets.behind_m,
            self.offsets.above_m,
        );

        if self.chan.send_relative_waypoint(&wp)? {
            self.num_sent += 1;
            if let WaypointResult::Valid(wp) = wp {
                debug!(
                    "Waypoint {} sent: ({:.2}, {:.2}, {:.2})",
                    self.num_sent, wp.position_m.x, wp.position_m.y, wp.position_m.z
                );
            }
        } else if let WaypointResult::Invalid { reason, .. } = wp {
            self.num_invalid += 1;
            warn!(
                "Target waypoint not sent ({} invalid so far): {}",
                self.num_invalid, reason
            );
        }

        Ok(())
    }
}
