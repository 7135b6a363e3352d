//! Position feed task, streams the vehicle's pose to the flight controller.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use comms_if::eqpt::mocap::BodyId;

use super::{TaskError, Tick};
use crate::{cmd_chan::CommandChannel, frame::NavigationEstimate, pose_cache::PoseCache};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const REPORT_INTERVAL: Duration = Duration::from_secs(10);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct PositionFeed {
    cache: Arc<PoseCache>,

    chan: Arc<CommandChannel>,

    vehicle_id: BodyId,

    num_sent: u64,

    last_report: Instant,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PositionFeed {
    pub fn new(cache: Arc<PoseCache>, chan: Arc<CommandChannel>, vehicle_id: BodyId) -> Self {
        Self {
            cache,
            chan,
            vehicle_id,
            num_sent: 0,
            last_report: Instant::now(),
        }
    }
}

impl Tick for PositionFeed {
    fn name(&self) -> &'static str {
        "position_feed"
    }

    fn tick(&mut self) -> Result<(), TaskError> {
        // No pose yet, the supervisor deals with absence
        let pose = match self.cache.get(self.vehicle_id) {
            Some(p) => p,
            None => return Ok(()),
        };

        self.chan
            .send_navigation_estimate(&NavigationEstimate::from_pose(&pose))?;
        self.num_sent += 1;

        if self.last_report.elapsed() >= REPORT_INTERVAL {
            info!("Position feed: {} estimates sent", self.num_sent);
            self.last_report = Instant::now();
        }

        Ok(())
    }
}
