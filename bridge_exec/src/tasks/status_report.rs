//! Status report task, periodic read-only diagnostics.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use std::{
    fmt::Write,
    sync::{Arc, PoisonError},
    time::Duration,
};

use comms_if::eqpt::mocap::BodyId;

use super::{TaskError, Tick};
use crate::{
    cmd_chan::CommandChannel, mocap_client::MocapSource, params::BodyIds, pose_cache::PoseCache,
    safety::SafetyView,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Logs a one line summary of the bridge.
///
/// The battery is deliberately not requested here, the reading shown is the supervisor's last
/// known value so this task never waits on the autopilot link.
pub struct StatusReport {
    cache: Arc<PoseCache>,

    mocap: Arc<dyn MocapSource>,

    view: SafetyView,

    chan: Arc<CommandChannel>,

    ids: BodyIds,

    position_timeout: Duration,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StatusReport {
    pub fn new(
        cache: Arc<PoseCache>,
        mocap: Arc<dyn MocapSource>,
        view: SafetyView,
        chan: Arc<CommandChannel>,
        ids: BodyIds,
        position_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            mocap,
            view,
            chan,
            ids,
            position_timeout,
        }
    }

    /// Build the status line.
    pub fn summary(&self) -> String {
        let state = self
            .view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let stats = self.chan.stats();

        let mut s = format!("[{}] mocap ", state.phase);

        let _ = match (self.mocap.connected(), self.mocap.server_info()) {
            (true, Some(info)) => write!(s, "connected to {}", info),
            (true, None) => write!(s, "connected"),
            (false, _) => write!(s, "DISCONNECTED"),
        };
        if !self.cache.is_receiving_data(self.position_timeout) {
            s.push_str(" (no data)");
        }
        let _ = write!(
            s,
            ", tracking {:?} ({} updates)",
            self.cache.body_ids(),
            self.cache.total_updates()
        );

        self.write_body(&mut s, "vehicle", self.ids.vehicle);
        self.write_body(&mut s, "target", self.ids.target);

        let _ = match state.battery_pct {
            Some(pct) => write!(s, ", battery {:.0}%", pct),
            None => write!(s, ", battery unknown"),
        };
        let _ = write!(s, ", commands {} sent {} failed", stats.sent, stats.failed);

        if state.position_jumps > 0 {
            let _ = write!(s, ", {} position jumps", state.position_jumps);
        }

        s
    }

    fn write_body(&self, s: &mut String, label: &str, id: BodyId) {
        let status = self.cache.snapshot_status(id);

        let _ = match status.position_m {
            Some(p) if !self.cache.is_stale(id, self.position_timeout) => write!(
                s,
                ", {} {}: ({:.2}, {:.2}, {:.2}) x{}",
                label, id, p.x, p.y, p.z, status.count
            ),
            Some(_) => write!(s, ", {} {}: STALE x{}", label, id, status.count),
            None => write!(s, ", {} {}: not seen", label, id),
        };
    }
}

impl Tick for StatusReport {
    fn name(&self) -> &'static str {
        "status_report"
    }

    fn tick(&mut self) -> Result<(), TaskError> {
        info!("{}", self.summary());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        safety::{SafetyPhase, SafetyState},
        sim::{SimAutopilot, SimMocap, SimMocapParams},
    };
    use std::sync::RwLock;

    #[test]
    fn test_summary() {
        let (link, handle) = SimAutopilot::new();
        handle.set_battery_pct(50);
        let chan = Arc::new(CommandChannel::new(
            Box::new(link),
            0.2,
            1.0,
            Duration::from_millis(1),
        ));
        let cache = Arc::new(PoseCache::new());
        let cache_clone = cache.clone();
        let mocap = SimMocap::start(
            SimMocapParams {
                target_id: 99,
                ..Default::default()
            },
            move |f| {
                if f.id == 5 {
                    cache_clone.update_from_frame(f)
                }
            },
        )
        .unwrap();

        let view = Arc::new(RwLock::new(SafetyState {
            phase: SafetyPhase::Nominal,
            battery_pct: Some(72.0),
            ..Default::default()
        }));

        let report = StatusReport::new(
            cache,
            Arc::new(mocap),
            view,
            chan,
            BodyIds::default(),
            Duration::from_millis(500),
        );

        std::thread::sleep(Duration::from_millis(50));
        let s = report.summary();

        assert!(s.starts_with("[NOMINAL] mocap connected to SimMocap"), "{}", s);
        assert!(s.contains("tracking [5] ("), "{}", s);
        assert!(s.contains("vehicle 5: (0.00, 0.00, 0.50)"), "{}", s);
        assert!(s.contains("target 1: not seen"), "{}", s);
        assert!(s.contains("battery 72%"), "{}", s);
        assert!(s.contains("commands 0 sent 0 failed"), "{}", s);
    }
}
