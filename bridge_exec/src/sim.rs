//! # Simulation
//!
//! In-memory stand-ins for the autopilot gateway and the mocap gateway. They allow dry runs of the
//! whole bridge with `--sim` and are used throughout the tests.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use nalgebra::UnitQuaternion;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use comms_if::eqpt::{
    autopilot::{AutopilotCmd, AutopilotLink, BatteryStatus, FlightMode, LinkError},
    mocap::{BodyId, RigidBodyFrame, ServerInfo},
};

use crate::mocap_client::MocapSource;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Simulated autopilot link which records every command it receives.
pub struct SimAutopilot {
    shared: Arc<SimShared>,
}

/// Handle used to inspect and configure a [`SimAutopilot`] after it has been boxed into a
/// command channel.
#[derive(Clone)]
pub struct SimAutopilotHandle {
    shared: Arc<SimShared>,
}

struct SimShared {
    state: Mutex<SimState>,

    in_flight: AtomicBool,

    overlap: AtomicBool,
}

#[derive(Default)]
struct SimState {
    commands: Vec<AutopilotCmd>,
    battery: Option<BatteryStatus>,
    armed: bool,
    mode: Option<FlightMode>,
    refuse_arm: bool,
    fail_sends: bool,
    send_delay: Duration,
}

/// Synthetic mocap source: a vehicle hovering over the origin and a target driving in a circle.
pub struct SimMocap {
    join_handle: Option<thread::JoinHandle<()>>,

    shutdown: Arc<AtomicBool>,

    info: ServerInfo,
}

/// Configuration of a [`SimMocap`].
#[derive(Debug, Clone)]
pub struct SimMocapParams {
    pub vehicle_id: BodyId,

    pub target_id: BodyId,

    /// Time between frames
    pub frame_period: Duration,

    /// Height of the hovering vehicle above the floor.
    ///
    /// Units: meters
    pub hover_height_m: f64,

    /// Units: meters
    pub target_radius_m: f64,

    /// Units: radians/second
    pub target_rate_rads: f64,

    /// Stop publishing the vehicle after this long, to simulate tracking loss.
    pub vehicle_dropout_after: Option<Duration>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimAutopilot {
    /// Create a new simulated link and a handle to it.
    pub fn new() -> (Self, SimAutopilotHandle) {
        let shared = Arc::new(SimShared {
            state: Mutex::new(SimState {
                mode: Some(FlightMode::Stabilize),
                ..Default::default()
            }),
            in_flight: AtomicBool::new(false),
            overlap: AtomicBool::new(false),
        });

        (
            Self {
                shared: shared.clone(),
            },
            SimAutopilotHandle { shared },
        )
    }

    /// Run `f` while flagging the link as busy, recording if another call is already in progress.
    fn exclusive<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        if self.shared.in_flight.swap(true, Ordering::SeqCst) {
            self.shared.overlap.store(true, Ordering::SeqCst);
        }

        let delay = self.shared.lock().send_delay;
        if delay > Duration::from_secs(0) {
            thread::sleep(delay);
        }

        let result = f(&mut self.shared.lock());

        self.shared.in_flight.store(false, Ordering::SeqCst);

        result
    }
}

impl AutopilotLink for SimAutopilot {
    fn send(&mut self, cmd: &AutopilotCmd) -> Result<(), LinkError> {
        self.exclusive(|state| {
            if state.fail_sends {
                return Err(LinkError::SendError("simulated send failure".into()));
            }

            match cmd {
                AutopilotCmd::Arm if !state.refuse_arm => state.armed = true,
                AutopilotCmd::SetMode(m) => state.mode = Some(*m),
                AutopilotCmd::Land => state.mode = Some(FlightMode::Land),
                _ => (),
            }

            state.commands.push(*cmd);
            Ok(())
        })
    }

    fn recv_battery(&mut self, _timeout: Duration) -> Result<Option<BatteryStatus>, LinkError> {
        Ok(self.exclusive(|state| state.battery))
    }

    fn is_armed(&mut self) -> Result<bool, LinkError> {
        Ok(self.exclusive(|state| state.armed))
    }

    fn mode(&mut self) -> Result<FlightMode, LinkError> {
        Ok(self.exclusive(|state| state.mode.unwrap_or(FlightMode::Stabilize)))
    }
}

impl SimShared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimAutopilotHandle {
    /// All commands successfully sent so far.
    pub fn commands(&self) -> Vec<AutopilotCmd> {
        self.shared.lock().commands.clone()
    }

    /// Number of sent commands matching `pred`.
    pub fn count(&self, pred: impl Fn(&AutopilotCmd) -> bool) -> usize {
        self.shared.lock().commands.iter().filter(|c| pred(c)).count()
    }

    pub fn set_battery(&self, battery: Option<BatteryStatus>) {
        self.shared.lock().battery = battery;
    }

    /// Convenience for a battery with a known percentage and a nominal 3S voltage.
    pub fn set_battery_pct(&self, pct: i8) {
        self.set_battery(Some(BatteryStatus {
            voltage_mv: 11_400,
            remaining_pct: pct,
        }))
    }

    /// Ignore arm commands.
    pub fn set_refuse_arm(&self, refuse: bool) {
        self.shared.lock().refuse_arm = refuse;
    }

    /// Fail every send with a link error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.shared.lock().fail_sends = fail;
    }

    /// Time every link call takes.
    pub fn set_send_delay(&self, delay: Duration) {
        self.shared.lock().send_delay = delay;
    }

    /// True if two link calls were ever in progress at the same time.
    pub fn overlap_detected(&self) -> bool {
        self.shared.overlap.load(Ordering::SeqCst)
    }
}

impl Default for SimMocapParams {
    fn default() -> Self {
        Self {
            vehicle_id: 5,
            target_id: 1,
            frame_period: Duration::from_millis(10),
            hover_height_m: 0.5,
            target_radius_m: 1.5,
            target_rate_rads: 0.2,
            vehicle_dropout_after: None,
        }
    }
}

impl SimMocap {
    /// Start publishing frames to `on_frame` from a background thread.
    pub fn start<F>(params: SimMocapParams, mut on_frame: F) -> std::io::Result<Self>
    where
        F: FnMut(&RigidBodyFrame) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let join_handle = thread::Builder::new()
            .name("sim_mocap".into())
            .spawn(move || {
                let start = Instant::now();
                let mut dropped = false;

                while !shutdown_clone.load(Ordering::Relaxed) {
                    let elapsed = start.elapsed();

                    let vehicle_visible = match params.vehicle_dropout_after {
                        Some(d) => elapsed < d,
                        None => true,
                    };
                    if vehicle_visible {
                        on_frame(&vehicle_frame(&params));
                    } else if !dropped {
                        warn!("Simulated loss of vehicle tracking");
                        dropped = true;
                    }

                    on_frame(&target_frame(&params, elapsed.as_secs_f64()));

                    thread::sleep(params.frame_period);
                }
            })?;

        info!("Simulated mocap started");

        Ok(Self {
            join_handle: Some(join_handle),
            shutdown,
            info: ServerInfo {
                name: "SimMocap".into(),
                natnet_version: [4, 0, 0, 0],
            },
        })
    }
}

impl MocapSource for SimMocap {
    fn connected(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }

    fn server_info(&self) -> Option<ServerInfo> {
        Some(self.info.clone())
    }
}

impl Drop for SimMocap {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(jh) = self.join_handle.take() {
            jh.join().ok();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn vehicle_frame(params: &SimMocapParams) -> RigidBodyFrame {
    RigidBodyFrame {
        id: params.vehicle_id,
        position: [0.0, 0.0, params.hover_height_m],
        orientation: [0.0, 0.0, 0.0, 1.0],
    }
}

fn target_frame(params: &SimMocapParams, t: f64) -> RigidBodyFrame {
    let theta = params.target_rate_rads * t;
    let r = params.target_radius_m;

    // Heading is tangent to the circle
    let q = UnitQuaternion::from_euler_angles(0.0, 0.0, theta + std::f64::consts::FRAC_PI_2);
    let q = q.quaternion();

    RigidBodyFrame {
        id: params.target_id,
        position: [r * theta.cos(), r * theta.sin(), 0.0],
        orientation: [q.i, q.j, q.k, q.w],
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pose_cache::PoseCache;

    #[test]
    fn test_sim_autopilot_records() {
        let (mut link, handle) = SimAutopilot::new();

        link.send(&AutopilotCmd::SetMode(FlightMode::Guided)).unwrap();
        link.send(&AutopilotCmd::Arm).unwrap();
        assert!(link.is_armed().unwrap());
        assert_eq!(link.mode().unwrap(), FlightMode::Guided);
        assert_eq!(link.recv_battery(Duration::from_millis(1)).unwrap(), None);

        let (mut link2, handle2) = SimAutopilot::new();
        handle2.set_refuse_arm(true);
        link2.send(&AutopilotCmd::Arm).unwrap();
        assert!(!link2.is_armed().unwrap());

        assert_eq!(handle.count(|c| *c == AutopilotCmd::Arm), 1);
    }

    #[test]
    fn test_sim_mocap_publishes() {
        let cache = Arc::new(PoseCache::new());
        let cache_clone = cache.clone();

        let params = SimMocapParams {
            vehicle_dropout_after: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let mocap = SimMocap::start(params, move |f| cache_clone.update_from_frame(f)).unwrap();

        thread::sleep(Duration::from_millis(200));
        assert!(mocap.connected());
        assert_eq!(mocap.server_info().unwrap().name, "SimMocap");
        drop(mocap);

        let vehicle = cache.get(5).unwrap();
        let target = cache.get(1).unwrap();
        assert_eq!(vehicle.position_m.z, 0.5);
        assert!((target.position_m.norm() - 1.5).abs() < 1e-9);
        assert!((target.orientation.norm() - 1.0).abs() < 1e-9);

        // The vehicle stopped being published after the dropout
        assert!(target.count > vehicle.count);
    }
}
