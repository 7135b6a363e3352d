//! # Flight Sequencing
//!
//! A [`Bridge`] runs one flight from start to finish:
//!
//! 1. Wait for the vehicle to be tracked, then run the pre-flight check.
//! 2. Start the position feed, status report, safety monitor and operator tasks.
//! 3. Depending on the [`FlightProfile`], switch to GUIDED, arm, take off and either hover for a
//!    fixed time or follow the target.
//! 4. Wait until the supervisor ends the flight, then stop and join every task.
//!
//! An [`Interrupt`] taken from the bridge before it runs lets another thread, such as a Ctrl-C
//! handler, end the flight with an emergency landing.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{error, info, warn};
use std::{
    sync::{mpsc::Sender, Arc, Mutex, PoisonError},
    thread::JoinHandle,
    time::{Duration, Instant},
};

use comms_if::eqpt::autopilot::FlightMode;
use util::time::secs_to_duration;

use crate::{
    cmd_chan::{ChannelError, ChannelStats, CommandChannel},
    mocap_client::MocapSource,
    params::BridgeParams,
    pose_cache::PoseCache,
    safety::{
        SafetyError, SafetyState, SafetySupervisor, SafetyView, SupervisorRequest,
        TerminationCause,
    },
    tasks::{
        spawn_periodic, Operator, PositionFeed, SafetyMonitor, StatusReport, StopSignal,
        TargetWaypoint, Tick,
    },
    tc_client::TcClient,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Poll period of the armed state after arming.
const ARM_POLL_PERIOD: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

type TaskHandle = (&'static str, JoinHandle<u64>);

/// Request sender of the supervisor, present only while it is evaluating a flight.
type RequestSlot = Arc<Mutex<Option<Sender<SupervisorRequest>>>>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything a flight needs.
pub struct Bridge {
    params: BridgeParams,

    cache: Arc<PoseCache>,

    chan: Arc<CommandChannel>,

    mocap: Arc<dyn MocapSource>,

    tc_client: Option<TcClient>,

    stop: StopSignal,

    requests: RequestSlot,

    /// Name of a task whose spawn is refused
    #[cfg(test)]
    fail_spawn: Option<&'static str>,
}

/// Ends a flight from outside the bridge.
///
/// While the vehicle may be flying an interrupt is an operator abort, so the supervisor commands
/// an emergency landing. Before the pre-flight check passes, or once the flight is over, it just
/// raises the stop signal.
#[derive(Debug, Clone)]
pub struct Interrupt {
    requests: RequestSlot,

    stop: StopSignal,
}

/// Summary of a finished flight.
#[derive(Debug, Clone)]
pub struct FlightReport {
    pub final_state: SafetyState,

    pub stats: ChannelStats,

    /// Number of ticks each task ran for
    pub task_ticks: Vec<(&'static str, u64)>,

    /// Wall clock duration of the flight
    pub duration: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What the vehicle does once the bridge is running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlightProfile {
    /// Stream the vision feed only, the vehicle is flown by hand
    FeedOnly,

    /// Take off, hover, then land
    Hover { altitude_m: f64, duration_s: f64 },

    /// Take off and follow the target
    FollowTarget { altitude_m: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum FlightError {
    #[error("Flight aborted before takeoff: {0}")]
    Aborted(TerminationCause),

    #[error("Safety supervisor error: {0}")]
    SafetyError(SafetyError),

    #[error("Could not start the {0} task: {1}")]
    SpawnError(&'static str, std::io::Error),

    #[error("The {0} task thread panicked")]
    TaskPanicked(&'static str),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Bridge {
    pub fn new(
        params: BridgeParams,
        cache: Arc<PoseCache>,
        chan: Arc<CommandChannel>,
        mocap: Arc<dyn MocapSource>,
        tc_client: Option<TcClient>,
    ) -> Self {
        Self {
            params,
            cache,
            chan,
            mocap,
            tc_client,
            stop: StopSignal::new(),
            requests: Arc::new(Mutex::new(None)),
            #[cfg(test)]
            fail_spawn: None,
        }
    }

    /// Handle that interrupts this bridge's flight.
    pub fn interrupt(&self) -> Interrupt {
        Interrupt {
            requests: self.requests.clone(),
            stop: self.stop.clone(),
        }
    }

    /// The signal that ends the flight, raising it stops every task.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Fly `profile` to completion.
    ///
    /// Returns `Err(FlightError::Aborted)` if the vehicle never took off because startup or the
    /// pre-flight check failed. Emergencies after that are reported in the
    /// [`FlightReport::final_state`].
    pub fn run(mut self, profile: FlightProfile) -> Result<FlightReport, FlightError> {
        let start = Instant::now();
        info!("Starting flight: {:?}", profile);

        // ---- STARTUP AND PRECHECK ----

        let (mut supervisor, requests) = SafetySupervisor::new(
            self.params.safety.clone(),
            self.params.bodies,
            self.cache.clone(),
            self.chan.clone(),
            self.stop.clone(),
        )
        .map_err(FlightError::SafetyError)?;
        supervisor.set_watch_target(matches!(profile, FlightProfile::FollowTarget { .. }));

        supervisor.wait_for_vehicle().map_err(aborted)?;
        supervisor.precheck().map_err(aborted)?;

        let view = supervisor.view();
        self.set_requests(Some(requests.clone()));

        // ---- TASKS ----

        let mut handles = Vec::new();

        // The vehicle is still on the ground, so a failed start only needs the tasks stopped
        if let Err(e) = self.spawn_tasks(supervisor, &view, &requests, &mut handles) {
            error!("{}", e);
            self.set_requests(None);
            self.stop_tasks(handles);
            return Err(e);
        }

        // ---- PROFILE ----

        match profile {
            FlightProfile::FeedOnly => info!("Feed only, the vehicle will not be armed"),
            FlightProfile::Hover {
                altitude_m,
                duration_s,
            } => {
                if self.take_off(altitude_m, &requests) {
                    info!("Hovering for {:.1} s", duration_s);
                    if !self.stop.wait_timeout(secs_to_duration(duration_s)) {
                        requests.send(SupervisorRequest::Complete).ok();
                    }
                }
            }
            FlightProfile::FollowTarget { altitude_m } => {
                if self.take_off(altitude_m, &requests) {
                    let wp_task = TargetWaypoint::new(
                        self.cache.clone(),
                        self.chan.clone(),
                        self.params.bodies.target,
                        self.params.follow,
                    );
                    match self.spawn(wp_task, self.params.tasks.target_waypoint_period()) {
                        Ok(handle) => handles.push(handle),
                        Err(e) => {
                            error!("{}", e);
                            requests.send(SupervisorRequest::Abort(e.to_string())).ok();
                        }
                    }
                }
            }
        }

        // ---- SHUTDOWN ----

        self.stop.wait();
        self.set_requests(None);
        info!("Stop signal raised, joining tasks");

        let mut task_ticks = Vec::new();
        for (name, jh) in handles {
            let ticks = jh.join().map_err(|_| FlightError::TaskPanicked(name))?;
            task_ticks.push((name, ticks));
        }

        let final_state = view.read().unwrap_or_else(PoisonError::into_inner).clone();

        Ok(FlightReport {
            final_state,
            stats: self.chan.stats(),
            task_ticks,
            duration: start.elapsed(),
        })
    }

    /// GUIDED, arm, confirm and take off. Returns `false` if the sequence failed, in which case
    /// an abort has been requested.
    fn take_off(&self, altitude_m: f64, requests: &Sender<SupervisorRequest>) -> bool {
        let result = self.arm_and_confirm().and_then(|armed| {
            if armed {
                self.chan.takeoff(altitude_m).map(Some)
            } else {
                Ok(None)
            }
        });

        let reason = match result {
            Ok(Some(alt)) => {
                info!("Taking off to {:.2} m", alt);
                return true;
            }
            // Stop raised while waiting, nothing more to do
            Ok(None) if self.stop.is_raised() => return false,
            Ok(None) => "Arming failed".to_string(),
            Err(e) => format!("Takeoff sequence failed: {}", e),
        };

        error!("{}", reason);
        requests.send(SupervisorRequest::Abort(reason)).ok();

        false
    }

    /// Returns `Ok(true)` once the vehicle reports armed, `Ok(false)` on timeout or stop.
    fn arm_and_confirm(&self) -> Result<bool, ChannelError> {
        self.chan.set_mode(FlightMode::Guided)?;
        self.chan.arm()?;

        let timeout = self.params.tasks.arm_confirm_timeout();
        let start = Instant::now();

        loop {
            match self.chan.is_armed() {
                Ok(true) => {
                    info!("Vehicle armed in {}", self.chan.current_mode()?);
                    return Ok(true);
                }
                Ok(false) => (),
                Err(e) => warn!("Could not read armed state: {}", e),
            }

            if start.elapsed() > timeout || self.stop.wait_timeout(ARM_POLL_PERIOD) {
                return Ok(false);
            }
        }
    }

    /// Start the position feed, status report, safety monitor and operator tasks.
    fn spawn_tasks(
        &mut self,
        supervisor: SafetySupervisor,
        view: &SafetyView,
        requests: &Sender<SupervisorRequest>,
        handles: &mut Vec<TaskHandle>,
    ) -> Result<(), FlightError> {
        let feed = PositionFeed::new(
            self.cache.clone(),
            self.chan.clone(),
            self.params.bodies.vehicle,
        );
        handles.push(self.spawn(feed, self.params.tasks.position_feed_period())?);

        let status = StatusReport::new(
            self.cache.clone(),
            self.mocap.clone(),
            view.clone(),
            self.chan.clone(),
            self.params.bodies,
            self.params.safety.position_timeout(),
        );
        handles.push(self.spawn(status, self.params.tasks.status_period())?);

        let monitor_period = self.params.safety.monitor_period();
        handles.push(self.spawn(SafetyMonitor::new(supervisor), monitor_period)?);

        if let Some(tc_client) = self.tc_client.take() {
            let operator = Operator::new(tc_client, view.clone(), requests.clone());
            handles.push(self.spawn(operator, self.params.tasks.operator_period())?);
        }

        Ok(())
    }

    /// Raise the stop signal and join `handles`.
    fn stop_tasks(&self, handles: Vec<TaskHandle>) {
        self.stop.raise();

        for (name, jh) in handles {
            if jh.join().is_err() {
                error!("The {} task thread panicked", name);
            }
        }
    }

    fn set_requests(&self, requests: Option<Sender<SupervisorRequest>>) {
        *self.requests.lock().unwrap_or_else(PoisonError::into_inner) = requests;
    }

    fn spawn<T>(
        &self,
        task: T,
        period: Duration,
    ) -> Result<TaskHandle, FlightError>
    where
        T: Tick + 'static,
    {
        let name = task.name();

        #[cfg(test)]
        {
            if self.fail_spawn == Some(name) {
                return Err(FlightError::SpawnError(
                    name,
                    std::io::Error::new(std::io::ErrorKind::Other, "spawn refused"),
                ));
            }
        }

        spawn_periodic(task, period, self.stop.clone())
            .map(|jh| (name, jh))
            .map_err(|e| FlightError::SpawnError(name, e))
    }
}

impl Interrupt {
    /// Interrupt the flight, `reason` becomes the operator abort reason.
    pub fn trigger(&self, reason: &str) {
        let requested = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |tx| {
                tx.send(SupervisorRequest::Abort(reason.to_string())).is_ok()
            });

        if requested {
            warn!("{}, requesting an emergency landing", reason);
        } else {
            warn!("{}, stopping", reason);
            self.stop.raise();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn aborted(e: SafetyError) -> FlightError {
    match e {
        SafetyError::Terminated(cause) => FlightError::Aborted(cause),
        e => FlightError::SafetyError(e),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        params::{BodyIds, FollowParams, TaskParams},
        safety::{EmergencyReason, SafetyParams, SafetyPhase},
        sim::{SimAutopilot, SimAutopilotHandle, SimMocap, SimMocapParams},
    };
    use comms_if::{eqpt::autopilot::AutopilotCmd, net::NetParams};

    fn test_params() -> BridgeParams {
        BridgeParams {
            net: NetParams {
                mocap_endpoint: "inproc://unused_mocap".into(),
                autopilot_cmd_endpoint: "inproc://unused_cmd".into(),
                autopilot_tm_endpoint: "inproc://unused_tm".into(),
                tc_endpoint: "inproc://unused_tc".into(),
            },
            bodies: BodyIds::default(),
            tasks: TaskParams {
                position_feed_period_s: 0.02,
                target_waypoint_period_s: 0.05,
                status_period_s: 1.0,
                operator_period_s: 0.1,
                battery_wait_s: 0.001,
                mocap_connect_timeout_s: 1.0,
                arm_confirm_timeout_s: 0.3,
            },
            safety: SafetyParams {
                startup_timeout_s: 0.5,
                precheck_samples: 5,
                precheck_sample_period_s: 0.01,
                monitor_period_s: 0.05,
                ..Default::default()
            },
            follow: FollowParams::default(),
        }
    }

    /// Build a bridge over simulated equipment.
    fn sim_bridge(mocap_params: SimMocapParams) -> (Bridge, SimAutopilotHandle) {
        let params = test_params();

        let (link, handle) = SimAutopilot::new();
        handle.set_battery_pct(80);
        let chan = Arc::new(CommandChannel::new(
            Box::new(link),
            params.safety.min_altitude_m,
            params.safety.max_altitude_m,
            params.tasks.battery_wait(),
        ));

        let cache = Arc::new(PoseCache::new());
        let cache_clone = cache.clone();
        let mocap =
            SimMocap::start(mocap_params, move |f| cache_clone.update_from_frame(f)).unwrap();

        (
            Bridge::new(params, cache, chan, Arc::new(mocap), None),
            handle,
        )
    }

    #[test]
    fn test_hover() {
        let (bridge, handle) = sim_bridge(SimMocapParams::default());

        let report = bridge
            .run(FlightProfile::Hover {
                altitude_m: 3.0,
                duration_s: 0.3,
            })
            .unwrap();

        assert_eq!(report.final_state.phase, SafetyPhase::Terminated);
        assert_eq!(
            report.final_state.cause,
            Some(TerminationCause::FlightComplete)
        );

        let cmds = handle.commands();
        assert!(cmds.contains(&AutopilotCmd::SetMode(FlightMode::Guided)));
        assert!(cmds.contains(&AutopilotCmd::Arm));
        assert_eq!(
            handle.count(|c| matches!(c, AutopilotCmd::Takeoff { .. })),
            1
        );
        // Takeoff limited to the altitude ceiling
        assert!(cmds.contains(&AutopilotCmd::Takeoff { altitude_m: 1.0 }));
        assert_eq!(handle.count(|c| *c == AutopilotCmd::Land), 1);
        assert!(handle.count(|c| matches!(c, AutopilotCmd::VisionPosition { .. })) > 5);
        assert_eq!(
            handle.count(|c| matches!(c, AutopilotCmd::GuidedWaypoint { .. })),
            0
        );

        assert!(report
            .task_ticks
            .iter()
            .any(|(name, ticks)| *name == "position_feed" && *ticks > 5));
        assert_eq!(report.stats.failed, 0);
    }

    #[test]
    fn test_arming_failure_aborts() {
        let (bridge, handle) = sim_bridge(SimMocapParams::default());
        handle.set_refuse_arm(true);

        let report = bridge
            .run(FlightProfile::Hover {
                altitude_m: 0.5,
                duration_s: 5.0,
            })
            .unwrap();

        assert_eq!(
            report.final_state.cause,
            Some(TerminationCause::Emergency(EmergencyReason::OperatorAbort(
                "Arming failed".into()
            )))
        );
        assert_eq!(
            handle.count(|c| matches!(c, AutopilotCmd::Takeoff { .. })),
            0
        );
        assert_eq!(handle.count(|c| *c == AutopilotCmd::Land), 1);
        assert!(report.duration < Duration::from_secs(5));
    }

    #[test]
    fn test_follow_until_position_lost() {
        let (bridge, handle) = sim_bridge(SimMocapParams {
            vehicle_dropout_after: Some(Duration::from_millis(600)),
            ..Default::default()
        });

        let report = bridge
            .run(FlightProfile::FollowTarget { altitude_m: 0.5 })
            .unwrap();

        assert!(matches!(
            report.final_state.cause,
            Some(TerminationCause::Emergency(EmergencyReason::PositionLost(_)))
        ));
        assert!(handle.count(|c| matches!(c, AutopilotCmd::GuidedWaypoint { .. })) >= 1);
        assert_eq!(handle.count(|c| *c == AutopilotCmd::Land), 1);
    }

    #[test]
    fn test_startup_timeout_aborts() {
        // The simulated vehicle is published under another id, so it is never seen
        let (bridge, handle) = sim_bridge(SimMocapParams {
            vehicle_id: 42,
            ..Default::default()
        });

        match bridge.run(FlightProfile::FeedOnly) {
            Err(FlightError::Aborted(TerminationCause::StartupTimeout)) => (),
            r => panic!("Expected a startup timeout, got {:?}", r.map(|r| r.final_state)),
        }

        assert!(handle.commands().is_empty());
    }

    #[test]
    fn test_interrupt_lands() {
        let (bridge, handle) = sim_bridge(SimMocapParams::default());
        let interrupt = bridge.interrupt();

        let jh = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(500));
            interrupt.trigger("Operator interrupt");
        });

        let report = bridge
            .run(FlightProfile::Hover {
                altitude_m: 0.5,
                duration_s: 5.0,
            })
            .unwrap();
        jh.join().unwrap();

        assert_eq!(
            report.final_state.cause,
            Some(TerminationCause::Emergency(EmergencyReason::OperatorAbort(
                "Operator interrupt".into()
            )))
        );
        assert_eq!(
            handle.count(|c| matches!(c, AutopilotCmd::Takeoff { .. })),
            1
        );
        assert_eq!(handle.count(|c| *c == AutopilotCmd::Land), 1);
        assert!(report.duration < Duration::from_secs(5));
    }

    #[test]
    fn test_interrupt_before_flight_stops() {
        let (bridge, handle) = sim_bridge(SimMocapParams {
            vehicle_id: 42,
            ..Default::default()
        });

        bridge.interrupt().trigger("Operator interrupt");
        assert!(bridge.stop_signal().is_raised());

        // Returns well before the startup timeout
        let start = Instant::now();
        assert!(matches!(
            bridge.run(FlightProfile::FeedOnly),
            Err(FlightError::Aborted(_))
        ));
        assert!(start.elapsed() < Duration::from_millis(400));
        assert!(handle.commands().is_empty());
    }

    #[test]
    fn test_spawn_failure_before_takeoff() {
        let (mut bridge, handle) = sim_bridge(SimMocapParams::default());
        bridge.fail_spawn = Some("safety_monitor");
        let stop = bridge.stop_signal();

        match bridge.run(FlightProfile::Hover {
            altitude_m: 0.5,
            duration_s: 5.0,
        }) {
            Err(FlightError::SpawnError("safety_monitor", _)) => (),
            r => panic!("Expected a spawn error, got {:?}", r.map(|r| r.final_state)),
        }

        assert!(stop.is_raised());
        assert_eq!(handle.count(|c| *c == AutopilotCmd::Arm), 0);

        // The position feed was joined, not left running
        let is_vision = |c: &AutopilotCmd| matches!(c, AutopilotCmd::VisionPosition { .. });
        let sent = handle.count(is_vision);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(handle.count(is_vision), sent);
    }

    #[test]
    fn test_spawn_failure_after_takeoff_lands() {
        let (mut bridge, handle) = sim_bridge(SimMocapParams::default());
        bridge.fail_spawn = Some("target_waypoint");

        let report = bridge
            .run(FlightProfile::FollowTarget { altitude_m: 0.5 })
            .unwrap();

        match report.final_state.cause {
            Some(TerminationCause::Emergency(EmergencyReason::OperatorAbort(reason))) => {
                assert!(reason.contains("target_waypoint"), "{}", reason)
            }
            c => panic!("Expected an abort, got {:?}", c),
        }
        assert_eq!(
            handle.count(|c| matches!(c, AutopilotCmd::Takeoff { .. })),
            1
        );
        assert_eq!(handle.count(|c| *c == AutopilotCmd::Land), 1);
        assert_eq!(
            handle.count(|c| matches!(c, AutopilotCmd::GuidedWaypoint { .. })),
            0
        );
    }
}
