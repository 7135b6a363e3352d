//! Safety supervisor

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, error, info, warn};
use nalgebra::Vector3;
use std::{
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, PoisonError, RwLock,
    },
    time::{Duration, Instant},
};

use util::maths::norm;

use super::{EmergencyReason, SafetyParams, SafetyPhase, SafetyState, TerminationCause};
use crate::{
    cmd_chan::CommandChannel,
    frame::tracking_to_navigation,
    params::{BodyIds, ParamsError},
    pose_cache::PoseCache,
    tasks::StopSignal,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Poll period while waiting for the vehicle to appear.
const STARTUP_POLL_PERIOD: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Read only copy of the supervisor's state, updated after every evaluation.
pub type SafetyView = Arc<RwLock<SafetyState>>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Owner of the [`SafetyState`].
pub struct SafetySupervisor {
    params: SafetyParams,

    ids: BodyIds,

    cache: Arc<PoseCache>,

    chan: Arc<CommandChannel>,

    stop: StopSignal,

    requests: Receiver<SupervisorRequest>,

    state: SafetyState,

    view: SafetyView,

    /// Evaluate target loss, only enabled when following a target
    watch_target: bool,

    land_issued: bool,

    /// Update count and position of the last vehicle observation checked for jumps
    last_vehicle_obs: Option<(u64, Vector3<f64>)>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Requests other components can make of the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorRequest {
    /// Emergency landing, with the reason given by the requester
    Abort(String),

    /// End the flight with a normal landing
    Complete,
}

#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("Invalid safety parameters: {0}")]
    InvalidParams(#[from] ParamsError),

    #[error("Cannot {0} in the {1} phase")]
    WrongPhase(&'static str, SafetyPhase),

    #[error("{0}")]
    Terminated(TerminationCause),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SafetySupervisor {
    /// Create a new supervisor in the STARTUP phase.
    ///
    /// The returned sender is used to make [`SupervisorRequest`]s.
    pub fn new(
        params: SafetyParams,
        ids: BodyIds,
        cache: Arc<PoseCache>,
        chan: Arc<CommandChannel>,
        stop: StopSignal,
    ) -> Result<(Self, Sender<SupervisorRequest>), SafetyError> {
        params.are_valid()?;

        let (tx, rx) = mpsc::channel();
        let state = SafetyState::default();

        Ok((
            Self {
                params,
                ids,
                cache,
                chan,
                stop,
                requests: rx,
                view: Arc::new(RwLock::new(state.clone())),
                state,
                watch_target: false,
                land_issued: false,
                last_vehicle_obs: None,
            },
            tx,
        ))
    }

    /// Enable or disable target loss monitoring.
    pub fn set_watch_target(&mut self, watch: bool) {
        self.watch_target = watch;
    }

    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    /// A shared view of the state for readers on other threads.
    pub fn view(&self) -> SafetyView {
        self.view.clone()
    }

    /// STARTUP: wait for the vehicle to be seen by the tracking system.
    pub fn wait_for_vehicle(&mut self) -> Result<(), SafetyError> {
        self.require_phase("wait for the vehicle", SafetyPhase::Startup)?;

        let timeout = self.params.startup_timeout();
        let start = Instant::now();

        info!(
            "Waiting up to {:?} for rigid body {} (vehicle)",
            timeout, self.ids.vehicle
        );

        while !self.cache.has(self.ids.vehicle) {
            if start.elapsed() > timeout || self.stop.wait_timeout(STARTUP_POLL_PERIOD) {
                return Err(self.terminate(TerminationCause::StartupTimeout));
            }
        }

        info!("Vehicle seen after {:.2} s", start.elapsed().as_secs_f64());
        self.set_phase(SafetyPhase::Precheck);

        Ok(())
    }

    /// PRECHECK: sample the vehicle's tracking quality and check the battery.
    pub fn precheck(&mut self) -> Result<(), SafetyError> {
        self.require_phase("run the pre-flight check", SafetyPhase::Precheck)?;

        let num_samples = self.params.precheck_samples;
        let required = self.params.required_precheck_passes();
        let period = self.params.precheck_sample_period();
        let timeout = self.params.position_timeout();

        info!(
            "Pre-flight check: {} samples every {:?}, {} must be fresh",
            num_samples, period, required
        );

        let mut passes = 0;
        for i in 0..num_samples {
            if !self.cache.is_stale(self.ids.vehicle, timeout) {
                passes += 1;
            }

            if i + 1 < num_samples && self.stop.wait_timeout(period) {
                return Err(self.terminate(TerminationCause::PrecheckFailed(
                    "interrupted".into(),
                )));
            }
        }

        if passes < required {
            return Err(self.terminate(TerminationCause::PrecheckFailed(format!(
                "only {}/{} position samples were fresh (need {})",
                passes, num_samples, required
            ))));
        }

        self.update_battery();
        if let Some(pct) = self.state.battery_pct {
            if pct < self.params.battery_warning_pct {
                return Err(self.terminate(TerminationCause::PrecheckFailed(format!(
                    "battery at {:.0}% is below the {:.0}% warning level",
                    pct, self.params.battery_warning_pct
                ))));
            }
        } else {
            warn!("Battery level unknown at pre-flight check");
        }

        info!("Pre-flight check passed ({}/{} fresh samples)", passes, num_samples);
        self.set_phase(SafetyPhase::Nominal);

        Ok(())
    }

    /// Evaluate all safety conditions at `now`. Called once per monitor tick.
    pub fn evaluate(&mut self, now: Instant) {
        if self.state.phase.is_flight() {
            self.evaluate_flight(now);
        }

        self.publish();
    }

    fn evaluate_flight(&mut self, now: Instant) {
        // Drain requests, an abort takes priority over everything
        let requests: Vec<SupervisorRequest> = self.requests.try_iter().collect();
        let mut complete = false;
        for req in requests {
            match req {
                SupervisorRequest::Abort(reason) => {
                    return self.emergency(EmergencyReason::OperatorAbort(reason));
                }
                SupervisorRequest::Complete => complete = true,
            }
        }

        // Battery
        self.update_battery();
        if let Some(pct) = self.state.battery_pct {
            if pct <= self.params.battery_critical_pct {
                return self.emergency(EmergencyReason::BatteryCritical(pct));
            } else if pct < self.params.battery_warning_pct {
                warn!("Battery low ({:.0}%)", pct);
            }
        }

        // Vehicle position
        let vehicle = match self.cache.get(self.ids.vehicle) {
            Some(v) => v,
            None => return self.emergency(EmergencyReason::PositionLost(f64::INFINITY)),
        };
        self.state.last_vehicle_seen = Some(vehicle.last_update);
        let age = now.saturating_duration_since(vehicle.last_update);

        if age > self.params.position_timeout() {
            return self.emergency(EmergencyReason::PositionLost(age.as_secs_f64()));
        } else if age > self.params.position_stale() {
            if self.state.phase == SafetyPhase::Nominal {
                warn!(
                    "Vehicle position stale ({:.2} s old), flight degraded",
                    age.as_secs_f64()
                );
                self.state.degraded_since = Some(now);
                self.set_phase(SafetyPhase::Degraded);
            }
        } else if self.state.phase == SafetyPhase::Degraded {
            let degraded_for = self
                .state
                .degraded_since
                .map(|t| now.saturating_duration_since(t))
                .unwrap_or_default();
            info!(
                "Vehicle position fresh again after {:.2} s degraded",
                degraded_for.as_secs_f64()
            );
            self.state.degraded_since = None;
            self.set_phase(SafetyPhase::Nominal);
        }

        self.check_position_jump(vehicle.count, vehicle.position_m);
        self.check_altitude(&vehicle.position_m);

        // Target
        if self.watch_target {
            if let Some(target) = self.cache.get(self.ids.target) {
                self.state.last_target_seen = Some(target.last_update);
                let age = now.saturating_duration_since(target.last_update);

                if age > self.params.target_timeout() {
                    return self.emergency(EmergencyReason::TargetLost(age.as_secs_f64()));
                }
            }
        }

        if complete {
            self.complete();
        }
    }

    fn check_position_jump(&mut self, count: u64, position_m: Vector3<f64>) {
        if let Some((last_count, last_pos)) = self.last_vehicle_obs {
            if count != last_count {
                let jump = norm(last_pos.as_slice(), position_m.as_slice()).unwrap_or(0.0);
                if jump > self.params.max_position_jump_m {
                    self.state.position_jumps += 1;
                    warn!(
                        "Vehicle position jumped {:.2} m (limit {:.2} m), {} jumps so far",
                        jump, self.params.max_position_jump_m, self.state.position_jumps
                    );
                }
            }
        }

        self.last_vehicle_obs = Some((count, position_m));
    }

    fn check_altitude(&self, position_m: &Vector3<f64>) {
        match self.chan.is_armed() {
            Ok(true) => (),
            Ok(false) => return,
            Err(e) => {
                debug!("Could not read armed state: {}", e);
                return;
            }
        }

        let altitude_m = -tracking_to_navigation(position_m).z;

        if altitude_m > self.params.max_altitude_m {
            warn!(
                "Vehicle above the altitude ceiling ({:.2} m > {:.2} m)",
                altitude_m, self.params.max_altitude_m
            );
        } else if altitude_m < self.params.min_altitude_m {
            debug!(
                "Vehicle below the altitude floor ({:.2} m < {:.2} m)",
                altitude_m, self.params.min_altitude_m
            );
        }
    }

    fn update_battery(&mut self) {
        if let Some(pct) = self.chan.battery_status().and_then(|b| b.percentage) {
            self.state.battery_pct = Some(pct);
        }
    }

    fn emergency(&mut self, reason: EmergencyReason) {
        self.set_phase(SafetyPhase::Emergency);
        error!("EMERGENCY: {}", reason);

        self.issue_land();

        self.terminate(TerminationCause::Emergency(reason));
    }

    fn complete(&mut self) {
        info!("Flight complete, landing");
        self.issue_land();
        self.terminate(TerminationCause::FlightComplete);
    }

    fn issue_land(&mut self) {
        if self.land_issued {
            return;
        }
        self.land_issued = true;

        if let Err(e) = self.chan.land() {
            error!("Could not command the landing: {}", e);
        }
    }

    /// Move to TERMINATED and stop all tasks. Returns the matching error for callers that abort.
    fn terminate(&mut self, cause: TerminationCause) -> SafetyError {
        info!("Flight terminated: {}", cause);

        self.set_phase(SafetyPhase::Terminated);
        self.state.cause = Some(cause.clone());
        self.publish();
        self.stop.raise();

        SafetyError::Terminated(cause)
    }

    fn set_phase(&mut self, to: SafetyPhase) {
        let from = self.state.phase;
        if from == to {
            return;
        }

        if !from.can_transition_to(to) {
            error!("Illegal safety phase transition {} -> {} ignored", from, to);
            return;
        }

        info!("Safety phase {} -> {}", from, to);
        self.state.phase = to;
    }

    fn require_phase(&self, action: &'static str, phase: SafetyPhase) -> Result<(), SafetyError> {
        if self.state.phase == phase {
            Ok(())
        } else {
            Err(SafetyError::WrongPhase(action, self.state.phase))
        }
    }

    fn publish(&self) {
        *self.view.write().unwrap_or_else(PoisonError::into_inner) = self.state.clone();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{SimAutopilot, SimAutopilotHandle};
    use comms_if::eqpt::autopilot::AutopilotCmd;
    use nalgebra::Quaternion;

    struct Fixture {
        sup: SafetySupervisor,
        tx: Sender<SupervisorRequest>,
        cache: Arc<PoseCache>,
        handle: SimAutopilotHandle,
        stop: StopSignal,
    }

    fn fixture(params: SafetyParams) -> Fixture {
        let (link, handle) = SimAutopilot::new();
        handle.set_battery_pct(80);

        let chan = Arc::new(CommandChannel::new(
            Box::new(link),
            params.min_altitude_m,
            params.max_altitude_m,
            Duration::from_millis(1),
        ));
        let cache = Arc::new(PoseCache::new());
        let stop = StopSignal::new();

        let (sup, tx) = SafetySupervisor::new(
            params,
            BodyIds::default(),
            cache.clone(),
            chan,
            stop.clone(),
        )
        .unwrap();

        Fixture {
            sup,
            tx,
            cache,
            handle,
            stop,
        }
    }

    fn fast_params() -> SafetyParams {
        SafetyParams {
            startup_timeout_s: 0.3,
            precheck_samples: 5,
            precheck_sample_period_s: 0.01,
            ..Default::default()
        }
    }

    fn observe(cache: &PoseCache, id: i32, z: f64, t: Instant) {
        cache.update_at(id, Vector3::new(0.0, 0.0, z), Quaternion::identity(), t);
    }

    /// Put the supervisor straight into NOMINAL with a fresh vehicle pose at `t0`.
    fn nominal(f: &mut Fixture, t0: Instant) {
        observe(&f.cache, 5, 0.5, Instant::now());
        f.sup.wait_for_vehicle().unwrap();
        f.sup.precheck().unwrap();
        assert_eq!(f.sup.state().phase, SafetyPhase::Nominal);
        observe(&f.cache, 5, 0.5, t0);
    }

    fn num_lands(handle: &SimAutopilotHandle) -> usize {
        handle.count(|c| *c == AutopilotCmd::Land)
    }

    #[test]
    fn test_nominal_without_target() {
        let mut f = fixture(fast_params());
        f.sup.set_watch_target(true);
        let t0 = Instant::now();
        nominal(&mut f, t0);

        // Vehicle keeps updating and the target is never seen
        for i in 1..=100 {
            let t = t0 + Duration::from_millis(100 * i);
            observe(&f.cache, 5, 0.5, t);
            f.sup.evaluate(t);
            assert_eq!(f.sup.state().phase, SafetyPhase::Nominal);
        }

        assert_eq!(num_lands(&f.handle), 0);
        assert!(!f.stop.is_raised());
        assert_eq!(f.sup.view().read().unwrap().phase, SafetyPhase::Nominal);
        assert_eq!(f.sup.state().battery_pct, Some(80.0));
    }

    #[test]
    fn test_position_loss() {
        let mut f = fixture(fast_params());
        let t0 = Instant::now();
        nominal(&mut f, t0);

        let tick = Duration::from_millis(500);

        f.sup.evaluate(t0 + tick);
        assert_eq!(f.sup.state().phase, SafetyPhase::Degraded);
        assert!(!f.stop.is_raised());

        f.sup.evaluate(t0 + tick * 2);
        assert_eq!(f.sup.state().phase, SafetyPhase::Terminated);
        assert!(matches!(
            f.sup.state().cause,
            Some(TerminationCause::Emergency(EmergencyReason::PositionLost(_)))
        ));
        assert!(f.stop.is_raised());
        assert_eq!(num_lands(&f.handle), 1);

        // Absorbing, and never lands twice
        f.sup.evaluate(t0 + tick * 3);
        f.tx.send(SupervisorRequest::Abort("again".into())).unwrap();
        f.sup.evaluate(t0 + tick * 4);
        assert_eq!(f.sup.state().phase, SafetyPhase::Terminated);
        assert_eq!(num_lands(&f.handle), 1);
    }

    #[test]
    fn test_emergency_timing_bound() {
        let params = fast_params();
        let timeout = params.position_timeout();
        let period = params.monitor_period();

        // Try a range of offsets between the last update and the monitor ticks
        for offset_ms in (0..500).step_by(50) {
            let mut f = fixture(params.clone());
            let t0 = Instant::now();
            nominal(&mut f, t0);

            let mut t = t0 + Duration::from_millis(offset_ms);
            loop {
                f.sup.evaluate(t);
                if f.sup.state().phase == SafetyPhase::Terminated {
                    break;
                }
                t += period;
            }

            let reached = t - t0;
            assert!(reached > timeout, "emergency after only {:?}", reached);
            assert!(reached <= timeout + period, "emergency after {:?}", reached);
        }
    }

    #[test]
    fn test_degraded_recovers() {
        let mut f = fixture(fast_params());
        let t0 = Instant::now();
        nominal(&mut f, t0);

        f.sup.evaluate(t0 + Duration::from_millis(300));
        assert_eq!(f.sup.state().phase, SafetyPhase::Degraded);
        assert!(f.sup.state().degraded_since.is_some());

        let t1 = t0 + Duration::from_millis(400);
        observe(&f.cache, 5, 0.5, t1);
        f.sup.evaluate(t1 + Duration::from_millis(50));
        assert_eq!(f.sup.state().phase, SafetyPhase::Nominal);
        assert!(f.sup.state().degraded_since.is_none());
        assert_eq!(num_lands(&f.handle), 0);
    }

    #[test]
    fn test_battery_critical() {
        let mut f = fixture(fast_params());
        let t0 = Instant::now();
        nominal(&mut f, t0);

        f.handle.set_battery_pct(14);
        f.sup.evaluate(t0);

        assert_eq!(
            f.sup.state().cause,
            Some(TerminationCause::Emergency(EmergencyReason::BatteryCritical(
                14.0
            )))
        );
        assert_eq!(num_lands(&f.handle), 1);
    }

    #[test]
    fn test_operator_abort_has_priority() {
        let mut f = fixture(fast_params());
        let t0 = Instant::now();
        nominal(&mut f, t0);

        f.handle.set_battery_pct(10);
        f.tx.send(SupervisorRequest::Complete).unwrap();
        f.tx.send(SupervisorRequest::Abort("drifting".into())).unwrap();
        f.sup.evaluate(t0);

        assert_eq!(
            f.sup.state().cause,
            Some(TerminationCause::Emergency(EmergencyReason::OperatorAbort(
                "drifting".into()
            )))
        );
        assert_eq!(num_lands(&f.handle), 1);
    }

    #[test]
    fn test_flight_complete() {
        let mut f = fixture(fast_params());
        let t0 = Instant::now();
        nominal(&mut f, t0);

        f.tx.send(SupervisorRequest::Complete).unwrap();
        f.sup.evaluate(t0);

        assert_eq!(f.sup.state().cause, Some(TerminationCause::FlightComplete));
        assert_eq!(f.sup.view().read().unwrap().phase, SafetyPhase::Terminated);
        assert_eq!(num_lands(&f.handle), 1);
        assert!(f.stop.is_raised());
    }

    #[test]
    fn test_target_loss() {
        let mut f = fixture(SafetyParams {
            target_timeout_s: 1.0,
            ..fast_params()
        });
        f.sup.set_watch_target(true);
        let t0 = Instant::now();
        nominal(&mut f, t0);

        observe(&f.cache, 1, 0.0, t0);

        let t = t0 + Duration::from_millis(500);
        observe(&f.cache, 5, 0.5, t);
        f.sup.evaluate(t);
        assert_eq!(f.sup.state().phase, SafetyPhase::Nominal);
        assert_eq!(f.sup.state().last_target_seen, Some(t0));

        let t = t0 + Duration::from_millis(1100);
        observe(&f.cache, 5, 0.5, t);
        f.sup.evaluate(t);
        assert!(matches!(
            f.sup.state().cause,
            Some(TerminationCause::Emergency(EmergencyReason::TargetLost(_)))
        ));
    }

    #[test]
    fn test_target_ignored_when_not_watched() {
        let mut f = fixture(fast_params());
        let t0 = Instant::now();
        nominal(&mut f, t0);
        observe(&f.cache, 1, 0.0, t0);

        let t = t0 + Duration::from_secs(60);
        observe(&f.cache, 5, 0.5, t);
        f.sup.evaluate(t);
        assert_eq!(f.sup.state().phase, SafetyPhase::Nominal);
    }

    #[test]
    fn test_position_jump_counted() {
        let mut f = fixture(fast_params());
        let t0 = Instant::now();
        nominal(&mut f, t0);

        f.sup.evaluate(t0);
        let t = t0 + Duration::from_millis(100);
        observe(&f.cache, 5, 2.0, t);
        f.sup.evaluate(t);

        assert_eq!(f.sup.state().position_jumps, 1);
        assert_eq!(f.sup.state().phase, SafetyPhase::Nominal);
    }

    #[test]
    fn test_startup_timeout() {
        let mut f = fixture(fast_params());

        let start = Instant::now();
        let result = f.sup.wait_for_vehicle();

        assert!(matches!(
            result,
            Err(SafetyError::Terminated(TerminationCause::StartupTimeout))
        ));
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(f.sup.state().phase, SafetyPhase::Terminated);
        assert!(f.stop.is_raised());
        assert_eq!(num_lands(&f.handle), 0);
    }

    #[test]
    fn test_precheck_fails_on_stale_samples() {
        let mut f = fixture(fast_params());

        // Seen once long enough ago to be stale for the whole check
        observe(&f.cache, 5, 0.5, Instant::now() - Duration::from_secs(5));
        f.sup.wait_for_vehicle().unwrap();

        match f.sup.precheck() {
            Err(SafetyError::Terminated(TerminationCause::PrecheckFailed(r))) => {
                assert!(r.contains("0/5"), "{}", r)
            }
            r => panic!("Expected precheck failure, got {:?}", r.map(|_| ())),
        }
        assert_eq!(f.sup.state().phase, SafetyPhase::Terminated);
    }

    #[test]
    fn test_precheck_fails_on_low_battery() {
        let mut f = fixture(fast_params());
        f.handle.set_battery_pct(20);

        observe(&f.cache, 5, 0.5, Instant::now());
        f.sup.wait_for_vehicle().unwrap();

        match f.sup.precheck() {
            Err(SafetyError::Terminated(TerminationCause::PrecheckFailed(r))) => {
                assert!(r.contains("battery"), "{}", r)
            }
            r => panic!("Expected precheck failure, got {:?}", r.map(|_| ())),
        }
    }

    #[test]
    fn test_precheck_passes_with_unknown_battery() {
        let mut f = fixture(fast_params());
        f.handle.set_battery(None);

        observe(&f.cache, 5, 0.5, Instant::now());
        f.sup.wait_for_vehicle().unwrap();
        f.sup.precheck().unwrap();

        assert_eq!(f.sup.state().phase, SafetyPhase::Nominal);
        assert_eq!(f.sup.state().battery_pct, None);
    }

    #[test]
    fn test_wrong_phase() {
        let mut f = fixture(fast_params());
        assert!(matches!(
            f.sup.precheck(),
            Err(SafetyError::WrongPhase(_, SafetyPhase::Startup))
        ));
    }
}
