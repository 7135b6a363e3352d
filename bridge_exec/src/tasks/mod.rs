//! # Periodic Tasks
//!
//! Every concurrent activity of the bridge is a [`Tick`] run at a fixed rate on its own thread by
//! [`spawn_periodic`]. All tasks share one [`StopSignal`], once it is raised each task finishes
//! the tick in progress and exits without waiting out its period.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod operator;
mod position_feed;
mod safety_monitor;
mod status_report;
mod target_waypoint;

pub use operator::Operator;
pub use position_feed::PositionFeed;
pub use safety_monitor::SafetyMonitor;
pub use status_report::StatusReport;
pub use target_waypoint::TargetWaypoint;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{error, info, warn};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use crate::{cmd_chan::ChannelError, tc_client::TcClientError};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A unit of periodic work.
pub trait Tick: Send {
    /// Name of the task, also used as its thread name.
    fn name(&self) -> &'static str;

    /// Perform one iteration. Errors are logged by the scheduler and the task keeps running.
    fn tick(&mut self) -> Result<(), TaskError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    ChannelError(#[from] ChannelError),

    #[error(transparent)]
    TcClientError(#[from] TcClientError),

    #[error("The safety supervisor is no longer accepting requests")]
    SupervisorGone,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal, waking every waiter.
    pub fn raise(&self) {
        let (lock, cvar) = &*self.inner;
        *self.lock(lock) = true;
        cvar.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        let (lock, _) = &*self.inner;
        *self.lock(lock)
    }

    /// Sleep for `timeout` or until the signal is raised.
    ///
    /// Returns `true` if the signal is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = self.lock(lock);

        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);

        *guard
    }

    /// Block until the signal is raised.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let guard = self.lock(lock);

        let _guard = cvar
            .wait_while(guard, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn lock<'a>(&self, lock: &'a Mutex<bool>) -> MutexGuard<'a, bool> {
        lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run `task` every `period` on a new named thread until `stop` is raised.
///
/// The thread returns the number of ticks executed.
pub fn spawn_periodic<T>(
    task: T,
    period: Duration,
    stop: StopSignal,
) -> std::io::Result<thread::JoinHandle<u64>>
where
    T: Tick + 'static,
{
    thread::Builder::new()
        .name(task.name().into())
        .spawn(move || run_periodic(task, period, stop))
}

fn run_periodic<T: Tick>(mut task: T, period: Duration, stop: StopSignal) -> u64 {
    let name = task.name();
    let mut num_ticks = 0u64;
    let mut next_tick = Instant::now();

    info!("Task {} started ({:?} period)", name, period);

    while !stop.is_raised() {
        match panic::catch_unwind(AssertUnwindSafe(|| task.tick())) {
            Ok(Ok(())) => (),
            Ok(Err(e)) => warn!("Task {} tick failed: {}", name, e),
            Err(_) => error!("Task {} panicked during a tick, continuing", name),
        }
        num_ticks += 1;

        next_tick += period;
        let now = Instant::now();

        match next_tick.checked_duration_since(now) {
            Some(sleep) => {
                if stop.wait_timeout(sleep) {
                    break;
                }
            }
            None => {
                warn!(
                    "Task {} overran its {:?} period by {:?}",
                    name,
                    period,
                    now - next_tick
                );
                next_tick = now;
            }
        }
    }

    info!("Task {} stopped after {} ticks", name, num_ticks);

    num_ticks
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counter {
        count: Arc<AtomicU64>,
        fail_every: u64,
        panic_every: u64,
    }

    impl Tick for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn tick(&mut self) -> Result<(), TaskError> {
            let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;

            if self.panic_every > 0 && n % self.panic_every == 0 {
                panic!("tick {} panicked", n);
            }
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(TaskError::SupervisorGone);
            }

            Ok(())
        }
    }

    #[test]
    fn test_stop_signal() {
        let stop = StopSignal::new();
        assert!(!stop.is_raised());
        assert!(!stop.wait_timeout(Duration::from_millis(10)));

        let stop_clone = stop.clone();
        let waiter = thread::spawn(move || stop_clone.wait_timeout(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        stop.raise();

        assert!(waiter.join().unwrap());
        assert!(stop.is_raised());

        // Waiting on a raised signal returns at once
        let start = Instant::now();
        stop.wait();
        assert!(stop.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_errors_and_panics_do_not_stop_task() {
        let count = Arc::new(AtomicU64::new(0));
        let stop = StopSignal::new();

        let jh = spawn_periodic(
            Counter {
                count: count.clone(),
                fail_every: 2,
                panic_every: 3,
            },
            Duration::from_millis(5),
            stop.clone(),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(200));
        stop.raise();
        let ticks = jh.join().unwrap();

        assert!(ticks >= 10, "only {} ticks", ticks);
        assert_eq!(ticks, count.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_within_one_period() {
        let count = Arc::new(AtomicU64::new(0));
        let stop = StopSignal::new();
        let period = Duration::from_millis(500);

        let jh = spawn_periodic(
            Counter {
                count: count.clone(),
                fail_every: 0,
                panic_every: 0,
            },
            period,
            stop.clone(),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(50));

        let raised_at = Instant::now();
        stop.raise();
        jh.join().unwrap();

        // The task is asleep when the signal is raised, so it must wake well before its period
        assert!(raised_at.elapsed() < period);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
