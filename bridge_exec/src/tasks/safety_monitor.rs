//! Safety monitor task, one supervisor evaluation per tick.

use std::time::Instant;

use super::{TaskError, Tick};
use crate::safety::SafetySupervisor;

pub struct SafetyMonitor {
    supervisor: SafetySupervisor,
}

impl SafetyMonitor {
    pub fn new(supervisor: SafetySupervisor) -> Self {
        Self { supervisor }
    }
}

impl Tick for SafetyMonitor {
    fn name(&self) -> &'static str {
        "safety_monitor"
    }

    fn tick(&mut self) -> Result<(), TaskError> {
        self.supervisor.evaluate(Instant::now());
        Ok(())
    }
}
