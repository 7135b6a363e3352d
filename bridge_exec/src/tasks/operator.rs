//! Operator task, serves telecommands from the ground console.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use std::sync::{mpsc::Sender, PoisonError};

use comms_if::tc::{StatusTm, Tc, TcResponse};

use super::{TaskError, Tick};
use crate::{
    safety::{SafetyView, SupervisorRequest},
    tc_client::TcClient,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Operator {
    tc_client: TcClient,

    view: SafetyView,

    requests: Sender<SupervisorRequest>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Operator {
    pub fn new(
        tc_client: TcClient,
        view: SafetyView,
        requests: Sender<SupervisorRequest>,
    ) -> Self {
        Self {
            tc_client,
            view,
            requests,
        }
    }
}

impl Tick for Operator {
    fn name(&self) -> &'static str {
        "operator"
    }

    fn tick(&mut self) -> Result<(), TaskError> {
        while let Some(tc) = self.tc_client.recieve_tc()? {
            info!("Received TC: {:?}", tc);

            let response = match respond(tc, &self.view, &self.requests) {
                Ok(r) => r,
                Err(e) => {
                    // Always answer the console before reporting
                    self.tc_client
                        .send_response(&TcResponse::CannotExecute(e.to_string()))?;
                    return Err(e);
                }
            };

            self.tc_client.send_response(&response)?;
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Execute a telecommand and build the response to it.
fn respond(
    tc: Tc,
    view: &SafetyView,
    requests: &Sender<SupervisorRequest>,
) -> Result<TcResponse, TaskError> {
    let state = view.read().unwrap_or_else(PoisonError::into_inner).clone();

    let request = match tc {
        Tc::Status => {
            return Ok(TcResponse::Status(StatusTm {
                phase: state.phase.to_string(),
                battery_pct: state.battery_pct,
                reason: state.cause.map(|c| c.to_string()),
            }))
        }
        _ if !state.phase.is_flight() => {
            return Ok(TcResponse::CannotExecute(format!(
                "Not in flight (phase {})",
                state.phase
            )))
        }
        Tc::Abort { reason } => {
            let reason = reason.unwrap_or_else(|| "requested from the console".into());
            warn!("Operator requested abort: {}", reason);
            SupervisorRequest::Abort(reason)
        }
        Tc::Land => SupervisorRequest::Complete,
    };

    requests
        .send(request)
        .map_err(|_| TaskError::SupervisorGone)?;

    Ok(TcResponse::Ok)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::safety::{SafetyPhase, SafetyState, TerminationCause};
    use std::sync::{mpsc, Arc, RwLock};

    fn view(phase: SafetyPhase) -> SafetyView {
        Arc::new(RwLock::new(SafetyState {
            phase,
            battery_pct: Some(64.0),
            ..Default::default()
        }))
    }

    #[test]
    fn test_abort_and_land() {
        let (tx, rx) = mpsc::channel();
        let v = view(SafetyPhase::Nominal);

        assert_eq!(
            respond(Tc::Abort { reason: None }, &v, &tx).unwrap(),
            TcResponse::Ok
        );
        assert_eq!(
            respond(
                Tc::Abort {
                    reason: Some("drifting".into())
                },
                &v,
                &tx
            )
            .unwrap(),
            TcResponse::Ok
        );
        assert_eq!(respond(Tc::Land, &v, &tx).unwrap(), TcResponse::Ok);

        let requests: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            requests,
            vec![
                SupervisorRequest::Abort("requested from the console".into()),
                SupervisorRequest::Abort("drifting".into()),
                SupervisorRequest::Complete,
            ]
        );
    }

    #[test]
    fn test_status() {
        let (tx, _rx) = mpsc::channel();
        let v = view(SafetyPhase::Terminated);
        v.write().unwrap().cause = Some(TerminationCause::FlightComplete);

        assert_eq!(
            respond(Tc::Status, &v, &tx).unwrap(),
            TcResponse::Status(StatusTm {
                phase: "TERMINATED".into(),
                battery_pct: Some(64.0),
                reason: Some("Flight complete".into()),
            })
        );

        // Nothing to abort once terminated
        assert!(matches!(
            respond(Tc::Abort { reason: None }, &v, &tx).unwrap(),
            TcResponse::CannotExecute(_)
        ));
    }

    #[test]
    fn test_supervisor_gone() {
        let (tx, rx) = mpsc::channel();
        drop(rx);

        assert!(matches!(
            respond(Tc::Land, &view(SafetyPhase::Degraded), &tx),
            Err(TaskError::SupervisorGone)
        ));
    }
}
