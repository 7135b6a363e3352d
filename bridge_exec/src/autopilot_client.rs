//! # Autopilot Client
//!
//! Commands are pushed to the autopilot gateway, which owns the serial link to the flight
//! controller, and telemetry is received from its publisher. The client caches the armed state
//! and mode from heartbeats so they can be queried at any time.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use std::time::{Duration, Instant};

use comms_if::{
    eqpt::autopilot::{AutopilotCmd, AutopilotLink, AutopilotTm, BatteryStatus, FlightMode, LinkError},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Autopilot gateway client.
pub struct AutopilotClient {
    cmd_socket: MonitoredSocket,

    tm_socket: MonitoredSocket,

    armed: bool,

    mode: FlightMode,

    latest_battery: Option<BatteryStatus>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum AutopilotClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AutopilotClient {
    /// Create a new instance of the autopilot client.
    ///
    /// This function will not block until the gateway connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, AutopilotClientError> {
        let cmd_socket_options = SocketOptions {
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            send_timeout: 10,
            ..Default::default()
        };
        let tm_socket_options = SocketOptions {
            connect_timeout: 1000,
            linger: 1,
            recv_timeout: 0,
            ..Default::default()
        };

        let cmd_socket = MonitoredSocket::new(
            ctx,
            zmq::PUSH,
            cmd_socket_options,
            &params.autopilot_cmd_endpoint,
        )
        .map_err(AutopilotClientError::SocketError)?;
        let tm_socket = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            tm_socket_options,
            &params.autopilot_tm_endpoint,
        )
        .map_err(AutopilotClientError::SocketError)?;

        Ok(Self {
            cmd_socket,
            tm_socket,
            armed: false,
            mode: FlightMode::Unknown(u32::MAX),
            latest_battery: None,
        })
    }

    /// Receive all pending telemetry without blocking.
    fn drain(&mut self) -> Result<(), LinkError> {
        while let Some(tm) = self.try_recv(zmq::DONTWAIT)? {
            self.handle_tm(tm);
        }

        Ok(())
    }

    fn try_recv(&self, flags: i32) -> Result<Option<AutopilotTm>, LinkError> {
        let tm_str = match self.tm_socket.recv_string(flags) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => return Err(LinkError::RecvError("non UTF-8 telemetry".into())),
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(LinkError::RecvError(e.to_string())),
        };

        serde_json::from_str(&tm_str)
            .map(Some)
            .map_err(LinkError::DeserializeError)
    }

    fn handle_tm(&mut self, tm: AutopilotTm) {
        match tm {
            AutopilotTm::Heartbeat { armed, custom_mode } => {
                let mode = FlightMode::from_custom_mode(custom_mode);

                if armed != self.armed || mode != self.mode {
                    info!(
                        "Autopilot now {} in {}",
                        if armed { "armed" } else { "disarmed" },
                        mode
                    );
                }

                self.armed = armed;
                self.mode = mode;
            }
            AutopilotTm::Battery(b) => self.latest_battery = Some(b),
        }
    }
}

impl AutopilotLink for AutopilotClient {
    fn send(&mut self, cmd: &AutopilotCmd) -> Result<(), LinkError> {
        if !self.cmd_socket.connected() {
            return Err(LinkError::NotConnected);
        }

        let cmd_str = serde_json::to_string(cmd).map_err(LinkError::SerializationError)?;

        self.cmd_socket
            .send(&cmd_str, 0)
            .map_err(|e| LinkError::SendError(e.to_string()))
    }

    fn recv_battery(&mut self, timeout: Duration) -> Result<Option<BatteryStatus>, LinkError> {
        self.drain()?;
        if let Some(b) = self.latest_battery.take() {
            return Ok(Some(b));
        }

        let deadline = Instant::now() + timeout;

        loop {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(r) => r,
                None => return Ok(None),
            };

            let num_ready = self
                .tm_socket
                .poll(zmq::POLLIN, remaining.as_millis() as i64)
                .map_err(|e| LinkError::RecvError(e.to_string()))?;
            if num_ready == 0 {
                debug!("No battery telemetry within {:?}", timeout);
                return Ok(None);
            }

            self.drain()?;
            if let Some(b) = self.latest_battery.take() {
                return Ok(Some(b));
            }
        }
    }

    fn is_armed(&mut self) -> Result<bool, LinkError> {
        self.drain()?;
        Ok(self.armed)
    }

    fn mode(&mut self) -> Result<FlightMode, LinkError> {
        self.drain()?;
        Ok(self.mode)
    }
}
