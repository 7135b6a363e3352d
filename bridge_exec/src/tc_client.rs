//! # Telecommand Client
//!
//! The operator's console connects to this socket to abort, land, or query the bridge during a
//! flight.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
    tc::{Tc, TcParseError, TcResponse},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telecommand client
pub struct TcClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TcClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send the response to the console: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the console: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the response: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not parse the recieved telecommand: {0}")]
    TcParseError(TcParseError),

    #[error("The console sent a message which was not valid UTF-8")]
    NonUtf8Message,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TcClient {
    /// Create a new instance of the TC Client, bound to the TC endpoint.
    ///
    /// This function will not block until the console connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, TcClientError> {
        let socket_options = SocketOptions {
            bind: true,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 10,
            send_timeout: 10,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::REP, socket_options, &params.tc_endpoint)
            .map_err(TcClientError::SocketError)?;

        Ok(Self { socket })
    }

    /// Recieve a single TC from the console.
    ///
    /// Call in a loop until `Ok(None)` is returned, indicating that there are no more pending TCs
    /// right now.
    ///
    /// After recieving a valid TC the client must send a response using `.send_response()` before
    /// attempting to recieve another TC. If the TC is malformed the response is sent by this
    /// function.
    pub fn recieve_tc(&self) -> Result<Option<Tc>, TcClientError> {
        let tc_str = match self.socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                self.send_response(&TcResponse::CannotExecute("Message is not UTF-8".into()))?;

                return Err(TcClientError::NonUtf8Message);
            }
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(TcClientError::RecvError(e)),
        };

        match Tc::from_json(&tc_str) {
            Ok(tc) => Ok(Some(tc)),
            Err(e) => {
                self.send_response(&TcResponse::CannotExecute(e.to_string()))?;

                Err(TcClientError::TcParseError(e))
            }
        }
    }

    /// Send the given response back to the console.
    ///
    /// This function must be called after recieving a TC.
    pub fn send_response(&self, response: &TcResponse) -> Result<(), TcClientError> {
        let response_str =
            serde_json::to_string(response).map_err(TcClientError::SerializationError)?;

        self.socket
            .send(&response_str, 0)
            .map_err(TcClientError::SendError)
    }
}
