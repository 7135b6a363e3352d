//! # Motion Capture Client
//!
//! This module connects to the mocap gateway and delivers every rigid body observation to a
//! callback from a background thread.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock,
    },
    thread,
    time::{Duration, Instant},
};

use comms_if::{
    eqpt::mocap::{MocapMsg, RigidBodyFrame, ServerInfo},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Interval at which the connection state is polled during startup.
const CONNECT_POLL_PERIOD: Duration = Duration::from_millis(50);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Diagnostics available from any source of rigid body frames.
pub trait MocapSource: Send + Sync {
    /// True if the source is currently connected to the tracking system.
    fn connected(&self) -> bool;

    /// Identity of the tracking server, once known.
    fn server_info(&self) -> Option<ServerInfo>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Mocap gateway client.
pub struct MocapClient {
    join_handle: Option<thread::JoinHandle<()>>,

    shutdown: Arc<AtomicBool>,

    connected: Arc<AtomicBool>,

    server_info: Arc<RwLock<Option<ServerInfo>>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MocapClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not start the receive thread: {0}")]
    ThreadError(std::io::Error),

    #[error("Could not connect to the mocap gateway within {0:?}")]
    ConnectTimeout(Duration),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MocapClient {
    /// Connect to the mocap gateway.
    ///
    /// Blocks until the gateway connects or `connect_timeout` elapses. `on_frame` is called from
    /// the client's background thread for every rigid body in every frame.
    pub fn new<F>(
        ctx: &zmq::Context,
        params: &NetParams,
        connect_timeout: Duration,
        mut on_frame: F,
    ) -> Result<Self, MocapClientError>
    where
        F: FnMut(&RigidBodyFrame) + Send + 'static,
    {
        let socket_options = SocketOptions {
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 100,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::SUB, socket_options, &params.mocap_endpoint)
            .map_err(MocapClientError::SocketError)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));
        let server_info = Arc::new(RwLock::new(None));

        let shutdown_clone = shutdown.clone();
        let connected_clone = connected.clone();
        let server_info_clone = server_info.clone();

        let join_handle = thread::Builder::new()
            .name("mocap_client".into())
            .spawn(move || {
                while !shutdown_clone.load(Ordering::Relaxed) {
                    connected_clone.store(socket.connected(), Ordering::Relaxed);

                    let msg_str = match socket.recv_string(0) {
                        Ok(Ok(s)) => s,
                        Ok(Err(_)) => {
                            warn!("Mocap gateway sent a non UTF-8 message");
                            continue;
                        }
                        Err(zmq::Error::EAGAIN) => continue,
                        Err(e) => {
                            warn!("Could not receive from the mocap gateway: {}", e);
                            continue;
                        }
                    };

                    match serde_json::from_str(&msg_str) {
                        Ok(MocapMsg::RigidBody(frame)) => on_frame(&frame),
                        Ok(MocapMsg::ServerInfo(info)) => {
                            let mut current = server_info_clone
                                .write()
                                .unwrap_or_else(PoisonError::into_inner);
                            if current.as_ref() != Some(&info) {
                                info!("Mocap server: {}", info);
                                *current = Some(info);
                            }
                        }
                        Err(e) => debug!("Could not parse mocap message: {}", e),
                    }
                }
            })
            .map_err(MocapClientError::ThreadError)?;

        let client = Self {
            join_handle: Some(join_handle),
            shutdown,
            connected,
            server_info,
        };

        // Wait for the first connection, dropping the client stops the thread if it never comes
        let start = Instant::now();
        while !client.connected() {
            if start.elapsed() > connect_timeout {
                return Err(MocapClientError::ConnectTimeout(connect_timeout));
            }
            thread::sleep(CONNECT_POLL_PERIOD);
        }

        info!("Connected to the mocap gateway at {}", params.mocap_endpoint);

        Ok(client)
    }
}

impl MocapSource for MocapClient {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn server_info(&self) -> Option<ServerInfo> {
        self.server_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for MocapClient {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(jh) = self.join_handle.take() {
            jh.join().ok();
        }
    }
}
