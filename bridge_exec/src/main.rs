//! Main bridge executable entry point.
//!
//! # Architecture
//!
//! - Initialise the session, logging and parameters
//! - Connect to the equipment, or start the simulated equipment with `--sim`
//! - Run the selected flight profile (see `bridge_lib::flight`), Ctrl-C lands the vehicle
//! - Report how the flight ended

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use log::{error, info};
use std::sync::Arc;
use structopt::StructOpt;

// Internal
use bridge_lib::{
    autopilot_client::AutopilotClient,
    cmd_chan::CommandChannel,
    flight::{Bridge, FlightProfile},
    mocap_client::{MocapClient, MocapSource},
    params::BridgeParams,
    pose_cache::PoseCache,
    sim::{SimAutopilot, SimMocap, SimMocapParams},
    tc_client::TcClient,
};
use comms_if::eqpt::autopilot::AutopilotLink;
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::{self, Session},
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(
    name = "bridge_exec",
    about = "Bridge between a motion capture system and a flight controller"
)]
struct Opt {
    /// Use the simulated autopilot and mocap instead of the gateways
    #[structopt(long)]
    sim: bool,

    /// Parameter file, relative to the params directory
    #[structopt(long, default_value = "bridge_exec.toml")]
    params: String,

    #[structopt(subcommand)]
    profile: ProfileCmd,
}

#[derive(Debug, StructOpt)]
enum ProfileCmd {
    /// Stream the position feed only, the vehicle is flown by the pilot
    FeedOnly,

    /// Take off, hover in place, then land
    Hover {
        /// Takeoff altitude in meters
        #[structopt(long, default_value = "0.5")]
        altitude: f64,

        /// Hover duration in seconds
        #[structopt(long, default_value = "10")]
        duration: f64,
    },

    /// Take off and follow the target
    Follow {
        /// Takeoff altitude in meters
        #[structopt(long, default_value = "0.5")]
        altitude: f64,
    },
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<()> {
    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    let opt = Opt::from_args();

    // Initialise session
    let session = Session::new("bridge_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Mocap Bridge Executable\n");
    info!(
        "Running on: {}",
        host::get_hostname().unwrap_or_else(|| "unknown host".into())
    );
    if let Some(epoch) = session::get_epoch() {
        info!("Session started at {}", epoch);
    }
    info!("Session directory: {:?}\n", session.session_root);
    info!("Options: {:?}", opt);

    // ---- LOAD PARAMETERS ----

    let params: BridgeParams =
        util::params::load(&opt.params).wrap_err("Could not load the bridge parameters")?;
    params
        .are_valid()
        .wrap_err("The bridge parameters are invalid")?;

    info!("Bridge parameters loaded");

    let profile = match opt.profile {
        ProfileCmd::FeedOnly => FlightProfile::FeedOnly,
        ProfileCmd::Hover { altitude, duration } => FlightProfile::Hover {
            altitude_m: altitude,
            duration_s: duration,
        },
        ProfileCmd::Follow { altitude } => FlightProfile::FollowTarget {
            altitude_m: altitude,
        },
    };

    // ---- INITIALISE EQUIPMENT ----

    let zmq_ctx = comms_if::net::zmq::Context::new();
    let cache = Arc::new(PoseCache::new());

    let (link, mocap): (Box<dyn AutopilotLink + Send>, Arc<dyn MocapSource>) = if opt.sim {
        info!("Using simulated equipment");

        let (link, handle) = SimAutopilot::new();
        handle.set_battery_pct(100);

        let cache_clone = cache.clone();
        let mocap = SimMocap::start(
            SimMocapParams {
                vehicle_id: params.bodies.vehicle,
                target_id: params.bodies.target,
                ..Default::default()
            },
            move |f| cache_clone.update_from_frame(f),
        )
        .wrap_err("Failed to start the simulated mocap")?;

        (Box::new(link), Arc::new(mocap))
    } else {
        let link = AutopilotClient::new(&zmq_ctx, &params.net)
            .wrap_err("Failed to initialise the AutopilotClient")?;
        info!("AutopilotClient initialised");

        let cache_clone = cache.clone();
        let mocap = MocapClient::new(
            &zmq_ctx,
            &params.net,
            params.tasks.mocap_connect_timeout(),
            move |f| cache_clone.update_from_frame(f),
        )
        .wrap_err("Failed to initialise the MocapClient")?;
        info!("MocapClient initialised");

        (Box::new(link), Arc::new(mocap))
    };

    let tc_client =
        TcClient::new(&zmq_ctx, &params.net).wrap_err("Failed to initialise the TcClient")?;
    info!("TcClient bound to {}", params.net.tc_endpoint);

    let chan = Arc::new(CommandChannel::new(
        link,
        params.safety.min_altitude_m,
        params.safety.max_altitude_m,
        params.tasks.battery_wait(),
    ));

    // ---- FLY ----

    let bridge = Bridge::new(params, cache, chan, mocap, Some(tc_client));

    let interrupt = bridge.interrupt();
    ctrlc::set_handler(move || interrupt.trigger("Operator interrupt"))
        .wrap_err("Failed to install the interrupt handler")?;

    let report = bridge.run(profile).wrap_err("The flight could not start")?;

    info!("Flight lasted {:.1} s", report.duration.as_secs_f64());
    info!(
        "Commands: {} sent, {} failed",
        report.stats.sent, report.stats.failed
    );
    for (name, ticks) in &report.task_ticks {
        info!("    {}: {} ticks", name, ticks);
    }

    match report.final_state.cause {
        Some(cause @ bridge_lib::safety::TerminationCause::FlightComplete) => {
            info!("{}", cause);
            Ok(())
        }
        Some(cause) => {
            error!("{}", cause);
            Err(eyre!("Flight ended abnormally: {}", cause))
        }
        None => Err(eyre!("Flight ended without a termination cause")),
    }
}
