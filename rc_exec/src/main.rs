//! Main RC car executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Load parameters and initialise the session and logging
//!     - Bring up the motor driver lines (all low), then the PWM controller (drive disarmed,
//!       steering centred), then bind the command socket
//!     - Main loop, until Ctrl-C or a fatal error:
//!         - Wait for a command for at most the receive timeout
//!         - Filter, decode and apply the command
//!         - Poll the failsafe
//!     - Make the actuators safe and save the loop statistics

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{Report, eyre::WrapErr};
use embedded_hal::digital::v2::OutputPin;
use log::{debug, error, info};
use std::{
    fmt::Debug,
    path::PathBuf,
    sync::{Arc, atomic::{AtomicBool, Ordering}},
};
use structopt::StructOpt;

// Internal
use comms_if::net::CmdListener;
use rc_lib::{
    act_drv::ActDriver,
    ctrl_loop::CtrlLoop,
    failsafe::Failsafe,
    hw::{
        dout::DigitalOutputBank,
        pwm::{PwmDevice, RegisterBus},
        sim::{SimBus, SimPin},
    },
    params::RcExecParams,
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(StructOpt, Debug)]
#[structopt(name = "rc_exec", about = "Drive the RC car from UDP commands")]
struct Opt {
    /// TOML file overriding any of the default parameters
    #[structopt(short, long, parse(from_os_str))]
    params: Option<PathBuf>,

    /// Minimum level of messages to log (info, debug or trace)
    #[structopt(short, long, default_value = "debug")]
    log_level: LevelFilter,

    /// Use simulated hardware even when running on the car
    #[structopt(long)]
    sim: bool,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "rc_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(opt.log_level, &session)
        .wrap_err("Failed to initialise logging")?;

    info!("RC Car Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: RcExecParams = match opt.params {
        Some(ref path) => util::params::load(path)
            .wrap_err_with(|| format!("Could not load params from {:?}", path))?,
        None => {
            info!("No parameter file given, using the default parameters");
            RcExecParams::default()
        }
    };

    params.are_valid().wrap_err("Invalid parameters")?;

    debug!("Parameters: {:#?}", params);

    // ---- SHUTDOWN SIGNAL ----

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);

    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    }).wrap_err("Failed to set the shutdown signal handler")?;

    // ---- RUN ----

    let res = if opt.sim {
        info!("Using simulated hardware");
        run_sim(&params, &running, &session)
    }
    else {
        run_on_target(&params, &running, &session)
    };

    if let Err(ref e) = res {
        error!("Fatal error: {:#}", e);
    }

    info!("End of execution");

    session.exit();

    res
}

/// Run with the Raspberry Pi's I2C bus and GPIO lines.
#[cfg(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64")))]
fn run_on_target(
    params: &RcExecParams,
    running: &AtomicBool,
    session: &Session
) -> Result<(), Report> {
    use rc_lib::hw::pi::{open_output_lines, PiI2cBus};

    // Lines first so the motor driver is held in standby while the PWM controller starts
    let (standby, dir_a, dir_b) = open_output_lines(
        params.hw.gpio_stby,
        params.hw.gpio_dir_a,
        params.hw.gpio_dir_b
    ).wrap_err("Failed to open the motor driver lines")?;
    let dout = DigitalOutputBank::new(standby, dir_a, dir_b)
        .wrap_err("Failed to initialise the motor driver lines")?;

    let bus = PiI2cBus::open(params.hw.i2c_bus, params.hw.pca9685_address)
        .wrap_err("Failed to open the PWM controller bus")?;

    run(bus, dout, params, running, session)
}

/// Run with simulated hardware, the car cannot be driven from this host.
#[cfg(not(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64"))))]
fn run_on_target(
    params: &RcExecParams,
    running: &AtomicBool,
    session: &Session
) -> Result<(), Report> {
    log::warn!("Not running on a Raspberry Pi, falling back to simulated hardware");
    run_sim(params, running, session)
}

fn run_sim(
    params: &RcExecParams,
    running: &AtomicBool,
    session: &Session
) -> Result<(), Report> {
    let dout = DigitalOutputBank::new(SimPin::default(), SimPin::default(), SimPin::default())
        .wrap_err("Failed to initialise the simulated motor driver lines")?;

    run(SimBus::new(), dout, params, running, session)
}

/// Bring up the actuators and the command socket, then run the control loop until stopped.
///
/// The actuators are always made safe before returning, and the loop statistics saved to the
/// session.
fn run<B, P>(
    bus: B,
    dout: DigitalOutputBank<P>,
    params: &RcExecParams,
    running: &AtomicBool,
    session: &Session
) -> Result<(), Report>
where
    B: RegisterBus,
    P: OutputPin,
    P::Error: Debug
{
    // ---- INITIALISE ACTUATORS ----

    let pwm = PwmDevice::open(bus)
        .wrap_err("Failed to open the PWM controller")?;
    let act_drv = ActDriver::new(pwm, dout, params.act.clone())
        .wrap_err("Failed to initialise the actuator driver")?;

    info!("Actuators initialised, drive disarmed and steering centred");

    // ---- INITIALISE NETWORK ----

    let listener = CmdListener::new(&params.net)
        .wrap_err("Failed to bind the command socket")?;

    info!("Listening for commands on port {}", params.net.listen_port);

    // ---- MAIN LOOP ----

    let mut ctrl_loop = CtrlLoop::new(
        act_drv,
        Failsafe::new(&params.failsafe),
        &params.net.allowed_address
    );

    let loop_res = ctrl_loop.run(&listener, running);

    // ---- SHUTDOWN ----

    if let Err(e) = ctrl_loop.shutdown() {
        error!("Could not make the actuators safe: {}", e);
    }

    let stats = *ctrl_loop.stats();
    info!(
        "{} packets accepted, {} failsafe trips",
        stats.num_accepted, stats.num_failsafe_trips
    );
    session.save("loop_stats.json", stats);

    loop_res.wrap_err("Control loop stopped on a fatal error")
}
