//! Simple remote control sender
//!
//! Sends fixed steer/power commands to the car at a constant rate, useful for bench testing the
//! car without a wheel and pedals attached.

use std::{
    net::{SocketAddr, UdpSocket},
    thread,
    time::{Duration, Instant},
};
use structopt::StructOpt;

use comms_if::tc::{CmdPacket, FLAG_ENABLE};

#[derive(StructOpt, Debug)]
#[structopt(name = "test_rc_sender", about = "Send constant RC commands to the car")]
struct Opt {
    /// IP address of the car
    ip: String,

    /// UDP port the car listens on
    #[structopt(short, long, default_value = "6001")]
    port: u16,

    /// Send rate in Hz
    #[structopt(long, default_value = "20")]
    rate_hz: f64,

    /// Steering demand in permille (-1000 = full left)
    #[structopt(short, long, default_value = "0", allow_hyphen_values = true)]
    steer: i16,

    /// Power demand in permille (-1000 = full reverse)
    #[structopt(short = "w", long, default_value = "0", allow_hyphen_values = true)]
    power: i16,

    /// Send with the enable flag cleared
    #[structopt(long)]
    disable: bool,

    /// Stop after this many seconds, 0 to run until interrupted
    #[structopt(short, long, default_value = "0")]
    duration_s: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    if !(opt.rate_hz > 0.0) {
        return Err("rate must be positive".into());
    }

    let dest: SocketAddr = format!("{}:{}", opt.ip, opt.port).parse()?;
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let period = Duration::from_secs_f64(1.0 / opt.rate_hz);

    let mut pkt = CmdPacket {
        seq: 0,
        steer_pm: opt.steer,
        power_pm: opt.power,
        flags: if opt.disable { 0 } else { FLAG_ENABLE },
        reserved: 0,
    };

    println!(
        "Sending to {} at {:.0} Hz (steer {}, power {}, {}). Ctrl+C to stop.",
        dest,
        opt.rate_hz,
        pkt.steer_pm,
        pkt.power_pm,
        if pkt.enabled() { "enabled" } else { "disabled" }
    );

    let start = Instant::now();

    loop {
        if opt.duration_s > 0.0 && start.elapsed().as_secs_f64() >= opt.duration_s {
            break;
        }

        let cycle_start = Instant::now();

        if let Err(e) = socket.send_to(&pkt.encode(), dest) {
            eprintln!("could not send: {}", e);
        }
        pkt.seq = pkt.seq.wrapping_add(1);

        if let Some(d) = period.checked_sub(cycle_start.elapsed()) {
            thread::sleep(d);
        }
    }

    println!("Sent {} packets", pkt.seq);

    Ok(())
}
