//! # Control Loop Module
//!
//! The single thread of execution of the car. Each iteration:
//! - Waits for a command datagram for at most the listener's receive timeout
//! - Drops datagrams from any source other than the allowed address
//! - Decodes the datagram and applies it to the actuators
//! - Polls the failsafe, whether or not a datagram arrived
//!
//! The loop owns the actuator driver and failsafe, so every actuator write goes through it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fmt::Debug,
    net::IpAddr,
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};
use embedded_hal::digital::v2::OutputPin;
use log::{debug, info, trace, warn};
use serde::Serialize;

use comms_if::{
    net::{CmdListener, NetError, RECV_BUFFER_LEN},
    tc::{CmdPacket, DecodeError},
};
use crate::{
    act_drv::ActDriver,
    failsafe::Failsafe,
    hw::{pwm::RegisterBus, HwError},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Limit of the number of consecutive receive errors before the loop gives up on the socket.
pub const MAX_CONSEC_RECV_ERRORS: u64 = 50;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The control loop.
pub struct CtrlLoop<B, P> {
    act_drv: ActDriver<B, P>,

    failsafe: Failsafe,

    /// Textual form of the only address commands are accepted from.
    allowed_address: String,

    stats: LoopStats,

    num_consec_recv_errors: u64,
}

/// Counters kept over the life of the loop.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub num_iterations: u64,
    pub num_accepted: u64,
    pub num_rejected_source: u64,
    pub num_rejected_malformed: u64,

    /// Accepted packets whose sequence number was not newer than the previous one.
    pub num_out_of_order: u64,

    pub num_failsafe_trips: u64,

    /// Sequence number of the last accepted packet.
    pub last_seq: Option<u32>,

    /// The last accepted packet, saved with the stats to show what the car was last told to do.
    pub last_packet: Option<CmdPacket>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What happened to a received datagram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacketOutcome {
    /// The packet was applied to the actuators.
    Accepted(CmdPacket),

    /// The packet was dropped, the actuators are unchanged.
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// Sent from an address other than the allowed one.
    WrongSource(IpAddr),

    /// Not a valid command packet.
    Malformed(DecodeError),
}

/// Errors which stop the control loop.
#[derive(thiserror::Error, Debug)]
pub enum CtrlLoopError {
    #[error("Hardware fault: {0}")]
    Hw(#[from] HwError),

    #[error("Command socket failed too many times in a row, last error: {0}")]
    Net(#[from] NetError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<B, P> CtrlLoop<B, P>
where
    B: RegisterBus,
    P: OutputPin,
    P::Error: Debug
{
    pub fn new(act_drv: ActDriver<B, P>, failsafe: Failsafe, allowed_address: &str) -> Self {
        Self {
            act_drv,
            failsafe,
            allowed_address: allowed_address.to_string(),
            stats: LoopStats::default(),
            num_consec_recv_errors: 0,
        }
    }

    /// Run the loop until `running` is cleared.
    ///
    /// The actuators are not made safe on return, call [`CtrlLoop::shutdown`] for that.
    pub fn run(&mut self, listener: &CmdListener, running: &AtomicBool) -> Result<(), CtrlLoopError> {
        let mut buf = [0u8; RECV_BUFFER_LEN];

        info!(
            "Control loop running, accepting commands from {} (failsafe timeout {} ms)",
            self.allowed_address,
            self.failsafe.timeout().as_millis()
        );

        while running.load(Ordering::Relaxed) {
            self.step(listener, &mut buf)?;
        }

        info!("Control loop stopped after {} iterations", self.stats.num_iterations);

        Ok(())
    }

    /// Perform a single iteration of the loop.
    ///
    /// Returns the outcome of the datagram received during this iteration, if any.
    pub fn step(
        &mut self,
        listener: &CmdListener,
        buf: &mut [u8]
    ) -> Result<Option<PacketOutcome>, CtrlLoopError> {
        self.stats.num_iterations += 1;

        let outcome = match listener.recv(buf) {
            Ok(Some((len, src))) => {
                self.on_recv_ok();
                Some(self.handle_datagram(&buf[..len], src.ip(), Instant::now())?)
            },
            Ok(None) => {
                self.on_recv_ok();
                None
            },
            Err(e) => {
                self.on_recv_error(e)?;
                None
            }
        };

        self.poll_failsafe(Instant::now())?;

        Ok(outcome)
    }

    /// Filter, decode, and apply a single datagram received from `src` at `now`.
    ///
    /// Rejected datagrams are absorbed here, only a hardware fault is returned as an error.
    pub fn handle_datagram(
        &mut self,
        bytes: &[u8],
        src: IpAddr,
        now: Instant
    ) -> Result<PacketOutcome, HwError> {
        if src.to_string() != self.allowed_address {
            trace!("Dropped {} byte datagram from {}", bytes.len(), src);
            self.stats.num_rejected_source += 1;
            return Ok(PacketOutcome::Rejected(RejectReason::WrongSource(src)));
        }

        let pkt = match CmdPacket::decode(bytes) {
            Ok(p) => p,
            Err(e) => {
                debug!("Dropped malformed packet: {}", e);
                self.stats.num_rejected_malformed += 1;
                return Ok(PacketOutcome::Rejected(RejectReason::Malformed(e)));
            }
        };

        trace!(
            "RX: seq={}, steer={}, power={}, flags={:#06x}, enabled={}",
            pkt.seq,
            pkt.steer_pm,
            pkt.power_pm,
            pkt.flags,
            if pkt.enabled() { "ON" } else { "OFF" }
        );

        // Sequence numbers are only used for diagnostics, the newest datagram always wins
        if let Some(last) = self.stats.last_seq {
            if !is_newer_seq(last, pkt.seq) {
                debug!("Packet {} is not newer than the previous packet {}", pkt.seq, last);
                self.stats.num_out_of_order += 1;
            }
        }

        self.failsafe.on_accepted(now);
        self.act_drv.apply(pkt.steer_pm as i32, pkt.power_pm as i32, pkt.enabled())?;

        self.stats.num_accepted += 1;
        self.stats.last_seq = Some(pkt.seq);
        self.stats.last_packet = Some(pkt);

        Ok(PacketOutcome::Accepted(pkt))
    }

    /// A receive completed, with or without a datagram.
    fn on_recv_ok(&mut self) {
        self.num_consec_recv_errors = 0;
    }

    /// Count a failed receive. The error is returned once more than [`MAX_CONSEC_RECV_ERRORS`]
    /// receives in a row have failed, otherwise it is logged and absorbed.
    fn on_recv_error(&mut self, e: NetError) -> Result<(), NetError> {
        self.num_consec_recv_errors += 1;

        if self.num_consec_recv_errors > MAX_CONSEC_RECV_ERRORS {
            return Err(e);
        }

        warn!("{}", e);
        Ok(())
    }

    /// Poll the failsafe at `now`. Returns true if it tripped.
    pub fn poll_failsafe(&mut self, now: Instant) -> Result<bool, HwError> {
        let tripped = self.failsafe.poll(now, &mut self.act_drv)?;

        if tripped {
            self.stats.num_failsafe_trips += 1;
        }

        Ok(tripped)
    }

    /// Disarm the drive and centre the steering ready for the hardware to be released.
    pub fn shutdown(&mut self) -> Result<(), HwError> {
        info!("Making actuators safe");
        self.act_drv.force_safe()
    }

    pub fn act_drv(&self) -> &ActDriver<B, P> {
        &self.act_drv
    }

    pub fn failsafe(&self) -> &Failsafe {
        &self.failsafe
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Returns true if `seq` is after `last`, allowing for the counter wrapping.
pub fn is_newer_seq(last: u32, seq: u32) -> bool {
    let diff = seq.wrapping_sub(last);
    diff != 0 && diff < (1 << 31)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{
        net::{Ipv4Addr, SocketAddr, UdpSocket},
        time::Duration,
    };
    use comms_if::tc::FLAG_ENABLE;
    use crate::{
        act_drv::{ActTarget, Params},
        failsafe::FailsafeParams,
        hw::{dout::DigitalOutputBank, pwm::PwmDevice, sim::{SimBus, SimPin}},
    };

    const ALLOWED: &str = "192.168.0.187";

    fn allowed_ip() -> IpAddr {
        ALLOWED.parse().unwrap()
    }

    fn ctrl_loop_with(allowed: &str) -> CtrlLoop<SimBus, SimPin> {
        let dout = DigitalOutputBank::new(
            SimPin::default(),
            SimPin::default(),
            SimPin::default()
        ).unwrap();
        let pwm = PwmDevice::open(SimBus::new()).unwrap();
        let act_drv = ActDriver::new(pwm, dout, Params::default()).unwrap();

        CtrlLoop::new(act_drv, Failsafe::new(&FailsafeParams::default()), allowed)
    }

    fn ctrl_loop() -> CtrlLoop<SimBus, SimPin> {
        ctrl_loop_with(ALLOWED)
    }

    fn packet(seq: u32, steer_pm: i16, power_pm: i16, flags: u16) -> [u8; 16] {
        CmdPacket { seq, steer_pm, power_pm, flags, reserved: 0 }.encode()
    }

    fn snapshot(cl: &CtrlLoop<SimBus, SimPin>) -> (ActTarget, Vec<u8>) {
        let regs = (0..=255u8).map(|r| cl.act_drv().pwm().bus().reg(r)).collect();
        (*cl.act_drv().target(), regs)
    }

    #[test]
    fn test_is_newer_seq() {
        assert!(is_newer_seq(1, 2));
        assert!(!is_newer_seq(2, 2));
        assert!(!is_newer_seq(5, 3));
        assert!(is_newer_seq(u32::MAX, 0));
        assert!(!is_newer_seq(0, u32::MAX));
    }

    #[test]
    fn test_accepted_packet_is_applied() {
        let mut cl = ctrl_loop();
        let now = Instant::now();

        let outcome = cl
            .handle_datagram(&packet(1, 1000, 500, FLAG_ENABLE), allowed_ip(), now)
            .unwrap();

        assert!(matches!(outcome, PacketOutcome::Accepted(p) if p.seq == 1));
        assert!(cl.act_drv().is_armed());
        assert_eq!(cl.act_drv().target().steer_pulse_us, 2200.0);
        assert_eq!(cl.act_drv().target().drive_duty, 0.425);
        assert_eq!(cl.failsafe().last_accepted_at(), Some(now));
        assert_eq!(cl.stats().num_accepted, 1);
        assert_eq!(cl.stats().last_packet.map(|p| p.power_pm), Some(500));
    }

    #[test]
    fn test_wrong_length_is_dropped() {
        let mut cl = ctrl_loop();
        let before = snapshot(&cl);

        let outcome = cl
            .handle_datagram(&packet(1, 0, 500, FLAG_ENABLE)[..15], allowed_ip(), Instant::now())
            .unwrap();

        assert_eq!(
            outcome,
            PacketOutcome::Rejected(RejectReason::Malformed(DecodeError::WrongLength(15)))
        );
        assert_eq!(snapshot(&cl), before);
        assert_eq!(cl.failsafe().last_accepted_at(), None);
        assert_eq!(cl.stats().num_rejected_malformed, 1);
    }

    #[test]
    fn test_bad_magic_is_dropped() {
        let mut cl = ctrl_loop();
        cl.handle_datagram(&packet(1, 200, 600, FLAG_ENABLE), allowed_ip(), Instant::now())
            .unwrap();
        let before = snapshot(&cl);

        let mut bytes = packet(2, -900, -900, 0);
        bytes[0] = b'X';

        let outcome = cl.handle_datagram(&bytes, allowed_ip(), Instant::now()).unwrap();

        assert!(matches!(
            outcome,
            PacketOutcome::Rejected(RejectReason::Malformed(DecodeError::BadMagic(_)))
        ));
        assert_eq!(snapshot(&cl), before);
        assert!(cl.act_drv().is_armed());
    }

    #[test]
    fn test_disabled_packet_disarms() {
        let mut cl = ctrl_loop();
        let now = Instant::now();

        cl.handle_datagram(&packet(1, 0, 800, FLAG_ENABLE), allowed_ip(), now).unwrap();
        assert!(cl.act_drv().is_armed());

        cl.handle_datagram(&packet(2, 0, 800, 0x0000), allowed_ip(), now).unwrap();

        assert!(!cl.act_drv().is_armed());
        assert_eq!(cl.act_drv().target().drive_duty, 0.0);
        assert!(!cl.act_drv().dout().states().standby);
    }

    #[test]
    fn test_other_source_is_dropped() {
        let mut cl = ctrl_loop();
        let now = Instant::now();
        let bytes = packet(1, -500, 400, FLAG_ENABLE);

        cl.handle_datagram(&bytes, allowed_ip(), now).unwrap();
        let after_first = snapshot(&cl);

        let intruder: IpAddr = "192.168.0.50".parse().unwrap();
        let outcome = cl
            .handle_datagram(&packet(2, 1000, -1000, FLAG_ENABLE), intruder, now)
            .unwrap();

        assert_eq!(outcome, PacketOutcome::Rejected(RejectReason::WrongSource(intruder)));
        assert_eq!(snapshot(&cl), after_first);
        assert_eq!(cl.stats().num_accepted, 1);
        assert_eq!(cl.stats().last_packet.map(|p| p.seq), Some(1));
        assert_eq!(cl.stats().num_rejected_source, 1);
    }

    #[test]
    fn test_failsafe_after_command_loss() {
        let mut cl = ctrl_loop();
        let t0 = Instant::now();

        cl.handle_datagram(&packet(1, -1000, 500, FLAG_ENABLE), allowed_ip(), t0).unwrap();
        assert_eq!(cl.act_drv().target().steer_pulse_us, 1400.0);

        // Polled every 20 ms with no traffic
        let mut tripped_at = None;
        for i in 1..=15u64 {
            let now = t0 + Duration::from_millis(20 * i);
            if cl.poll_failsafe(now).unwrap() {
                tripped_at = Some(20 * i);
                break;
            }
        }

        let tripped_at = tripped_at.expect("failsafe did not trip");
        assert!(tripped_at > 250 && tripped_at <= 270, "tripped at {} ms", tripped_at);

        let target = cl.act_drv().target();
        assert_eq!(target.steer_pulse_us, 1800.0);
        assert_eq!(target.drive_duty, 0.0);
        assert!(!target.armed);
        assert!(!cl.act_drv().dout().states().standby);
        assert_eq!(cl.stats().num_failsafe_trips, 1);

        // Idempotent until the next command
        let after = snapshot(&cl);
        assert!(!cl.poll_failsafe(t0 + Duration::from_millis(1000)).unwrap());
        assert_eq!(snapshot(&cl), after);
    }

    #[test]
    fn test_out_of_order_still_applied() {
        let mut cl = ctrl_loop();
        let now = Instant::now();

        cl.handle_datagram(&packet(10, 0, 500, FLAG_ENABLE), allowed_ip(), now).unwrap();
        cl.handle_datagram(&packet(9, 0, -500, FLAG_ENABLE), allowed_ip(), now).unwrap();

        assert_eq!(cl.stats().num_out_of_order, 1);
        assert_eq!(cl.stats().last_seq, Some(9));
        assert!(!cl.act_drv().target().forward);
    }

    #[test]
    fn test_hw_fault_is_returned() {
        let dout = DigitalOutputBank::new(
            SimPin::default(),
            SimPin::default(),
            SimPin::default()
        ).unwrap();

        // Enough transfers for open, configure and the initial safe state
        let pwm = PwmDevice::open(SimBus::new().fail_after(15)).unwrap();
        let act_drv = ActDriver::new(pwm, dout, Params::default()).unwrap();
        let mut cl = CtrlLoop::new(act_drv, Failsafe::new(&FailsafeParams::default()), ALLOWED);

        let res = cl.handle_datagram(&packet(1, 0, 500, FLAG_ENABLE), allowed_ip(), Instant::now());
        assert!(matches!(res, Err(HwError::ShortTransfer { .. })));
    }

    #[test]
    fn test_step_over_loopback() {
        let listener = CmdListener::bind(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            Duration::from_millis(20)
        ).unwrap();
        let dest = listener.local_addr().unwrap();
        let mut cl = ctrl_loop_with("127.0.0.1");
        let mut buf = [0u8; RECV_BUFFER_LEN];

        // No traffic, the step returns after the receive timeout
        assert_eq!(cl.step(&listener, &mut buf).unwrap(), None);

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sender.send_to(&packet(1, 0, 1000, FLAG_ENABLE), dest).unwrap();

        let mut outcome = None;
        for _ in 0..50 {
            outcome = cl.step(&listener, &mut buf).unwrap();
            if outcome.is_some() {
                break;
            }
        }

        assert!(matches!(outcome, Some(PacketOutcome::Accepted(_))));
        assert!(cl.act_drv().is_armed());
        assert_eq!(cl.act_drv().target().drive_duty, 0.85);

        cl.shutdown().unwrap();
        assert!(!cl.act_drv().is_armed());
        assert_eq!(cl.act_drv().target().steer_pulse_us, 1800.0);
    }

    fn recv_error() -> NetError {
        NetError::Recv(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))
    }

    #[test]
    fn test_recv_errors_fatal_after_limit() {
        let mut cl = ctrl_loop();

        for _ in 0..MAX_CONSEC_RECV_ERRORS {
            assert!(cl.on_recv_error(recv_error()).is_ok());
        }

        assert!(matches!(cl.on_recv_error(recv_error()), Err(NetError::Recv(_))));
    }

    #[test]
    fn test_good_recv_resets_error_count() {
        let mut cl = ctrl_loop();

        for _ in 0..MAX_CONSEC_RECV_ERRORS {
            cl.on_recv_error(recv_error()).unwrap();
        }
        cl.on_recv_ok();

        for _ in 0..MAX_CONSEC_RECV_ERRORS {
            assert!(cl.on_recv_error(recv_error()).is_ok());
        }
        assert!(cl.on_recv_error(recv_error()).is_err());
    }

    #[test]
    fn test_run_exits_when_stopped() {
        let listener = CmdListener::bind(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            Duration::from_millis(5)
        ).unwrap();
        let mut cl = ctrl_loop();
        let running = AtomicBool::new(false);

        cl.run(&listener, &running).unwrap();
        assert_eq!(cl.stats().num_iterations, 0);
    }
}
