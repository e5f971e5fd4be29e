//! # Network Module
//!
//! This module provides the UDP command listener used by the car. Commands are connectionless,
//! one datagram per command, and the listener waits for at most a bounded time on each receive so
//! that the caller can keep running periodic checks when no traffic arrives.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io::ErrorKind,
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    time::Duration,
};
use log::info;
use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Size of the receive buffer the caller should provide. Larger than any valid packet so that
/// oversized datagrams are seen at their real length and rejected rather than truncated.
pub const RECV_BUFFER_LEN: usize = 256;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NetParams {
    /// UDP port to listen for commands on, bound on all interfaces.
    pub listen_port: u16,

    /// Textual form of the only source address commands are accepted from.
    pub allowed_address: String,

    /// Maximum time a single receive may block for.
    ///
    /// Units: milliseconds
    pub recv_timeout_ms: u64,
}

/// UDP socket receiving command datagrams with a bounded wait.
pub struct CmdListener {
    socket: UdpSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error("Could not bind the command socket to {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    #[error("A zero receive timeout would make the listener non-blocking")]
    ZeroTimeout,

    #[error("Could not set the receive timeout: {0}")]
    SetTimeout(std::io::Error),

    #[error("Could not receive from the command socket: {0}")]
    Recv(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for NetParams {
    fn default() -> Self {
        Self {
            listen_port: 6001,
            allowed_address: String::from("192.168.0.187"),
            recv_timeout_ms: 20,
        }
    }
}

impl CmdListener {
    /// Bind a new listener on all interfaces at the port given in the parameters.
    pub fn new(params: &NetParams) -> Result<Self, NetError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, params.listen_port));
        Self::bind(addr, Duration::from_millis(params.recv_timeout_ms))
    }

    /// Bind a new listener to a specific address.
    pub fn bind(addr: SocketAddr, recv_timeout: Duration) -> Result<Self, NetError> {
        // A zero timeout is rejected by the socket, catch it here to give a clearer error
        if recv_timeout == Duration::from_secs(0) {
            return Err(NetError::ZeroTimeout);
        }

        let socket = UdpSocket::bind(addr)
            .map_err(|e| NetError::Bind(addr, e))?;

        socket.set_read_timeout(Some(recv_timeout))
            .map_err(NetError::SetTimeout)?;

        info!(
            "Command listener bound to {} (recv timeout {} ms)",
            socket.local_addr().unwrap_or(addr),
            recv_timeout.as_millis()
        );

        Ok(Self { socket })
    }

    /// Wait for a single datagram for at most the receive timeout.
    ///
    /// Returns `Ok(None)` if the wait elapsed (or was interrupted by a signal) with no datagram,
    /// otherwise the number of bytes written into `buf` and the sender's address.
    pub fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, NetError> {
        match self.socket.recv_from(buf) {
            Ok((len, src)) => Ok(Some((len, src))),
            Err(e) => match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => Ok(None),
                _ => Err(NetError::Recv(e)),
            },
        }
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
