//! # Telecommand Module
//!
//! Defines the remote control command packet sent from the ground (PC) to the car, and the codec
//! between the packet and its wire representation.
//!
//! ## Wire format
//!
//! One UDP datagram carries exactly one packet of [`PACKET_LEN`] bytes. All multi-byte fields are
//! big-endian:
//!
//! | Offset | Size | Field      |
//! |--------|------|------------|
//! | 0      | 4    | magic      |
//! | 4      | 4    | sequence   |
//! | 8      | 2    | steer (‰)  |
//! | 10     | 2    | power (‰)  |
//! | 12     | 2    | flags      |
//! | 14     | 2    | reserved   |

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Length of a command packet on the wire.
pub const PACKET_LEN: usize = 16;

/// Protocol version tag at the start of every packet.
pub const MAGIC: [u8; 4] = *b"IRL1";

/// Flag bit requesting the car to actuate the drive motor.
pub const FLAG_ENABLE: u16 = 0x0001;

/// Full scale of the permille fields.
pub const PERMILLE_FULL_SCALE: i16 = 1000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A decoded remote control command.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CmdPacket {
    /// Monotonic counter set by the sender. Advisory only.
    pub seq: u32,

    /// Steering demand, -1000 (full left) to 1000 (full right). Values outside this range are
    /// valid on the wire.
    pub steer_pm: i16,

    /// Power demand, -1000 (full reverse) to 1000 (full forward).
    pub power_pm: i16,

    /// Flag bits, see [`FLAG_ENABLE`].
    pub flags: u16,

    /// Unused.
    pub reserved: u16,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Reasons a datagram is not a valid command packet.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Expected a 16 byte packet, found {0} bytes")]
    WrongLength(usize),

    #[error("Packet magic {0:02x?} does not match the expected tag")]
    BadMagic([u8; 4]),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CmdPacket {
    /// Decode a single datagram into a packet.
    ///
    /// Only the framing is checked here (length and magic), the permille fields are returned as
    /// sent.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != PACKET_LEN {
            return Err(DecodeError::WrongLength(bytes.len()));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }

        Ok(Self {
            seq: BigEndian::read_u32(&bytes[4..8]),
            steer_pm: BigEndian::read_i16(&bytes[8..10]),
            power_pm: BigEndian::read_i16(&bytes[10..12]),
            flags: BigEndian::read_u16(&bytes[12..14]),
            reserved: BigEndian::read_u16(&bytes[14..16]),
        })
    }

    /// Encode this packet into its wire representation.
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];

        buf[0..4].copy_from_slice(&MAGIC);
        BigEndian::write_u32(&mut buf[4..8], self.seq);
        BigEndian::write_i16(&mut buf[8..10], self.steer_pm);
        BigEndian::write_i16(&mut buf[10..12], self.power_pm);
        BigEndian::write_u16(&mut buf[12..14], self.flags);
        BigEndian::write_u16(&mut buf[14..16], self.reserved);

        buf
    }

    /// Returns true if the sender requests the drive to be actuated.
    pub fn enabled(&self) -> bool {
        self.flags & FLAG_ENABLE != 0
    }
}
