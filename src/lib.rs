#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::fmt;

pub mod addresses;
pub mod binding;
pub mod callbacks;
pub mod config;
pub mod driver;
mod espnow;
pub mod host;
mod log;
pub mod packet;
pub mod peers;
pub mod ring;
#[cfg(test)]
mod testutil;

pub use addresses::{Key, MacAddr};
pub use callbacks::Stats;
pub use config::{Config, ConfigUpdate};
pub use driver::{Driver, EspError, Interface, PeerInfo, PeerNum, SendStatus};
pub use espnow::{EspNow, Message, Peers, RecvBuffers};
pub use host::{Host, RecvCallback, Scheduler};
pub use peers::{LmkUpdate, PeerArgs};

/// Maximum payload of one ESP-NOW datagram
pub const MAX_DATA_LEN: usize = 250;
pub const ETH_ALEN: usize = 6;
/// Length of primary and local master keys
pub const KEY_LEN: usize = 16;
pub const MAX_TOTAL_PEER_NUM: usize = 20;
pub const MAX_ENCRYPT_PEER_NUM: usize = 6;
/// Highest Wi-Fi channel a peer can be bound to
pub const MAX_CHANNEL: u8 = 13;

/// First byte of every record in the receive buffer
pub const MAGIC: u8 = 0x99;
/// Size of the largest record in the receive buffer
pub const MAX_PACKET_LEN: usize = packet::FORMAT.max_packet_len();

/// `errno` reported when an operation would have to block
pub const EAGAIN: i32 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The interface is not active
    NotInitialized,
    InvalidArgument(&'static str),
    /// The receive buffer does not hold a well-formed record
    BufferIntegrity,
    /// The driver's transmit queue is full, try again later
    WouldBlock,
    /// Transmit statuses did not arrive in time
    SendTimeout,
    Driver(EspError),
}

impl Error {
    /// OS error number to raise for this error. `None` for errors that are reported as value
    /// errors instead.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::NotInitialized => Some(EspError::ESPNOW_NOT_INIT.code()),
            Error::WouldBlock => Some(EAGAIN),
            Error::Driver(e) => Some(e.code()),
            Error::InvalidArgument(_) | Error::BufferIntegrity | Error::SendTimeout => None,
        }
    }
}

impl From<EspError> for Error {
    fn from(e: EspError) -> Self {
        match e {
            EspError::ESPNOW_NO_MEM => Error::WouldBlock,
            EspError::ESPNOW_NOT_INIT => Error::NotInitialized,
            e => Error::Driver(e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotInitialized => f.write_str("ESP-NOW not initialized"),
            Error::InvalidArgument(msg) => f.write_str(msg),
            Error::BufferIntegrity => f.write_str("buffer error"),
            Error::WouldBlock => f.write_str("transmit queue full"),
            Error::SendTimeout => f.write_str("send timeout on flush"),
            Error::Driver(e) => write!(f, "driver error {}", e),
        }
    }
}

impl core::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_errors_map_to_kinds() {
        assert_eq!(Error::from(EspError::ESPNOW_NO_MEM), Error::WouldBlock);
        assert_eq!(Error::from(EspError::ESPNOW_NOT_INIT), Error::NotInitialized);
        assert_eq!(
            Error::from(EspError::ESPNOW_EXIST),
            Error::Driver(EspError::ESPNOW_EXIST)
        );
    }

    #[test]
    fn errno_values() {
        assert_eq!(Error::WouldBlock.errno(), Some(EAGAIN));
        assert_eq!(Error::NotInitialized.errno(), Some(0x3001));
        assert_eq!(Error::Driver(EspError::ESPNOW_FULL).errno(), Some(0x3004));
        assert_eq!(Error::SendTimeout.errno(), None);
    }

    #[test]
    fn record_sizes() {
        #[cfg(feature = "rssi")]
        assert_eq!(MAX_PACKET_LEN, 7 + 6 + 250);
        #[cfg(not(feature = "rssi"))]
        assert_eq!(MAX_PACKET_LEN, 2 + 6 + 250);
    }
}
