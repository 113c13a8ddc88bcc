//! Seam to the vendor ESP-NOW driver
//!
//! Usually, you don't need to use this module directly besides implementing [`Driver`] for
//! your platform. The [`crate::EspNow`] interface drives it.

use core::fmt;

use crate::addresses::{Key, MacAddr};
use crate::callbacks::{RxHandler, TxHandler};

pub mod rssi;

/// Status code returned by the vendor driver. `0` is success.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EspError(pub i32);

impl EspError {
    pub const FAIL: EspError = EspError(-1);
    pub const ERR_NOT_SUPPORTED: EspError = EspError(0x106);

    pub const ESPNOW_BASE: i32 = 0x3000;
    pub const ESPNOW_NOT_INIT: EspError = EspError(Self::ESPNOW_BASE + 1);
    pub const ESPNOW_ARG: EspError = EspError(Self::ESPNOW_BASE + 2);
    pub const ESPNOW_NO_MEM: EspError = EspError(Self::ESPNOW_BASE + 3);
    pub const ESPNOW_FULL: EspError = EspError(Self::ESPNOW_BASE + 4);
    pub const ESPNOW_NOT_FOUND: EspError = EspError(Self::ESPNOW_BASE + 5);
    pub const ESPNOW_INTERNAL: EspError = EspError(Self::ESPNOW_BASE + 6);
    pub const ESPNOW_EXIST: EspError = EspError(Self::ESPNOW_BASE + 7);
    pub const ESPNOW_IF: EspError = EspError(Self::ESPNOW_BASE + 8);

    pub fn code(&self) -> i32 {
        self.0
    }

    /// Converts a raw driver return value, where 0 means success.
    pub fn check(code: i32) -> Result<(), EspError> {
        if code == 0 { Ok(()) } else { Err(EspError(code)) }
    }

    fn name(&self) -> Option<&'static str> {
        Some(match *self {
            Self::FAIL => "ESP_FAIL",
            Self::ERR_NOT_SUPPORTED => "ESP_ERR_NOT_SUPPORTED",
            Self::ESPNOW_NOT_INIT => "ESP_ERR_ESPNOW_NOT_INIT",
            Self::ESPNOW_ARG => "ESP_ERR_ESPNOW_ARG",
            Self::ESPNOW_NO_MEM => "ESP_ERR_ESPNOW_NO_MEM",
            Self::ESPNOW_FULL => "ESP_ERR_ESPNOW_FULL",
            Self::ESPNOW_NOT_FOUND => "ESP_ERR_ESPNOW_NOT_FOUND",
            Self::ESPNOW_INTERNAL => "ESP_ERR_ESPNOW_INTERNAL",
            Self::ESPNOW_EXIST => "ESP_ERR_ESPNOW_EXIST",
            Self::ESPNOW_IF => "ESP_ERR_ESPNOW_IF",
            _ => return None,
        })
    }
}

impl fmt::Debug for EspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "EspError({:#x})", self.0),
        }
    }
}

impl fmt::Display for EspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of one transmission, as reported to the send callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendStatus {
    Success,
    Fail,
}

/// Wi-Fi interface a peer is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Interface {
    #[default]
    Station = 0,
    Ap = 1,
}

impl TryFrom<u8> for Interface {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Interface::Station),
            1 => Ok(Interface::Ap),
            _ => Err(crate::Error::InvalidArgument("ifidx must be 0 (STA) or 1 (AP)")),
        }
    }
}

/// A peer entry of the driver's peer list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerInfo {
    pub peer_addr: MacAddr,
    /// Local master key, only meaningful when `encrypt` is set
    pub lmk: Key,
    /// Wi-Fi channel, 0 means the current channel
    pub channel: u8,
    pub ifidx: Interface,
    pub encrypt: bool,
}

impl PeerInfo {
    /// Entry with all settings at their defaults: no key, current channel, station interface
    pub fn new(peer_addr: MacAddr) -> Self {
        Self {
            peer_addr,
            lmk: [0; crate::KEY_LEN],
            channel: 0,
            ifidx: Interface::Station,
            encrypt: false,
        }
    }
}

/// Peer numbers as counted by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerNum {
    pub total: usize,
    pub encrypted: usize,
}

/// The vendor ESP-NOW driver.
///
/// Implementations wrap the platform SDK. Callbacks handed over through
/// [`Driver::register_recv_cb`] and [`Driver::register_send_cb`] are called from the driver
/// task and must be dropped on unregistration: once `unregister_recv_cb` returns, the
/// [`RxHandler`] may no longer be called.
pub trait Driver: Send {
    fn init(&mut self) -> Result<(), EspError>;

    /// Shuts the driver down. Also clears the peer list.
    fn deinit(&mut self) -> Result<(), EspError>;

    fn register_recv_cb(&mut self, handler: RxHandler) -> Result<(), EspError>;

    fn unregister_recv_cb(&mut self) -> Result<(), EspError>;

    fn register_send_cb(&mut self, handler: TxHandler) -> Result<(), EspError>;

    fn unregister_send_cb(&mut self) -> Result<(), EspError>;

    /// Queues `data` for transmission to `peer`, or to every registered peer when `None`.
    ///
    /// Every resulting unicast transmission is later reported through the send callback.
    fn send(&mut self, peer: Option<&MacAddr>, data: &[u8]) -> Result<(), EspError>;

    fn set_pmk(&mut self, pmk: &Key) -> Result<(), EspError>;

    /// Fails with [`EspError::ESPNOW_EXIST`] if the peer is already registered.
    fn add_peer(&mut self, peer: &PeerInfo) -> Result<(), EspError>;

    fn mod_peer(&mut self, peer: &PeerInfo) -> Result<(), EspError>;

    fn del_peer(&mut self, peer_addr: &MacAddr) -> Result<(), EspError>;

    fn get_peer(&self, peer_addr: &MacAddr) -> Result<PeerInfo, EspError>;

    /// Iterates the peer list, restarting at the first entry when `from_head` is set.
    ///
    /// Broadcast and multicast peers are skipped. Fails with [`EspError::ESPNOW_NOT_FOUND`]
    /// past the last entry.
    fn fetch_peer(&mut self, from_head: bool) -> Result<PeerInfo, EspError>;

    fn peer_num(&self) -> Result<PeerNum, EspError>;

    /// Sets the PHY rate used for ESP-NOW frames on `ifc`.
    fn set_rate(&mut self, ifc: Interface, rate: u32) -> Result<(), EspError> {
        let _ = (ifc, rate);
        Err(EspError::ERR_NOT_SUPPORTED)
    }
}
