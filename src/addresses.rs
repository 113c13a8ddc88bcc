use core::fmt;

use crate::{ETH_ALEN, Error, KEY_LEN};

/// 6-byte MAC address identifying an ESP-NOW peer.
///
/// Addresses whose first octet has the least significant bit set are group
/// (broadcast or multicast) addresses. They can be registered as peers but
/// never produce a transmit status of their own, so they are left out of the
/// unicast peer count used for fan-out accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddr(pub [u8; ETH_ALEN]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; ETH_ALEN]);

    /// Creates an address from a byte slice, which must be exactly [`ETH_ALEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        bytes
            .try_into()
            .map(MacAddr)
            .map_err(|_| Error::InvalidArgument("MAC address must be 6 bytes"))
    }

    pub fn octets(&self) -> &[u8; ETH_ALEN] {
        &self.0
    }

    /// True for broadcast and multicast addresses
    #[inline]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl From<[u8; ETH_ALEN]> for MacAddr {
    fn from(value: [u8; ETH_ALEN]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for MacAddr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MacAddr {
    fn format(&self, f: defmt::Formatter) {
        let [a, b, c, d, e, g] = self.0;
        defmt::write!(
            f,
            "{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}",
            a,
            b,
            c,
            d,
            e,
            g
        )
    }
}

/// 16-byte key, used both for the device-wide PMK and the per-peer LMK.
pub type Key = [u8; KEY_LEN];

/// Converts a byte slice into a [`Key`], which must be exactly [`KEY_LEN`] long.
pub fn key_from_slice(bytes: &[u8]) -> Result<Key, Error> {
    bytes
        .try_into()
        .map_err(|_| Error::InvalidArgument("key must be 16 bytes"))
}
