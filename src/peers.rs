//! Peer settings and the table of recently heard peers

use crate::addresses::{Key, MacAddr};
use crate::driver::{Interface, PeerInfo};
use crate::{Error, MAX_CHANNEL};

/// What `add_peer`/`mod_peer` do with the local master key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LmkUpdate {
    #[default]
    Keep,
    /// Turns encryption off
    Clear,
    /// Installs the key and turns encryption on
    Set(Key),
}

/// Optional peer settings. Unset fields keep their default on `add_peer` and their current
/// value on `mod_peer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerArgs {
    pub lmk: LmkUpdate,
    pub channel: Option<u8>,
    pub ifidx: Option<Interface>,
    /// Applied after `lmk`, so it can override the encryption flag set by the key
    pub encrypt: Option<bool>,
}

impl PeerArgs {
    pub fn lmk(mut self, lmk: Key) -> Self {
        self.lmk = LmkUpdate::Set(lmk);
        self
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn ifidx(mut self, ifidx: Interface) -> Self {
        self.ifidx = Some(ifidx);
        self
    }

    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = Some(encrypt);
        self
    }

    /// Applies the settings to `peer`.
    pub fn apply(&self, peer: &mut PeerInfo) -> Result<(), Error> {
        if let Some(channel) = self.channel {
            if channel > MAX_CHANNEL {
                return Err(Error::InvalidArgument("channel must be 0..=13"));
            }
        }

        match self.lmk {
            LmkUpdate::Keep => {}
            LmkUpdate::Clear => peer.encrypt = false,
            LmkUpdate::Set(lmk) => {
                peer.lmk = lmk;
                peer.encrypt = true;
            }
        }
        if let Some(channel) = self.channel {
            peer.channel = channel;
        }
        if let Some(ifidx) = self.ifidx {
            peer.ifidx = ifidx;
        }
        if let Some(encrypt) = self.encrypt {
            peer.encrypt = encrypt;
        }
        Ok(())
    }
}

/// Signal of the last packet received from a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerSignal {
    /// dBm
    pub rssi: i8,
    /// Host milliseconds timestamp of the reception
    pub time_ms: u32,
}

/// Number of senders tracked by [`PeersTable`]
pub const PEERS_TABLE_LEN: usize = 32;

/// Senders of received packets with the signal of their latest packet.
///
/// Updated as packets are taken out of the receive buffer. When full, the entry heard from
/// least recently makes room for a new sender.
#[derive(Debug, Default)]
pub struct PeersTable {
    entries: heapless::FnvIndexMap<MacAddr, PeerSignal, PEERS_TABLE_LEN>,
}

impl PeersTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &MacAddr) -> Option<&PeerSignal> {
        self.entries.get(peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MacAddr, &PeerSignal)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn update(&mut self, peer: MacAddr, signal: PeerSignal) {
        if let Some(entry) = self.entries.get_mut(&peer) {
            *entry = signal;
            return;
        }
        if self.entries.len() == PEERS_TABLE_LEN {
            // Age relative to the new packet, so that timestamp wraparound does not matter.
            let oldest = self
                .entries
                .iter()
                .max_by_key(|(_, s)| signal.time_ms.wrapping_sub(s.time_ms))
                .map(|(mac, _)| *mac);
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        // Cannot fail, there is room now.
        let _ = self.entries.insert(peer, signal);
    }
}
