//! Interpreter binding helpers
//!
//! A scripting runtime converts its objects to [`Arg`]s, parses them with the functions below
//! and converts results and [`Error`]s back. [`Module`] is the process-wide handle holding the
//! interface between calls.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::addresses::{Key, MacAddr, key_from_slice};
use crate::callbacks::Stats;
use crate::config::ConfigUpdate;
use crate::driver::{Driver, Interface, PeerInfo};
use crate::espnow::{EspNow, Message};
use crate::host::{Host, RecvCallback};
use crate::peers::{LmkUpdate, PeerArgs};
use crate::Error;

/// An interpreter value as far as ESP-NOW calls care
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg<'a> {
    None,
    Bool(bool),
    Int(i64),
    /// Any object exposing a byte buffer
    Bytes(&'a [u8]),
}

impl<'a> Arg<'a> {
    pub fn is_none(&self) -> bool {
        matches!(self, Arg::None)
    }

    pub fn is_truthy(&self) -> bool {
        match *self {
            Arg::None => false,
            Arg::Bool(b) => b,
            Arg::Int(i) => i != 0,
            Arg::Bytes(b) => !b.is_empty(),
        }
    }

    pub fn bytes(&self) -> Result<&'a [u8], Error> {
        match *self {
            Arg::Bytes(b) => Ok(b),
            _ => Err(Error::InvalidArgument("object with buffer protocol required")),
        }
    }

    pub fn int(&self) -> Result<i64, Error> {
        match *self {
            Arg::Int(i) => Ok(i),
            Arg::Bool(b) => Ok(b as i64),
            _ => Err(Error::InvalidArgument("integer required")),
        }
    }
}

pub fn mac_arg(arg: &Arg<'_>) -> Result<MacAddr, Error> {
    MacAddr::from_slice(arg.bytes()?)
}

/// A falsy peer (`None`, `b""`) addresses all registered peers.
pub fn peer_arg(arg: &Arg<'_>) -> Result<Option<MacAddr>, Error> {
    if arg.is_truthy() {
        mac_arg(arg).map(Some)
    } else {
        Ok(None)
    }
}

pub fn key_arg(arg: &Arg<'_>) -> Result<Key, Error> {
    key_from_slice(arg.bytes()?)
}

/// `None` keeps the key, any other falsy value turns encryption off.
pub fn lmk_arg(arg: &Arg<'_>) -> Result<LmkUpdate, Error> {
    Ok(match arg {
        Arg::None => LmkUpdate::Keep,
        arg if !arg.is_truthy() => LmkUpdate::Clear,
        arg => LmkUpdate::Set(key_arg(arg)?),
    })
}

/// `None` and negative values select the configured default.
pub fn timeout_arg(arg: &Arg<'_>) -> Result<Option<u32>, Error> {
    if arg.is_none() {
        return Ok(None);
    }
    let ms = arg.int()?;
    Ok((ms >= 0).then(|| ms.min(u32::MAX as i64) as u32))
}

fn u8_arg(arg: &Arg<'_>, err: &'static str) -> Result<u8, Error> {
    u8::try_from(arg.int()?).map_err(|_| Error::InvalidArgument(err))
}

fn non_negative(arg: &Arg<'_>, err: &'static str) -> Result<u64, Error> {
    u64::try_from(arg.int()?).map_err(|_| Error::InvalidArgument(err))
}

/// Parses `config(rxbuf=, timeout=, rate=)` keywords. `timeout_ms` is accepted for `timeout`.
pub fn config_args(kwargs: &[(&str, Arg<'_>)]) -> Result<ConfigUpdate, Error> {
    let mut update = ConfigUpdate::default();
    for (key, value) in kwargs {
        match *key {
            "rxbuf" => {
                let rxbuf = non_negative(value, "rxbuf must be >= 0")?;
                update.rxbuf = Some(rxbuf as usize);
            }
            "timeout" | "timeout_ms" => {
                let ms = non_negative(value, "timeout must be >= 0")?;
                update.timeout_ms = Some(ms.min(u32::MAX as u64) as u32);
            }
            "rate" => {
                let rate = non_negative(value, "rate must be >= 0")?;
                update.rate = Some(rate.min(u32::MAX as u64) as u32);
            }
            _ => return Err(Error::InvalidArgument("unknown config param")),
        }
    }
    Ok(update)
}

const PEER_PARAMS: [&str; 4] = ["lmk", "channel", "ifidx", "encrypt"];

/// Parses `add_peer`/`mod_peer(mac, lmk, channel, ifidx, encrypt)`, given positionally or as
/// keywords. `None` leaves a setting unspecified.
pub fn peer_args(
    args: &[Arg<'_>],
    kwargs: &[(&str, Arg<'_>)],
) -> Result<(MacAddr, PeerArgs), Error> {
    let (mac, rest) = args
        .split_first()
        .ok_or(Error::InvalidArgument("peer MAC address required"))?;
    let mac = mac_arg(mac)?;
    if rest.len() > PEER_PARAMS.len() {
        return Err(Error::InvalidArgument("too many arguments"));
    }

    let mut params: [Option<&Arg<'_>>; 4] = [None; 4];
    for (slot, arg) in params.iter_mut().zip(rest) {
        *slot = Some(arg);
    }
    for (key, value) in kwargs {
        let i = PEER_PARAMS
            .iter()
            .position(|p| p == key)
            .ok_or(Error::InvalidArgument("unknown peer param"))?;
        if params[i].is_some() {
            return Err(Error::InvalidArgument("argument given twice"));
        }
        params[i] = Some(value);
    }

    let given = |i: usize| params[i].filter(|arg| !arg.is_none());
    let mut peer = PeerArgs::default();
    if let Some(lmk) = params[0] {
        peer.lmk = lmk_arg(lmk)?;
    }
    if let Some(channel) = given(1) {
        peer.channel = Some(u8_arg(channel, "channel must be 0..=13")?);
    }
    if let Some(ifidx) = given(2) {
        let ifidx = u8_arg(ifidx, "ifidx must be 0 (STA) or 1 (AP)")?;
        peer.ifidx = Some(Interface::try_from(ifidx)?);
    }
    if let Some(encrypt) = given(3) {
        peer.encrypt = Some(encrypt.is_truthy());
    }
    Ok((mac, peer))
}

/// Parses `send(msg)`, `send(peer, msg)` and `send(peer, msg, sync)`.
pub fn send_args<'a>(args: &[Arg<'a>]) -> Result<(Option<MacAddr>, &'a [u8], bool), Error> {
    match args {
        [msg] => Ok((None, msg.bytes()?, true)),
        [peer, msg] => Ok((peer_arg(peer)?, msg.bytes()?, true)),
        [peer, msg, sync] => Ok((peer_arg(peer)?, msg.bytes()?, sync.is_truthy())),
        _ => Err(Error::InvalidArgument("send takes 1 to 3 arguments")),
    }
}

/// Binds `arg` to `callback`, as registered with `on_recv(callback, arg)`.
pub fn recv_callback<A>(callback: impl Fn(&A) + Send + Sync + 'static, arg: A) -> RecvCallback
where
    A: Send + Sync + 'static,
{
    Arc::new(move || callback(&arg))
}

/// `(mac, msg)`, or `(None, None)` on timeout
pub fn recv_pair(message: Option<Message>) -> (Option<MacAddr>, Option<Vec<u8>>) {
    match message {
        Some(Message { peer, msg, .. }) => (Some(peer), Some(msg)),
        None => (None, None),
    }
}

/// `(mac, lmk, channel, ifidx, encrypt)`
pub fn peer_tuple(peer: &PeerInfo) -> (MacAddr, Key, u8, u8, bool) {
    (
        peer.peer_addr,
        peer.lmk,
        peer.channel,
        peer.ifidx as u8,
        peer.encrypt,
    )
}

/// `(tx_packets, tx_responses, tx_failures, rx_packets, dropped_rx_packets)`
pub fn stats_tuple(stats: &Stats) -> (u32, u32, u32, u32, u32) {
    (
        stats.tx_packets,
        stats.tx_responses,
        stats.tx_failures,
        stats.rx_packets,
        stats.dropped_rx_packets,
    )
}

/// Exception to raise in the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostError {
    /// `OSError(errno)`
    Os(i32),
    /// `ValueError(message)`
    Value(&'static str),
}

impl From<Error> for HostError {
    fn from(e: Error) -> Self {
        if let Some(errno) = e.errno() {
            return HostError::Os(errno);
        }
        HostError::Value(match e {
            Error::InvalidArgument(msg) => msg,
            Error::BufferIntegrity => "ESP-Now: buffer error",
            Error::SendTimeout => "ESP-Now: flush timeout",
            _ => "ESP-Now: error",
        })
    }
}

/// Process-wide handle to the interface, created on first use and torn down on soft reset.
pub struct Module<D: Driver, H: Host> {
    instance: Option<EspNow<D, H>>,
}

impl<D: Driver, H: Host> Module<D, H> {
    pub const fn new() -> Self {
        Self { instance: None }
    }

    pub fn get_or_init(&mut self, init: impl FnOnce() -> EspNow<D, H>) -> &mut EspNow<D, H> {
        self.instance.get_or_insert_with(init)
    }

    pub fn get(&mut self) -> Option<&mut EspNow<D, H>> {
        self.instance.as_mut()
    }

    /// Deactivates and discards the interface. The next [`Self::get_or_init`] starts over.
    pub fn soft_reset(&mut self) -> Result<(), Error> {
        match self.instance.take() {
            Some(mut espnow) => espnow.set_active(false),
            None => Ok(()),
        }
    }
}

impl<D: Driver, H: Host> Default for Module<D, H> {
    fn default() -> Self {
        Self::new()
    }
}
