//! Simulated host and driver for unit tests
//!
//! [`SimHost`] runs a virtual millisecond clock that only advances in `poll_event`, which is
//! also where the simulated radio delivers transmit statuses and scheduled arrivals. The
//! [`SimDriver`] obtained from [`SimHost::driver`] shares the radio state with the host.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::addresses::{Key, MacAddr};
use crate::callbacks::{RxHandler, TxHandler};
use crate::driver::{Driver, EspError, Interface, PeerInfo, PeerNum, SendStatus};
use crate::host::{Host, RecvCallback, Scheduler};
use crate::{MAX_ENCRYPT_PEER_NUM, MAX_TOTAL_PEER_NUM};

struct Arrival {
    at_ms: u32,
    peer: MacAddr,
    data: Vec<u8>,
    rssi: i8,
}

#[derive(Default)]
pub struct Radio {
    pub initialized: bool,
    rx: Option<RxHandler>,
    tx: Option<TxHandler>,
    pub peers: Vec<PeerInfo>,
    cursor: usize,
    pub pmk: Option<Key>,
    /// Every datagram accepted by `send`
    pub sent: Vec<(Option<MacAddr>, Vec<u8>)>,
    statuses: VecDeque<([u8; 6], SendStatus)>,
    arrivals: Vec<Arrival>,
    /// Peers whose transmissions are reported as failed
    pub unreachable: Vec<MacAddr>,
    /// Holds back transmit statuses while set
    pub mute: bool,
    /// Returned by the next `send`
    pub send_error: Option<EspError>,
    /// Returned by the next `register_send_cb`
    pub register_error: Option<EspError>,
    /// Returned by the next `fetch_peer`
    pub fetch_error: Option<EspError>,
    pub rates: Vec<(Interface, u32)>,
}

impl Radio {
    fn position(&self, mac: &MacAddr) -> Option<usize> {
        self.peers.iter().position(|p| p.peer_addr == *mac)
    }
}

pub struct SimHost {
    now: AtomicU32,
    polls: AtomicUsize,
    scheduled: Mutex<Vec<RecvCallback>>,
    schedule_capacity: AtomicUsize,
    radio: Arc<Mutex<Radio>>,
}

impl SimHost {
    pub fn new() -> Self {
        Self {
            now: AtomicU32::new(0),
            polls: AtomicUsize::new(0),
            scheduled: Mutex::new(Vec::new()),
            schedule_capacity: AtomicUsize::new(usize::MAX),
            radio: Arc::new(Mutex::new(Radio::default())),
        }
    }

    pub fn driver(&self) -> SimDriver {
        SimDriver {
            radio: self.radio.clone(),
        }
    }

    pub fn now(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }

    pub fn set_now(&self, ms: u32) {
        self.now.store(ms, Ordering::Relaxed);
    }

    /// Number of `poll_event` calls so far
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::Relaxed)
    }

    /// Limits the number of notifications waiting in the host queue.
    pub fn set_schedule_capacity(&self, capacity: usize) {
        self.schedule_capacity.store(capacity, Ordering::Relaxed);
    }

    /// Runs and removes all queued notifications, returns how many ran.
    pub fn run_scheduled(&self) -> usize {
        let callbacks = core::mem::take(&mut *lock(&self.scheduled));
        for callback in &callbacks {
            callback();
        }
        callbacks.len()
    }

    /// Lets the radio deliver whatever is due at the current virtual time.
    fn deliver(&self) {
        deliver_statuses(&self.radio);

        let now = self.now();
        let (rx, due) = {
            let mut radio = lock(&self.radio);
            let (due, later): (Vec<Arrival>, Vec<Arrival>) =
                core::mem::take(&mut radio.arrivals)
                    .into_iter()
                    .partition(|a| a.at_ms <= now);
            radio.arrivals = later;
            (radio.rx.clone(), due)
        };
        if let Some(rx) = rx {
            for arrival in due {
                rx.on_recv(&arrival.peer.0, &arrival.data, arrival.rssi);
            }
        }
    }
}

/// Reports all queued transmit statuses to the send callback, unless muted.
fn deliver_statuses(radio: &Mutex<Radio>) {
    let (tx, statuses) = {
        let mut radio = lock(radio);
        if radio.mute {
            return;
        }
        let statuses: Vec<_> = radio.statuses.drain(..).collect();
        (radio.tx.clone(), statuses)
    };
    if let Some(tx) = tx {
        for (peer, status) in statuses {
            tx.on_send(&peer, status);
        }
    }
}

impl Scheduler for SimHost {
    fn ticks_ms(&self) -> u32 {
        self.now()
    }

    fn schedule(&self, callback: &RecvCallback) -> bool {
        let mut queue = lock(&self.scheduled);
        if queue.len() >= self.schedule_capacity.load(Ordering::Relaxed) {
            return false;
        }
        queue.push(callback.clone());
        true
    }
}

impl Host for SimHost {
    fn poll_event(&self, ms: u32) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        let now = self.now().wrapping_add(ms);
        self.now.store(now, Ordering::Relaxed);
        self.deliver();
    }
}

pub struct SimDriver {
    radio: Arc<Mutex<Radio>>,
}

impl SimDriver {
    pub fn radio(&self) -> MutexGuard<'_, Radio> {
        lock(&self.radio)
    }

    /// Delivers a datagram to the receive callback right away. Returns false if no callback is
    /// registered.
    pub fn receive(&self, peer: MacAddr, data: &[u8], rssi: i8) -> bool {
        let rx = self.radio().rx.clone();
        match rx {
            Some(rx) => {
                rx.on_recv(&peer.0, data, rssi);
                true
            }
            None => false,
        }
    }

    /// Delivers a datagram during the first `poll_event` reaching `at_ms`.
    pub fn receive_at(&self, at_ms: u32, peer: MacAddr, data: &[u8], rssi: i8) {
        self.radio().arrivals.push(Arrival {
            at_ms,
            peer,
            data: data.to_vec(),
            rssi,
        });
    }

    /// Reports queued transmit statuses without going through the host.
    pub fn deliver_statuses(&self) {
        deliver_statuses(&self.radio);
    }

    /// Number of transmit statuses not reported yet
    pub fn queued_statuses(&self) -> usize {
        self.radio().statuses.len()
    }

    pub fn has_callbacks(&self) -> bool {
        let radio = self.radio();
        radio.rx.is_some() || radio.tx.is_some()
    }
}

impl Driver for SimDriver {
    fn init(&mut self) -> Result<(), EspError> {
        self.radio().initialized = true;
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), EspError> {
        let mut radio = self.radio();
        radio.initialized = false;
        radio.peers.clear();
        radio.statuses.clear();
        Ok(())
    }

    fn register_recv_cb(&mut self, handler: RxHandler) -> Result<(), EspError> {
        self.radio().rx = Some(handler);
        Ok(())
    }

    fn unregister_recv_cb(&mut self) -> Result<(), EspError> {
        self.radio().rx = None;
        Ok(())
    }

    fn register_send_cb(&mut self, handler: TxHandler) -> Result<(), EspError> {
        let mut radio = self.radio();
        if let Some(e) = radio.register_error.take() {
            return Err(e);
        }
        radio.tx = Some(handler);
        Ok(())
    }

    fn unregister_send_cb(&mut self) -> Result<(), EspError> {
        self.radio().tx = None;
        Ok(())
    }

    fn send(&mut self, peer: Option<&MacAddr>, data: &[u8]) -> Result<(), EspError> {
        let mut radio = self.radio();
        if !radio.initialized {
            return Err(EspError::ESPNOW_NOT_INIT);
        }
        if let Some(e) = radio.send_error.take() {
            return Err(e);
        }

        let targets: Vec<MacAddr> = match peer {
            Some(mac) => {
                if radio.position(mac).is_none() {
                    return Err(EspError::ESPNOW_NOT_FOUND);
                }
                vec![*mac]
            }
            None => radio
                .peers
                .iter()
                .map(|p| p.peer_addr)
                .filter(|mac| !mac.is_multicast())
                .collect(),
        };
        for mac in targets {
            let status = if radio.unreachable.contains(&mac) {
                SendStatus::Fail
            } else {
                SendStatus::Success
            };
            radio.statuses.push_back((mac.0, status));
        }
        radio.sent.push((peer.copied(), data.to_vec()));
        Ok(())
    }

    fn set_pmk(&mut self, pmk: &Key) -> Result<(), EspError> {
        self.radio().pmk = Some(*pmk);
        Ok(())
    }

    fn add_peer(&mut self, peer: &PeerInfo) -> Result<(), EspError> {
        let mut radio = self.radio();
        if radio.position(&peer.peer_addr).is_some() {
            return Err(EspError::ESPNOW_EXIST);
        }
        let encrypted = radio.peers.iter().filter(|p| p.encrypt).count();
        if radio.peers.len() >= MAX_TOTAL_PEER_NUM
            || (peer.encrypt && encrypted >= MAX_ENCRYPT_PEER_NUM)
        {
            return Err(EspError::ESPNOW_FULL);
        }
        radio.peers.push(*peer);
        Ok(())
    }

    fn mod_peer(&mut self, peer: &PeerInfo) -> Result<(), EspError> {
        let mut radio = self.radio();
        let i = radio
            .position(&peer.peer_addr)
            .ok_or(EspError::ESPNOW_NOT_FOUND)?;
        radio.peers[i] = *peer;
        Ok(())
    }

    fn del_peer(&mut self, peer_addr: &MacAddr) -> Result<(), EspError> {
        let mut radio = self.radio();
        let i = radio.position(peer_addr).ok_or(EspError::ESPNOW_NOT_FOUND)?;
        radio.peers.remove(i);
        Ok(())
    }

    fn get_peer(&self, peer_addr: &MacAddr) -> Result<PeerInfo, EspError> {
        let radio = self.radio();
        radio
            .position(peer_addr)
            .map(|i| radio.peers[i])
            .ok_or(EspError::ESPNOW_NOT_FOUND)
    }

    fn fetch_peer(&mut self, from_head: bool) -> Result<PeerInfo, EspError> {
        let mut radio = self.radio();
        if let Some(e) = radio.fetch_error.take() {
            return Err(e);
        }
        if from_head {
            radio.cursor = 0;
        }
        while radio.cursor < radio.peers.len() {
            let peer = radio.peers[radio.cursor];
            radio.cursor += 1;
            if !peer.peer_addr.is_multicast() {
                return Ok(peer);
            }
        }
        Err(EspError::ESPNOW_NOT_FOUND)
    }

    fn peer_num(&self) -> Result<PeerNum, EspError> {
        let radio = self.radio();
        Ok(PeerNum {
            total: radio.peers.len(),
            encrypted: radio.peers.iter().filter(|p| p.encrypt).count(),
        })
    }

    fn set_rate(&mut self, ifc: Interface, rate: u32) -> Result<(), EspError> {
        self.radio().rates.push((ifc, rate));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
