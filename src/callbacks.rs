//! Driver callback side of the interface
//!
//! [`RxHandler`] and [`TxHandler`] are handed to the [`crate::driver::Driver`] on activation and
//! are called from the driver task. They only touch state that is safe to share with the
//! interpreter: the ring buffer producer side, counters and wakers.

use alloc::sync::Arc;
use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::waitqueue::AtomicWaker;

use crate::driver::SendStatus;
use crate::driver::rssi::{RxCtrlLayout, rssi_from_payload};
use crate::host::{RecvCallback, Scheduler};
use crate::log::{debug, warn};
use crate::packet::{FORMAT, MAX_HEADER_LEN, RecvHeader};
use crate::ring::RingBuffer;
use crate::{ETH_ALEN, MAX_DATA_LEN};

/// Packet counters, as returned by [`crate::EspNow::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    pub tx_packets: u32,
    pub tx_responses: u32,
    pub tx_failures: u32,
    pub rx_packets: u32,
    pub dropped_rx_packets: u32,
}

/// Transmit accounting. The three counters only grow (wrapping), only differences matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct TxCounters {
    /// Transmit statuses expected, written by the interpreter
    pub packets: u32,
    /// Transmit statuses received, written by the send callback
    pub responses: u32,
    /// Received statuses other than success, written by the send callback
    pub failures: u32,
}

impl TxCounters {
    /// Number of statuses still outstanding
    pub fn pending(&self) -> u32 {
        self.packets.wrapping_sub(self.responses)
    }
}

/// State shared between the interpreter and the driver callbacks
pub(crate) struct Shared {
    pub active: AtomicBool,
    rx_packets: AtomicU32,
    dropped_rx_packets: AtomicU32,
    // The counters are updated together so that `failures <= responses <= packets` holds for
    // every observer.
    tx: Mutex<CriticalSectionRawMutex, Cell<TxCounters>>,
    recv_cb: Mutex<CriticalSectionRawMutex, RefCell<Option<RecvCallback>>>,
    pub rx_waker: AtomicWaker,
    pub tx_waker: AtomicWaker,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            rx_packets: AtomicU32::new(0),
            dropped_rx_packets: AtomicU32::new(0),
            tx: Mutex::new(Cell::new(TxCounters::default())),
            recv_cb: Mutex::new(RefCell::new(None)),
            rx_waker: AtomicWaker::new(),
            tx_waker: AtomicWaker::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> Stats {
        let tx = self.tx();
        Stats {
            tx_packets: tx.packets,
            tx_responses: tx.responses,
            tx_failures: tx.failures,
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            dropped_rx_packets: self.dropped_rx_packets.load(Ordering::Relaxed),
        }
    }

    pub fn tx(&self) -> TxCounters {
        self.tx.lock(|c| c.get())
    }

    fn update_tx(&self, f: impl FnOnce(&mut TxCounters)) {
        self.tx.lock(|c| {
            let mut counters = c.get();
            f(&mut counters);
            c.set(counters);
        });
    }

    /// Announces `n` transmit statuses to come. Must happen before the transmission is queued,
    /// the status may arrive before the driver's send call returns.
    pub fn expect_responses(&self, n: u32) {
        self.update_tx(|c| c.packets = c.packets.wrapping_add(n));
    }

    /// Takes back an announcement whose transmission the driver refused.
    pub fn cancel_responses(&self, n: u32) {
        self.update_tx(|c| c.packets = c.packets.wrapping_sub(n));
    }

    /// Forgets statuses that will never arrive because the driver was shut down.
    pub fn discard_pending(&self) {
        self.update_tx(|c| c.packets = c.responses);
    }

    pub fn set_recv_cb(&self, callback: Option<RecvCallback>) {
        self.recv_cb.lock(|cb| *cb.borrow_mut() = callback);
    }

    pub fn recv_cb(&self) -> Option<RecvCallback> {
        self.recv_cb.lock(|cb| cb.borrow().clone())
    }

    fn drop_rx(&self) {
        self.dropped_rx_packets.fetch_add(1, Ordering::Relaxed);
    }
}

/// Receive callback, registered with the driver while the interface is active
#[derive(Clone)]
pub struct RxHandler {
    shared: Arc<Shared>,
    ring: Arc<RingBuffer>,
    scheduler: Arc<dyn Scheduler>,
}

impl RxHandler {
    pub(crate) fn new(
        shared: Arc<Shared>,
        ring: Arc<RingBuffer>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            shared,
            ring,
            scheduler,
        }
    }

    /// Called by the driver for every received datagram.
    ///
    /// Copies the datagram into the receive buffer as one record, or counts it as dropped when
    /// the buffer has no room for the whole record. Never blocks and never allocates.
    pub fn on_recv(&self, peer: &[u8; ETH_ALEN], data: &[u8], rssi: i8) {
        let shared = &*self.shared;
        if !shared.is_active() || data.len() > MAX_DATA_LEN {
            shared.drop_rx();
            return;
        }

        let header = RecvHeader {
            msg_len: data.len() as u8,
            time_ms: self.scheduler.ticks_ms(),
            rssi,
        };
        let mut buf = [0; MAX_HEADER_LEN];
        let header = FORMAT.encode(&header, &mut buf);

        if self.ring.write_all(&[header, peer, data]).is_err() {
            debug!("rx buffer full, dropping {} bytes", data.len());
            shared.drop_rx();
            return;
        }
        shared.rx_packets.fetch_add(1, Ordering::Relaxed);
        shared.rx_waker.wake();

        if let Some(callback) = shared.recv_cb() {
            if !self.scheduler.schedule(&callback) {
                warn!("recv notification not scheduled, host queue full");
            }
        }
    }

    /// Entry point for a C receive callback `(mac, data, len)`.
    ///
    /// # Safety
    ///
    /// `peer` must point to 6 readable bytes and `data` to `len` readable bytes, both valid for
    /// the duration of the call. Unless `layout` is [`RxCtrlLayout::Unsupported`], `data` must
    /// also satisfy the requirements of [`rssi_from_payload`].
    pub unsafe fn on_recv_raw(
        &self,
        peer: *const u8,
        data: *const u8,
        len: i32,
        layout: RxCtrlLayout,
    ) {
        if peer.is_null() || data.is_null() || !(0..=MAX_DATA_LEN as i32).contains(&len) {
            self.shared.drop_rx();
            return;
        }
        let (peer, data, rssi) = unsafe {
            (
                &*peer.cast::<[u8; ETH_ALEN]>(),
                core::slice::from_raw_parts(data, len as usize),
                rssi_from_payload(data, layout),
            )
        };
        self.on_recv(peer, data, rssi);
    }
}

/// Send status callback, registered with the driver while the interface is active
#[derive(Clone)]
pub struct TxHandler {
    shared: Arc<Shared>,
}

impl TxHandler {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Called by the driver once for every unicast transmission.
    pub fn on_send(&self, _peer: &[u8; ETH_ALEN], status: SendStatus) {
        self.shared.update_tx(|c| {
            c.responses = c.responses.wrapping_add(1);
            if status != SendStatus::Success {
                c.failures = c.failures.wrapping_add(1);
            }
        });
        self.shared.tx_waker.wake();
    }
}
