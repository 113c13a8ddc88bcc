//! ESP-NOW interface
//!
//! [`EspNow`] owns the driver while active, mirrors the driver's peer list to know how many
//! transmit statuses a broadcast produces, and turns the driver callbacks into blocking (or
//! async) `recv` and `send` calls for the interpreter.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::future::poll_fn;
use core::sync::atomic::Ordering;
use core::task::Poll;

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};

use crate::addresses::{Key, MacAddr};
use crate::callbacks::{RxHandler, Shared, Stats, TxHandler};
use crate::config::{Config, ConfigUpdate};
use crate::driver::{Driver, EspError, PeerInfo, PeerNum};
use crate::host::{Host, RecvCallback, Scheduler};
use crate::log::{debug, error, info, warn};
use crate::packet::{FORMAT, MAX_HEADER_LEN, RecvHeader};
use crate::peers::PeerArgs;
#[cfg(feature = "rssi")]
use crate::peers::{PeerSignal, PeersTable};
use crate::ring::RingBuffer;
use crate::{Error, MAX_DATA_LEN, MAX_TOTAL_PEER_NUM};

/// A received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub peer: MacAddr,
    pub msg: Vec<u8>,
    /// Signal strength in dBm, 0 without the `rssi` feature
    pub rssi: i8,
    /// Host milliseconds timestamp of the reception, 0 without the `rssi` feature
    pub time_ms: u32,
}

/// Caller owned storage for [`EspNow::recv_into`], reused from one message to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecvBuffers {
    pub peer: MacAddr,
    /// Resized to the length of the received message
    pub msg: heapless::Vec<u8, MAX_DATA_LEN>,
}

/// Snapshot of the driver's peer list
pub type Peers = heapless::Vec<PeerInfo, MAX_TOTAL_PEER_NUM>;

pub struct EspNow<D: Driver, H: Host> {
    driver: D,
    host: Arc<H>,
    shared: Arc<Shared>,
    ring: Option<Arc<RingBuffer>>,
    config: Config,
    /// Registered unicast peers, the number of transmit statuses a broadcast produces
    peer_count: usize,
    #[cfg(feature = "rssi")]
    peers_table: PeersTable,
}

impl<D: Driver, H: Host> EspNow<D, H> {
    /// Creates an inactive interface. Nothing is done with `driver` before [`Self::set_active`].
    pub fn new(driver: D, host: H) -> Self {
        Self::with_config(driver, host, Config::default())
    }

    pub fn with_config(driver: D, host: H, config: Config) -> Self {
        Self {
            driver,
            host: Arc::new(host),
            shared: Arc::new(Shared::new()),
            ring: None,
            config,
            peer_count: 0,
            #[cfg(feature = "rssi")]
            peers_table: PeersTable::new(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    /// Activates or deactivates the interface if `state` is given, then returns whether it is
    /// active.
    pub fn active(&mut self, state: Option<bool>) -> Result<bool, Error> {
        if let Some(state) = state {
            self.set_active(state)?;
        }
        Ok(self.is_active())
    }

    /// Activation brings up the driver, registers the callbacks and allocates a receive buffer
    /// of [`Config::rxbuf`] bytes. Deactivation undoes all of it, the driver forgets all peers.
    ///
    /// Both directions are no-ops when the interface is already in the requested state.
    pub fn set_active(&mut self, active: bool) -> Result<(), Error> {
        if active { self.init() } else { self.deinit() }
    }

    fn init(&mut self) -> Result<(), Error> {
        if self.is_active() {
            return Ok(());
        }

        self.host.init_wifi()?;
        self.driver.init()?;

        let ring = Arc::new(RingBuffer::new(self.config.rxbuf));
        let scheduler: Arc<dyn Scheduler> = self.host.clone();
        let rx = RxHandler::new(self.shared.clone(), ring.clone(), scheduler);
        let tx = TxHandler::new(self.shared.clone());

        self.shared.active.store(true, Ordering::Release);
        let registered = self
            .driver
            .register_recv_cb(rx)
            .and_then(|()| self.driver.register_send_cb(tx));
        if let Err(e) = registered {
            error!("ESP-NOW callback registration failed: {}", e);
            self.shared.active.store(false, Ordering::Release);
            let _ = self.driver.unregister_recv_cb();
            let _ = self.driver.unregister_send_cb();
            let _ = self.driver.deinit();
            return Err(e.into());
        }

        self.ring = Some(ring);
        self.peer_count = 0;
        info!("ESP-NOW active, rx buffer {} bytes", self.config.rxbuf);
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), Error> {
        if !self.is_active() {
            return Ok(());
        }

        self.shared.active.store(false, Ordering::Release);
        // Receive first: no record may be written once the buffer is released.
        let steps = [
            self.driver.unregister_recv_cb(),
            self.driver.unregister_send_cb(),
            self.driver.deinit(),
        ];

        self.ring = None;
        self.peer_count = 0;
        // Statuses of packets still in flight will never be reported.
        self.shared.discard_pending();
        self.shared.rx_waker.wake();
        self.shared.tx_waker.wake();
        info!("ESP-NOW inactive");

        for step in steps {
            step?;
        }
        Ok(())
    }

    /// Current settings
    pub fn settings(&self) -> &Config {
        &self.config
    }

    /// Changes settings. A new `rxbuf` size takes effect on the next activation, `timeout_ms`
    /// applies to the next `recv` already.
    ///
    /// Without the `rate` feature, passing a rate fails with [`Error::InvalidArgument`].
    pub fn config(&mut self, update: ConfigUpdate) -> Result<(), Error> {
        if let Some(rate) = update.rate {
            self.set_rate(rate)?;
        }
        if let Some(rxbuf) = update.rxbuf {
            self.config.rxbuf = rxbuf;
        }
        if let Some(timeout_ms) = update.timeout_ms {
            self.config.recv_timeout = Duration::from_millis(timeout_ms as u64);
        }
        Ok(())
    }

    #[cfg(feature = "rate")]
    fn set_rate(&mut self, rate: u32) -> Result<(), Error> {
        use crate::driver::Interface;

        self.host.init_wifi()?;
        self.driver.set_rate(Interface::Station, rate)?;
        self.driver.set_rate(Interface::Ap, rate)?;
        Ok(())
    }

    #[cfg(not(feature = "rate"))]
    fn set_rate(&mut self, _rate: u32) -> Result<(), Error> {
        Err(Error::InvalidArgument("rate option not supported"))
    }

    pub fn stats(&self) -> Stats {
        self.shared.stats()
    }

    /// Sets the callback posted to the host main loop whenever a packet has been buffered.
    /// `None` removes it.
    pub fn on_recv(&mut self, callback: Option<RecvCallback>) {
        self.shared.set_recv_cb(callback);
    }

    /// The receive buffer, while active. Holding on to it after deactivation is harmless, it is
    /// simply no longer fed.
    pub fn buffer(&self) -> Option<Arc<RingBuffer>> {
        self.ring.clone()
    }

    /// Signal of the latest packet taken from each sender
    #[cfg(feature = "rssi")]
    pub fn peers_table(&self) -> &PeersTable {
        &self.peers_table
    }

    fn ring(&self) -> Result<&Arc<RingBuffer>, Error> {
        self.ring.as_ref().ok_or(Error::NotInitialized)
    }

    fn ensure_active(&self) -> Result<(), Error> {
        self.ring().map(|_| ())
    }

    /// Number of bytes waiting in the receive buffer
    pub fn any(&self) -> Result<usize, Error> {
        Ok(self.ring()?.available())
    }

    /// Takes the next message out of the receive buffer, waiting up to `timeout_ms` for one to
    /// arrive (`None`: the configured default, `Some(0)`: don't wait).
    ///
    /// Returns `Ok(None)` on timeout.
    pub fn recv(&mut self, timeout_ms: Option<u32>) -> Result<Option<Message>, Error> {
        let mut peer = MacAddr::default();
        let mut msg = [0; MAX_DATA_LEN];
        let Some(header) = self.read_packet(timeout_ms, &mut peer, &mut msg)? else {
            return Ok(None);
        };
        Ok(Some(Message {
            peer,
            msg: msg[..header.msg_len as usize].to_vec(),
            rssi: header.rssi,
            time_ms: header.time_ms,
        }))
    }

    /// Like [`Self::recv`] but stores the message in `bufs` without allocating.
    ///
    /// Returns the message length, or `Ok(None)` on timeout.
    pub fn recv_into(
        &mut self,
        timeout_ms: Option<u32>,
        bufs: &mut RecvBuffers,
    ) -> Result<Option<usize>, Error> {
        let mut msg = [0; MAX_DATA_LEN];
        let Some(header) = self.read_packet(timeout_ms, &mut bufs.peer, &mut msg)? else {
            return Ok(None);
        };
        let len = header.msg_len as usize;
        bufs.msg.clear();
        bufs.msg
            .extend_from_slice(&msg[..len])
            .map_err(|_| Error::BufferIntegrity)?;
        Ok(Some(len))
    }

    /// Waits for a message to be buffered and takes it.
    ///
    /// Wakes up on every received packet instead of polling. There is no timeout, see
    /// [`Self::recv_async_timeout`].
    pub async fn recv_async(&mut self) -> Result<Message, Error> {
        loop {
            let ring = self.ring()?.clone();
            let shared = &self.shared;
            poll_fn(|cx| {
                shared.rx_waker.register(cx.waker());
                if !shared.is_active() || ring.available() >= FORMAT.header_len() {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            })
            .await;

            if let Some(message) = self.recv(Some(0))? {
                return Ok(message);
            }
        }
    }

    /// [`Self::recv_async`] giving up after `timeout`. Returns `Ok(None)` on timeout.
    ///
    /// Needs an embassy-time timer queue: run it on an embassy executor, or enable one of
    /// embassy-time's `generic-queue-*` features for other executors.
    pub async fn recv_async_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Message>, Error> {
        match select(self.recv_async(), Timer::after(timeout)).await {
            Either::First(result) => result.map(Some),
            Either::Second(()) => Ok(None),
        }
    }

    fn read_packet(
        &mut self,
        timeout_ms: Option<u32>,
        peer: &mut MacAddr,
        msg: &mut [u8; MAX_DATA_LEN],
    ) -> Result<Option<RecvHeader>, Error> {
        let ring = self.ring()?;
        let timeout_ms = timeout_ms.unwrap_or_else(|| self.config.recv_timeout_ms());

        let mut raw = [0; MAX_HEADER_LEN];
        let raw = &mut raw[..FORMAT.header_len()];
        if !ring.wait_and_read(raw, timeout_ms, self.config.busy_wait_ms(), &*self.host) {
            return Ok(None);
        }

        let header = FORMAT.decode(raw).inspect_err(|_| {
            error!("ESP-NOW receive buffer corrupted");
        })?;
        let len = header.msg_len as usize;
        // Records are written whole, the rest of the packet is already in the buffer.
        if !ring.read(&mut peer.0) || !ring.read(&mut msg[..len]) {
            error!("ESP-NOW receive buffer truncated");
            return Err(Error::BufferIntegrity);
        }

        #[cfg(feature = "rssi")]
        self.peers_table.update(
            *peer,
            PeerSignal {
                rssi: header.rssi,
                time_ms: header.time_ms,
            },
        );

        Ok(Some(header))
    }

    /// Sends `msg` to `peer`, or to all registered peers when `peer` is `None`.
    ///
    /// With `sync`, waits until every peer reported a transmit status and returns false if any
    /// of them failed. Statuses of earlier asynchronous sends are waited for first, they do not
    /// count towards the result. Without `sync`, returns true as soon as the driver accepted
    /// the message.
    ///
    /// Fails with [`Error::WouldBlock`] when the driver's transmit queue is full, and with
    /// [`Error::SendTimeout`] when the statuses do not arrive in time.
    pub fn send(&mut self, peer: Option<&MacAddr>, msg: &[u8], sync: bool) -> Result<bool, Error> {
        self.ensure_active()?;
        check_msg_len(msg)?;

        if sync {
            self.wait_for_pending_responses()?;
        }
        let saved_failures = self.shared.tx().failures;
        self.transmit(peer, msg)?;
        if !sync {
            return Ok(true);
        }
        self.wait_for_pending_responses()?;
        Ok(self.shared.tx().failures == saved_failures)
    }

    /// Same as [`Self::send`], but waits for transmit statuses by suspending on the send
    /// callback instead of polling. There is no built-in timeout.
    pub async fn send_async(
        &mut self,
        peer: Option<&MacAddr>,
        msg: &[u8],
        sync: bool,
    ) -> Result<bool, Error> {
        self.ensure_active()?;
        check_msg_len(msg)?;

        if sync {
            self.responses_settled().await?;
        }
        let saved_failures = self.shared.tx().failures;
        self.transmit(peer, msg)?;
        if !sync {
            return Ok(true);
        }
        self.responses_settled().await?;
        Ok(self.shared.tx().failures == saved_failures)
    }

    fn transmit(&mut self, peer: Option<&MacAddr>, msg: &[u8]) -> Result<(), Error> {
        // A broadcast is reported once per registered unicast peer.
        let expected = match peer {
            Some(_) => 1,
            None => {
                if self.peer_count == 0 {
                    warn!("ESP-NOW broadcast without unicast peers, no status expected");
                }
                self.peer_count as u32
            }
        };

        self.shared.expect_responses(expected);
        if let Err(e) = self.driver.send(peer, msg) {
            self.shared.cancel_responses(expected);
            debug!("ESP-NOW send failed: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    fn wait_for_pending_responses(&self) -> Result<(), Error> {
        let step_ms = self.config.busy_wait_ms();
        for _ in 0..self.config.flush_attempts {
            if self.shared.tx().pending() == 0 {
                return Ok(());
            }
            self.host.poll_event(step_ms);
        }

        let pending = self.shared.tx().pending();
        if pending == 0 {
            Ok(())
        } else {
            warn!("ESP-NOW send timeout, {} statuses outstanding", pending);
            Err(Error::SendTimeout)
        }
    }

    async fn responses_settled(&self) -> Result<(), Error> {
        let shared = &self.shared;
        poll_fn(|cx| {
            shared.tx_waker.register(cx.waker());
            if shared.tx().pending() == 0 {
                Poll::Ready(Ok(()))
            } else if !shared.is_active() {
                Poll::Ready(Err(Error::NotInitialized))
            } else {
                Poll::Pending
            }
        })
        .await
    }

    /// Sets the primary master key protecting the local master keys of encrypted peers.
    pub fn set_pmk(&mut self, pmk: &Key) -> Result<(), Error> {
        self.ensure_active()?;
        self.driver.set_pmk(pmk)?;
        Ok(())
    }

    /// Registers `peer_addr`. Fails with a driver error if it is already registered.
    pub fn add_peer(&mut self, peer_addr: &MacAddr, args: PeerArgs) -> Result<(), Error> {
        self.ensure_active()?;
        let mut peer = PeerInfo::new(*peer_addr);
        args.apply(&mut peer)?;
        self.driver.add_peer(&peer)?;
        self.update_peer_count();
        Ok(())
    }

    /// Changes the settings given in `args`, keeping the others.
    pub fn mod_peer(&mut self, peer_addr: &MacAddr, args: PeerArgs) -> Result<(), Error> {
        self.ensure_active()?;
        let mut peer = self.driver.get_peer(peer_addr)?;
        args.apply(&mut peer)?;
        self.driver.mod_peer(&peer)?;
        self.update_peer_count();
        Ok(())
    }

    pub fn del_peer(&mut self, peer_addr: &MacAddr) -> Result<(), Error> {
        self.ensure_active()?;
        self.driver.del_peer(peer_addr)?;
        self.update_peer_count();
        Ok(())
    }

    pub fn get_peer(&self, peer_addr: &MacAddr) -> Result<PeerInfo, Error> {
        self.ensure_active()?;
        Ok(self.driver.get_peer(peer_addr)?)
    }

    /// All registered peers, in driver order
    pub fn get_peers(&mut self) -> Result<Peers, Error> {
        self.ensure_active()?;
        let mut peers = Peers::new();
        let mut from_head = true;
        loop {
            let peer = match self.driver.fetch_peer(from_head) {
                Ok(peer) => peer,
                Err(EspError::ESPNOW_NOT_FOUND) => break,
                Err(e) => return Err(e.into()),
            };
            from_head = false;
            if peers.push(peer).is_err() {
                break;
            }
        }
        Ok(peers)
    }

    /// Total and encrypted peer numbers, as counted by the driver
    pub fn peer_count(&self) -> Result<PeerNum, Error> {
        self.ensure_active()?;
        Ok(self.driver.peer_num()?)
    }

    /// Registered unicast peers, i.e. transmit statuses expected for a broadcast
    pub fn unicast_peer_count(&self) -> usize {
        self.peer_count
    }

    fn update_peer_count(&mut self) {
        let mut count = 0;
        let mut from_head = true;
        loop {
            let peer = match self.driver.fetch_peer(from_head) {
                Ok(peer) => peer,
                Err(EspError::ESPNOW_NOT_FOUND) => break,
                Err(_e) => {
                    error!(
                        "ESP-NOW peer list unreadable, keeping {} peers: {}",
                        self.peer_count,
                        _e
                    );
                    return;
                }
            };
            from_head = false;
            if !peer.peer_addr.is_multicast() {
                count += 1;
            }
            if count >= MAX_TOTAL_PEER_NUM {
                break;
            }
        }
        self.peer_count = count;
    }
}

impl<D: Driver, H: Host> Drop for EspNow<D, H> {
    fn drop(&mut self) {
        if let Err(_e) = self.deinit() {
            error!("ESP-NOW deinit failed: {}", _e);
        }
    }
}

fn check_msg_len(msg: &[u8]) -> Result<(), Error> {
    if msg.len() > MAX_DATA_LEN {
        return Err(Error::InvalidArgument("message longer than 250 bytes"));
    }
    Ok(())
}
