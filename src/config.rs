use embassy_time::Duration;

use crate::MAX_PACKET_LEN;

// Enough for two full-size packets
const DEFAULT_RXBUF: usize = 2 * MAX_PACKET_LEN;

// Five minutes
const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(5 * 60 * 1000);

// Each wait step must be long enough for the host to actually yield to other tasks.
const BUSY_WAIT: Duration = Duration::from_millis(25);

// The flush bound only guards against a stuck driver, normal operation converges much sooner.
const FLUSH_ATTEMPTS: u16 = 90;

/// Settings of the ESP-NOW interface
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Capacity in bytes of the receive ring buffer.
    ///
    /// Read when the interface is activated, changing it while active only affects the next
    /// activation.
    pub rxbuf: usize,
    /// Default timeout of a blocking `recv` when the caller does not pass one
    pub recv_timeout: Duration,
    /// Interval between two polls while waiting for received data or transmit statuses
    pub busy_wait: Duration,
    /// Number of `busy_wait` steps a synchronous send waits for outstanding transmit statuses
    /// before giving up with [`crate::Error::SendTimeout`]
    pub flush_attempts: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rxbuf: DEFAULT_RXBUF,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            busy_wait: BUSY_WAIT,
            flush_attempts: FLUSH_ATTEMPTS,
        }
    }
}

impl Config {
    pub(crate) fn recv_timeout_ms(&self) -> u32 {
        duration_ms(self.recv_timeout)
    }

    pub(crate) fn busy_wait_ms(&self) -> u32 {
        duration_ms(self.busy_wait).max(1)
    }
}

/// Parameters accepted by [`crate::EspNow::config`]. `None` leaves a setting untouched.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigUpdate {
    pub rxbuf: Option<usize>,
    pub timeout_ms: Option<u32>,
    /// Wi-Fi PHY rate used for ESP-NOW frames, applied to the station and AP interfaces.
    /// Only honoured with the `rate` feature.
    pub rate: Option<u32>,
}

fn duration_ms(d: Duration) -> u32 {
    d.as_millis().min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.rxbuf, 2 * MAX_PACKET_LEN);
        assert_eq!(config.recv_timeout_ms(), 300_000);
        assert_eq!(config.busy_wait_ms(), 25);
        assert_eq!(config.flush_attempts, 90);
    }

    #[test]
    fn zero_busy_wait_still_advances() {
        let config = Config {
            busy_wait: Duration::from_ticks(0),
            ..Config::default()
        };
        assert_eq!(config.busy_wait_ms(), 1);
    }
}
