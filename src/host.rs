//! Services provided by the scripting runtime hosting the ESP-NOW interface

use alloc::sync::Arc;

use crate::Error;

/// Notification invoked on the host's main loop after a packet was received.
///
/// Any argument the host wants to hand to its callback is captured by the closure.
pub type RecvCallback = Arc<dyn Fn() + Send + Sync>;

/// Host services that are safe to use from the driver callback context.
///
/// Implementations must not block or allocate: they run inside the Wi-Fi driver task.
pub trait Scheduler: Send + Sync {
    /// Monotonic millisecond clock. Wraps around.
    fn ticks_ms(&self) -> u32;

    /// Queues `callback` to be called later from the host main loop.
    ///
    /// Returns false if the host's queue is full and the notification was not posted.
    fn schedule(&self, callback: &RecvCallback) -> bool;
}

/// Host services used from the interpreter context.
pub trait Host: Scheduler + 'static {
    /// Yields to the host scheduler for about `ms` milliseconds, running pending events and
    /// letting the driver tasks progress.
    fn poll_event(&self, ms: u32);

    /// Brings up the Wi-Fi stack ESP-NOW runs on, if it is not running yet.
    fn init_wifi(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Polls `ready` every `step_ms` until it returns true or `timeout_ms` expires, yielding to
/// the host between polls. A timeout of 0 checks once without yielding.
pub fn poll_until<H: Host + ?Sized>(
    host: &H,
    timeout_ms: u32,
    step_ms: u32,
    mut ready: impl FnMut() -> bool,
) -> bool {
    if ready() {
        return true;
    }
    if timeout_ms == 0 {
        return false;
    }

    let start = host.ticks_ms();
    loop {
        let elapsed = host.ticks_ms().wrapping_sub(start);
        if elapsed >= timeout_ms {
            return false;
        }
        host.poll_event(step_ms.min(timeout_ms - elapsed));
        if ready() {
            return true;
        }
    }
}
