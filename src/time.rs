//! Polling and delay helpers
//!
//! Two kinds of wait exist in the driver:
//!
//! - bounded retry loops with a fixed sleep between attempts (line idle,
//!   command complete, transfer complete), see [`poll_with_retries`];
//! - hardware handshakes that the controller is assumed to always finish
//!   (clock stable, reset complete, power IRQ), see [`spin_until`].
//!
//! Sleeping goes through an injected `embedded-hal` delay so the same code
//! runs against a hardware timer or a test double.

use embedded_hal::blocking::delay::DelayUs;

/// Poll `condition` up to `retries` times, sleeping `interval_us` between
/// attempts.
///
/// Returns `true` as soon as the condition holds, `false` once the budget is
/// used up. Every failed check is followed by a sleep, the last one included,
/// so an exhausted poll has waited `retries * interval_us`.
///
/// # Example
///
/// ```ignore
/// // Wait up to 10 x 1 ms for the CMD/DAT lines to go idle
/// if !poll_with_retries(&mut delay, 10, 1000, || lines_idle()) {
///     return Err(SdhciError::BusBusy);
/// }
/// ```
pub fn poll_with_retries<D, F>(delay: &mut D, retries: u32, interval_us: u32, mut condition: F) -> bool
where
    D: DelayUs<u32>,
    F: FnMut() -> bool,
{
    for _ in 0..retries {
        if condition() {
            return true;
        }
        delay.delay_us(interval_us);
    }
    false
}

/// Spin until `condition` holds.
///
/// With `bound == None` this never gives up, which is how the hardware
/// handshakes are specified. `Some(n)` stops after `n` checks and returns
/// `false`; it exists so a silent controller can be simulated.
#[inline]
pub fn spin_until<F>(bound: Option<u32>, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    match bound {
        None => {
            while !condition() {
                core::hint::spin_loop();
            }
            true
        }
        Some(limit) => {
            for _ in 0..limit {
                if condition() {
                    return true;
                }
                core::hint::spin_loop();
            }
            false
        }
    }
}
