//! Power-control interrupt handshake
//!
//! On MSM SDCC controllers a write to the SDHCI power-control register does
//! not take effect on its own. The controller raises the power-control IRQ
//! and waits for software to acknowledge the request in a vendor register.
//! The interrupt handler does the acknowledgement; bring-up blocks until it
//! has run.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tock_registers::LocalRegisterCopy;

use super::PowerLayout;
use super::regs::{PWRCTL, PWRCTL_ACK};
use crate::mmio::RegisterIo;
use crate::time::spin_until;

/// One-shot completion signal shared between an interrupt handler and a
/// waiter. Waiting consumes the signal.
#[derive(Debug)]
pub struct Completion {
    done: AtomicBool,
}

impl Completion {
    /// An unsignalled completion
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    /// Drop any stale signal
    pub fn reset(&self) {
        self.done.store(false, Ordering::Release);
    }

    /// Signal the waiter
    pub fn complete(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Wait for the signal and consume it. Returns `false` if `bound` checks
    /// passed without one.
    pub fn wait(&self, bound: Option<u32>) -> bool {
        spin_until(bound, || self.done.swap(false, Ordering::AcqRel))
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between [`SdhciHost::init`](super::SdhciHost::init) and the
/// power-control interrupt handler.
///
/// Lives wherever the platform's IRQ dispatch can reach it, typically a
/// `static`.
#[derive(Debug, Default)]
pub struct PowerHandshake {
    done: Completion,
    last_ack: AtomicU32,
}

impl PowerHandshake {
    /// Create an idle handshake
    pub const fn new() -> Self {
        Self {
            done: Completion::new(),
            last_ack: AtomicU32::new(0),
        }
    }

    /// Prepare for a new power request
    pub fn arm(&self) {
        self.done.reset();
    }

    /// Power-control interrupt handler.
    ///
    /// Acknowledges the pending bus and IO requests found in the mask
    /// register and wakes the waiter. Returns the value written to the ack
    /// register.
    pub fn handle_irq<R: RegisterIo + ?Sized>(&self, core: &R, layout: &PowerLayout) -> u32 {
        let status = LocalRegisterCopy::<u32, PWRCTL::Register>::new(core.read32(layout.mask_offset));
        let mut ack = LocalRegisterCopy::<u32, PWRCTL_ACK::Register>::new(0);

        if status.is_set(PWRCTL::BUS_ON) || status.is_set(PWRCTL::BUS_OFF) {
            ack.modify(PWRCTL_ACK::BUS_SUCCESS::SET);
        }
        if status.is_set(PWRCTL::IO_LOW) || status.is_set(PWRCTL::IO_HIGH) {
            ack.modify(PWRCTL_ACK::IO_SUCCESS::SET);
        }

        core.write32(layout.ctl_offset, ack.get());
        self.last_ack.store(ack.get(), Ordering::Relaxed);
        self.done.complete();

        ack.get()
    }

    /// Wait for [`handle_irq`](Self::handle_irq) to run
    pub fn wait(&self, bound: Option<u32>) -> bool {
        self.done.wait(bound)
    }

    /// Value written to the ack register by the last interrupt
    pub fn last_ack(&self) -> u32 {
        self.last_ack.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRegisters;

    #[test]
    fn test_ack_bus_only() {
        let layout = PowerLayout::default();
        let core = SimRegisters::new();
        core.set32(layout.mask_offset, 0b0010);

        let handshake = PowerHandshake::new();
        assert_eq!(handshake.handle_irq(&core, &layout), 0b0001);
        assert_eq!(core.writes_to(layout.ctl_offset), [0b0001]);
        assert!(handshake.wait(Some(1)));
    }

    #[test]
    fn test_ack_io_only() {
        let layout = PowerLayout::default();
        let core = SimRegisters::new();
        core.set32(layout.mask_offset, 0b1000);

        let handshake = PowerHandshake::new();
        assert_eq!(handshake.handle_irq(&core, &layout), 0b0100);
        assert_eq!(handshake.last_ack(), 0b0100);
    }

    #[test]
    fn test_ack_nothing_pending() {
        let layout = PowerLayout::default();
        let core = SimRegisters::new();

        let handshake = PowerHandshake::new();
        assert_eq!(handshake.handle_irq(&core, &layout), 0);
        assert_eq!(core.writes_to(layout.ctl_offset), [0]);
        // Still wakes the waiter
        assert!(handshake.wait(Some(1)));
    }

    #[test]
    fn test_wait_consumes_signal() {
        let handshake = PowerHandshake::new();
        assert!(!handshake.wait(Some(10)));

        handshake.done.complete();
        assert!(handshake.wait(Some(1)));
        assert!(!handshake.wait(Some(10)));
    }

    #[test]
    fn test_arm_drops_stale_signal() {
        let handshake = PowerHandshake::new();
        handshake.done.complete();
        handshake.arm();
        assert!(!handshake.wait(Some(10)));
    }

    #[test]
    fn test_signal_from_other_thread() {
        let handshake = PowerHandshake::new();
        std::thread::scope(|s| {
            s.spawn(|| handshake.done.complete());
            assert!(handshake.wait(None));
        });
    }
}
