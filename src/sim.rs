//! Test doubles: a simulated SDHCI register file, a recording delay and a
//! recording cache.
//!
//! The register file models just enough controller behavior for the driver's
//! polling loops to terminate:
//!
//! - writing the command register raises Command Complete, plus Transfer
//!   Complete for data and busy-response commands, plus any injected errors
//! - interrupt status registers are write-1-to-clear
//! - the Normal Interrupt Status error summary bit follows the error status
//! - software reset bits clear themselves
//! - enabling the internal clock sets the clock-stable bit

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use embedded_hal::blocking::delay::DelayUs;

use crate::cache::DmaCache;
use crate::mmio::RegisterIo;
use crate::sdhci::InterruptController;
use crate::sdhci::regs::offset;

const SIZE: usize = 0x100;

/// A logged register write
#[derive(Debug, Clone, Copy)]
struct RegWrite {
    offset: usize,
    value: u32,
}

#[derive(Default)]
struct State {
    mem: Vec<u8>,
    writes: Vec<RegWrite>,
    reads: usize,
    busy_polls: u32,
    hang_command: bool,
    hang_transfer: bool,
    stall_clock: bool,
    stick_reset: bool,
    inject_error: u16,
}

/// Simulated register block
pub struct SimRegisters<'a> {
    state: RefCell<State>,
    on_bus_power: Option<Box<dyn Fn() + 'a>>,
}

impl<'a> SimRegisters<'a> {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                mem: alloc::vec![0; SIZE],
                ..State::default()
            }),
            on_bus_power: None,
        }
    }

    /// Run `hook` whenever bus power is switched on, standing in for the
    /// power-control interrupt
    pub fn on_bus_power(mut self, hook: impl Fn() + 'a) -> Self {
        self.on_bus_power = Some(Box::new(hook));
        self
    }

    /// Report CMD/DAT inhibit for the next `polls` present-state reads.
    /// `u32::MAX` keeps the lines busy forever.
    pub fn set_busy_polls(&self, polls: u32) {
        self.state.borrow_mut().busy_polls = polls;
    }

    /// Never raise Command Complete
    pub fn hang_command(&self) {
        self.state.borrow_mut().hang_command = true;
    }

    /// Never raise Transfer Complete
    pub fn hang_transfer(&self) {
        self.state.borrow_mut().hang_transfer = true;
    }

    /// Never set the internal clock stable bit
    pub fn stall_clock(&self) {
        self.state.borrow_mut().stall_clock = true;
    }

    /// Keep software reset bits set
    pub fn stick_reset(&self) {
        self.state.borrow_mut().stick_reset = true;
    }

    /// Latch `bits` in the error status when the next command is issued
    pub fn inject_error(&self, bits: u16) {
        self.state.borrow_mut().inject_error = bits;
    }

    /// Preload the four response registers
    pub fn set_response(&self, words: [u32; 4]) {
        for (i, word) in words.into_iter().enumerate() {
            self.set32(offset::RESPONSE + 4 * i, word);
        }
    }

    /// Set register bytes without logging a write
    pub fn set8(&self, offset: usize, value: u8) {
        self.state.borrow_mut().store(offset, &[value]);
    }

    pub fn set16(&self, offset: usize, value: u16) {
        self.state.borrow_mut().store(offset, &value.to_le_bytes());
    }

    pub fn set32(&self, offset: usize, value: u32) {
        self.state.borrow_mut().store(offset, &value.to_le_bytes());
    }

    /// Current register contents, without side effects
    pub fn get8(&self, offset: usize) -> u8 {
        self.state.borrow().mem[offset]
    }

    pub fn get16(&self, offset: usize) -> u16 {
        self.state.borrow().load16(offset)
    }

    /// Values written to `offset`, oldest first
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.state
            .borrow()
            .writes
            .iter()
            .filter(|w| w.offset == offset)
            .map(|w| w.value)
            .collect()
    }

    /// Offsets of all writes, oldest first
    pub fn write_offsets(&self) -> Vec<usize> {
        self.state.borrow().writes.iter().map(|w| w.offset).collect()
    }

    pub fn write_count(&self) -> usize {
        self.state.borrow().writes.len()
    }

    pub fn read_count(&self) -> usize {
        self.state.borrow().reads
    }

    fn write(&self, offset: usize, width: u8, value: u32) {
        let bus_power_on = {
            let mut state = self.state.borrow_mut();
            state.writes.push(RegWrite { offset, value });
            state.apply_write(offset, width, value)
        };

        if bus_power_on && let Some(hook) = &self.on_bus_power {
            hook();
        }
    }

    fn read(&self, offset: usize, width: u8) -> u32 {
        let mut state = self.state.borrow_mut();
        state.reads += 1;

        let mut value = match width {
            1 => state.mem[offset] as u32,
            2 => state.load16(offset) as u32,
            _ => state.load32(offset),
        };

        if offset == offset::PRESENT_STATE && state.busy_polls > 0 {
            if state.busy_polls != u32::MAX {
                state.busy_polls -= 1;
            }
            value |= 0b11;
        }
        if offset == offset::NORMAL_INT_STATUS && state.load16(offset::ERROR_INT_STATUS) != 0 {
            value |= 0x8000;
        }
        value
    }
}

impl Default for SimRegisters<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn store(&mut self, offset: usize, bytes: &[u8]) {
        self.mem[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn load16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.mem[offset], self.mem[offset + 1]])
    }

    fn load32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.mem[offset],
            self.mem[offset + 1],
            self.mem[offset + 2],
            self.mem[offset + 3],
        ])
    }

    fn set_bits16(&mut self, offset: usize, bits: u16) {
        let value = self.load16(offset) | bits;
        self.store(offset, &value.to_le_bytes());
    }

    /// Apply a write with its side effects. Returns whether bus power was
    /// switched on.
    fn apply_write(&mut self, offset: usize, width: u8, value: u32) -> bool {
        match (offset, width) {
            (offset::NORMAL_INT_STATUS, 2) | (offset::ERROR_INT_STATUS, 2) => {
                let cleared = self.load16(offset) & !(value as u16);
                self.store(offset, &cleared.to_le_bytes());
            }
            (offset::SOFTWARE_RESET, 1) => {
                let value = if self.stick_reset { value as u8 } else { 0 };
                self.store(offset, &[value]);
            }
            (offset::CLOCK_CONTROL, 2) => {
                let mut value = value as u16;
                if value & 0x1 != 0 && !self.stall_clock {
                    value |= 0x2;
                } else {
                    value &= !0x2;
                }
                self.store(offset, &value.to_le_bytes());
            }
            (offset::COMMAND, 2) => {
                self.store(offset, &(value as u16).to_le_bytes());
                self.issue_command(value as u16);
            }
            (offset::POWER_CONTROL, 1) => {
                self.store(offset, &[value as u8]);
                return value & 0x1 != 0;
            }
            (_, 1) => self.store(offset, &[value as u8]),
            (_, 2) => self.store(offset, &(value as u16).to_le_bytes()),
            _ => self.store(offset, &value.to_le_bytes()),
        }
        false
    }

    fn issue_command(&mut self, command: u16) {
        let data_present = command & 0x20 != 0;
        let busy_response = command & 0x3 == 0x3;

        if !self.hang_command {
            self.set_bits16(offset::NORMAL_INT_STATUS, 0x0001);
        }
        if (data_present || busy_response) && !self.hang_transfer {
            self.set_bits16(offset::NORMAL_INT_STATUS, 0x0002);
        }
        if self.inject_error != 0 {
            let bits = self.inject_error;
            self.set_bits16(offset::ERROR_INT_STATUS, bits);
        }
    }
}

impl RegisterIo for SimRegisters<'_> {
    fn read8(&self, offset: usize) -> u8 {
        self.read(offset, 1) as u8
    }

    fn write8(&self, offset: usize, value: u8) {
        self.write(offset, 1, value as u32);
    }

    fn read16(&self, offset: usize) -> u16 {
        self.read(offset, 2) as u16
    }

    fn write16(&self, offset: usize, value: u16) {
        self.write(offset, 2, value as u32);
    }

    fn read32(&self, offset: usize) -> u32 {
        self.read(offset, 4)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.write(offset, 4, value);
    }
}

/// Delay that only records how long it was asked to sleep
#[derive(Debug, Default)]
pub struct FakeDelay {
    calls: Cell<u32>,
    total_us: Cell<u64>,
}

impl FakeDelay {
    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    pub fn total_us(&self) -> u64 {
        self.total_us.get()
    }

    fn record(&self, us: u32) {
        self.calls.set(self.calls.get() + 1);
        self.total_us.set(self.total_us.get() + us as u64);
    }
}

impl DelayUs<u32> for FakeDelay {
    fn delay_us(&mut self, us: u32) {
        self.record(us);
    }
}

impl DelayUs<u32> for &FakeDelay {
    fn delay_us(&mut self, us: u32) {
        self.record(us);
    }
}

/// Cache that records the ranges it was asked to maintain.
///
/// Bus addresses are the low 32 bits of the CPU address, as through a fixed
/// DMA window, so heap allocations on a 64-bit host stay reachable.
#[derive(Debug, Default)]
pub struct RecordingCache {
    cleaned: RefCell<Vec<(usize, usize)>>,
    invalidated: RefCell<Vec<(usize, usize)>>,
    unreachable: Cell<bool>,
}

impl RecordingCache {
    pub const LINE_SIZE: usize = 64;

    /// Report every address as out of DMA reach
    pub fn make_unreachable(&self) {
        self.unreachable.set(true);
    }

    pub fn cleaned(&self) -> Vec<(usize, usize)> {
        self.cleaned.borrow().clone()
    }

    pub fn invalidated(&self) -> Vec<(usize, usize)> {
        self.invalidated.borrow().clone()
    }
}

impl DmaCache for RecordingCache {
    fn clean_invalidate(&self, addr: usize, len: usize) {
        self.cleaned.borrow_mut().push((addr, len));
    }

    fn invalidate(&self, addr: usize, len: usize) {
        self.invalidated.borrow_mut().push((addr, len));
    }

    fn line_size(&self) -> usize {
        Self::LINE_SIZE
    }

    fn dma_address(&self, addr: usize) -> Option<u32> {
        if self.unreachable.get() {
            None
        } else {
            Some(addr as u32)
        }
    }
}

/// Interrupt controller that records unmasked lines
#[derive(Debug, Default)]
pub struct RecordingIrq {
    unmasked: Vec<u32>,
}

impl RecordingIrq {
    pub fn unmasked(&self) -> &[u32] {
        &self.unmasked
    }
}

impl InterruptController for RecordingIrq {
    fn unmask(&mut self, irq: u32) {
        self.unmasked.push(irq);
    }
}
