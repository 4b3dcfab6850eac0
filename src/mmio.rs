//! Memory-Mapped I/O (MMIO) Register Abstraction
//!
//! The controller code never dereferences hardware addresses itself. It talks
//! to a [`RegisterIo`] implementation, which on real hardware is an
//! [`MmioRegion`] and in tests is a simulated register file.
//!
//! # Example
//!
//! ```rust,ignore
//! use sdhci_boot::mmio::{MmioRegion, RegisterIo};
//!
//! let sdhci = unsafe { MmioRegion::new(0x0782_4900, 0x100) };
//! let caps = sdhci.read32(0x40);
//! ```

use core::ptr::NonNull;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, WriteOnly};

/// Width-addressed register access.
///
/// Offsets are in bytes from the start of the register block. Methods take
/// `&self` because register writes are side effects on the device, not on
/// the Rust value.
pub trait RegisterIo {
    /// Read an 8-bit register
    fn read8(&self, offset: usize) -> u8;
    /// Write an 8-bit register
    fn write8(&self, offset: usize, value: u8);
    /// Read a 16-bit register
    fn read16(&self, offset: usize) -> u16;
    /// Write a 16-bit register
    fn write16(&self, offset: usize, value: u16);
    /// Read a 32-bit register
    fn read32(&self, offset: usize) -> u32;
    /// Write a 32-bit register
    fn write32(&self, offset: usize, value: u32);
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    #[inline]
    fn read8(&self, offset: usize) -> u8 {
        (**self).read8(offset)
    }

    #[inline]
    fn write8(&self, offset: usize, value: u8) {
        (**self).write8(offset, value)
    }

    #[inline]
    fn read16(&self, offset: usize) -> u16 {
        (**self).read16(offset)
    }

    #[inline]
    fn write16(&self, offset: usize, value: u16) {
        (**self).write16(offset, value)
    }

    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

/// A memory-mapped I/O region providing register access.
///
/// In debug builds every access is bounds-checked against the region size.
#[derive(Clone, Copy)]
pub struct MmioRegion {
    /// Base address of the MMIO region
    base: NonNull<u8>,
    /// Size of the MMIO region in bytes (used for bounds checking)
    #[cfg(debug_assertions)]
    size: usize,
}

// SAFETY: MmioRegion only contains a pointer to hardware MMIO space, which
// stays mapped for the firmware's lifetime. Exclusive use of a controller is
// enforced by `&mut` access to the host that owns the region.
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Create a new MMIO region from a base address and size.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `base` is a valid address mapped for device (uncached) access
    /// - The region `[base, base + size)` belongs to the device
    /// - The region remains valid for the lifetime of this struct
    ///
    /// # Panics
    ///
    /// Panics if `base` is null.
    pub unsafe fn new(base: usize, #[allow(unused_variables)] size: usize) -> Self {
        let ptr = NonNull::new(base as *mut u8).expect("MMIO base address cannot be null");
        Self {
            base: ptr,
            #[cfg(debug_assertions)]
            size,
        }
    }

    /// Get the base address of this MMIO region.
    #[inline]
    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Check if an access at the given offset and size is within bounds.
    #[cfg(debug_assertions)]
    #[inline]
    fn check_bounds(&self, offset: usize, access_size: usize) {
        let end = offset.saturating_add(access_size);
        assert!(
            end <= self.size,
            "MMIO access out of bounds: offset={:#x}, access_size={}, region_size={:#x}",
            offset,
            access_size,
            self.size
        );
    }

    #[inline]
    fn reader<T: tock_registers::UIntLike>(&self, offset: usize) -> &ReadOnly<T> {
        #[cfg(debug_assertions)]
        self.check_bounds(offset, core::mem::size_of::<T>());

        unsafe { &*(self.base.as_ptr().add(offset) as *const ReadOnly<T>) }
    }

    #[inline]
    fn writer<T: tock_registers::UIntLike>(&self, offset: usize) -> &WriteOnly<T> {
        #[cfg(debug_assertions)]
        self.check_bounds(offset, core::mem::size_of::<T>());

        unsafe { &*(self.base.as_ptr().add(offset) as *const WriteOnly<T>) }
    }
}

impl RegisterIo for MmioRegion {
    #[inline]
    fn read8(&self, offset: usize) -> u8 {
        self.reader::<u8>(offset).get()
    }

    #[inline]
    fn write8(&self, offset: usize, value: u8) {
        self.writer::<u8>(offset).set(value);
    }

    #[inline]
    fn read16(&self, offset: usize) -> u16 {
        self.reader::<u16>(offset).get()
    }

    #[inline]
    fn write16(&self, offset: usize, value: u16) {
        self.writer::<u16>(offset).set(value);
    }

    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        self.reader::<u32>(offset).get()
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        self.writer::<u32>(offset).set(value);
    }
}

impl core::fmt::Debug for MmioRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        #[cfg(debug_assertions)]
        {
            f.debug_struct("MmioRegion")
                .field("base", &format_args!("{:#x}", self.base()))
                .field("size", &format_args!("{:#x}", self.size))
                .finish()
        }
        #[cfg(not(debug_assertions))]
        {
            f.debug_struct("MmioRegion")
                .field("base", &format_args!("{:#x}", self.base()))
                .finish()
        }
    }
}
