//! Cache maintenance for DMA buffers
//!
//! The controller reads descriptor tables and writes read data through DMA,
//! bypassing the CPU caches. [`DmaCache`] is the hook through which the driver
//! keeps both views consistent; the platform picks the implementation.

use core::sync::atomic::{Ordering, fence};

/// Cache and address operations needed around a DMA transfer.
pub trait DmaCache {
    /// Write back and invalidate `[addr, addr + len)` so the device sees the
    /// CPU's latest data.
    fn clean_invalidate(&self, addr: usize, len: usize);

    /// Invalidate `[addr, addr + len)` so the CPU re-reads what the device
    /// wrote.
    fn invalidate(&self, addr: usize, len: usize);

    /// Granule of [`invalidate`](Self::invalidate). Read buffers must start
    /// on this boundary, otherwise invalidation drops neighbouring data.
    fn line_size(&self) -> usize;

    /// 32-bit bus address the controller uses to reach CPU address `addr`,
    /// or `None` when it is out of reach.
    ///
    /// Boot firmware runs identity-mapped, so by default the CPU address is
    /// the bus address as long as it is below 4 GiB.
    fn dma_address(&self, addr: usize) -> Option<u32> {
        u32::try_from(addr).ok()
    }
}

impl<T: DmaCache + ?Sized> DmaCache for &T {
    #[inline]
    fn clean_invalidate(&self, addr: usize, len: usize) {
        (**self).clean_invalidate(addr, len)
    }

    #[inline]
    fn invalidate(&self, addr: usize, len: usize) {
        (**self).invalidate(addr, len)
    }

    #[inline]
    fn line_size(&self) -> usize {
        (**self).line_size()
    }

    #[inline]
    fn dma_address(&self, addr: usize) -> Option<u32> {
        (**self).dma_address(addr)
    }
}

/// For platforms where DMA is cache-coherent. Only orders memory accesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Coherent;

impl DmaCache for Coherent {
    #[inline]
    fn clean_invalidate(&self, _addr: usize, _len: usize) {
        fence(Ordering::SeqCst);
    }

    #[inline]
    fn invalidate(&self, _addr: usize, _len: usize) {
        fence(Ordering::SeqCst);
    }

    #[inline]
    fn line_size(&self) -> usize {
        1
    }
}

/// Round `[addr, addr + len)` out to whole cache lines.
#[inline]
fn line_range(addr: usize, len: usize, line: usize) -> core::ops::Range<usize> {
    let start = addr & !(line - 1);
    let end = (addr + len + line - 1) & !(line - 1);
    start..end
}

/// x86_64 cache maintenance using CLFLUSH.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Clflush;

#[cfg(target_arch = "x86_64")]
impl Clflush {
    /// Cache line size (typically 64 bytes on modern x86)
    pub const LINE_SIZE: usize = 64;
}

#[cfg(target_arch = "x86_64")]
impl DmaCache for Clflush {
    fn clean_invalidate(&self, addr: usize, len: usize) {
        // Fence before the loop for CLFLUSH ordering on older AMD parts
        fence(Ordering::SeqCst);

        for line in line_range(addr, len, Self::LINE_SIZE).step_by(Self::LINE_SIZE) {
            unsafe {
                core::arch::asm!(
                    "clflush [{}]",
                    in(reg) line,
                    options(nostack, preserves_flags)
                );
            }
        }
        fence(Ordering::SeqCst);
    }

    /// CLFLUSH both writes back and invalidates.
    #[inline]
    fn invalidate(&self, addr: usize, len: usize) {
        self.clean_invalidate(addr, len);
    }

    #[inline]
    fn line_size(&self) -> usize {
        Self::LINE_SIZE
    }
}

/// AArch64 cache maintenance by virtual address to the point of coherency.
#[cfg(target_arch = "aarch64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct DcCivac;

#[cfg(target_arch = "aarch64")]
impl DcCivac {
    /// Smallest data cache line in the system, from CTR_EL0.DminLine
    fn dminline() -> usize {
        let ctr: u64;
        unsafe {
            core::arch::asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack));
        }
        4 << ((ctr >> 16) & 0xF)
    }
}

#[cfg(target_arch = "aarch64")]
impl DmaCache for DcCivac {
    fn clean_invalidate(&self, addr: usize, len: usize) {
        let line = Self::dminline();
        for va in line_range(addr, len, line).step_by(line) {
            unsafe {
                core::arch::asm!("dc civac, {}", in(reg) va, options(nostack, preserves_flags));
            }
        }
        unsafe {
            core::arch::asm!("dsb sy", options(nostack, preserves_flags));
        }
    }

    fn invalidate(&self, addr: usize, len: usize) {
        let line = Self::dminline();
        for va in line_range(addr, len, line).step_by(line) {
            unsafe {
                core::arch::asm!("dc ivac, {}", in(reg) va, options(nostack, preserves_flags));
            }
        }
        unsafe {
            core::arch::asm!("dsb sy", options(nostack, preserves_flags));
        }
    }

    fn line_size(&self) -> usize {
        Self::dminline()
    }
}
