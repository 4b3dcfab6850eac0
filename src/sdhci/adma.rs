//! ADMA2 scatter-gather descriptor tables
//!
//! Layout of one 32-bit ADMA2 descriptor line (SD Host Controller Simplified
//! Specification 3.00, section 1.13.4):
//!
//! ```text
//!  ___________________________________________________
//! | Attribute    | Length       | Data Address        |
//! | (16 bit)     | (16 bit)     | (32 bit)            |
//! |______________|______________|_____________________|
//!   bits 15:0      bits 31:16     bits 63:32
//! ```
//!
//! A table has no count field; the controller walks lines until it consumes
//! one carrying the End attribute.

use alloc::boxed::Box;
use alloc::vec;
use core::fmt;

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::cache::DmaCache;

/// Largest transfer one descriptor line can describe. A length field of 0
/// encodes this value.
pub const ADMA_MAX_LINE_LEN: u32 = 65536;

/// Attribute: line is valid
pub const ADMA_ATTR_VALID: u16 = 1 << 0;
/// Attribute: last line of the table
pub const ADMA_ATTR_END: u16 = 1 << 1;
/// Attribute: action "transfer data" (Act2=1, Act1=0)
pub const ADMA_ATTR_TRAN: u16 = 1 << 5;

/// One 8-byte ADMA2 descriptor line, little-endian on the wire.
#[repr(C, align(4))]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct AdmaDescriptor {
    attr: U16,
    len: U16,
    addr: U32,
}

impl AdmaDescriptor {
    /// An all-zero line (not valid)
    pub const EMPTY: Self = Self {
        attr: U16::ZERO,
        len: U16::ZERO,
        addr: U32::ZERO,
    };

    /// Build a line for `len` bytes at bus address `addr`.
    ///
    /// `len` must be in `1..=ADMA_MAX_LINE_LEN`.
    pub fn new(addr: u32, len: u32, attr: u16) -> Self {
        debug_assert!(len > 0 && len <= ADMA_MAX_LINE_LEN);
        Self {
            attr: U16::new(attr),
            // 65536 wraps to 0, which is how ADMA2 encodes a full line
            len: U16::new(len as u16),
            addr: U32::new(addr),
        }
    }

    /// Attribute bits
    pub fn attr(&self) -> u16 {
        self.attr.get()
    }

    /// Raw 16-bit length field
    pub fn raw_len(&self) -> u16 {
        self.len.get()
    }

    /// Number of bytes this line transfers
    pub fn transfer_len(&self) -> u32 {
        match self.len.get() {
            0 => ADMA_MAX_LINE_LEN,
            n => n as u32,
        }
    }

    /// Data bus address
    pub fn addr(&self) -> u32 {
        self.addr.get()
    }

    /// Whether this line terminates the table
    pub fn is_end(&self) -> bool {
        self.attr() & ADMA_ATTR_END != 0
    }
}

impl fmt::Debug for AdmaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmaDescriptor")
            .field("attr", &format_args!("{:#06x}", self.attr()))
            .field("len", &self.transfer_len())
            .field("addr", &format_args!("{:#010x}", self.addr()))
            .finish()
    }
}

/// An owned ADMA2 descriptor table.
///
/// The controller reads the table asynchronously once its address has been
/// programmed, so the value must outlive the transfer. Dropping it releases
/// the memory.
pub struct DescriptorTable {
    entries: Box<[AdmaDescriptor]>,
}

impl DescriptorTable {
    /// Describe `len` bytes starting at bus address `addr`.
    ///
    /// The finished table is cleaned from the CPU cache before returning so
    /// the controller fetches what was written. Allocation failure aborts
    /// through the global allocator's error handler.
    pub fn build<C: DmaCache + ?Sized>(addr: u32, len: u32, cache: &C) -> Self {
        debug_assert!(len > 0, "empty ADMA transfer");

        let entries: Box<[AdmaDescriptor]> = if len <= ADMA_MAX_LINE_LEN {
            Box::new([AdmaDescriptor::new(
                addr,
                len,
                ADMA_ATTR_VALID | ADMA_ATTR_TRAN | ADMA_ATTR_END,
            )])
        } else {
            let count = len.div_ceil(ADMA_MAX_LINE_LEN) as usize;
            let mut table = vec![AdmaDescriptor::EMPTY; count].into_boxed_slice();

            let mut data = addr;
            let mut remain = len;
            for entry in table.iter_mut().take(count - 1) {
                *entry = AdmaDescriptor::new(data, ADMA_MAX_LINE_LEN, ADMA_ATTR_VALID | ADMA_ATTR_TRAN);
                data = data.wrapping_add(ADMA_MAX_LINE_LEN);
                remain -= ADMA_MAX_LINE_LEN;
            }

            table[count - 1] = AdmaDescriptor::new(
                data,
                remain,
                ADMA_ATTR_VALID | ADMA_ATTR_TRAN | ADMA_ATTR_END,
            );
            table
        };

        let table = Self { entries };
        cache.clean_invalidate(table.cpu_address(), table.byte_len());

        log::trace!(
            "SDHCI: ADMA table at {:#x}: {} line(s) for {} bytes",
            table.cpu_address(),
            table.entries.len(),
            len
        );

        table
    }

    /// The descriptor lines
    pub fn entries(&self) -> &[AdmaDescriptor] {
        &self.entries
    }

    /// Size of the table in bytes
    pub fn byte_len(&self) -> usize {
        core::mem::size_of_val(&*self.entries)
    }

    /// Address of the table in the CPU's view
    pub fn cpu_address(&self) -> usize {
        self.entries.as_ptr() as usize
    }
}

impl fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorTable")
            .field("address", &format_args!("{:#x}", self.cpu_address()))
            .field("entries", &self.entries)
            .finish()
    }
}
