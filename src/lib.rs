//! sdhci-boot - SDHCI controller transport for early boot firmware
//!
//! Drives one SD Host Controller Interface block far enough for an SD/MMC
//! protocol layer to identify a card and move blocks: controller bring-up
//! with the MSM power-control handshake, SD clock programming, and commands
//! with ADMA2 data transfers.
//!
//! The crate is `no_std` and needs an allocator for descriptor tables.
//! Hardware access, sleeping and cache maintenance are injected through
//! [`mmio::RegisterIo`], `embedded_hal::blocking::delay::DelayUs` and
//! [`cache::DmaCache`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cache;
pub mod mmio;
pub mod sdhci;
pub mod time;

#[cfg(test)]
mod sim;

pub use sdhci::{
    Command, DataTransfer, HostConfig, PowerHandshake, ResponseType, SdhciError, SdhciHost,
    TransferDirection,
};
