//! SD clock programming and UHS mode selection

use embedded_hal::blocking::delay::DelayUs;
use tock_registers::LocalRegisterCopy;

use super::regs::*;
use super::{Result, SdhciError, SdhciHost, Stall};
use crate::cache::DmaCache;
use crate::mmio::RegisterIo;
use crate::time::spin_until;

/// Pick the SDCLK divider for `target_hz` from `base_hz`.
///
/// Returns 0 (no division) when the target equals the base clock, otherwise
/// the smallest even divider in `2..=2046` whose output does not exceed the
/// target. Fails with `ClockUnsupported` when the target is above the base
/// clock or below `base / 2046`.
pub fn select_divider(base_hz: u32, target_hz: u32) -> Result<u32> {
    if target_hz > base_hz {
        return Err(SdhciError::ClockUnsupported);
    }
    if target_hz == base_hz {
        return Ok(0);
    }

    (2..=SDHCI_MAX_DIV_SPEC_300)
        .step_by(2)
        .find(|div| base_hz / div <= target_hz)
        .ok_or(SdhciError::ClockUnsupported)
}

impl<R, D, C> SdhciHost<R, D, C>
where
    R: RegisterIo,
    D: DelayUs<u32>,
    C: DmaCache,
{
    /// Program the divider for `freq_hz`, wait for the internal clock to
    /// stabilize and gate SDCLK on.
    ///
    /// The SD clock must already be off.
    pub fn clk_supply(&mut self, freq_hz: u32) -> Result<()> {
        let div = select_divider(self.caps.base_clk_rate, freq_hz).inspect_err(|_| {
            log::error!(
                "SDHCI: cannot derive {} Hz from {} Hz base clock",
                freq_hz,
                self.caps.base_clk_rate
            );
        })?;

        // The register holds div / 2, split over two fields
        let select = (div >> 1) as u16;
        let clk = CLOCK_CONTROL::FREQ_SELECT.val(select & 0xFF)
            + CLOCK_CONTROL::FREQ_SELECT_HI.val((select >> 8) & 0x3)
            + CLOCK_CONTROL::INTERNAL_CLK_EN::SET;

        let regs = &self.regs;
        regs.write16(offset::CLOCK_CONTROL, clk.value);

        if !spin_until(self.config.spin_bound, || {
            ClockControl::new(regs.read16(offset::CLOCK_CONTROL))
                .is_set(CLOCK_CONTROL::INTERNAL_CLK_STABLE)
        }) {
            log::error!("SDHCI: internal clock never stabilized");
            return Err(SdhciError::Stalled(Stall::ClockStable));
        }

        let mut clk = ClockControl::new(regs.read16(offset::CLOCK_CONTROL));
        clk.modify(CLOCK_CONTROL::SD_CLK_EN::SET);
        regs.write16(offset::CLOCK_CONTROL, clk.get());

        self.caps.cur_clk_rate = match div {
            0 => self.caps.base_clk_rate,
            div => self.caps.base_clk_rate / div,
        };
        log::debug!(
            "SDHCI: SD clock {} Hz (divider {})",
            self.caps.cur_clk_rate,
            div
        );

        Ok(())
    }

    /// Change the SD clock. Fails with `BusBusy` while a command or data
    /// transfer is in flight.
    pub fn change_frequency(&mut self, freq_hz: u32) -> Result<()> {
        let present = PresentState::new(self.regs.read32(offset::PRESENT_STATE));
        if present.is_set(PRESENT_STATE::CMD_INHIBIT) || present.is_set(PRESENT_STATE::DAT_INHIBIT) {
            log::error!("SDHCI: cannot change clock, CMD/DAT lines are active");
            return Err(SdhciError::BusBusy);
        }

        self.regs.write16(offset::CLOCK_CONTROL, 0);
        self.clk_supply(freq_hz)
    }

    /// Switch to SDR50 (when supported) at the configured SDR clock.
    pub fn set_sdr_mode(&mut self) -> Result<()> {
        self.disable_sd_clock();

        let mut ctrl2 = LocalRegisterCopy::<u16, HOST_CONTROL2::Register>::new(
            self.regs.read16(offset::HOST_CONTROL2),
        );
        if self.caps.sdr50_support {
            ctrl2.modify(HOST_CONTROL2::UHS_MODE::SDR50);
        } else {
            log::warn!("SDHCI: SDR50 not supported, keeping UHS mode");
        }
        self.regs.write16(offset::HOST_CONTROL2, ctrl2.get());

        self.clk_supply(self.config.sdr_clock_hz)
    }

    /// Switch to DDR50, keeping the current SD clock rate.
    pub fn set_ddr_mode(&mut self) -> Result<()> {
        self.disable_sd_clock();

        let mut ctrl2 = LocalRegisterCopy::<u16, HOST_CONTROL2::Register>::new(
            self.regs.read16(offset::HOST_CONTROL2),
        );
        ctrl2.modify(HOST_CONTROL2::UHS_MODE::DDR50);
        self.regs.write16(offset::HOST_CONTROL2, ctrl2.get());

        if !self.caps.ddr_support {
            log::warn!("SDHCI: DDR50 selected but not advertised");
        }

        self.clk_supply(self.caps.cur_clk_rate)
    }

    fn disable_sd_clock(&mut self) {
        let mut clk = ClockControl::new(self.regs.read16(offset::CLOCK_CONTROL));
        clk.modify(CLOCK_CONTROL::SD_CLK_EN::CLEAR);
        self.regs.write16(offset::CLOCK_CONTROL, clk.get());
    }
}
