//! SDHCI (SD Host Controller Interface) Driver
//!
//! Transport layer for one SDHCI controller during early boot: controller
//! bring-up, clock programming, ADMA2 data transfers and error decoding. What
//! a command *means* is decided by the SD/MMC layer above; here a command is
//! an opaque index, argument and response format.
//!
//! A controller is driven through an [`SdhciHost`], which owns the register
//! blocks, the delay source, the cache hooks and the capability record.
//! Every operation takes `&mut self`, so one command is in flight at a time.

pub mod adma;
mod clock;
mod command;
mod power;
pub mod regs;

pub use clock::select_divider;
pub use command::{
    Command, CommandType, DataTransfer, ResponseType, TransferDirection, assemble_r2_response,
    decode_error,
};
pub use power::{Completion, PowerHandshake};

use crate::cache::DmaCache;
use crate::mmio::RegisterIo;
use crate::time::spin_until;
use embedded_hal::blocking::delay::DelayUs;
use tock_registers::LocalRegisterCopy;

use regs::*;

/// Block size used for every data transfer (bytes)
pub const SDHCI_MMC_BLK_SZ: u16 = 512;

/// SDR50 clock target (100 MHz, no tuning needed)
pub const SDR50_CLOCK_HZ: u32 = 100_000_000;

/// SDHCI error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdhciError {
    /// Unrecognized response type, bus width or transfer geometry
    InvalidArgument,
    /// CMD/DAT lines did not go idle, or a clock change was attempted while active
    BusBusy,
    /// Requested SD clock cannot be derived from the base clock
    ClockUnsupported,
    /// Capabilities advertise none of 3.3V, 3.0V or 1.8V
    UnsupportedVoltage,
    /// Descriptor table lies outside the controller's 32-bit DMA reach
    DmaUnreachable,
    /// Command Complete never asserted within the retry budget
    CommandIncomplete,
    /// Transfer Complete never asserted within the retry budget
    TransferIncomplete,
    /// Command timeout error reported by the controller
    CommandTimeout,
    /// Command CRC error
    CommandCrc,
    /// Command end bit error
    CommandEndBit,
    /// Command index error
    CommandIndex,
    /// Data timeout error
    DataTimeout,
    /// Data CRC error
    DataCrc,
    /// Data end bit error
    DataEndBit,
    /// Current limit error
    CurrentLimit,
    /// Auto CMD12/CMD23 error
    AutoCmd,
    /// ADMA error
    Adma,
    /// A hardware handshake did not finish within the configured spin bound
    Stalled(Stall),
}

/// Hardware handshakes the driver spins on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stall {
    /// Internal clock stable bit
    ClockStable,
    /// Software reset bits self-clearing
    ResetComplete,
    /// Power-control interrupt acknowledgement
    PowerHandshake,
}

impl core::fmt::Display for SdhciError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::BusBusy => write!(f, "CMD/DAT lines busy"),
            Self::ClockUnsupported => write!(f, "clock frequency not supported"),
            Self::UnsupportedVoltage => write!(f, "no supported bus voltage"),
            Self::DmaUnreachable => write!(f, "DMA buffer out of 32-bit reach"),
            Self::CommandIncomplete => write!(f, "command never completed"),
            Self::TransferIncomplete => write!(f, "transfer never completed"),
            Self::CommandTimeout => write!(f, "command timeout error"),
            Self::CommandCrc => write!(f, "command CRC error"),
            Self::CommandEndBit => write!(f, "command end bit error"),
            Self::CommandIndex => write!(f, "command index error"),
            Self::DataTimeout => write!(f, "data timeout error"),
            Self::DataCrc => write!(f, "data CRC error"),
            Self::DataEndBit => write!(f, "data end bit error"),
            Self::CurrentLimit => write!(f, "current limit error"),
            Self::AutoCmd => write!(f, "auto CMD error"),
            Self::Adma => write!(f, "ADMA error"),
            Self::Stalled(Stall::ClockStable) => write!(f, "internal clock never stabilized"),
            Self::Stalled(Stall::ResetComplete) => write!(f, "software reset never completed"),
            Self::Stalled(Stall::PowerHandshake) => write!(f, "power interrupt never handled"),
        }
    }
}

impl core::error::Error for SdhciError {}

/// Result type for SDHCI operations
pub type Result<T> = core::result::Result<T, SdhciError>;

/// Bus voltage advertised by the capabilities register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusVoltage {
    /// 3.3V
    V3_3,
    /// 3.0V
    V3_0,
    /// 1.8V
    V1_8,
}

impl BusVoltage {
    fn field(self) -> tock_registers::fields::FieldValue<u8, POWER_CONTROL::Register> {
        match self {
            Self::V3_3 => POWER_CONTROL::BUS_VOLTAGE::V3_3,
            Self::V3_0 => POWER_CONTROL::BUS_VOLTAGE::V3_0,
            Self::V1_8 => POWER_CONTROL::BUS_VOLTAGE::V1_8,
        }
    }
}

/// Data bus width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    /// DAT0 only
    One,
    /// DAT0-3
    Four,
    /// DAT0-7 (eMMC)
    Eight,
}

impl TryFrom<u8> for BusWidth {
    type Error = SdhciError;

    fn try_from(lanes: u8) -> Result<Self> {
        match lanes {
            1 => Ok(Self::One),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            _ => Err(SdhciError::InvalidArgument),
        }
    }
}

/// Host capability and clock state.
///
/// Filled once by [`SdhciHost::init`]; afterwards only the clock controller
/// writes `cur_clk_rate`, and only with a rate it has programmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCaps {
    /// Base clock for SDCLK (Hz)
    pub base_clk_rate: u32,
    /// Maximum block length (bytes)
    pub max_blk_len: u32,
    /// 8-bit bus supported
    pub bus_width_8bit: bool,
    /// ADMA2 supported
    pub adma_support: bool,
    /// Highest supported bus voltage
    pub voltage: Option<BusVoltage>,
    /// DDR50 supported
    pub ddr_support: bool,
    /// SDR50 supported
    pub sdr50_support: bool,
    /// SD clock currently programmed (Hz), 0 until the first clock supply
    pub cur_clk_rate: u32,
}

impl HostCaps {
    /// Decode the two capabilities register words.
    pub fn decode(caps0: u32, caps1: u32) -> Self {
        let caps = LocalRegisterCopy::<u32, CAPABILITIES::Register>::new(caps0);
        let caps_1 = LocalRegisterCopy::<u32, CAPABILITIES_1::Register>::new(caps1);

        let voltage = if caps.is_set(CAPABILITIES::SUPPORT_3V3) {
            Some(BusVoltage::V3_3)
        } else if caps.is_set(CAPABILITIES::SUPPORT_3V0) {
            Some(BusVoltage::V3_0)
        } else if caps.is_set(CAPABILITIES::SUPPORT_1V8) {
            Some(BusVoltage::V1_8)
        } else {
            None
        };

        Self {
            base_clk_rate: caps.read(CAPABILITIES::BASE_CLK_FREQ) * 1_000_000,
            max_blk_len: 512 << caps.read(CAPABILITIES::MAX_BLOCK_LEN),
            bus_width_8bit: caps.is_set(CAPABILITIES::SUPPORT_8BIT),
            adma_support: caps.is_set(CAPABILITIES::SUPPORT_ADMA2),
            voltage,
            ddr_support: caps_1.is_set(CAPABILITIES_1::SUPPORT_DDR50),
            sdr50_support: caps_1.is_set(CAPABILITIES_1::SUPPORT_SDR50),
            cur_clk_rate: 0,
        }
    }
}

/// Location of the vendor power-control registers.
///
/// On MSM SDCC controllers these live in the "core" register block next to,
/// not inside, the standard SDHCI block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerLayout {
    /// Power-control interrupt mask register
    pub mask_offset: usize,
    /// Power-control acknowledge register
    pub ctl_offset: usize,
    /// Host-controller mode select register
    pub hc_mode_offset: usize,
    /// Interrupt line of the power-control IRQ
    pub irq: u32,
}

impl Default for PowerLayout {
    /// MSM8974 SDCC1 layout
    fn default() -> Self {
        Self {
            mask_offset: 0xE0,
            ctl_offset: 0xE8,
            hc_mode_offset: 0x78,
            irq: 32 + 138,
        }
    }
}

/// Fixed tunables of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Block size programmed for data transfers
    pub block_size: u16,
    /// Present-state polls before giving up with `BusBusy`
    pub idle_retries: u32,
    /// Delay between present-state polls (µs)
    pub idle_interval_us: u32,
    /// Command Complete polls
    pub cmd_retries: u32,
    /// Delay between Command Complete polls (µs)
    pub cmd_interval_us: u32,
    /// Transfer Complete polls
    pub transfer_retries: u32,
    /// Delay between Transfer Complete polls (µs)
    pub transfer_interval_us: u32,
    /// Data timeout counter value (TMCLK x 2^(13 + n))
    pub timeout_control: u8,
    /// SD clock used by [`SdhciHost::set_sdr_mode`]
    pub sdr_clock_hz: u32,
    /// Bound for the clock-stable, reset and power handshake spins.
    /// `None` waits forever.
    pub spin_bound: Option<u32>,
    /// Vendor power-control register layout
    pub power: PowerLayout,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            block_size: SDHCI_MMC_BLK_SZ,
            idle_retries: 10,
            idle_interval_us: 1000,
            cmd_retries: 10_000,
            cmd_interval_us: 500,
            transfer_retries: 10_000,
            transfer_interval_us: 1000,
            timeout_control: 0x0E,
            sdr_clock_hz: SDR50_CLOCK_HZ,
            spin_bound: None,
            power: PowerLayout::default(),
        }
    }
}

/// Interrupt controller hook used during bring-up.
///
/// The platform routes the power-control IRQ to
/// [`PowerHandshake::handle_irq`]; the driver only asks for the line to be
/// unmasked once the handshake is armed.
pub trait InterruptController {
    /// Unmask interrupt line `irq`
    fn unmask(&mut self, irq: u32);
}

/// One SDHCI controller and its state.
pub struct SdhciHost<R, D, C> {
    /// Standard SDHCI register block
    regs: R,
    /// Vendor core block holding the power-control and mode registers
    core: R,
    /// Sleep source for retry spacing
    delay: D,
    /// Cache maintenance for DMA buffers
    cache: C,
    /// Tunables
    config: HostConfig,
    /// Capabilities and current clock
    caps: HostCaps,
}

impl<R, D, C> SdhciHost<R, D, C>
where
    R: RegisterIo,
    D: DelayUs<u32>,
    C: DmaCache,
{
    /// Wrap a controller. Nothing is touched until [`init`](Self::init).
    pub fn new(regs: R, core: R, delay: D, cache: C, config: HostConfig) -> Self {
        Self {
            regs,
            core,
            delay,
            cache,
            config,
            caps: HostCaps::default(),
        }
    }

    /// Capability record
    pub fn caps(&self) -> &HostCaps {
        &self.caps
    }

    /// Configuration
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Bring the controller to its default state.
    ///
    /// Resets it, decodes the capabilities, powers the bus through the
    /// vendor power-control handshake, selects 1-bit width and 32-bit ADMA2,
    /// and enables interrupt status reporting. The SD clock is left off.
    pub fn init<I: InterruptController>(
        &mut self,
        irq: &mut I,
        handshake: &PowerHandshake,
    ) -> Result<()> {
        self.reset_all()?;

        let caps0 = self.regs.read32(offset::CAPABILITIES);
        let caps1 = self.regs.read32(offset::CAPABILITIES_1);
        self.caps = HostCaps::decode(caps0, caps1);

        log::debug!("SDHCI capabilities: {:#010x} {:#010x}", caps0, caps1);
        log::info!(
            "SDHCI: base clock {} MHz, max block {} bytes, voltage {:?}",
            self.caps.base_clk_rate / 1_000_000,
            self.caps.max_blk_len,
            self.caps.voltage
        );
        if self.caps.adma_support {
            log::info!("SDHCI: ADMA2 supported");
        }
        if self.caps.bus_width_8bit {
            log::info!("SDHCI: 8-bit bus supported");
        }
        if self.caps.ddr_support {
            log::info!("SDHCI: DDR50 supported");
        }
        if self.caps.sdr50_support {
            log::info!("SDHCI: SDR50 supported");
        }

        let voltage = self.caps.voltage.ok_or_else(|| {
            log::error!("SDHCI: capabilities advertise no bus voltage");
            SdhciError::UnsupportedVoltage
        })?;

        // The power IRQ must be able to fire before the bus power write
        handshake.arm();
        irq.unmask(self.config.power.irq);

        let all_events = PWRCTL::BUS_OFF::SET
            + PWRCTL::BUS_ON::SET
            + PWRCTL::IO_LOW::SET
            + PWRCTL::IO_HIGH::SET;
        self.core
            .write32(self.config.power.mask_offset, all_events.value);

        self.set_bus_power_on(voltage);

        if !handshake.wait(self.config.spin_bound) {
            log::error!("SDHCI: power control interrupt never arrived");
            return Err(SdhciError::Stalled(Stall::PowerHandshake));
        }
        log::debug!("SDHCI: bus power on, ack {:#x}", handshake.last_ack());

        self.set_bus_width(1)?;
        self.set_adma_mode();
        self.enable_status();

        Ok(())
    }

    /// Switch the MSM controller between the legacy MCI register set and the
    /// SDHCI register set. Must be enabled before [`init`](Self::init).
    pub fn mode_enable(&self, enable: bool) {
        let mode = if enable {
            HC_MODE::HC_MODE_EN::SET
        } else {
            HC_MODE::HC_MODE_EN::CLEAR
        };
        self.core.write32(self.config.power.hc_mode_offset, mode.value);
    }

    /// Set the data bus width (1, 4 or 8 lanes).
    pub fn set_bus_width(&mut self, width: u8) -> Result<()> {
        let width = BusWidth::try_from(width).inspect_err(|_| {
            log::error!("SDHCI: bus width is invalid: {}", width);
        })?;

        let mut ctrl = LocalRegisterCopy::<u8, HOST_CONTROL::Register>::new(
            self.regs.read8(offset::HOST_CONTROL),
        );
        ctrl.modify(match width {
            BusWidth::One => {
                HOST_CONTROL::DATA_WIDTH_4BIT::CLEAR + HOST_CONTROL::DATA_WIDTH_8BIT::CLEAR
            }
            BusWidth::Four => {
                HOST_CONTROL::DATA_WIDTH_4BIT::SET + HOST_CONTROL::DATA_WIDTH_8BIT::CLEAR
            }
            BusWidth::Eight => {
                HOST_CONTROL::DATA_WIDTH_4BIT::CLEAR + HOST_CONTROL::DATA_WIDTH_8BIT::SET
            }
        });
        self.regs.write8(offset::HOST_CONTROL, ctrl.get());

        if width == BusWidth::Eight && !self.caps.bus_width_8bit {
            log::warn!("SDHCI: 8-bit bus selected but not advertised");
        }
        Ok(())
    }

    /// Reset the whole controller and wait for the reset bit to clear
    fn reset_all(&mut self) -> Result<()> {
        let regs = &self.regs;
        regs.write8(offset::SOFTWARE_RESET, SOFTWARE_RESET::RESET_ALL::SET.value);

        if !spin_until(self.config.spin_bound, || {
            regs.read8(offset::SOFTWARE_RESET) & SOFTWARE_RESET::RESET_ALL::SET.value == 0
        }) {
            log::error!("SDHCI: reset never completed");
            return Err(SdhciError::Stalled(Stall::ResetComplete));
        }
        Ok(())
    }

    /// Select the bus voltage, then switch bus power on
    fn set_bus_power_on(&mut self, voltage: BusVoltage) {
        let select = voltage.field();
        self.regs.write8(offset::POWER_CONTROL, select.value);
        self.regs
            .write8(offset::POWER_CONTROL, (select + POWER_CONTROL::BUS_POWER::SET).value);
    }

    /// Select 32-bit ADMA2
    fn set_adma_mode(&mut self) {
        let mut ctrl = LocalRegisterCopy::<u8, HOST_CONTROL::Register>::new(
            self.regs.read8(offset::HOST_CONTROL),
        );
        ctrl.modify(HOST_CONTROL::DMA_SELECT::ADMA32);
        self.regs.write8(offset::HOST_CONTROL, ctrl.get());
    }

    /// Enable status reporting and signalling for completions and all errors
    fn enable_status(&mut self) {
        let normal = NORMAL_INT::CMD_COMPLETE::SET
            + NORMAL_INT::TRANSFER_COMPLETE::SET
            + NORMAL_INT::DMA_INT::SET;
        let regs = &self.regs;
        regs.write16(offset::NORMAL_INT_STATUS_EN, normal.value);
        regs.write16(offset::ERROR_INT_STATUS_EN, 0xFFFF);
        regs.write16(offset::NORMAL_INT_SIGNAL_EN, normal.value);
        regs.write16(offset::ERROR_INT_SIGNAL_EN, 0xFFFF);
    }
}
