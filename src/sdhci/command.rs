//! Command engine
//!
//! Issues one command, with an optional ADMA2 data phase, and reports its
//! outcome. The register sequence is the standard SDHCI one:
//!
//! 1. Wait for CMD and DAT inhibit to clear
//! 2. Program timeout, and for data the block size/count, Auto CMD23
//!    argument, ADMA table address and transfer mode
//! 3. Write the argument, then the command register (which starts it)
//! 4. Poll Command Complete, read the response
//! 5. Poll Transfer Complete for data commands and SWITCH_FUNC
//! 6. Decode the error status, soft reset CMD/DAT after data commands

use embedded_hal::blocking::delay::DelayUs;
use tock_registers::fields::{Field, FieldValue};

use super::adma::DescriptorTable;
use super::regs::*;
use super::{Result, SdhciError, SdhciHost};
use crate::cache::DmaCache;
use crate::mmio::RegisterIo;
use crate::time::poll_with_retries;

/// Response format expected from the card.
///
/// The discriminants are the tags used by the SD/MMC layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseType {
    /// No response
    None = 0,
    /// R1: normal 48-bit response
    R1 = 1,
    /// R1b: 48-bit response with busy on DAT0
    R1b = 2,
    /// R2: 136-bit CID/CSD
    R2 = 3,
    /// R3: OCR
    R3 = 4,
    /// R6: published RCA
    R6 = 5,
    /// R7: card interface condition
    R7 = 6,
}

impl TryFrom<u8> for ResponseType {
    type Error = SdhciError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::R1),
            2 => Ok(Self::R1b),
            3 => Ok(Self::R2),
            4 => Ok(Self::R3),
            5 => Ok(Self::R6),
            6 => Ok(Self::R7),
            _ => Err(SdhciError::InvalidArgument),
        }
    }
}

impl ResponseType {
    /// Command register response-type encoding
    fn encoding(self) -> FieldValue<u16, COMMAND::Register> {
        match self {
            Self::None => COMMAND::RESPONSE_TYPE::None,
            Self::R2 => COMMAND::RESPONSE_TYPE::Long136,
            Self::R1 | Self::R3 | Self::R6 | Self::R7 => COMMAND::RESPONSE_TYPE::Short48,
            Self::R1b => COMMAND::RESPONSE_TYPE::Short48Busy,
        }
    }
}

/// Command type field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommandType {
    /// Any ordinary command
    #[default]
    Normal,
    /// CMD52 bus suspend
    Suspend,
    /// CMD52 function select
    Resume,
    /// CMD12/CMD52 abort
    Abort,
}

impl CommandType {
    fn encoding(self) -> FieldValue<u16, COMMAND::Register> {
        match self {
            Self::Normal => COMMAND::CMD_TYPE::Normal,
            Self::Suspend => COMMAND::CMD_TYPE::Suspend,
            Self::Resume => COMMAND::CMD_TYPE::Resume,
            Self::Abort => COMMAND::CMD_TYPE::Abort,
        }
    }
}

/// Data transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Card to memory
    Read,
    /// Memory to card
    Write,
}

/// Data phase of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTransfer {
    /// Bus address of the buffer (identity-mapped, below 4 GiB)
    pub addr: u32,
    /// Number of blocks, `1..=65535`
    pub num_blocks: u32,
    /// Direction
    pub direction: TransferDirection,
}

/// A command and, once it has run, its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command index (0-63)
    pub index: u8,
    /// 32-bit argument
    pub argument: u32,
    /// Response format tag, checked when the command is sent
    resp_tag: u8,
    /// Command type
    pub cmd_type: CommandType,
    /// Optional data phase
    pub data: Option<DataTransfer>,
    /// Response words, filled by [`SdhciHost::send_command`]
    response: [u32; 4],
}

impl Command {
    /// A command without data phase
    pub fn new(index: u8, argument: u32, response: ResponseType) -> Self {
        Self::with_raw_response(index, argument, response as u8)
    }

    /// A command carrying a response tag straight from the SD/MMC layer.
    /// Unknown tags are rejected by `send_command`.
    pub fn with_raw_response(index: u8, argument: u32, tag: u8) -> Self {
        Self {
            index,
            argument,
            resp_tag: tag,
            cmd_type: CommandType::Normal,
            data: None,
            response: [0; 4],
        }
    }

    /// Attach a data phase
    pub fn with_data(mut self, data: DataTransfer) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the command type
    pub fn with_type(mut self, cmd_type: CommandType) -> Self {
        self.cmd_type = cmd_type;
        self
    }

    /// Response format
    pub fn response_type(&self) -> Result<ResponseType> {
        ResponseType::try_from(self.resp_tag)
    }

    /// Response words. For R2 all four carry the CID/CSD with the CRC byte
    /// stripped; otherwise only word 0 is meaningful.
    pub fn response(&self) -> &[u32; 4] {
        &self.response
    }
}

/// Rebuild the 128-bit R2 payload from the response registers.
///
/// The controller stores bits [127:8] of the response, dropping the CRC byte,
/// so every word is shifted up by 8 bits and picks up the top byte of the
/// word below it.
pub fn assemble_r2_response(raw: [u32; 4]) -> [u32; 4] {
    let mut resp = [0u32; 4];
    for i in 0..4 {
        resp[i] = raw[i] << 8;
        if i > 0 {
            resp[i] |= raw[i - 1] >> 24;
        }
    }
    resp
}

/// Error status bits in reporting order
const ERROR_PRIORITY: [(Field<u16, ERROR_INT::Register>, SdhciError); 10] = [
    (ERROR_INT::CMD_TIMEOUT, SdhciError::CommandTimeout),
    (ERROR_INT::CMD_CRC, SdhciError::CommandCrc),
    (ERROR_INT::CMD_END_BIT, SdhciError::CommandEndBit),
    (ERROR_INT::CMD_INDEX, SdhciError::CommandIndex),
    (ERROR_INT::DATA_TIMEOUT, SdhciError::DataTimeout),
    (ERROR_INT::DATA_CRC, SdhciError::DataCrc),
    (ERROR_INT::DATA_END_BIT, SdhciError::DataEndBit),
    (ERROR_INT::CURRENT_LIMIT, SdhciError::CurrentLimit),
    (ERROR_INT::AUTO_CMD, SdhciError::AutoCmd),
    (ERROR_INT::ADMA, SdhciError::Adma),
];

/// Map an error status snapshot to the highest-priority error it reports.
///
/// Returns `None` when only vendor or reserved bits are set.
pub fn decode_error(status: ErrorStatus) -> Option<SdhciError> {
    ERROR_PRIORITY
        .iter()
        .find(|(field, _)| status.is_set(*field))
        .map(|&(_, err)| err)
}

impl<R, D, C> SdhciHost<R, D, C>
where
    R: RegisterIo,
    D: DelayUs<u32>,
    C: DmaCache,
{
    /// Send `cmd` and wait for it (and its data phase) to finish.
    ///
    /// On success the response words are stored in `cmd`. A read's
    /// destination buffer is invalidated from the CPU cache before this
    /// returns.
    pub fn send_command(&mut self, cmd: &mut Command) -> Result<()> {
        let resp_type = cmd.response_type().inspect_err(|_| {
            log::error!("SDHCI: CMD{} has invalid response type {}", cmd.index, cmd.resp_tag);
        })?;
        if cmd.index > 63 {
            log::error!("SDHCI: invalid command index {}", cmd.index);
            return Err(SdhciError::InvalidArgument);
        }
        let data = match cmd.data {
            Some(data) => Some((data, self.validate_transfer(&data)?)),
            None => None,
        };

        self.wait_lines_idle()?;

        log::trace!("SDHCI: CMD{} arg={:#010x} resp={:?}", cmd.index, cmd.argument, resp_type);

        let flags = COMMAND::CMD_INDEX.val(cmd.index as u16)
            + resp_type.encoding()
            + cmd.cmd_type.encoding()
            + if data.is_some() {
                COMMAND::DATA_PRESENT::SET
            } else {
                COMMAND::DATA_PRESENT::CLEAR
            };

        // Must stay alive until the controller has finished with it
        let table = match data {
            Some((data, len)) => Some(self.build_table(&data, len)?),
            None => None,
        };

        self.regs.write8(offset::TIMEOUT_CONTROL, self.config.timeout_control);

        if let (Some((data, _)), Some((_, table_addr))) = (data, &table) {
            self.program_transfer(&data, *table_addr);
        }

        self.regs.write32(offset::ARGUMENT, cmd.argument);
        self.regs.write16(offset::COMMAND, flags.value);

        let result = self.complete_command(cmd, resp_type);

        if data.is_some() {
            self.regs.write8(
                offset::SOFTWARE_RESET,
                (SOFTWARE_RESET::RESET_CMD::SET + SOFTWARE_RESET::RESET_DATA::SET).value,
            );
        }
        drop(table);
        result?;

        if let Some((data, len)) = data
            && data.direction == TransferDirection::Read
        {
            self.cache.invalidate(data.addr as usize, len as usize);
        }

        Ok(())
    }

    /// Validate a data phase and return its length in bytes
    fn validate_transfer(&self, data: &DataTransfer) -> Result<u32> {
        let block_size = self.config.block_size;
        if block_size == 0 || block_size > 0xFFF {
            log::error!("SDHCI: invalid block size {}", block_size);
            return Err(SdhciError::InvalidArgument);
        }
        if data.num_blocks == 0 || data.num_blocks > u16::MAX as u32 {
            log::error!("SDHCI: invalid block count {}", data.num_blocks);
            return Err(SdhciError::InvalidArgument);
        }
        // Invalidating a partial line would drop whatever shares it
        let line = self.cache.line_size();
        if data.direction == TransferDirection::Read && !(data.addr as usize).is_multiple_of(line) {
            log::error!(
                "SDHCI: read buffer {:#x} not aligned to {}-byte cache line",
                data.addr,
                line
            );
            return Err(SdhciError::InvalidArgument);
        }

        data.num_blocks
            .checked_mul(block_size as u32)
            .filter(|len| data.addr.checked_add(*len).is_some())
            .ok_or_else(|| {
                log::error!(
                    "SDHCI: buffer {:#x} + {} blocks exceeds the 32-bit bus",
                    data.addr,
                    data.num_blocks
                );
                SdhciError::InvalidArgument
            })
    }

    /// Wait for both CMD and DAT inhibit to clear
    fn wait_lines_idle(&mut self) -> Result<()> {
        let mask = PRESENT_STATE::CMD_INHIBIT::SET + PRESENT_STATE::DAT_INHIBIT::SET;

        let regs = &self.regs;
        if poll_with_retries(
            &mut self.delay,
            self.config.idle_retries,
            self.config.idle_interval_us,
            || regs.read32(offset::PRESENT_STATE) & mask.value == 0,
        ) {
            Ok(())
        } else {
            log::error!("SDHCI: CMD/DAT lines never went idle");
            Err(SdhciError::BusBusy)
        }
    }

    /// Build the descriptor table and resolve the address the controller
    /// fetches it from
    fn build_table(&self, data: &DataTransfer, len: u32) -> Result<(DescriptorTable, u32)> {
        let table = DescriptorTable::build(data.addr, len, &self.cache);

        match self.cache.dma_address(table.cpu_address()) {
            Some(addr) => Ok((table, addr)),
            None => {
                log::error!(
                    "SDHCI: ADMA table at {:#x} is out of 32-bit DMA reach",
                    table.cpu_address()
                );
                Err(SdhciError::DmaUnreachable)
            }
        }
    }

    /// Program the data registers for a transfer described by the table at
    /// `table_addr`
    fn program_transfer(&mut self, data: &DataTransfer, table_addr: u32) {
        self.regs.write16(
            offset::BLOCK_SIZE,
            BLOCK_SIZE::BLOCK_SIZE.val(self.config.block_size).value,
        );

        let mut mode = TRANSFER_MODE::DMA_ENABLE::SET;
        if data.num_blocks > 1 {
            mode += TRANSFER_MODE::MULTI_BLOCK::SET
                + TRANSFER_MODE::BLOCK_COUNT_ENABLE::SET
                + TRANSFER_MODE::AUTO_CMD::Cmd23;
            // Auto CMD23 sends the block count ahead of the command
            self.regs.write32(offset::ARGUMENT2, data.num_blocks);
        }
        if data.direction == TransferDirection::Read {
            mode += TRANSFER_MODE::DATA_DIRECTION::Read;
        }

        self.regs.write16(offset::BLOCK_COUNT, data.num_blocks as u16);
        self.regs.write32(offset::ADMA_ADDRESS, table_addr);
        self.regs.write16(offset::TRANSFER_MODE, mode.value);
    }

    /// Wait for completion, collect the response and decode errors
    fn complete_command(&mut self, cmd: &mut Command, resp_type: ResponseType) -> Result<()> {
        let regs = &self.regs;
        let status_set = |field: Field<u16, NORMAL_INT::Register>| {
            NormalStatus::new(regs.read16(offset::NORMAL_INT_STATUS)).is_set(field)
        };

        let mut timed_out = None;

        if poll_with_retries(
            &mut self.delay,
            self.config.cmd_retries,
            self.config.cmd_interval_us,
            || status_set(NORMAL_INT::CMD_COMPLETE),
        ) {
            regs.write16(offset::NORMAL_INT_STATUS, NORMAL_INT::CMD_COMPLETE::SET.value);

            if resp_type == ResponseType::R2 {
                let raw = core::array::from_fn(|i| regs.read32(offset::RESPONSE + 4 * i));
                cmd.response = assemble_r2_response(raw);
            } else {
                cmd.response[0] = regs.read32(offset::RESPONSE);
            }

            // SWITCH_FUNC holds DAT0 busy even without a data phase
            if cmd.data.is_some() || cmd.index == SD_CMD_SWITCH_FUNC {
                if poll_with_retries(
                    &mut self.delay,
                    self.config.transfer_retries,
                    self.config.transfer_interval_us,
                    || status_set(NORMAL_INT::TRANSFER_COMPLETE),
                ) {
                    regs.write16(offset::NORMAL_INT_STATUS, NORMAL_INT::TRANSFER_COMPLETE::SET.value);
                } else {
                    log::error!("SDHCI: CMD{} transfer never completed", cmd.index);
                    timed_out = Some(SdhciError::TransferIncomplete);
                }
            }
        } else {
            log::error!("SDHCI: CMD{} never completed", cmd.index);
            timed_out = Some(SdhciError::CommandIncomplete);
        }

        self.check_error_status(cmd.index)?;

        match timed_out {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Report and clear latched error status
    fn check_error_status(&mut self, index: u8) -> Result<()> {
        let normal = NormalStatus::new(self.regs.read16(offset::NORMAL_INT_STATUS));
        if !normal.is_set(NORMAL_INT::ERROR) {
            return Ok(());
        }

        let raw = self.regs.read16(offset::ERROR_INT_STATUS);
        self.regs.write16(offset::ERROR_INT_STATUS, raw);

        match decode_error(ErrorStatus::new(raw)) {
            Some(err) => {
                log::error!("SDHCI: CMD{} failed: {} (status {:#06x})", index, err, raw);
                Err(err)
            }
            None => {
                log::warn!("SDHCI: CMD{} unrecognized error status {:#06x}", index, raw);
                Ok(())
            }
        }
    }
}
