//! SDHCI Register Definitions using tock-registers
//!
//! Bitfields for the standard SDHCI register block (SD Host Controller
//! Simplified Specification v3.00) and for the vendor power-control block
//! that sits next to it on MSM SDCC controllers.
//!
//! The driver reaches registers through [`RegisterIo`](crate::mmio::RegisterIo)
//! by byte offset, so values are composed with `FieldValue` arithmetic and
//! decoded with `LocalRegisterCopy` rather than through a mapped struct.

use tock_registers::{LocalRegisterCopy, register_bitfields};

// ============================================================================
// Register Offsets
// ============================================================================

/// Byte offsets into the SDHCI register block
pub mod offset {
    /// Argument 2 Register, used by Auto CMD23 (0x00)
    pub const ARGUMENT2: usize = 0x00;
    /// Block Size Register (0x04)
    pub const BLOCK_SIZE: usize = 0x04;
    /// Block Count Register (0x06)
    pub const BLOCK_COUNT: usize = 0x06;
    /// Argument Register (0x08)
    pub const ARGUMENT: usize = 0x08;
    /// Transfer Mode Register (0x0C)
    pub const TRANSFER_MODE: usize = 0x0C;
    /// Command Register (0x0E)
    pub const COMMAND: usize = 0x0E;
    /// Response Registers 0..3 (0x10-0x1F)
    pub const RESPONSE: usize = 0x10;
    /// Present State Register (0x24)
    pub const PRESENT_STATE: usize = 0x24;
    /// Host Control 1 Register (0x28)
    pub const HOST_CONTROL: usize = 0x28;
    /// Power Control Register (0x29)
    pub const POWER_CONTROL: usize = 0x29;
    /// Clock Control Register (0x2C)
    pub const CLOCK_CONTROL: usize = 0x2C;
    /// Timeout Control Register (0x2E)
    pub const TIMEOUT_CONTROL: usize = 0x2E;
    /// Software Reset Register (0x2F)
    pub const SOFTWARE_RESET: usize = 0x2F;
    /// Normal Interrupt Status Register (0x30)
    pub const NORMAL_INT_STATUS: usize = 0x30;
    /// Error Interrupt Status Register (0x32)
    pub const ERROR_INT_STATUS: usize = 0x32;
    /// Normal Interrupt Status Enable Register (0x34)
    pub const NORMAL_INT_STATUS_EN: usize = 0x34;
    /// Error Interrupt Status Enable Register (0x36)
    pub const ERROR_INT_STATUS_EN: usize = 0x36;
    /// Normal Interrupt Signal Enable Register (0x38)
    pub const NORMAL_INT_SIGNAL_EN: usize = 0x38;
    /// Error Interrupt Signal Enable Register (0x3A)
    pub const ERROR_INT_SIGNAL_EN: usize = 0x3A;
    /// Host Control 2 Register (0x3E)
    pub const HOST_CONTROL2: usize = 0x3E;
    /// Capabilities Register, low word (0x40)
    pub const CAPABILITIES: usize = 0x40;
    /// Capabilities Register, high word (0x44)
    pub const CAPABILITIES_1: usize = 0x44;
    /// ADMA System Address Register, low 32 bits (0x58)
    pub const ADMA_ADDRESS: usize = 0x58;
}

// ============================================================================
// Register Bitfield Definitions
// ============================================================================

register_bitfields! [
    u32,
    /// Present State Register (0x24)
    pub PRESENT_STATE [
        /// Command Inhibit (CMD)
        CMD_INHIBIT OFFSET(0) NUMBITS(1) [],
        /// Command Inhibit (DAT)
        DAT_INHIBIT OFFSET(1) NUMBITS(1) [],
        /// DAT Line Active
        DAT_ACTIVE OFFSET(2) NUMBITS(1) [],
        /// Write Transfer Active
        WRITE_ACTIVE OFFSET(8) NUMBITS(1) [],
        /// Read Transfer Active
        READ_ACTIVE OFFSET(9) NUMBITS(1) [],
        /// Card Inserted
        CARD_INSERTED OFFSET(16) NUMBITS(1) []
    ],

    /// Capabilities Register (0x40)
    pub CAPABILITIES [
        /// Timeout Clock Frequency
        TIMEOUT_CLK_FREQ OFFSET(0) NUMBITS(6) [],
        /// Base Clock Frequency For SD Clock (MHz)
        BASE_CLK_FREQ OFFSET(8) NUMBITS(8) [],
        /// Max Block Length (0=512, 1=1024, 2=2048)
        MAX_BLOCK_LEN OFFSET(16) NUMBITS(2) [],
        /// 8-bit Support For Embedded Device
        SUPPORT_8BIT OFFSET(18) NUMBITS(1) [],
        /// ADMA2 Support
        SUPPORT_ADMA2 OFFSET(19) NUMBITS(1) [],
        /// High Speed Support
        SUPPORT_HIGHSPEED OFFSET(21) NUMBITS(1) [],
        /// SDMA Support
        SUPPORT_SDMA OFFSET(22) NUMBITS(1) [],
        /// Voltage Support 3.3V
        SUPPORT_3V3 OFFSET(24) NUMBITS(1) [],
        /// Voltage Support 3.0V
        SUPPORT_3V0 OFFSET(25) NUMBITS(1) [],
        /// Voltage Support 1.8V
        SUPPORT_1V8 OFFSET(26) NUMBITS(1) []
    ],

    /// Capabilities 1 Register (0x44)
    pub CAPABILITIES_1 [
        /// SDR50 Support
        SUPPORT_SDR50 OFFSET(0) NUMBITS(1) [],
        /// SDR104 Support
        SUPPORT_SDR104 OFFSET(1) NUMBITS(1) [],
        /// DDR50 Support
        SUPPORT_DDR50 OFFSET(2) NUMBITS(1) []
    ],

    /// Vendor power-control status/mask register (MSM SDCC core block)
    pub PWRCTL [
        /// Bus power off requested
        BUS_OFF OFFSET(0) NUMBITS(1) [],
        /// Bus power on requested
        BUS_ON OFFSET(1) NUMBITS(1) [],
        /// IO signalling switched to low voltage
        IO_LOW OFFSET(2) NUMBITS(1) [],
        /// IO signalling switched to high voltage
        IO_HIGH OFFSET(3) NUMBITS(1) []
    ],

    /// Vendor power-control acknowledge register (MSM SDCC core block)
    pub PWRCTL_ACK [
        /// Bus on/off transition handled
        BUS_SUCCESS OFFSET(0) NUMBITS(1) [],
        /// Bus on/off transition failed
        BUS_FAIL OFFSET(1) NUMBITS(1) [],
        /// IO signal switch handled
        IO_SUCCESS OFFSET(2) NUMBITS(1) [],
        /// IO signal switch failed
        IO_FAIL OFFSET(3) NUMBITS(1) []
    ],

    /// Vendor host-controller mode register (MSM SDCC core block)
    pub HC_MODE [
        /// Expose the SDHCI register set instead of the legacy MCI one
        HC_MODE_EN OFFSET(0) NUMBITS(1) []
    ]
];

register_bitfields! [
    u16,
    /// Block Size Register (0x04)
    pub BLOCK_SIZE [
        /// Transfer Block Size
        BLOCK_SIZE OFFSET(0) NUMBITS(12) [],
        /// SDMA Buffer Boundary
        SDMA_BOUNDARY OFFSET(12) NUMBITS(3) []
    ],

    /// Transfer Mode Register (0x0C)
    pub TRANSFER_MODE [
        /// DMA Enable
        DMA_ENABLE OFFSET(0) NUMBITS(1) [],
        /// Block Count Enable
        BLOCK_COUNT_ENABLE OFFSET(1) NUMBITS(1) [],
        /// Auto CMD Enable
        AUTO_CMD OFFSET(2) NUMBITS(2) [
            Disabled = 0,
            Cmd12 = 1,
            Cmd23 = 2
        ],
        /// Data Transfer Direction (1=read, 0=write)
        DATA_DIRECTION OFFSET(4) NUMBITS(1) [
            Write = 0,
            Read = 1
        ],
        /// Multi Block Select
        MULTI_BLOCK OFFSET(5) NUMBITS(1) []
    ],

    /// Command Register (0x0E)
    pub COMMAND [
        /// Response Type
        RESPONSE_TYPE OFFSET(0) NUMBITS(2) [
            None = 0,
            Long136 = 1,
            Short48 = 2,
            Short48Busy = 3
        ],
        /// Command CRC Check Enable
        CRC_CHECK OFFSET(3) NUMBITS(1) [],
        /// Command Index Check Enable
        INDEX_CHECK OFFSET(4) NUMBITS(1) [],
        /// Data Present Select
        DATA_PRESENT OFFSET(5) NUMBITS(1) [],
        /// Command Type
        CMD_TYPE OFFSET(6) NUMBITS(2) [
            Normal = 0,
            Suspend = 1,
            Resume = 2,
            Abort = 3
        ],
        /// Command Index
        CMD_INDEX OFFSET(8) NUMBITS(6) []
    ],

    /// Clock Control Register (0x2C)
    pub CLOCK_CONTROL [
        /// Internal Clock Enable
        INTERNAL_CLK_EN OFFSET(0) NUMBITS(1) [],
        /// Internal Clock Stable
        INTERNAL_CLK_STABLE OFFSET(1) NUMBITS(1) [],
        /// SD Clock Enable
        SD_CLK_EN OFFSET(2) NUMBITS(1) [],
        /// Upper Bits of SDCLK Frequency Select
        FREQ_SELECT_HI OFFSET(6) NUMBITS(2) [],
        /// SDCLK Frequency Select
        FREQ_SELECT OFFSET(8) NUMBITS(8) []
    ],

    /// Normal Interrupt Status / Status Enable / Signal Enable (0x30/0x34/0x38)
    pub NORMAL_INT [
        /// Command Complete
        CMD_COMPLETE OFFSET(0) NUMBITS(1) [],
        /// Transfer Complete
        TRANSFER_COMPLETE OFFSET(1) NUMBITS(1) [],
        /// Block Gap Event
        BLOCK_GAP OFFSET(2) NUMBITS(1) [],
        /// DMA Interrupt
        DMA_INT OFFSET(3) NUMBITS(1) [],
        /// Buffer Write Ready
        BUFFER_WRITE_READY OFFSET(4) NUMBITS(1) [],
        /// Buffer Read Ready
        BUFFER_READ_READY OFFSET(5) NUMBITS(1) [],
        /// Card Insertion
        CARD_INSERT OFFSET(6) NUMBITS(1) [],
        /// Card Removal
        CARD_REMOVE OFFSET(7) NUMBITS(1) [],
        /// Card Interrupt
        CARD_INT OFFSET(8) NUMBITS(1) [],
        /// Error Interrupt (summary of the error status register)
        ERROR OFFSET(15) NUMBITS(1) []
    ],

    /// Error Interrupt Status / Status Enable / Signal Enable (0x32/0x36/0x3A)
    pub ERROR_INT [
        /// Command Timeout Error
        CMD_TIMEOUT OFFSET(0) NUMBITS(1) [],
        /// Command CRC Error
        CMD_CRC OFFSET(1) NUMBITS(1) [],
        /// Command End Bit Error
        CMD_END_BIT OFFSET(2) NUMBITS(1) [],
        /// Command Index Error
        CMD_INDEX OFFSET(3) NUMBITS(1) [],
        /// Data Timeout Error
        DATA_TIMEOUT OFFSET(4) NUMBITS(1) [],
        /// Data CRC Error
        DATA_CRC OFFSET(5) NUMBITS(1) [],
        /// Data End Bit Error
        DATA_END_BIT OFFSET(6) NUMBITS(1) [],
        /// Current Limit Error
        CURRENT_LIMIT OFFSET(7) NUMBITS(1) [],
        /// Auto CMD Error
        AUTO_CMD OFFSET(8) NUMBITS(1) [],
        /// ADMA Error
        ADMA OFFSET(9) NUMBITS(1) [],
        /// Vendor specific error bits
        VENDOR OFFSET(12) NUMBITS(4) []
    ],

    /// Host Control 2 Register (0x3E)
    pub HOST_CONTROL2 [
        /// UHS Mode Select
        UHS_MODE OFFSET(0) NUMBITS(3) [
            SDR12 = 0,
            SDR25 = 1,
            SDR50 = 2,
            SDR104 = 3,
            DDR50 = 4
        ],
        /// 1.8V Signaling Enable
        SIGNALING_1V8 OFFSET(3) NUMBITS(1) []
    ]
];

register_bitfields! [
    u8,
    /// Host Control Register (0x28)
    pub HOST_CONTROL [
        /// LED Control
        LED OFFSET(0) NUMBITS(1) [],
        /// Data Transfer Width (1=4-bit)
        DATA_WIDTH_4BIT OFFSET(1) NUMBITS(1) [],
        /// High Speed Enable
        HIGH_SPEED OFFSET(2) NUMBITS(1) [],
        /// DMA Select
        DMA_SELECT OFFSET(3) NUMBITS(2) [
            SDMA = 0,
            ADMA1 = 1,
            ADMA32 = 2,
            ADMA64 = 3
        ],
        /// Extended Data Transfer Width (1=8-bit)
        DATA_WIDTH_8BIT OFFSET(5) NUMBITS(1) []
    ],

    /// Power Control Register (0x29)
    pub POWER_CONTROL [
        /// SD Bus Power
        BUS_POWER OFFSET(0) NUMBITS(1) [],
        /// SD Bus Voltage Select
        BUS_VOLTAGE OFFSET(1) NUMBITS(3) [
            V1_8 = 5,
            V3_0 = 6,
            V3_3 = 7
        ]
    ],

    /// Software Reset Register (0x2F)
    pub SOFTWARE_RESET [
        /// Software Reset For All
        RESET_ALL OFFSET(0) NUMBITS(1) [],
        /// Software Reset For CMD Line
        RESET_CMD OFFSET(1) NUMBITS(1) [],
        /// Software Reset For DAT Line
        RESET_DATA OFFSET(2) NUMBITS(1) []
    ]
];

// ============================================================================
// Local register copies
// ============================================================================

/// Snapshot of the Present State register
pub type PresentState = LocalRegisterCopy<u32, PRESENT_STATE::Register>;

/// Snapshot of the Normal Interrupt Status register
pub type NormalStatus = LocalRegisterCopy<u16, NORMAL_INT::Register>;

/// Snapshot of the Error Interrupt Status register
pub type ErrorStatus = LocalRegisterCopy<u16, ERROR_INT::Register>;

/// Snapshot of the Clock Control register
pub type ClockControl = LocalRegisterCopy<u16, CLOCK_CONTROL::Register>;

// ============================================================================
// Constants
// ============================================================================

/// Maximum SDCLK divider for SDHCI 3.0+ (10-bit field, value stored as div/2)
pub const SDHCI_MAX_DIV_SPEC_300: u32 = 2046;

/// SWITCH_FUNC (CMD6) - completes with a data-line busy phase even without data
pub const SD_CMD_SWITCH_FUNC: u8 = 6;
