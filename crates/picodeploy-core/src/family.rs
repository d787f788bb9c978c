use std::{fmt, ops::Range};

pub const FLASH_START_RP2040: u32 = 0x10000000;
pub const FLASH_END_RP2040: u32 = 0x11000000;

pub const FLASH_START_RP2350: u32 = 0x10000000;
pub const FLASH_END_RP2350: u32 = 0x11000000;

// See https://github.com/microsoft/uf2/blob/master/utils/uf2families.json for list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
#[allow(non_camel_case_types)]
pub enum Family {
    /// Raspberry Pi RP2040
    #[default]
    RP2040 = 0xe48bff56,

    /// Raspberry Pi Microcontrollers: Absolute (unpartitioned) download
    RP2XXX_ABSOLUTE = 0xe48bff57,

    /// Raspberry Pi Microcontrollers: Data partition download
    RP2XXX_DATA = 0xe48bff58,

    /// Raspberry Pi RP2350, Secure Arm image
    RP2350_ARM_S = 0xe48bff59,

    /// Raspberry Pi RP2350, RISC-V image
    RP2350_RISCV = 0xe48bff5a,

    /// Raspberry Pi RP2350, Non-secure Arm image
    RP2350_ARM_NS = 0xe48bff5b,
}

impl Family {
    pub const ALL: [Family; 6] = [
        Family::RP2040,
        Family::RP2XXX_ABSOLUTE,
        Family::RP2XXX_DATA,
        Family::RP2350_ARM_S,
        Family::RP2350_RISCV,
        Family::RP2350_ARM_NS,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Family::RP2040 => "rp2040",
            Family::RP2XXX_ABSOLUTE => "rp2xxx-absolute",
            Family::RP2XXX_DATA => "rp2xxx-data",
            Family::RP2350_ARM_S => "rp2350-arm-s",
            Family::RP2350_RISCV => "rp2350-riscv",
            Family::RP2350_ARM_NS => "rp2350-arm-ns",
        }
    }

    /// Looks a family up by its short name, ignoring case. `rp2350` is accepted
    /// as an alias for the secure Arm image.
    pub fn from_name(name: &str) -> Option<Family> {
        if name.eq_ignore_ascii_case("rp2350") {
            return Some(Family::RP2350_ARM_S);
        }
        Self::ALL
            .into_iter()
            .find(|family| family.name().eq_ignore_ascii_case(name))
    }

    pub fn from_id(id: u32) -> Option<Family> {
        Self::ALL.into_iter().find(|family| family.id() == id)
    }

    /// Default load address for a flat image.
    pub fn flash_start(self) -> u32 {
        match self {
            Family::RP2040 => FLASH_START_RP2040,
            _ => FLASH_START_RP2350,
        }
    }

    pub fn flash_range(self) -> Range<u64> {
        match self {
            Family::RP2040 => FLASH_START_RP2040 as u64..FLASH_END_RP2040 as u64,
            _ => FLASH_START_RP2350 as u64..FLASH_END_RP2350 as u64,
        }
    }

    /// Text the bootrom writes into `INFO_UF2.TXT` on its mass storage volume.
    pub fn bootloader_signature(self) -> &'static str {
        match self {
            Family::RP2040 => "RPI-RP2",
            _ => "RP2350",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#010x})", self.name(), self.id())
    }
}
