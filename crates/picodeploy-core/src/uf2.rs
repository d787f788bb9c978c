use std::{fmt, io::Write, mem};

use assert_into::AssertInto;
use log::*;
use static_assertions::const_assert;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, little_endian::U32};

use crate::reporter::ProgressReporter;

pub const UF2_MAGIC_START0: u32 = 0x0A324655;
pub const UF2_MAGIC_START1: u32 = 0x9E5D5157;
pub const UF2_MAGIC_END: u32 = 0x0AB16F30;

pub const UF2_FLAG_NOT_MAIN_FLASH: u32 = 0x00000001;
pub const UF2_FLAG_FILE_CONTAINER: u32 = 0x00001000;
pub const UF2_FLAG_FAMILY_ID_PRESENT: u32 = 0x00002000;
pub const UF2_FLAG_MD5_PRESENT: u32 = 0x00004000;

pub const UF2_BLOCK_SIZE: usize = 512;
pub const UF2_DATA_SIZE: usize = 476;

/// Payload bytes carried by every block we produce.
pub const PAGE_SIZE: u32 = 256;

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Clone, Debug, PartialEq, Eq)]
pub struct Uf2BlockHeader {
    pub magic_start0: U32,
    pub magic_start1: U32,
    pub flags: U32,
    pub target_addr: U32,
    pub payload_size: U32,
    pub block_no: U32,
    pub num_blocks: U32,
    pub file_size: U32, // or familyID
}

pub type Uf2BlockData = [u8; UF2_DATA_SIZE];

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Clone, Debug, PartialEq, Eq)]
pub struct Uf2BlockFooter {
    pub magic_end: U32,
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Clone, PartialEq, Eq)]
pub struct Uf2Block {
    pub header: Uf2BlockHeader,
    pub data: Uf2BlockData,
    pub footer: Uf2BlockFooter,
}

const_assert!(mem::size_of::<Uf2BlockHeader>() == 32);
const_assert!(mem::size_of::<Uf2Block>() == UF2_BLOCK_SIZE);

impl Uf2Block {
    pub fn target_addr(&self) -> u32 {
        self.header.target_addr.get()
    }

    pub fn block_no(&self) -> u32 {
        self.header.block_no.get()
    }

    pub fn num_blocks(&self) -> u32 {
        self.header.num_blocks.get()
    }

    pub fn family_id(&self) -> u32 {
        self.header.file_size.get()
    }

    pub fn flags(&self) -> u32 {
        self.header.flags.get()
    }

    /// The used part of the data area.
    pub fn payload(&self) -> &[u8] {
        let len = (self.header.payload_size.get() as usize).min(UF2_DATA_SIZE);
        &self.data[..len]
    }

    fn has_valid_magic(&self) -> bool {
        self.header.magic_start0.get() == UF2_MAGIC_START0
            && self.header.magic_start1.get() == UF2_MAGIC_START1
            && self.footer.magic_end.get() == UF2_MAGIC_END
    }
}

impl fmt::Debug for Uf2Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uf2Block")
            .field("block_no", &self.block_no())
            .field("num_blocks", &self.num_blocks())
            .field("target_addr", &format_args!("{:#010x}", self.target_addr()))
            .field("family_id", &format_args!("{:#010x}", self.family_id()))
            .finish_non_exhaustive()
    }
}

/// Splits a flat image into [`PAGE_SIZE`] byte UF2 blocks starting at
/// `base_address`. The last block is zero padded. An empty image yields no
/// blocks.
pub fn encode(image: &[u8], base_address: u32, family_id: u32) -> Vec<Uf2Block> {
    let page_size = PAGE_SIZE as usize;
    let num_blocks: u32 = image.len().div_ceil(page_size).assert_into();

    image
        .chunks(page_size)
        .enumerate()
        .map(|(page_num, page)| {
            let block_no: u32 = page_num.assert_into();
            let target_addr = base_address.wrapping_add(block_no.wrapping_mul(PAGE_SIZE));

            let mut data: Uf2BlockData = [0; UF2_DATA_SIZE];
            data[..page.len()].copy_from_slice(page);

            Uf2Block {
                header: Uf2BlockHeader {
                    magic_start0: UF2_MAGIC_START0.into(),
                    magic_start1: UF2_MAGIC_START1.into(),
                    flags: UF2_FLAG_FAMILY_ID_PRESENT.into(),
                    target_addr: target_addr.into(),
                    payload_size: PAGE_SIZE.into(),
                    block_no: block_no.into(),
                    num_blocks: num_blocks.into(),
                    file_size: family_id.into(),
                },
                data,
                footer: Uf2BlockFooter {
                    magic_end: UF2_MAGIC_END.into(),
                },
            }
        })
        .collect()
}

/// Writes `blocks` back to back into `output`.
pub fn write_blocks(
    blocks: &[Uf2Block],
    mut output: impl Write,
    mut reporter: impl ProgressReporter,
) -> std::io::Result<()> {
    reporter.start(blocks.len() * UF2_BLOCK_SIZE);

    for block in blocks {
        debug!(
            "Page {} / {} {:#08x}",
            block.block_no(),
            block.num_blocks(),
            block.target_addr()
        );

        output.write_all(block.as_bytes())?;
        reporter.advance(UF2_BLOCK_SIZE);
    }

    output.flush()?;
    reporter.finish();

    Ok(())
}

pub fn to_bytes(blocks: &[Uf2Block]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(blocks.len() * UF2_BLOCK_SIZE);
    for block in blocks {
        bytes.extend_from_slice(block.as_bytes());
    }
    bytes
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Uf2Error {
    #[error("UF2 stream length {0} is not a multiple of 512")]
    Length(usize),
    #[error("Block {0} has bad magic numbers")]
    BadMagic(usize),
    #[error("Block {index} is numbered {found}")]
    OutOfOrder { index: usize, found: u32 },
    #[error("Block {index} claims {found} blocks in total, expected {expected}")]
    BlockCount {
        index: usize,
        found: u32,
        expected: u32,
    },
    #[error("Block {index} has payload size {size}, more than 476")]
    PayloadSize { index: usize, size: u32 },
    #[error("Block {index} at {found:#010x} does not follow on from {expected:#010x}")]
    NotContiguous {
        index: usize,
        found: u32,
        expected: u32,
    },
}

/// Parses and validates a UF2 byte stream.
pub fn decode(bytes: &[u8]) -> Result<Vec<Uf2Block>, Uf2Error> {
    if bytes.len() % UF2_BLOCK_SIZE != 0 {
        return Err(Uf2Error::Length(bytes.len()));
    }

    let expected: u32 = (bytes.len() / UF2_BLOCK_SIZE).assert_into();
    let mut blocks = Vec::with_capacity(expected as usize);

    for (index, chunk) in bytes.chunks_exact(UF2_BLOCK_SIZE).enumerate() {
        let block =
            Uf2Block::read_from_bytes(chunk).map_err(|_| Uf2Error::Length(bytes.len()))?;

        if !block.has_valid_magic() {
            return Err(Uf2Error::BadMagic(index));
        }
        if block.block_no() as usize != index {
            return Err(Uf2Error::OutOfOrder {
                index,
                found: block.block_no(),
            });
        }
        if block.num_blocks() != expected {
            return Err(Uf2Error::BlockCount {
                index,
                found: block.num_blocks(),
                expected,
            });
        }
        if block.header.payload_size.get() as usize > UF2_DATA_SIZE {
            return Err(Uf2Error::PayloadSize {
                index,
                size: block.header.payload_size.get(),
            });
        }

        blocks.push(block);
    }

    Ok(blocks)
}

/// Reassembles the flat image carried by `blocks`, which must cover one
/// contiguous address range. Padding in a short final page is kept.
pub fn flatten(blocks: &[Uf2Block]) -> Result<Vec<u8>, Uf2Error> {
    let mut image = Vec::with_capacity(blocks.len() * PAGE_SIZE as usize);
    let mut next_addr = None;

    for (index, block) in blocks.iter().enumerate() {
        match next_addr {
            Some(expected) if block.target_addr() != expected => {
                return Err(Uf2Error::NotContiguous {
                    index,
                    found: block.target_addr(),
                    expected,
                });
            }
            _ => {}
        }

        let payload = block.payload();
        image.extend_from_slice(payload);
        next_addr = Some(block.target_addr().wrapping_add(payload.len() as u32));
    }

    Ok(image)
}
