//! The fixed size record firmware reads its runtime configuration from.
//!
//! Layout: a four byte ASCII tag, the little endian length of the JSON
//! payload, the payload itself, then zeros up to [`CONFIG_BLOCK_SIZE`].

use std::{fmt, mem};

use assert_into::AssertInto;
use serde::Serialize;
use static_assertions::const_assert;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, little_endian::U32};

pub const CONFIG_BLOCK_SIZE: usize = 4096;
pub const CONFIG_BLOCK_TAG: [u8; 4] = *b"BGGC";

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Clone, Debug)]
pub struct ConfigBlockHeader {
    pub tag: [u8; 4],
    pub length: U32,
}

pub const CONFIG_HEADER_SIZE: usize = mem::size_of::<ConfigBlockHeader>();
pub const CONFIG_PAYLOAD_CAPACITY: usize = CONFIG_BLOCK_SIZE - CONFIG_HEADER_SIZE;

const_assert!(CONFIG_HEADER_SIZE == 8);

#[derive(Error, Debug)]
pub enum ConfigBlockError {
    #[error("Config payload is {size} bytes, at most {capacity} fit in a config block")]
    PayloadTooLarge { size: usize, capacity: usize },
    #[error("Failed to serialize config")]
    Serialize(#[from] serde_json::Error),
    #[error("Config block must be 4096 bytes, got {0}")]
    BadSize(usize),
    #[error("Config block tag {0:02x?} is not \"BGGC\"")]
    BadTag([u8; 4]),
    #[error("Config block claims a {0} byte payload")]
    BadLength(u32),
}

#[derive(Clone, PartialEq, Eq)]
pub struct ConfigBlock(Box<[u8; CONFIG_BLOCK_SIZE]>);

impl ConfigBlock {
    /// Serializes `config` as compact JSON and wraps it in a block.
    pub fn build<T: Serialize + ?Sized>(config: &T) -> Result<Self, ConfigBlockError> {
        let payload = serde_json::to_vec(config)?;
        Self::from_payload(&payload)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, ConfigBlockError> {
        if payload.len() > CONFIG_PAYLOAD_CAPACITY {
            return Err(ConfigBlockError::PayloadTooLarge {
                size: payload.len(),
                capacity: CONFIG_PAYLOAD_CAPACITY,
            });
        }

        let length: u32 = payload.len().assert_into();
        let header = ConfigBlockHeader {
            tag: CONFIG_BLOCK_TAG,
            length: length.into(),
        };

        let mut bytes = Box::new([0; CONFIG_BLOCK_SIZE]);
        bytes[..CONFIG_HEADER_SIZE].copy_from_slice(header.as_bytes());
        bytes[CONFIG_HEADER_SIZE..CONFIG_HEADER_SIZE + payload.len()].copy_from_slice(payload);

        Ok(Self(bytes))
    }

    /// Reads back a block, e.g. one previously injected into an image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigBlockError> {
        let bytes: [u8; CONFIG_BLOCK_SIZE] = bytes
            .try_into()
            .map_err(|_| ConfigBlockError::BadSize(bytes.len()))?;

        let (header, _) = ConfigBlockHeader::read_from_prefix(&bytes)
            .map_err(|_| ConfigBlockError::BadSize(bytes.len()))?;

        if header.tag != CONFIG_BLOCK_TAG {
            return Err(ConfigBlockError::BadTag(header.tag));
        }
        if header.length.get() as usize > CONFIG_PAYLOAD_CAPACITY {
            return Err(ConfigBlockError::BadLength(header.length.get()));
        }

        Ok(Self(Box::new(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    pub fn payload(&self) -> &[u8] {
        let Ok((header, rest)) = ConfigBlockHeader::ref_from_prefix(&self.0[..]) else {
            return &[];
        };
        &rest[..(header.length.get() as usize).min(rest.len())]
    }

    pub fn document(&self) -> Result<serde_json::Value, ConfigBlockError> {
        Ok(serde_json::from_slice(self.payload())?)
    }
}

impl fmt::Debug for ConfigBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBlock")
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

impl AsRef<[u8]> for ConfigBlock {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Builds the config block for `config`.
pub fn build<T: Serialize + ?Sized>(config: &T) -> Result<ConfigBlock, ConfigBlockError> {
    ConfigBlock::build(config)
}
