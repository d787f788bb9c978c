use log::*;
use thiserror::Error;

use crate::config_block::{CONFIG_BLOCK_SIZE, CONFIG_BLOCK_TAG, ConfigBlock};

/// Marker firmware places at the start of its reserved config region.
pub const PLACEHOLDER_MARKER: &[u8] = b"BGGCONFIG_PLACEHOLDER_4096_BYTES";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InjectError {
    #[error("Config placeholder not found in firmware")]
    PlaceholderNotFound,
    #[error("Config placeholder found more than once (at {first:#x} and {second:#x})")]
    MultiplePlaceholders { first: usize, second: usize },
    #[error(
        "Config placeholder at {offset:#x} leaves only {available} bytes, {CONFIG_BLOCK_SIZE} are needed"
    )]
    PlaceholderTruncated { offset: usize, available: usize },
}

/// Swaps the reserved config region of a firmware image for a [`ConfigBlock`].
#[derive(Debug, Clone, Copy)]
pub struct Injector<'a> {
    marker: &'a [u8],
}

impl Default for Injector<'static> {
    fn default() -> Self {
        Self {
            marker: PLACEHOLDER_MARKER,
        }
    }
}

impl<'a> Injector<'a> {
    pub fn with_marker(marker: &'a [u8]) -> Self {
        Self { marker }
    }

    pub fn marker(&self) -> &[u8] {
        self.marker
    }

    /// Offset of the single placeholder in `image`.
    pub fn find(&self, image: &[u8]) -> Result<usize, InjectError> {
        let first = position(image, self.marker).ok_or(InjectError::PlaceholderNotFound)?;

        let rest = first + self.marker.len();
        if let Some(second) = position(&image[rest..], self.marker) {
            return Err(InjectError::MultiplePlaceholders {
                first,
                second: rest + second,
            });
        }

        let available = image.len() - first;
        if available < CONFIG_BLOCK_SIZE {
            return Err(InjectError::PlaceholderTruncated {
                offset: first,
                available,
            });
        }

        Ok(first)
    }

    /// Returns a copy of `image` with the placeholder region replaced by
    /// `block`. `image` itself is left untouched.
    pub fn inject(&self, image: &[u8], block: &ConfigBlock) -> Result<Vec<u8>, InjectError> {
        self.inject_at(image, block).map(|(_, output)| output)
    }

    /// Like [`Injector::inject`], also returning where the block landed.
    pub fn inject_at(
        &self,
        image: &[u8],
        block: &ConfigBlock,
    ) -> Result<(usize, Vec<u8>), InjectError> {
        let offset = self.find(image)?;

        debug!(
            "Injecting config block at {:#x} ({} byte payload)",
            offset,
            block.payload().len()
        );

        let mut output = image.to_vec();
        output[offset..offset + CONFIG_BLOCK_SIZE].copy_from_slice(block.as_bytes());
        Ok((offset, output))
    }
}

/// Injects `block` at the default [`PLACEHOLDER_MARKER`].
pub fn inject(image: &[u8], block: &ConfigBlock) -> Result<Vec<u8>, InjectError> {
    Injector::default().inject(image, block)
}

/// Finds a config block that has already been injected into `image`.
pub fn find_config(image: &[u8]) -> Option<(usize, ConfigBlock)> {
    let mut start = 0;
    while let Some(found) = position(&image[start..], &CONFIG_BLOCK_TAG) {
        let offset = start + found;
        if let Some(span) = image.get(offset..offset + CONFIG_BLOCK_SIZE) {
            if let Ok(block) = ConfigBlock::from_bytes(span) {
                return Some((offset, block));
            }
        }
        start = offset + 1;
    }
    None
}

fn position(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
