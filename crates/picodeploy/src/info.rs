use std::{fs, ops::Range, path::Path};

use log::info;
use picodeploy_core::{ConfigBlock, Family, inject::find_config, uf2};

/// What a UF2 file carries.
#[derive(Debug)]
struct Summary {
    family_id: u32,
    blocks: usize,
    range: Range<u64>,
    config: Option<(usize, ConfigBlock)>,
}

/// Prints a summary of a UF2 file.
pub fn info<P: AsRef<Path>>(input_path: P) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(input_path)?;

    let summary = match summarize(&bytes)? {
        Some(summary) => summary,
        None => {
            info!("Empty UF2 file");
            return Ok(());
        }
    };

    match Family::from_id(summary.family_id) {
        Some(family) => info!("Family:  {}", family),
        None => info!("Family:  unknown ({:#010x})", summary.family_id),
    }
    info!("Blocks:  {}", summary.blocks);
    info!(
        "Range:   {:#010x}..{:#010x}",
        summary.range.start, summary.range.end
    );

    match summary.config {
        Some((offset, block)) => {
            info!("Config:  {} bytes at {:#x}", block.payload().len(), offset);
            info!("{}", String::from_utf8_lossy(block.payload()));
        }
        None => info!("Config:  none"),
    }

    Ok(())
}

/// `None` for a stream without blocks.
fn summarize(bytes: &[u8]) -> Result<Option<Summary>, uf2::Uf2Error> {
    let blocks = uf2::decode(bytes)?;

    let (first, last) = match (blocks.first(), blocks.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Ok(None),
    };

    let image = uf2::flatten(&blocks)?;

    Ok(Some(Summary {
        family_id: first.family_id(),
        blocks: blocks.len(),
        range: first.target_addr() as u64..last.target_addr() as u64 + last.payload().len() as u64,
        config: find_config(&image),
    }))
}
