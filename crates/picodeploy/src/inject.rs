use std::{fs, path::Path};

use log::info;
use picodeploy_core::{ConfigBlock, ConfigDocument, Injector};

/// Writes a copy of the image at `input_path` with `config` embedded.
pub fn inject<P1: AsRef<Path>, P2: AsRef<Path>>(
    input_path: &P1,
    output_path: &P2,
    config: &ConfigDocument,
) -> Result<(), Box<dyn std::error::Error>> {
    let image = fs::read(input_path)?;
    let block = ConfigBlock::build(config)?;

    let (offset, injected) = Injector::default().inject_at(&image, &block)?;

    fs::write(output_path, &injected)?;

    info!(
        "Embedded {} byte config at {:#x} in {}",
        block.payload().len(),
        offset,
        output_path.as_ref().display()
    );

    Ok(())
}
