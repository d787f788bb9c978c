use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};

use log::{info, warn};
use picodeploy_core::{
    ConfigBlock, ConfigDocument, Family,
    inject::inject,
    reporter::ProgressReporter,
    uf2::{self, Uf2Block},
};

use crate::reporter::ProgressBarReporter;

/// Converts a flat image into a UF2 file on disk.
pub fn convert<P1: AsRef<Path>, P2: AsRef<Path>>(
    input_path: &P1,
    output_path: &P2,
    family: Family,
    base_address: u32,
    config: Option<&ConfigDocument>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = output_path.as_ref().with_extension("uf2");

    let mut image = fs::read(input_path)?;
    if image.is_empty() {
        return Err("The input image is empty".into());
    }

    if let Some(config) = config {
        image = inject(&image, &ConfigBlock::build(config)?)?;
    }

    info!("Using UF2 Family {}", family);
    info!("Base address {:#010x}", base_address);

    let blocks = uf2::encode(&image, base_address, family.id());

    let output = BufWriter::new(File::create(&output_path)?);
    let reporter = ProgressBarReporter::new("Writing program to disk");

    write_or_remove(&output_path, output, &blocks, reporter)?;

    info!("Wrote {} blocks to {}", blocks.len(), output_path.display());

    Ok(())
}

/// Streams `blocks` into `output`, which writes to `path`. On failure the
/// partial file is removed and the write error is returned.
fn write_or_remove(
    path: &Path,
    output: impl Write,
    blocks: &[Uf2Block],
    reporter: impl ProgressReporter,
) -> io::Result<()> {
    let result = uf2::write_blocks(blocks, output, reporter);

    if result.is_err() {
        if let Err(err) = fs::remove_file(path) {
            warn!("Unable to remove {}: {}", path.display(), err);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use picodeploy_core::{
        config_block::CONFIG_BLOCK_SIZE,
        inject::{PLACEHOLDER_MARKER, find_config},
        reporter::NoProgress,
    };
    use serde_json::{Value, json};
    use tempfile::TempDir;

    /// Accepts `budget` bytes, then fails every write.
    struct FullDisk {
        budget: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn template() -> Vec<u8> {
        let mut image = vec![0x42; 256];
        image.extend_from_slice(PLACEHOLDER_MARKER);
        image.resize(256 + CONFIG_BLOCK_SIZE, 0);
        image.extend_from_slice(&[0x24; 1000]);
        image
    }

    fn document() -> ConfigDocument {
        match json!({ "device_name": "BGG Guitar Controller" }) {
            Value::Object(document) => document,
            _ => unreachable!(),
        }
    }

    #[test]
    fn converts_with_config() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("firmware.bin");
        fs::write(&input, template()).unwrap();

        let base = Family::RP2040.flash_start();
        convert(
            &input,
            &dir.path().join("firmware.out"),
            Family::RP2040,
            base,
            Some(&document()),
        )
        .unwrap();

        let bytes = fs::read(dir.path().join("firmware.uf2")).unwrap();
        let blocks = uf2::decode(&bytes).unwrap();
        assert_eq!(blocks.len(), template().len().div_ceil(256));
        assert_eq!(blocks[0].family_id(), Family::RP2040.id());
        assert_eq!(blocks[0].target_addr(), base);

        let image = uf2::flatten(&blocks).unwrap();
        let (offset, block) = find_config(&image).unwrap();
        assert_eq!(offset, 256);
        assert_eq!(block.document().unwrap(), Value::Object(document()));
        assert_eq!(&image[..256], &template()[..256]);
    }

    #[test]
    fn converts_plain_image() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("firmware.bin");
        fs::write(&input, [0x7Eu8; 300]).unwrap();

        let output = dir.path().join("out");
        convert(&input, &output, Family::RP2350_ARM_S, 0x10000000, None).unwrap();

        let blocks = uf2::decode(&fs::read(dir.path().join("out.uf2")).unwrap()).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].family_id(), Family::RP2350_ARM_S.id());
        assert_eq!(blocks[1].target_addr(), 0x10000100);
    }

    #[test]
    fn empty_image_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("firmware.bin");
        fs::write(&input, b"").unwrap();

        let output = dir.path().join("out.uf2");
        assert!(convert(&input, &output, Family::RP2040, 0x10000000, None).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn missing_placeholder_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("firmware.bin");
        fs::write(&input, [0x7Eu8; 5000]).unwrap();

        let output = dir.path().join("out.uf2");
        let result = convert(&input, &output, Family::RP2040, 0x10000000, Some(&document()));
        assert!(result.is_err());
        assert!(!output.exists());
    }

    #[test]
    fn failed_write_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.uf2");
        fs::write(&path, [0u8; 700]).unwrap();
        let blocks = uf2::encode(&[1; 1024], 0x10000000, Family::RP2040.id());

        let output = FullDisk { budget: 700 };
        let err = write_or_remove(&path, output, &blocks, NoProgress).unwrap_err();

        assert_eq!(err.to_string(), "disk full");
        assert!(!path.exists());
    }

    #[test]
    fn failed_cleanup_keeps_write_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("never-created.uf2");
        let blocks = uf2::encode(&[1; 1024], 0x10000000, Family::RP2040.id());

        let output = FullDisk { budget: 0 };
        let err = write_or_remove(&path, output, &blocks, NoProgress).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(err.to_string(), "disk full");
    }
}
