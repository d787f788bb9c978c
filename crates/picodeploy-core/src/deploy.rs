use std::{
    fs::File,
    io::{self, BufWriter},
    path::{Path, PathBuf},
    time::Duration,
};

use log::*;
use thiserror::Error;

use crate::{
    ConfigDocument,
    config_block::{ConfigBlock, ConfigBlockError},
    family::Family,
    inject::{InjectError, inject},
    locate::{DEFAULT_POLL_INTERVAL, LocateError, Locator, VolumeLister},
    reporter::{NoProgress, ProgressReporter},
    uf2::{self, UF2_BLOCK_SIZE, Uf2Block},
};

pub const DEFAULT_FILE_NAME: &str = "firmware.uf2";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub family: Family,
    pub base_address: u32,
    /// How long to wait for the bootloader volume to appear.
    pub timeout: Duration,
    /// Pause between scans of the volume list.
    pub poll_interval: Duration,
    /// Name of the UF2 file created on the volume.
    pub file_name: String,
    /// When set, wait this long for the volume to go away after writing.
    pub confirm_timeout: Option<Duration>,
}

impl DeployOptions {
    pub fn for_family(family: Family) -> Self {
        Self {
            family,
            base_address: family.flash_start(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            file_name: DEFAULT_FILE_NAME.to_string(),
            confirm_timeout: None,
        }
    }
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self::for_family(Family::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Idle,
    Injecting,
    Encoding,
    Locating,
    Writing,
    Done,
    Failed(FailureReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Bad placeholder or oversized config. Retrying will not help.
    Template,
    EmptyImage,
    /// Ask for the board to be put in BOOTSEL mode and try again.
    DeviceNotFound,
    Cancelled,
    /// The device state is unknown after a partial write.
    WriteError,
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigBlockError),
    #[error(transparent)]
    Inject(#[from] InjectError),
    #[error("The input image is empty")]
    EmptyImage,
    #[error(transparent)]
    DeviceNotFound(#[from] LocateError),
    #[error("Failed to write {}", path.display())]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DeployError {
    pub fn reason(&self) -> FailureReason {
        match self {
            DeployError::Config(_) | DeployError::Inject(_) => FailureReason::Template,
            DeployError::EmptyImage => FailureReason::EmptyImage,
            DeployError::DeviceNotFound(LocateError::Cancelled) => FailureReason::Cancelled,
            DeployError::DeviceNotFound(_) => FailureReason::DeviceNotFound,
            DeployError::WriteError { .. } => FailureReason::WriteError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub path: PathBuf,
    pub blocks: usize,
    pub bytes: usize,
    /// Whether the volume went away afterwards, if that was checked.
    pub confirmed: Option<bool>,
}

/// Runs inject, encode, locate and write as one operation.
///
/// Writes are never retried: after a failed write the board may already be
/// rebooting, so the caller has to start over with a fresh deploy. Only one
/// process is expected to write to a given volume at a time.
pub struct Deployer<L> {
    locator: Locator<L>,
    options: DeployOptions,
    state: DeployState,
}

impl<L: VolumeLister> Deployer<L> {
    /// The options' poll interval replaces whatever `locator` was built with.
    pub fn new(locator: Locator<L>, options: DeployOptions) -> Self {
        Self {
            locator: locator.with_poll_interval(options.poll_interval),
            options,
            state: DeployState::Idle,
        }
    }

    pub fn state(&self) -> DeployState {
        self.state
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    pub fn locator(&self) -> &Locator<L> {
        &self.locator
    }

    pub fn deploy(
        &mut self,
        image: &[u8],
        config: Option<&ConfigDocument>,
    ) -> Result<Deployment, DeployError> {
        self.deploy_with_progress(image, config, NoProgress)
    }

    pub fn deploy_with_progress(
        &mut self,
        image: &[u8],
        config: Option<&ConfigDocument>,
        reporter: impl ProgressReporter,
    ) -> Result<Deployment, DeployError> {
        self.state = DeployState::Idle;

        let result = self.run(image, config, reporter);
        match &result {
            Ok(deployment) => {
                info!("Deployed {} blocks to {}", deployment.blocks, deployment.path.display());
                self.transition(DeployState::Done);
            }
            Err(err) => self.transition(DeployState::Failed(err.reason())),
        }

        result
    }

    fn run(
        &mut self,
        image: &[u8],
        config: Option<&ConfigDocument>,
        reporter: impl ProgressReporter,
    ) -> Result<Deployment, DeployError> {
        if image.is_empty() {
            return Err(DeployError::EmptyImage);
        }

        let injected;
        let image = match config {
            Some(config) => {
                self.transition(DeployState::Injecting);
                let block = ConfigBlock::build(config)?;
                injected = inject(image, &block)?;
                &injected[..]
            }
            None => image,
        };

        self.transition(DeployState::Encoding);
        check_flash_window(image, &self.options);
        let blocks = uf2::encode(image, self.options.base_address, self.options.family.id());

        self.transition(DeployState::Locating);
        let root = self.locator.locate(self.options.timeout)?;

        self.transition(DeployState::Writing);
        let path = root.join(&self.options.file_name);
        let bytes = write_image(&path, &blocks, reporter)?;

        let confirmed = self.options.confirm_timeout.map(|timeout| {
            let gone = self.locator.wait_for_removal(&root, timeout);
            if gone {
                info!("Device rebooted into new firmware");
            } else {
                warn!("Bootloader volume still present after {:?}", timeout);
            }
            gone
        });

        Ok(Deployment {
            path,
            blocks: blocks.len(),
            bytes,
            confirmed,
        })
    }

    fn transition(&mut self, state: DeployState) {
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

/// Writes `blocks` to a new file at `path` and returns the number of bytes
/// written. The file is flushed and closed on every path out of here.
pub fn write_image(
    path: &Path,
    blocks: &[Uf2Block],
    reporter: impl ProgressReporter,
) -> Result<usize, DeployError> {
    let write_error = |source| DeployError::WriteError {
        path: path.to_owned(),
        source,
    };

    let output = File::create(path).map_err(write_error)?;
    let writer = BufWriter::new(output);
    uf2::write_blocks(blocks, writer, reporter).map_err(write_error)?;

    Ok(blocks.len() * UF2_BLOCK_SIZE)
}

fn check_flash_window(image: &[u8], options: &DeployOptions) {
    let flash = options.family.flash_range();
    let start = options.base_address as u64;
    let end = start + image.len() as u64;

    if start < flash.start || end > flash.end {
        warn!(
            "Image {:#010x}..{:#010x} is outside the {} flash window {:#010x}..{:#010x}",
            start, end, options.family, flash.start, flash.end
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config_block::CONFIG_BLOCK_SIZE,
        inject::{PLACEHOLDER_MARKER, find_config},
        locate::{FixedVolumes, INFO_UF2_FILE},
    };
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn pico_volume() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(INFO_UF2_FILE),
            "UF2 Bootloader v3.0\nModel: Raspberry Pi RP2\nBoard-ID: RPI-RP2\n",
        )
        .unwrap();
        dir
    }

    fn deployer(roots: Vec<PathBuf>, options: DeployOptions) -> Deployer<FixedVolumes> {
        Deployer::new(
            Locator::for_family(FixedVolumes(roots), options.family),
            options,
        )
    }

    fn fast_options() -> DeployOptions {
        DeployOptions {
            timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
            ..DeployOptions::default()
        }
    }

    fn template() -> Vec<u8> {
        let mut image = vec![0xA5; 512];
        image.extend_from_slice(PLACEHOLDER_MARKER);
        image.resize(512 + CONFIG_BLOCK_SIZE, 0);
        image.extend_from_slice(&[0x5A; 100]);
        image
    }

    #[test]
    fn poll_interval_comes_from_options() {
        assert_eq!(DeployOptions::default().poll_interval, DEFAULT_POLL_INTERVAL);

        let locator = Locator::for_family(FixedVolumes(Vec::new()), Family::RP2040)
            .with_poll_interval(Duration::from_secs(7));
        let options = DeployOptions {
            poll_interval: Duration::from_millis(15),
            ..DeployOptions::default()
        };
        let deployer = Deployer::new(locator, options);
        assert_eq!(deployer.locator().poll_interval(), Duration::from_millis(15));
    }

    #[test]
    fn deploys_plain_image() {
        let volume = pico_volume();
        let image: Vec<u8> = (0..600).map(|i| i as u8).collect();
        let mut deployer = deployer(vec![volume.path().into()], fast_options());

        let deployment = deployer.deploy(&image, None).unwrap();

        assert_eq!(deployer.state(), DeployState::Done);
        assert_eq!(deployment.path, volume.path().join(DEFAULT_FILE_NAME));
        assert_eq!(deployment.blocks, 3);
        assert_eq!(deployment.bytes, 1536);
        assert_eq!(deployment.confirmed, None);

        let written = fs::read(&deployment.path).unwrap();
        assert_eq!(
            written,
            uf2::to_bytes(&uf2::encode(&image, 0x10000000, 0xe48bff56))
        );
    }

    #[test]
    fn deploys_with_config() {
        let volume = pico_volume();
        let image = template();
        let config = json!({ "device_name": "BGG Guitar Controller", "led_brightness": 128 });
        let config = config.as_object().unwrap();
        let mut deployer = deployer(vec![volume.path().into()], fast_options());

        let deployment = deployer.deploy(&image, Some(config)).unwrap();

        let written = fs::read(&deployment.path).unwrap();
        let flat = uf2::flatten(&uf2::decode(&written).unwrap()).unwrap();
        let (offset, block) = find_config(&flat).unwrap();
        assert_eq!(offset, 512);
        assert_eq!(block.document().unwrap().as_object(), Some(config));
        assert_eq!(&flat[..512], &image[..512]);
        assert_eq!(&flat[512 + CONFIG_BLOCK_SIZE..image.len()], &[0x5A; 100]);
    }

    #[test]
    fn template_errors_happen_before_device_io() {
        let volume = pico_volume();
        let config = json!({ "device_name": "Pad" });
        let mut deployer = deployer(vec![volume.path().into()], fast_options());

        let err = deployer
            .deploy(&[1; 600], Some(config.as_object().unwrap()))
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Inject(InjectError::PlaceholderNotFound)
        ));
        assert_eq!(
            deployer.state(),
            DeployState::Failed(FailureReason::Template)
        );
        assert!(!volume.path().join(DEFAULT_FILE_NAME).exists());
    }

    #[test]
    fn oversized_config() {
        let volume = pico_volume();
        let config = json!({ "blob": "x".repeat(5000) });
        let mut deployer = deployer(vec![volume.path().into()], fast_options());

        let err = deployer
            .deploy(&template(), Some(config.as_object().unwrap()))
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Config(ConfigBlockError::PayloadTooLarge { .. })
        ));
        assert_eq!(err.reason(), FailureReason::Template);
    }

    #[test]
    fn empty_image() {
        let mut deployer = deployer(Vec::new(), fast_options());
        let err = deployer.deploy(&[], None).unwrap_err();
        assert!(matches!(err, DeployError::EmptyImage));
        assert_eq!(
            deployer.state(),
            DeployState::Failed(FailureReason::EmptyImage)
        );
    }

    #[test]
    fn no_device() {
        let not_a_pico = TempDir::new().unwrap();
        let mut deployer = deployer(vec![not_a_pico.path().into()], fast_options());

        let err = deployer.deploy(&[1; 10], None).unwrap_err();

        assert!(matches!(
            err,
            DeployError::DeviceNotFound(LocateError::NotFound { .. })
        ));
        assert_eq!(
            deployer.state(),
            DeployState::Failed(FailureReason::DeviceNotFound)
        );
    }

    #[test]
    fn write_failure_is_reported() {
        let volume = pico_volume();
        let options = DeployOptions {
            file_name: "missing-dir/firmware.uf2".to_string(),
            ..fast_options()
        };
        let mut deployer = deployer(vec![volume.path().into()], options);

        let err = deployer.deploy(&[1; 10], None).unwrap_err();

        match err {
            DeployError::WriteError { path, .. } => {
                assert_eq!(path, volume.path().join("missing-dir/firmware.uf2"))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            deployer.state(),
            DeployState::Failed(FailureReason::WriteError)
        );
    }

    #[test]
    fn confirmation_timeout_is_not_failure() {
        let volume = pico_volume();
        let options = DeployOptions {
            confirm_timeout: Some(Duration::from_millis(20)),
            ..fast_options()
        };
        let mut deployer = deployer(vec![volume.path().into()], options);

        let deployment = deployer.deploy(&[1; 10], None).unwrap();

        assert_eq!(deployment.confirmed, Some(false));
        assert_eq!(deployer.state(), DeployState::Done);
    }
}
