use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::info;
use picodeploy_core::{
    ConfigDocument, DeployOptions, Deployer, Locator, SystemVolumes, VolumeLister,
    locate::FixedVolumes,
};

use crate::reporter::ProgressBarReporter;

pub fn deploy<P: AsRef<Path>>(
    input_path: P,
    options: DeployOptions,
    config: Option<&ConfigDocument>,
    volumes: Vec<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let image = fs::read(input_path)?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed))?;
    }

    info!("Using UF2 Family {}", options.family);
    info!(
        "Waiting up to {:?} for a board in BOOTSEL mode (hold BOOTSEL and plug it in)",
        options.timeout
    );

    if volumes.is_empty() {
        run(system_volumes(), &image, options, config, cancel)
    } else {
        run(FixedVolumes(volumes), &image, options, config, cancel)
    }
}

fn run<L: VolumeLister>(
    lister: L,
    image: &[u8],
    options: DeployOptions,
    config: Option<&ConfigDocument>,
    cancel: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let locator = Locator::for_family(lister, options.family).with_cancel(cancel);
    let mut deployer = Deployer::new(locator, options);

    let reporter = ProgressBarReporter::new("Transfering program to microcontroller");
    let deployment = deployer.deploy_with_progress(image, config, reporter)?;

    info!(
        "Wrote {} bytes to {}",
        deployment.bytes,
        deployment.path.display()
    );

    Ok(())
}

#[cfg(not(windows))]
fn system_volumes() -> impl VolumeLister {
    SystemVolumes
}

#[cfg(windows)]
fn system_volumes() -> impl VolumeLister {
    use picodeploy_core::locate::DriveLetters;

    move || {
        let mut roots = SystemVolumes.volume_roots();
        roots.extend(DriveLetters.volume_roots());
        roots
    }
}
