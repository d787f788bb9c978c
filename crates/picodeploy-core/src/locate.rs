//! Finding the bootloader's mass storage volume.
//!
//! Candidates come from a [`VolumeLister`]; a candidate is the bootloader if
//! its `INFO_UF2.TXT` mentions the family's signature. Candidates are probed
//! in sorted path order, so with several boards attached the one with the
//! lowest mount path wins.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::*;
use sysinfo::Disks;
use thiserror::Error;

use crate::family::Family;

pub const INFO_UF2_FILE: &str = "INFO_UF2.TXT";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LocateError {
    #[error("Unable to find mounted bootloader volume within {timeout:?}")]
    NotFound { timeout: Duration },
    #[error("Search for bootloader volume was cancelled")]
    Cancelled,
}

/// Source of candidate volume roots.
pub trait VolumeLister {
    fn volume_roots(&mut self) -> Vec<PathBuf>;
}

impl<F> VolumeLister for F
where
    F: FnMut() -> Vec<PathBuf>,
{
    fn volume_roots(&mut self) -> Vec<PathBuf> {
        self()
    }
}

/// Mounted disks as reported by the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemVolumes;

impl VolumeLister for SystemVolumes {
    fn volume_roots(&mut self) -> Vec<PathBuf> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .iter()
            .map(|disk| disk.mount_point().to_owned())
            .collect()
    }
}

/// Every drive letter that currently resolves.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DriveLetters;

#[cfg(windows)]
impl VolumeLister for DriveLetters {
    fn volume_roots(&mut self) -> Vec<PathBuf> {
        (b'A'..=b'Z')
            .map(|letter| PathBuf::from(format!("{}:\\", letter as char)))
            .filter(|root| root.exists())
            .collect()
    }
}

/// A fixed set of directories, e.g. from the command line.
#[derive(Debug, Default, Clone)]
pub struct FixedVolumes(pub Vec<PathBuf>);

impl VolumeLister for FixedVolumes {
    fn volume_roots(&mut self) -> Vec<PathBuf> {
        self.0.clone()
    }
}

pub struct Locator<L> {
    lister: L,
    marker_file: String,
    signature: String,
    poll_interval: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl<L: VolumeLister> Locator<L> {
    pub fn new(lister: L, signature: impl Into<String>) -> Self {
        Self {
            lister,
            marker_file: INFO_UF2_FILE.to_string(),
            signature: signature.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: None,
        }
    }

    pub fn for_family(lister: L, family: Family) -> Self {
        Self::new(lister, family.bootloader_signature())
    }

    pub fn with_marker_file(mut self, marker_file: impl Into<String>) -> Self {
        self.marker_file = marker_file.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Setting `cancel` stops [`Locator::locate`] before its next tick.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Checks whether `root` is a bootloader volume. Any I/O error counts as no.
    pub fn probe(&self, root: &Path) -> bool {
        let marker = root.join(&self.marker_file);
        match fs::read_to_string(&marker) {
            Ok(contents) => contents.contains(&self.signature),
            Err(err) => {
                trace!("Skipping {}: {}", root.display(), err);
                false
            }
        }
    }

    /// One pass over the current volume list.
    pub fn scan(&mut self) -> Option<PathBuf> {
        let mut roots = self.lister.volume_roots();
        roots.sort();
        roots.dedup();

        debug!("Probing {} volumes", roots.len());
        roots.into_iter().find(|root| self.probe(root))
    }

    /// Polls until a bootloader volume shows up or `timeout` passes.
    pub fn locate(&mut self, timeout: Duration) -> Result<PathBuf, LocateError> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if self.is_cancelled() {
                return Err(LocateError::Cancelled);
            }

            if let Some(root) = self.scan() {
                info!("Found bootloader volume {}", root.display());
                return Ok(root);
            }

            match self.until_next_tick(deadline) {
                Some(pause) => thread::sleep(pause),
                None => return Err(LocateError::NotFound { timeout }),
            }
        }
    }

    /// Polls until `root` stops looking like a bootloader volume, which
    /// happens once the board reboots into new firmware. Returns whether that
    /// was seen within `timeout`.
    pub fn wait_for_removal(&mut self, root: &Path, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if !self.probe(root) {
                return true;
            }

            if self.is_cancelled() {
                return false;
            }
            match self.until_next_tick(deadline) {
                Some(pause) => thread::sleep(pause),
                None => return false,
            }
        }
    }

    /// Sleep before the next tick, or `None` once `deadline` has passed. A
    /// missing deadline means the timeout does not fit in an `Instant`.
    fn until_next_tick(&self, deadline: Option<Instant>) -> Option<Duration> {
        let Some(deadline) = deadline else {
            return Some(self.poll_interval);
        };

        let now = Instant::now();
        if now >= deadline {
            None
        } else {
            Some(self.poll_interval.min(deadline - now))
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|cancel| cancel.load(Ordering::Relaxed))
    }
}
