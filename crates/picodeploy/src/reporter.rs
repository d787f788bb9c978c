use std::io::Stdout;

use log::{LevelFilter, info, max_level};
use pbr::{ProgressBar, Units};
use picodeploy_core::reporter::ProgressReporter;

pub struct ProgressBarReporter {
    pb: Option<ProgressBar<Stdout>>,
    message: &'static str,
}

impl ProgressBarReporter {
    pub fn new(message: &'static str) -> Self {
        let pb = if max_level() >= LevelFilter::Info {
            Some(ProgressBar::new(0))
        } else {
            None
        };

        Self { pb, message }
    }
}

impl ProgressReporter for ProgressBarReporter {
    fn start(&mut self, total_bytes: usize) {
        if let Some(pb) = self.pb.as_mut() {
            info!("{}", self.message);
            pb.total = total_bytes as u64;
            pb.set_units(Units::Bytes);
        }
    }

    fn advance(&mut self, bytes: usize) {
        if let Some(pb) = self.pb.as_mut() {
            pb.add(bytes as u64);
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.pb.as_mut() {
            pb.finish();
            // New line after progress bar
            println!();
        }
    }
}
