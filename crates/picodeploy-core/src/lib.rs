//! Packaging and deployment of flat firmware images for RP2040-class boards.
//!
//! A deploy runs in four steps: embed a config block at the image's
//! placeholder ([`inject`]), chunk the image into UF2 blocks ([`uf2`]), find
//! the BOOTSEL volume ([`locate`]) and copy the blocks onto it ([`deploy`]).
//!
//! The input must already be the flash-ready byte stream; extracting that
//! from a linked executable happens upstream.

pub mod config_block;
pub mod deploy;
pub mod family;
pub mod inject;
pub mod locate;
pub mod reporter;
pub mod uf2;

pub use config_block::{ConfigBlock, ConfigBlockError};
pub use deploy::{DeployError, DeployOptions, DeployState, Deployer, Deployment, FailureReason};
pub use family::Family;
pub use inject::{InjectError, Injector};
pub use locate::{LocateError, Locator, SystemVolumes, VolumeLister};

/// A structured key/value configuration document.
pub type ConfigDocument = serde_json::Map<String, serde_json::Value>;
