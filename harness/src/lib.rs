//! vkt: run one compiled compute kernel on a Vulkan device, verify the
//! output, and report the on-device time.
//!
//! Usage:
//!   `vkt [kernel.spv] [--mask 0xFF0000FF] [--fill 0x55] [--size 1048576]`
//!   `vkt --list-devices`   enumerate devices and memory types only

pub mod config;
pub mod run;

use std::process::ExitCode;

use thiserror::Error;
use vkt_vulkan::{ErrorKind, VulkanError};

pub use config::{Cli, Config};
pub use run::{list_devices, run, RunReport};

/// Process exit status when no Vulkan device is present.
pub const EXIT_NO_DEVICES: u8 = 255;
/// Process exit status for every other failure.
pub const EXIT_FAILURE: u8 = 1;

/// Top-level error of the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

impl HarnessError {
    /// The single place where failures become exit statuses.
    pub fn exit_status(&self) -> u8 {
        match self {
            HarnessError::Vulkan(e) if e.kind() == ErrorKind::EnumerationEmpty => EXIT_NO_DEVICES,
            _ => EXIT_FAILURE,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_devices_has_distinct_status() {
        let e = HarnessError::from(VulkanError::NoDevices);
        assert_eq!(e.exit_status(), EXIT_NO_DEVICES);
        assert_ne!(EXIT_NO_DEVICES, EXIT_FAILURE);
    }

    #[test]
    fn test_other_failures_exit_one() {
        let errors = [
            HarnessError::Config("bad".into()),
            HarnessError::from(VulkanError::NoComputeQueue { device: "x".into() }),
            HarnessError::from(VulkanError::Kernel("empty".into())),
            HarnessError::from(VulkanError::TimestampOrder { start: 2, end: 1 }),
        ];
        for e in &errors {
            assert_eq!(e.exit_status(), EXIT_FAILURE, "{}", e);
        }
    }
}
