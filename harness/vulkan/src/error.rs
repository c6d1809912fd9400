//! Error type shared by every stage of the harness.

use ash::vk;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VulkanError>;

/// Coarse failure category. The binary maps these to exit behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No physical devices were enumerated.
    EnumerationEmpty,
    /// No queue family or memory type satisfies a hard constraint.
    NoQualifyingResource,
    /// A Vulkan entry point (or the loader) reported failure.
    BackendCall,
    /// Computed results or timestamps are not what they must be.
    Verification,
}

/// Error type for Vulkan operations.
#[derive(Debug, Error)]
pub enum VulkanError {
    /// Vulkan API returned an error code from the named call.
    #[error("{call} failed: {result}{}", hint(.result))]
    Vk { call: &'static str, result: vk::Result },

    /// The Vulkan loader library could not be loaded.
    #[error("failed to load the Vulkan loader: {0}")]
    Loader(String),

    /// No Vulkan-capable device found.
    #[error("no Vulkan physical devices found")]
    NoDevices,

    /// The selected device has no queue family with compute and transfer.
    #[error("device '{device}' has no queue family supporting both compute and transfer")]
    NoComputeQueue { device: String },

    /// No memory type carries every requested property flag.
    #[error("no memory type provides {required:?}")]
    NoMemoryType { required: vk::MemoryPropertyFlags },

    /// The selected queue family cannot write timestamps.
    #[error("queue family {family} does not support timestamps")]
    NoTimestamps { family: u32 },

    /// Kernel binary is empty, misaligned, unreadable or too large.
    #[error("invalid kernel binary: {0}")]
    Kernel(String),

    /// Entry point name contains an interior NUL.
    #[error("invalid entry point name {0:?}")]
    EntryPoint(String),

    /// Dispatch shape cannot be formed from the given sizes.
    #[error("invalid dispatch: {0}")]
    Dispatch(String),

    /// Output words did not match the expected pattern.
    #[error("{mismatches} of {total} words differ; first at word {first_index}: got {got:#010x}, expected {expected:#010x}")]
    Mismatch {
        mismatches: usize,
        total: usize,
        first_index: usize,
        got: u32,
        expected: u32,
    },

    /// The end timestamp precedes the start timestamp.
    #[error("timestamp went backwards: start={start} end={end}")]
    TimestampOrder { start: u64, end: u64 },
}

impl VulkanError {
    /// Category used by the top-level handler.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VulkanError::NoDevices => ErrorKind::EnumerationEmpty,
            VulkanError::NoComputeQueue { .. }
            | VulkanError::NoMemoryType { .. }
            | VulkanError::NoTimestamps { .. } => ErrorKind::NoQualifyingResource,
            VulkanError::Vk { .. }
            | VulkanError::Loader(_)
            | VulkanError::Kernel(_)
            | VulkanError::EntryPoint(_)
            | VulkanError::Dispatch(_) => ErrorKind::BackendCall,
            VulkanError::Mismatch { .. } | VulkanError::TimestampOrder { .. } => {
                ErrorKind::Verification
            }
        }
    }
}

/// Extra guidance for the results a user can act on.
fn hint(result: &vk::Result) -> &'static str {
    match *result {
        vk::Result::ERROR_DEVICE_LOST => " (device lost, a driver reset may be required)",
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => " (device out of memory, reduce --size)",
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => " (host out of memory)",
        vk::Result::ERROR_INCOMPATIBLE_DRIVER => " (no driver supports the requested API version)",
        _ => "",
    }
}

/// Attach the call name to a raw `vk::Result`.
///
/// Used as `.map_err(vk_err("vkCreateBuffer"))?`.
pub(crate) fn vk_err(call: &'static str) -> impl FnOnce(vk::Result) -> VulkanError {
    move |result| VulkanError::Vk { call, result }
}
