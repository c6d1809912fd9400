//! vkt Vulkan runtime.
//!
//! Picks one compute device and queue ([`ComputeContext`]), binds dedicated
//! memory to storage buffers ([`StorageBuffer`]), builds a two-buffer compute
//! pipeline ([`ComputePipeline`]) from a SPIR-V kernel ([`KernelModule`]), and
//! runs it once through the [`Dispatch`] state machine, timing it with
//! timestamp queries ([`TimestampPair`]).

pub mod device;
pub mod dispatch;
pub mod error;
pub mod instance;
pub mod kernel;
pub mod memory;
pub mod pipeline;
pub mod readback;

pub use device::{
    enumerate_devices, select_device, select_queue_family, ComputeContext, DeviceClass,
    DeviceDescriptor, DevicePreferences, QueueFamilyDescriptor,
};
pub use dispatch::{grid_size, Dispatch, DispatchState};
pub use error::{ErrorKind, Result, VulkanError};
pub use instance::Instance;
pub use kernel::{parse_spirv, read_kernel, KernelModule, MAX_KERNEL_WORDS};
pub use memory::{
    find_memory_type, Mapped, MemoryHeapDescriptor, MemoryTable, MemoryTypeDescriptor,
    StorageBuffer,
};
pub use pipeline::ComputePipeline;
pub use readback::{expected_word, read_and_verify, verify_words, TimestampPair};

/// Re-exported so callers can name flags without depending on `ash` directly.
pub use ash::vk;
