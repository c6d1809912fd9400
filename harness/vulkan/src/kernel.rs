//! Compiled kernel (SPIR-V) loading.

use std::io::Cursor;
use std::path::Path;

use ash::vk;
use tracing::info;

use crate::device::ComputeContext;
use crate::error::{vk_err, Result, VulkanError};

/// Largest kernel accepted, in 32-bit words.
pub const MAX_KERNEL_WORDS: usize = 64 * 1024;

/// Decode a SPIR-V byte stream into words.
///
/// Handles either endianness via the magic number. Rejects empty input,
/// lengths that are not a multiple of four, and anything over
/// [`MAX_KERNEL_WORDS`].
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() {
        return Err(VulkanError::Kernel("kernel binary is empty".into()));
    }
    if bytes.len() > MAX_KERNEL_WORDS * 4 {
        return Err(VulkanError::Kernel(format!(
            "{} bytes exceeds the {} word limit",
            bytes.len(),
            MAX_KERNEL_WORDS
        )));
    }
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| VulkanError::Kernel(e.to_string()))
}

/// Read a kernel binary from disk and decode it.
pub fn read_kernel(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .map_err(|e| VulkanError::Kernel(format!("cannot read {}: {}", path.display(), e)))?;
    let words = parse_spirv(&bytes)?;
    info!(path = %path.display(), words = words.len(), "loaded kernel");
    Ok(words)
}

/// A `VkShaderModule` owned for the lifetime of the pipeline built from it.
pub struct KernelModule<'ctx> {
    ctx: &'ctx ComputeContext,
    module: vk::ShaderModule,
}

impl<'ctx> KernelModule<'ctx> {
    pub fn new(ctx: &'ctx ComputeContext, words: &[u32]) -> Result<Self> {
        let info = vk::ShaderModuleCreateInfo::default().code(words);
        let module = unsafe { ctx.device.create_shader_module(&info, None) }
            .map_err(vk_err("vkCreateShaderModule"))?;
        ctx.label(module, "kernel");
        Ok(Self { ctx, module })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for KernelModule<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_parse_little_endian() {
        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        assert_eq!(parse_spirv(&bytes).unwrap(), vec![MAGIC, 0x0001_0000]);
    }

    #[test]
    fn test_parse_big_endian_is_swapped() {
        let mut bytes = MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&7u32.to_be_bytes());
        assert_eq!(parse_spirv(&bytes).unwrap(), vec![MAGIC, 7]);
    }

    #[test]
    fn test_empty_rejected() {
        let err = parse_spirv(&[]).unwrap_err();
        assert!(err.to_string().contains("empty"), "got: {}", err);
    }

    #[test]
    fn test_misaligned_rejected() {
        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.push(0);
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn test_over_limit_rejected() {
        let mut bytes = vec![0u8; (MAX_KERNEL_WORDS + 1) * 4];
        bytes[..4].copy_from_slice(&MAGIC.to_le_bytes());
        let err = parse_spirv(&bytes).unwrap_err();
        assert!(err.to_string().contains("word limit"), "got: {}", err);
    }

    #[test]
    fn test_missing_file() {
        let err = read_kernel(Path::new("/nonexistent/kernel.spv")).unwrap_err();
        assert!(err.to_string().contains("cannot read"), "got: {}", err);
    }
}
