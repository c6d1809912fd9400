//! Command-line and environment configuration.
//!
//! Device preferences come from either a CLI switch or the presence of an
//! environment variable (`VKT_PREFER_DGPU`, `VKT_PREFER_IGPU`,
//! `VKT_PREFER_CPU`); the value of the variable is ignored.

use std::path::PathBuf;

use clap::Parser;
use vkt_vulkan::{vk, DevicePreferences};

use crate::HarnessError;

pub const ENV_PREFER_DISCRETE: &str = "VKT_PREFER_DGPU";
pub const ENV_PREFER_INTEGRATED: &str = "VKT_PREFER_IGPU";
pub const ENV_PREFER_CPU: &str = "VKT_PREFER_CPU";

pub const DEFAULT_KERNEL: &str = "harness/kernels/xor_mask.spv";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "vkt",
    version,
    about = "Run one compiled compute kernel on a Vulkan device, verify it, and time it."
)]
pub struct Cli {
    /// Compiled SPIR-V kernel
    #[arg(default_value = DEFAULT_KERNEL)]
    pub kernel: PathBuf,

    /// Kernel entry point
    #[arg(long, default_value = "main")]
    pub entry_point: String,

    /// Buffer size in bytes (multiple of 4)
    #[arg(long, default_value = "1048576", value_parser = parse_u64)]
    pub size: u64,

    /// Byte written to every position of the input buffer
    #[arg(long, default_value = "0x55", value_parser = parse_u8)]
    pub fill: u8,

    /// 32-bit scalar pushed to the kernel (XORed into every word)
    #[arg(long, default_value = "0xFF0000FF", value_parser = parse_u32)]
    pub mask: u32,

    /// Kernel local size X
    #[arg(long, default_value = "256", value_parser = parse_u32)]
    pub workgroup_size: u32,

    /// Require device-local memory in addition to host-visible, host-coherent
    #[arg(long)]
    pub device_local: bool,

    /// Prefer a discrete GPU (also VKT_PREFER_DGPU)
    #[arg(long)]
    pub prefer_discrete: bool,

    /// Prefer an integrated GPU (also VKT_PREFER_IGPU)
    #[arg(long)]
    pub prefer_integrated: bool,

    /// Prefer a CPU implementation (also VKT_PREFER_CPU)
    #[arg(long)]
    pub prefer_cpu: bool,

    /// Enable VK_LAYER_KHRONOS_validation when installed
    #[arg(long)]
    pub validation: bool,

    /// List devices and memory types, then exit
    #[arg(long)]
    pub list_devices: bool,

    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long)]
    pub verbose: bool,
}

/// Validated run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub kernel: PathBuf,
    pub entry_point: String,
    pub size: u64,
    pub fill: u8,
    pub mask: u32,
    pub workgroup_size: u32,
    pub memory_flags: vk::MemoryPropertyFlags,
    pub preferences: DevicePreferences,
    pub validation: bool,
}

impl Config {
    /// Validate `cli`, reading preference variables through `env_set`.
    pub fn from_cli(cli: &Cli, env_set: impl Fn(&str) -> bool) -> Result<Self, HarnessError> {
        if cli.size == 0 || cli.size % 4 != 0 {
            return Err(HarnessError::Config(format!(
                "--size must be a non-zero multiple of 4, got {}",
                cli.size
            )));
        }
        if cli.size / 4 > u64::from(u32::MAX) {
            return Err(HarnessError::Config(format!("--size {} is too large", cli.size)));
        }
        if cli.workgroup_size == 0 {
            return Err(HarnessError::Config("--workgroup-size must be non-zero".into()));
        }

        let mut memory_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        if cli.device_local {
            memory_flags |= vk::MemoryPropertyFlags::DEVICE_LOCAL;
        }

        Ok(Self {
            kernel: cli.kernel.clone(),
            entry_point: cli.entry_point.clone(),
            size: cli.size,
            fill: cli.fill,
            mask: cli.mask,
            workgroup_size: cli.workgroup_size,
            memory_flags,
            preferences: preferences(cli, env_set),
            validation: cli.validation,
        })
    }

    /// Number of 32-bit words, one kernel invocation each.
    pub fn work_items(&self) -> u32 {
        (self.size / 4) as u32
    }
}

/// Combine CLI switches with environment presence.
pub fn preferences(cli: &Cli, env_set: impl Fn(&str) -> bool) -> DevicePreferences {
    DevicePreferences {
        discrete: cli.prefer_discrete || env_set(ENV_PREFER_DISCRETE),
        integrated: cli.prefer_integrated || env_set(ENV_PREFER_INTEGRATED),
        cpu: cli.prefer_cpu || env_set(ENV_PREFER_CPU),
    }
}

/// True when `name` is present in the process environment.
pub fn process_env_set(name: &str) -> bool {
    std::env::var_os(name).is_some()
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let v = parse_u64(s)?;
    u32::try_from(v).map_err(|_| format!("{} does not fit in 32 bits", v))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let v = parse_u64(s)?;
    u8::try_from(v).map_err(|_| format!("{} does not fit in a byte", v))
}
