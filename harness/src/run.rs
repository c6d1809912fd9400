//! The single-shot run: select, allocate, load, build, dispatch, verify, time.

use std::time::Duration;

use tracing::info;
use vkt_vulkan::{
    enumerate_devices, expected_word, read_and_verify, read_kernel, ComputeContext,
    ComputePipeline, Dispatch, DevicePreferences, Instance, KernelModule, StorageBuffer,
};

use crate::config::Config;
use crate::HarnessError;

/// What a successful run observed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub device: String,
    pub memory_type: u32,
    pub allocation_size: u64,
    pub words_verified: usize,
    pub expected: u32,
    pub elapsed_ns: f64,
}

impl RunReport {
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.round() as u64)
    }
}

/// Run the configured kernel once and verify its output.
pub fn run(config: &Config) -> Result<RunReport, HarnessError> {
    let instance = Instance::new(config.validation)?;
    let devices = enumerate_devices(&instance)?;
    let ctx = ComputeContext::new(instance, &devices, &config.preferences)?;

    let mut src = StorageBuffer::new(&ctx, config.size, config.memory_flags, "src")?;
    let mut dst = StorageBuffer::new(&ctx, config.size, config.memory_flags, "dst")?;
    src.fill(config.fill)?;
    // A stale destination must not be able to pass verification.
    dst.fill(!config.fill)?;

    let words = read_kernel(&config.kernel)?;
    let kernel = KernelModule::new(&ctx, &words)?;
    let pipeline = ComputePipeline::new(&ctx, &kernel, &config.entry_point, config.workgroup_size)?;
    pipeline.bind_buffers(&src, &dst);

    let done = Dispatch::new(&ctx)?
        .begin()?
        .record(&pipeline, config.mask, config.work_items())?
        .submit()?
        .wait()?;

    let expected = expected_word(config.fill, config.mask);
    let words_verified = read_and_verify(&mut dst, expected)?;

    let timestamps = done.timestamps()?;
    let elapsed_ns = timestamps.elapsed_ns()?;
    info!(
        ticks = timestamps.ticks()?,
        period_ns = timestamps.period_ns,
        "dispatch took {:.3} ms",
        elapsed_ns / 1e6
    );

    Ok(RunReport {
        device: ctx.descriptor().to_string(),
        memory_type: dst.memory_type(),
        allocation_size: dst.allocation_size(),
        words_verified,
        expected,
        elapsed_ns,
    })
}

/// Enumerate devices, open the one that would be selected, and log its memory
/// table. Nothing is allocated or dispatched.
pub fn list_devices(validation: bool, prefs: &DevicePreferences) -> Result<(), HarnessError> {
    let instance = Instance::new(validation)?;
    let devices = enumerate_devices(&instance)?;
    for d in &devices {
        println!("{}", d);
        for q in &d.queue_families {
            println!(
                "    queue family {}: {:?} x{} (timestamp bits {})",
                q.index, q.flags, q.queue_count, q.timestamp_valid_bits
            );
        }
    }
    let ctx = ComputeContext::new(instance, &devices, prefs)?;
    println!("selected: {}", ctx.descriptor());
    Ok(())
}
