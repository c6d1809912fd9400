//! One-shot command recording, submission and completion wait.
//!
//! A dispatch moves `Idle → Recording → Submitted → Complete` exactly once.
//! Each state is a type parameter of [`Dispatch`], and every transition
//! consumes the previous state, so a command buffer cannot be re-recorded or
//! resubmitted and results cannot be read before the queue has drained.
//!
//! ```text
//! Dispatch::<Idle>::new(ctx)?        // command pool, command buffer, query pool
//!     .begin()?                      // vkBeginCommandBuffer (one-time submit)
//!     .record(&pipeline, param, n)?  // bind, push, timestamps, dispatch
//!     .submit()?                     // vkEndCommandBuffer + vkQueueSubmit
//!     .wait()?                       // vkQueueWaitIdle
//!     .timestamps()?                 // raw start/end ticks
//! ```

use std::fmt;
use std::marker::PhantomData;

use ash::vk;
use tracing::{debug, info};

use crate::device::ComputeContext;
use crate::error::{vk_err, Result, VulkanError};
use crate::pipeline::ComputePipeline;
use crate::readback::TimestampPair;

const TIMESTAMP_START: u32 = 0;
const TIMESTAMP_END: u32 = 1;
const TIMESTAMP_COUNT: u32 = 2;

/// Number of workgroups along X needed to cover `total_work_items`.
pub fn grid_size(total_work_items: u32, workgroup_size: u32) -> Result<u32> {
    if workgroup_size == 0 {
        return Err(VulkanError::Dispatch("workgroup size must be non-zero".into()));
    }
    Ok(total_work_items.div_ceil(workgroup_size))
}

/// Runtime name of a dispatch state, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Recording,
    Submitted,
    Complete,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Marker trait implemented by the four state types.
pub trait State: sealed::Sealed {
    const STATE: DispatchState;
}

macro_rules! states {
    ($($name:ident),*) => {$(
        #[derive(Debug)]
        pub enum $name {}
        impl sealed::Sealed for $name {}
        impl State for $name {
            const STATE: DispatchState = DispatchState::$name;
        }
    )*};
}

states!(Idle, Recording, Submitted, Complete);

/// Per-dispatch objects, released together.
struct Resources<'ctx> {
    ctx: &'ctx ComputeContext,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    query_pool: vk::QueryPool,
    submitted: bool,
}

impl Drop for Resources<'_> {
    fn drop(&mut self) {
        let device = &self.ctx.device;
        unsafe {
            if self.submitted {
                // The command buffer may still be pending if `wait` never ran.
                let _ = device.queue_wait_idle(self.ctx.queue);
            }
            device.destroy_query_pool(self.query_pool, None);
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// A single compute dispatch in state `S`.
pub struct Dispatch<'ctx, S: State> {
    res: Resources<'ctx>,
    _state: PhantomData<S>,
}

impl<'ctx, S: State> Dispatch<'ctx, S> {
    pub fn state(&self) -> DispatchState {
        S::STATE
    }

    fn into_state<T: State>(self) -> Dispatch<'ctx, T> {
        debug!(from = %S::STATE, to = %T::STATE, "dispatch transition");
        Dispatch { res: self.res, _state: PhantomData }
    }
}

impl<'ctx> Dispatch<'ctx, Idle> {
    /// Allocate the command buffer and the two-slot timestamp query pool.
    pub fn new(ctx: &'ctx ComputeContext) -> Result<Self> {
        let family = ctx.queue_family();
        if family.timestamp_valid_bits == 0 {
            return Err(VulkanError::NoTimestamps { family: family.index });
        }
        let device = &ctx.device;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(family.index);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(vk_err("vkCreateCommandPool"))?;

        let mut res = Resources {
            ctx,
            command_pool,
            command_buffer: vk::CommandBuffer::null(),
            query_pool: vk::QueryPool::null(),
            submitted: false,
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        res.command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(vk_err("vkAllocateCommandBuffers"))?[0];

        let query_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(TIMESTAMP_COUNT);
        res.query_pool = unsafe { device.create_query_pool(&query_info, None) }
            .map_err(vk_err("vkCreateQueryPool"))?;
        ctx.label(res.query_pool, "dispatch timestamps");

        Ok(Self { res, _state: PhantomData })
    }

    /// Open the command buffer for one-time recording.
    pub fn begin(self) -> Result<Dispatch<'ctx, Recording>> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.res
                .ctx
                .device
                .begin_command_buffer(self.res.command_buffer, &begin_info)
        }
        .map_err(vk_err("vkBeginCommandBuffer"))?;
        Ok(self.into_state())
    }
}

impl<'ctx> Dispatch<'ctx, Recording> {
    /// Record the bracketed dispatch of `total_work_items` invocations with
    /// `param` in the push-constant block.
    pub fn record(
        self,
        pipeline: &ComputePipeline<'_>,
        param: u32,
        total_work_items: u32,
    ) -> Result<Self> {
        let groups = grid_size(total_work_items, pipeline.workgroup_size())?;
        let limit = self.res.ctx.descriptor().max_workgroup_count_x;
        if groups > limit {
            return Err(VulkanError::Dispatch(format!(
                "{} workgroups exceeds the device limit of {}",
                groups, limit
            )));
        }

        let device = &self.res.ctx.device;
        let cmd = self.res.command_buffer;
        let queries = self.res.query_pool;
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.handle());
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.layout(),
                0,
                &[pipeline.descriptor_set()],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                pipeline.layout(),
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&param),
            );
            device.cmd_reset_query_pool(cmd, queries, 0, TIMESTAMP_COUNT);
            device.cmd_write_timestamp(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                queries,
                TIMESTAMP_START,
            );
            device.cmd_dispatch(cmd, groups, 1, 1);
            device.cmd_write_timestamp(
                cmd,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                queries,
                TIMESTAMP_END,
            );
        }
        debug!(groups, workgroup_size = pipeline.workgroup_size(), param, "recorded dispatch");
        Ok(self)
    }

    /// Close recording and submit to the context's queue without semaphores.
    pub fn submit(mut self) -> Result<Dispatch<'ctx, Submitted>> {
        let ctx = self.res.ctx;
        let cmd = self.res.command_buffer;
        unsafe { ctx.device.end_command_buffer(cmd) }.map_err(vk_err("vkEndCommandBuffer"))?;

        let cmds = [cmd];
        let submit = [vk::SubmitInfo::default().command_buffers(&cmds)];
        unsafe { ctx.device.queue_submit(ctx.queue, &submit, vk::Fence::null()) }
            .map_err(vk_err("vkQueueSubmit"))?;
        self.res.submitted = true;
        Ok(self.into_state())
    }
}

impl<'ctx> Dispatch<'ctx, Submitted> {
    /// Block until the queue is idle. No timeout: a hung device blocks forever.
    pub fn wait(mut self) -> Result<Dispatch<'ctx, Complete>> {
        let ctx = self.res.ctx;
        unsafe { ctx.device.queue_wait_idle(ctx.queue) }
            .map_err(vk_err("vkQueueWaitIdle"))?;
        self.res.submitted = false;
        info!("dispatch complete");
        Ok(self.into_state())
    }
}

impl Dispatch<'_, Complete> {
    /// Read both timestamp slots, masked to the queue family's valid bits.
    pub fn timestamps(&self) -> Result<TimestampPair> {
        let mut ticks = [0u64; TIMESTAMP_COUNT as usize];
        unsafe {
            self.res.ctx.device.get_query_pool_results(
                self.res.query_pool,
                0,
                &mut ticks,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
        }
        .map_err(vk_err("vkGetQueryPoolResults"))?;

        let ctx = self.res.ctx;
        Ok(TimestampPair::from_raw(
            ticks[TIMESTAMP_START as usize],
            ticks[TIMESTAMP_END as usize],
            ctx.queue_family().timestamp_valid_bits,
            ctx.descriptor().timestamp_period,
        ))
    }
}
