//! Compute pipeline with the harness's fixed resource layout.
//!
//! Set 0 holds two single-element storage buffers (binding 0 = input A,
//! binding 1 = output B), visible to the compute stage only. A 4-byte push
//! constant carries the scalar parameter.

use std::ffi::CString;

use ash::vk;
use tracing::debug;

use crate::device::ComputeContext;
use crate::error::{vk_err, Result, VulkanError};
use crate::kernel::KernelModule;
use crate::memory::StorageBuffer;

/// Number of storage-buffer slots in the layout.
pub const BUFFER_SLOTS: u32 = 2;
/// Size of the push-constant block in bytes.
pub const PARAM_BYTES: u32 = std::mem::size_of::<u32>() as u32;

/// Immutable, fully linked compute pipeline plus its one descriptor set.
pub struct ComputePipeline<'ctx> {
    ctx: &'ctx ComputeContext,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    workgroup_size: u32,
}

impl<'ctx> ComputePipeline<'ctx> {
    /// Build the pipeline for `entry_point` in `kernel`.
    ///
    /// `workgroup_size` must match the kernel's declared local size X; it is
    /// only used to shape the dispatch grid.
    pub fn new(
        ctx: &'ctx ComputeContext,
        kernel: &KernelModule<'_>,
        entry_point: &str,
        workgroup_size: u32,
    ) -> Result<Self> {
        let entry = CString::new(entry_point)
            .map_err(|_| VulkanError::EntryPoint(entry_point.to_string()))?;
        if workgroup_size == 0 {
            return Err(VulkanError::Dispatch("workgroup size must be non-zero".into()));
        }
        let device = &ctx.device;

        let mut this = Self {
            ctx,
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            workgroup_size,
        };

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..BUFFER_SLOTS)
            .map(|i| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(i)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        this.set_layout = unsafe { device.create_descriptor_set_layout(&set_layout_info, None) }
            .map_err(vk_err("vkCreateDescriptorSetLayout"))?;

        let set_layouts = [this.set_layout];
        let push_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(PARAM_BYTES)];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        this.pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(vk_err("vkCreatePipelineLayout"))?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(kernel.handle())
            .name(&entry);
        let pipeline_info = [vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(this.pipeline_layout)];
        this.pipeline = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &pipeline_info, None)
        }
        .map_err(|(_, e)| vk_err("vkCreateComputePipelines")(e))?[0];
        ctx.label(this.pipeline, entry_point);

        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(BUFFER_SLOTS)];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        this.descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(vk_err("vkCreateDescriptorPool"))?;

        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(this.descriptor_pool)
            .set_layouts(&set_layouts);
        this.descriptor_set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .map_err(vk_err("vkAllocateDescriptorSets"))?[0];

        debug!(entry_point, workgroup_size, "built compute pipeline");
        Ok(this)
    }

    /// Point slot 0 at `a` and slot 1 at `b`, each over its full logical size.
    pub fn bind_buffers(&self, a: &StorageBuffer<'_>, b: &StorageBuffer<'_>) {
        let infos = [a, b].map(|buf| {
            [vk::DescriptorBufferInfo::default()
                .buffer(buf.handle())
                .offset(0)
                .range(buf.size())]
        });
        let writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .enumerate()
            .map(|(slot, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(self.descriptor_set)
                    .dst_binding(slot as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(info)
            })
            .collect();
        unsafe { self.ctx.device.update_descriptor_sets(&writes, &[]) };
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }
}

impl Drop for ComputePipeline<'_> {
    fn drop(&mut self) {
        // Null handles are ignored by every destroy call.
        let device = &self.ctx.device;
        unsafe {
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}
