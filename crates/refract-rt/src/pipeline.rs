//! Hardware ray tracing pipeline built from the live program set.
//!
//! Stage order matches [`SceneShaders::program_ids`]:
//!
//! | Stage         | Program                                                  |
//! |---------------|----------------------------------------------------------|
//! | 0, 1          | raygen narrow, raygen wide                               |
//! | 2, 3          | primary miss, shadow miss                                |
//! | 4             | shared shadow intersection                               |
//! | 5 + 4g .. +3  | group g: intersection, closest-hit, shadow and AO any-hit |
//!
//! Shader groups (and binding table entries) are the two raygen groups, the
//! two miss groups, then three procedural hit groups per shader group.

use std::sync::Arc;

use ash::vk;
use refract_core::constants::SHADER_ENTRY_POINT;
use refract_core::StageKind;
use refract_gpu::{CommandPool, GpuAllocator, GpuError, RayTracingProperties, Result};
use refract_shaders::{PipelineTarget, SceneShaders};

use crate::sbt::{SbtLayout, ShaderBindingTable};

/// Maximum ray recursion depth requested by the pipeline.
pub const MAX_RECURSION_DEPTH: u32 = 3;

const FIXED_STAGE_COUNT: u32 = 5;
const STAGES_PER_GROUP: u32 = 4;
const SHADOW_INTERSECTION_STAGE: u32 = 4;

/// Ray generation program to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Raygen {
    Narrow,
    Wide,
}

impl Raygen {
    /// Index of the raygen entry in the binding table.
    #[must_use]
    pub const fn index(self) -> u32 {
        match self {
            Self::Narrow => 0,
            Self::Wide => 1,
        }
    }
}

/// Vulkan stage flag of a shader stage kind.
#[must_use]
pub const fn stage_flags(kind: StageKind) -> vk::ShaderStageFlags {
    match kind {
        StageKind::Raygen => vk::ShaderStageFlags::RAYGEN_KHR,
        StageKind::Miss => vk::ShaderStageFlags::MISS_KHR,
        StageKind::Intersection => vk::ShaderStageFlags::INTERSECTION_KHR,
        StageKind::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        StageKind::AnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
    }
}

fn general_group(stage: u32) -> vk::RayTracingShaderGroupCreateInfoKHR<'static> {
    vk::RayTracingShaderGroupCreateInfoKHR::default()
        .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
        .general_shader(stage)
        .closest_hit_shader(vk::SHADER_UNUSED_KHR)
        .any_hit_shader(vk::SHADER_UNUSED_KHR)
        .intersection_shader(vk::SHADER_UNUSED_KHR)
}

fn procedural_group(
    intersection: u32,
    closest_hit: u32,
    any_hit: u32,
) -> vk::RayTracingShaderGroupCreateInfoKHR<'static> {
    vk::RayTracingShaderGroupCreateInfoKHR::default()
        .ty(vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP)
        .general_shader(vk::SHADER_UNUSED_KHR)
        .closest_hit_shader(closest_hit)
        .any_hit_shader(any_hit)
        .intersection_shader(intersection)
}

/// Shader groups for `group_count` shader groups, in binding table order.
#[must_use]
pub fn shader_groups(group_count: u32) -> Vec<vk::RayTracingShaderGroupCreateInfoKHR<'static>> {
    let mut groups = vec![
        // Raygen narrow, raygen wide
        general_group(0),
        general_group(1),
        // Primary miss, shadow miss
        general_group(2),
        general_group(3),
    ];
    for group in 0..group_count {
        let base = FIXED_STAGE_COUNT + group * STAGES_PER_GROUP;
        // Primary: group intersection + closest-hit
        groups.push(procedural_group(base, base + 1, vk::SHADER_UNUSED_KHR));
        // Shadow: shared intersection + shadow any-hit
        groups.push(procedural_group(
            SHADOW_INTERSECTION_STAGE,
            vk::SHADER_UNUSED_KHR,
            base + 2,
        ));
        // Ambient occlusion: shared intersection + AO any-hit
        groups.push(procedural_group(
            SHADOW_INTERSECTION_STAGE,
            vk::SHADER_UNUSED_KHR,
            base + 3,
        ));
    }
    groups
}

/// Hardware ray tracing pipeline and its shader binding table.
pub struct RayTracePipeline {
    device: Arc<ash::Device>,
    rt_loader: ash::khr::ray_tracing_pipeline::Device,
    properties: RayTracingProperties,
    /// Owned by the caller, which binds the matching descriptor sets.
    layout: vk::PipelineLayout,
    queue: vk::Queue,
    command_pool: CommandPool,
    pipeline: vk::Pipeline,
    sbt: Option<ShaderBindingTable>,
}

impl RayTracePipeline {
    /// Create the pipeline from a complete program set.
    ///
    /// # Safety
    /// - Device must support the ray tracing extensions.
    /// - All handles must be valid and `queue` must belong to `queue_family`.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        allocator: &mut GpuAllocator,
        queue: vk::Queue,
        queue_family: u32,
        layout: vk::PipelineLayout,
        shaders: &SceneShaders,
    ) -> Result<Self> {
        let properties = RayTracingProperties::query(instance, physical_device)?;
        let rt_loader = ash::khr::ray_tracing_pipeline::Device::new(instance, &device);
        let command_pool =
            CommandPool::new(&device, queue_family, vk::CommandPoolCreateFlags::TRANSIENT)?;

        let mut pipeline = Self {
            device,
            rt_loader,
            properties,
            layout,
            queue,
            command_pool,
            pipeline: vk::Pipeline::null(),
            sbt: None,
        };
        if let Err(e) = pipeline.build(allocator, shaders) {
            pipeline.command_pool.destroy(&pipeline.device);
            return Err(e);
        }
        Ok(pipeline)
    }

    /// Raw pipeline handle.
    #[must_use]
    pub const fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Current shader binding table.
    #[must_use]
    pub const fn sbt(&self) -> Option<&ShaderBindingTable> {
        self.sbt.as_ref()
    }

    /// Device ray tracing limits.
    #[must_use]
    pub const fn properties(&self) -> &RayTracingProperties {
        &self.properties
    }

    /// Recursion depth the pipeline is created with.
    #[must_use]
    pub fn recursion_depth(&self) -> u32 {
        MAX_RECURSION_DEPTH.min(self.properties.max_ray_recursion_depth)
    }

    unsafe fn build(
        &mut self,
        allocator: &mut GpuAllocator,
        shaders: &SceneShaders,
    ) -> Result<()> {
        let modules = shaders
            .stage_modules()
            .ok_or_else(|| GpuError::InvalidState("Incomplete shader program set".to_string()))?;
        let entry_point = c"main";
        debug_assert_eq!(entry_point.to_bytes(), SHADER_ENTRY_POINT.as_bytes());

        let stages: Vec<vk::PipelineShaderStageCreateInfo<'_>> = shaders
            .program_ids()
            .zip(&modules)
            .map(|(id, &module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage_flags(id.kind()))
                    .module(module)
                    .name(entry_point)
            })
            .collect();
        let groups = shader_groups(shaders.group_count());

        let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(self.recursion_depth())
            .layout(self.layout);

        let pipelines = unsafe {
            self.rt_loader.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        }
        .map_err(|e| GpuError::PipelineCreation(format!("Ray tracing pipeline: {e:?}")))?;
        let pipeline = pipelines[0];

        let layout = SbtLayout::for_groups(&self.properties, shaders.group_count());
        let sbt = unsafe {
            ShaderBindingTable::new(
                &self.device,
                &self.rt_loader,
                allocator,
                &self.command_pool,
                self.queue,
                pipeline,
                &self.properties,
                layout,
            )
        };
        let sbt = match sbt {
            Ok(sbt) => sbt,
            Err(e) => {
                unsafe { self.device.destroy_pipeline(pipeline, None) };
                return Err(e);
            }
        };

        self.pipeline = pipeline;
        self.sbt = Some(sbt);
        tracing::info!(
            "Ray tracing pipeline: {} stages, {} groups, recursion depth {}",
            stages.len(),
            groups.len(),
            self.recursion_depth()
        );
        Ok(())
    }

    unsafe fn destroy_pipeline(&mut self, allocator: &mut GpuAllocator) -> Result<()> {
        if let Some(sbt) = self.sbt.take() {
            unsafe { sbt.destroy(allocator)? };
        }
        if self.pipeline != vk::Pipeline::null() {
            unsafe { self.device.destroy_pipeline(self.pipeline, None) };
            self.pipeline = vk::Pipeline::null();
        }
        Ok(())
    }

    /// Rebuild the pipeline and binding table from the installed programs.
    ///
    /// Waits for the queue to go idle before destroying the old pipeline.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn rebuild(
        &mut self,
        allocator: &mut GpuAllocator,
        shaders: &SceneShaders,
    ) -> Result<()> {
        unsafe {
            self.device.queue_wait_idle(self.queue)?;
            self.destroy_pipeline(allocator)?;
            self.build(allocator, shaders)
        }
    }

    /// Borrow this pipeline as the target of a shader commit.
    #[must_use]
    pub fn rebuilder<'a>(&'a mut self, allocator: &'a mut GpuAllocator) -> PipelineRebuild<'a> {
        PipelineRebuild {
            pipeline: self,
            allocator,
        }
    }

    /// Make the freshly uploaded binding table visible to ray tracing shaders.
    ///
    /// Record once after a rebuild, before the first trace.
    ///
    /// # Safety
    /// The command buffer must be in recording state.
    pub unsafe fn record_upload_barrier(&self, cmd: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    /// Bind the pipeline and record a trace-rays dispatch.
    ///
    /// Descriptor sets for the pipeline layout must already be bound.
    ///
    /// # Safety
    /// The command buffer must be in recording state.
    pub unsafe fn record_trace(
        &self,
        cmd: vk::CommandBuffer,
        raygen: Raygen,
        width: u32,
        height: u32,
    ) {
        let Some(sbt) = &self.sbt else {
            return;
        };
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::RAY_TRACING_KHR, self.pipeline);
            self.rt_loader.cmd_trace_rays(
                cmd,
                &sbt.raygen_region(raygen.index()),
                &sbt.miss_region(),
                &sbt.hit_region(),
                &sbt.callable_region(),
                width,
                height,
                1,
            );
        }
    }

    /// Destroy the pipeline, binding table and command pool.
    ///
    /// # Safety
    /// The pipeline must not be in use.
    pub unsafe fn destroy(&mut self, allocator: &mut GpuAllocator) -> Result<()> {
        unsafe {
            self.destroy_pipeline(allocator)?;
            self.command_pool.destroy(&self.device);
        }
        Ok(())
    }
}

/// A [`RayTracePipeline`] paired with the allocator its rebuilds need.
pub struct PipelineRebuild<'a> {
    pipeline: &'a mut RayTracePipeline,
    allocator: &'a mut GpuAllocator,
}

impl PipelineTarget for PipelineRebuild<'_> {
    fn rebuild(&mut self, shaders: &SceneShaders) -> std::result::Result<(), GpuError> {
        // SAFETY: commits run on the thread owning the device queue.
        unsafe { self.pipeline.rebuild(self.allocator, shaders) }
    }
}
