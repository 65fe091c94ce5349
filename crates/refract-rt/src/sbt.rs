//! Shader Binding Table (SBT) layout and upload.
//!
//! The SBT is a GPU buffer of shader group handles organized by type:
//! - Ray generation entries (one per raygen program)
//! - Miss entries (primary, shadow)
//! - Hit entries, three per shader group (primary, shadow, ambient occlusion)
//! - Callable entries (unused)
//!
//! Every region starts on the device's region base alignment. Entries inside
//! a region are packed back to back at the entry stride.

use ash::vk;
use refract_core::constants::{HIT_ENTRIES_PER_GROUP, MISS_COUNT, RAYGEN_COUNT};
use refract_gpu::{
    upload_staged, CommandPool, GpuAllocator, GpuBuffer, GpuError, RayTracingProperties, Result,
};

/// Round `offset` up to a multiple of `alignment`.
///
/// `alignment` must be non-zero.
#[inline]
#[must_use]
pub const fn align(offset: u64, alignment: u64) -> u64 {
    offset + ((alignment - offset % alignment) % alignment)
}

/// Byte layout of a shader binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbtLayout {
    pub raygen_region_offset: u64,
    pub raygen_count: u32,
    pub miss_region_offset: u64,
    pub miss_region_count: u32,
    pub hit_region_offset: u64,
    pub hit_region_count: u32,
    pub entry_stride: u64,
    pub region_base_alignment: u64,
    /// Total table size in bytes.
    pub size: u64,
}

impl SbtLayout {
    /// Compute the layout for the given entry counts.
    ///
    /// A region with no entries still aligns the start of the next one.
    #[must_use]
    pub fn new(
        entry_stride: u64,
        region_base_alignment: u64,
        raygen_count: u32,
        miss_count: u32,
        hit_count: u32,
    ) -> Self {
        let alignment = region_base_alignment.max(1);
        let raygen_region_offset = 0;
        let raygen_end = raygen_region_offset + u64::from(raygen_count) * entry_stride;
        let miss_region_offset = align(raygen_end, alignment);
        let miss_end = miss_region_offset + u64::from(miss_count) * entry_stride;
        let hit_region_offset = align(miss_end, alignment);
        let size = hit_region_offset + u64::from(hit_count) * entry_stride;

        Self {
            raygen_region_offset,
            raygen_count,
            miss_region_offset,
            miss_region_count: miss_count,
            hit_region_offset,
            hit_region_count: hit_count,
            entry_stride,
            region_base_alignment: alignment,
            size,
        }
    }

    /// Layout of the engine pipeline for `group_count` shader groups.
    #[must_use]
    pub fn for_groups(properties: &RayTracingProperties, group_count: u32) -> Self {
        Self::new(
            properties.entry_stride(),
            u64::from(properties.shader_group_base_alignment),
            RAYGEN_COUNT,
            MISS_COUNT,
            group_count * HIT_ENTRIES_PER_GROUP,
        )
    }

    /// Number of shader group handles in the table.
    #[must_use]
    pub const fn handle_count(&self) -> u32 {
        self.raygen_count + self.miss_region_count + self.hit_region_count
    }

    /// Byte offset of the entry for shader group `index`, in pipeline group order.
    #[must_use]
    pub fn entry_offset(&self, index: u32) -> Option<u64> {
        let stride = self.entry_stride;
        if index < self.raygen_count {
            return Some(self.raygen_region_offset + u64::from(index) * stride);
        }
        let index = index - self.raygen_count;
        if index < self.miss_region_count {
            return Some(self.miss_region_offset + u64::from(index) * stride);
        }
        let index = index - self.miss_region_count;
        (index < self.hit_region_count).then(|| self.hit_region_offset + u64::from(index) * stride)
    }

    /// Pack handles, as returned by the driver in group order, into table bytes.
    ///
    /// Gaps between handles and regions are zero.
    pub fn pack(&self, handles: &[u8], handle_size: usize) -> Result<Vec<u8>> {
        let expected = self.handle_count() as usize * handle_size;
        if handle_size == 0 || handle_size as u64 > self.entry_stride || handles.len() != expected {
            return Err(GpuError::InvalidState(format!(
                "SBT expects {} handles of {handle_size} bytes, got {} bytes",
                self.handle_count(),
                handles.len()
            )));
        }

        let size = usize::try_from(self.size)
            .map_err(|_| GpuError::InvalidState(format!("SBT size {} too large", self.size)))?;
        let mut data = vec![0u8; size];
        for (index, handle) in (0u32..).zip(handles.chunks_exact(handle_size)) {
            let offset = self
                .entry_offset(index)
                .and_then(|offset| usize::try_from(offset).ok())
                .ok_or_else(|| GpuError::InvalidState(format!("SBT entry {index} out of range")))?;
            data[offset..offset + handle_size].copy_from_slice(handle);
        }
        Ok(data)
    }
}

/// Shader Binding Table for the ray tracing pipeline.
pub struct ShaderBindingTable {
    /// Device-local buffer holding all entries.
    pub buffer: GpuBuffer,
    layout: SbtLayout,
    device_address: vk::DeviceAddress,
}

impl ShaderBindingTable {
    /// Fetch the pipeline's group handles and upload them as a new table.
    ///
    /// Blocks until the staged upload has completed.
    ///
    /// # Safety
    /// - All handles must be valid.
    /// - `pool` must belong to `queue`'s family.
    /// - `pipeline` must have been created with `layout.handle_count()` groups.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        device: &ash::Device,
        rt_loader: &ash::khr::ray_tracing_pipeline::Device,
        allocator: &mut GpuAllocator,
        pool: &CommandPool,
        queue: vk::Queue,
        pipeline: vk::Pipeline,
        properties: &RayTracingProperties,
        layout: SbtLayout,
    ) -> Result<Self> {
        let handle_size = properties.shader_group_handle_size as usize;
        let handles = rt_loader.get_ray_tracing_shader_group_handles(
            pipeline,
            0,
            layout.handle_count(),
            handle_size * layout.handle_count() as usize,
        )?;
        let data = layout.pack(&handles, handle_size)?;

        let buffer = upload_staged(
            device,
            allocator,
            pool,
            queue,
            &data,
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            "shader_binding_table",
        )?;
        let device_address = buffer.device_address(device);

        tracing::debug!(
            "SBT: {} raygen, {} miss, {} hit entries, {} bytes",
            layout.raygen_count,
            layout.miss_region_count,
            layout.hit_region_count,
            layout.size
        );

        Ok(Self {
            buffer,
            layout,
            device_address,
        })
    }

    /// Table layout.
    #[must_use]
    pub const fn layout(&self) -> &SbtLayout {
        &self.layout
    }

    /// Region selecting a single ray generation entry.
    ///
    /// For raygen, size must equal stride (VUID-vkCmdTraceRaysKHR-size-04023).
    #[must_use]
    pub fn raygen_region(&self, index: u32) -> vk::StridedDeviceAddressRegionKHR {
        let stride = self.layout.entry_stride;
        let index = index.min(self.layout.raygen_count.saturating_sub(1));
        vk::StridedDeviceAddressRegionKHR {
            device_address: self.device_address
                + self.layout.raygen_region_offset
                + u64::from(index) * stride,
            stride,
            size: stride,
        }
    }

    /// Miss region.
    #[must_use]
    pub fn miss_region(&self) -> vk::StridedDeviceAddressRegionKHR {
        self.region(self.layout.miss_region_offset, self.layout.miss_region_count)
    }

    /// Hit region.
    #[must_use]
    pub fn hit_region(&self) -> vk::StridedDeviceAddressRegionKHR {
        self.region(self.layout.hit_region_offset, self.layout.hit_region_count)
    }

    /// Empty callable region.
    #[must_use]
    pub fn callable_region(&self) -> vk::StridedDeviceAddressRegionKHR {
        vk::StridedDeviceAddressRegionKHR::default()
    }

    fn region(&self, offset: u64, count: u32) -> vk::StridedDeviceAddressRegionKHR {
        if count == 0 {
            return vk::StridedDeviceAddressRegionKHR::default();
        }
        vk::StridedDeviceAddressRegionKHR {
            device_address: self.device_address + offset,
            stride: self.layout.entry_stride,
            size: u64::from(count) * self.layout.entry_stride,
        }
    }

    /// Destroy the SBT and free resources.
    ///
    /// # Safety
    /// - Allocator must be valid.
    /// - The SBT must not be in use.
    pub unsafe fn destroy(mut self, allocator: &mut GpuAllocator) -> Result<()> {
        allocator.free_buffer(&mut self.buffer)
    }
}
