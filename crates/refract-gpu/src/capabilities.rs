//! Ray tracing capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

use crate::error::{GpuError, Result};

/// Device extensions the ray tracing pipeline cannot run without.
pub const REQUIRED_RAY_TRACING_EXTENSIONS: [&CStr; 3] = [
    ash::khr::ray_tracing_pipeline::NAME,
    ash::khr::acceleration_structure::NAME,
    ash::khr::deferred_host_operations::NAME,
];

/// Ray tracing pipeline limits reported by the physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RayTracingProperties {
    /// Size in bytes of one shader group handle.
    pub shader_group_handle_size: u32,
    /// Required alignment of each handle within the binding table.
    pub shader_group_handle_alignment: u32,
    /// Required alignment of each binding table region start.
    pub shader_group_base_alignment: u32,
    /// Maximum ray recursion depth.
    pub max_ray_recursion_depth: u32,
    /// Maximum stride between binding table records.
    pub max_shader_group_stride: u32,
}

impl RayTracingProperties {
    /// Query ray tracing properties from a physical device.
    ///
    /// Fails if the device lacks any of [`REQUIRED_RAY_TRACING_EXTENSIONS`].
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let extensions = instance.enumerate_device_extension_properties(physical_device)?;
        let available: HashSet<&CStr> = extensions
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();

        if let Some(missing) = REQUIRED_RAY_TRACING_EXTENSIONS
            .iter()
            .find(|name| !available.contains(*name))
        {
            return Err(GpuError::ExtensionNotSupported(
                missing.to_string_lossy().into_owned(),
            ));
        }

        let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
        let mut properties2 =
            vk::PhysicalDeviceProperties2::default().push_next(&mut rt_properties);
        instance.get_physical_device_properties2(physical_device, &mut properties2);

        let properties = Self::from(&rt_properties);
        properties.check_stride()?;
        tracing::info!("Ray tracing: {}", properties.summary());
        Ok(properties)
    }

    /// Size of one binding table entry.
    ///
    /// Entries are padded up to the region base alignment so that each
    /// ray generation entry can be addressed on its own.
    #[must_use]
    pub fn entry_stride(&self) -> u64 {
        let handle = u64::from(self.shader_group_handle_size);
        let alignment = u64::from(self.shader_group_base_alignment.max(1));
        handle.div_ceil(alignment) * alignment
    }

    /// Fail if the entry stride exceeds the device's maximum record stride.
    pub fn check_stride(&self) -> Result<()> {
        let stride = self.entry_stride();
        if stride > u64::from(self.max_shader_group_stride) {
            return Err(GpuError::InvalidState(format!(
                "SBT entry stride {stride} exceeds device maximum {}",
                self.max_shader_group_stride
            )));
        }
        Ok(())
    }

    /// Get a human-readable summary of the limits.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "handle {} B (align {}), region align {}, max recursion {}",
            self.shader_group_handle_size,
            self.shader_group_handle_alignment,
            self.shader_group_base_alignment,
            self.max_ray_recursion_depth,
        )
    }
}

impl From<&vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'_>> for RayTracingProperties {
    fn from(properties: &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'_>) -> Self {
        Self {
            shader_group_handle_size: properties.shader_group_handle_size,
            shader_group_handle_alignment: properties.shader_group_handle_alignment,
            shader_group_base_alignment: properties.shader_group_base_alignment,
            max_ray_recursion_depth: properties.max_ray_recursion_depth,
            max_shader_group_stride: properties.max_shader_group_stride,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(handle: u32, base: u32) -> RayTracingProperties {
        RayTracingProperties {
            shader_group_handle_size: handle,
            shader_group_handle_alignment: 32,
            shader_group_base_alignment: base,
            max_ray_recursion_depth: 31,
            max_shader_group_stride: 4096,
        }
    }

    #[test]
    fn entry_stride_rounds_to_base_alignment() {
        assert_eq!(properties(32, 64).entry_stride(), 64);
        assert_eq!(properties(64, 64).entry_stride(), 64);
        assert_eq!(properties(32, 32).entry_stride(), 32);
        assert_eq!(properties(48, 16).entry_stride(), 48);
    }

    #[test]
    fn stride_beyond_device_maximum_is_rejected() {
        assert!(properties(32, 64).check_stride().is_ok());
        let narrow = RayTracingProperties {
            max_shader_group_stride: 32,
            ..properties(32, 64)
        };
        assert!(matches!(narrow.check_stride(), Err(GpuError::InvalidState(_))));
    }

    #[test]
    fn converts_from_vulkan_properties() {
        let vk_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR {
            shader_group_handle_size: 32,
            shader_group_base_alignment: 64,
            shader_group_handle_alignment: 32,
            max_ray_recursion_depth: 1,
            max_shader_group_stride: 4096,
            ..Default::default()
        };
        let converted = RayTracingProperties::from(&vk_properties);
        assert_eq!(converted, RayTracingProperties {
            max_ray_recursion_depth: 1,
            ..properties(32, 64)
        });
    }
}
