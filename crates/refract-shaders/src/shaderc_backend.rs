//! shaderc-based compile backend.

use std::sync::Arc;

use ash::vk;
use refract_core::constants::SHADER_ENTRY_POINT;
use refract_core::StageKind;
use refract_gpu::GpuError;
use shaderc::{
    CompileOptions, Compiler, EnvVersion, IncludeType, OptimizationLevel, ResolvedInclude,
    ShaderKind, SpirvVersion, TargetEnv,
};

use crate::compiler::{CompileRequest, IncludeFn, ShaderBackend};
use crate::config::{CompileSettings, Optimization};
use crate::error::CompileError;

/// Compiles GLSL to SPIR-V with shaderc and creates Vulkan shader modules.
pub struct ShadercBackend {
    device: Arc<ash::Device>,
    settings: CompileSettings,
}

impl ShadercBackend {
    #[must_use]
    pub fn new(device: Arc<ash::Device>, settings: CompileSettings) -> Self {
        Self { device, settings }
    }

    fn options<'a>(
        &self,
        include: &'a IncludeFn<'a>,
    ) -> Result<CompileOptions<'a>, CompileError> {
        let mut options = CompileOptions::new()
            .map_err(|e| CompileError::Source(format!("failed to create compile options: {e}")))?;
        options.set_target_env(TargetEnv::Vulkan, EnvVersion::Vulkan1_2 as u32);
        options.set_target_spirv(SpirvVersion::V1_5);
        options.set_optimization_level(match self.settings.optimization {
            Optimization::Zero => OptimizationLevel::Zero,
            Optimization::Size => OptimizationLevel::Size,
            Optimization::Performance => OptimizationLevel::Performance,
        });
        if self.settings.warnings_as_errors {
            options.set_warnings_as_errors();
        }
        if self.settings.debug_info {
            options.set_generate_debug_info();
        }
        options.set_include_callback(
            move |requested: &str, _: IncludeType, _: &str, _: usize| {
                include(requested).map(|source| ResolvedInclude {
                    resolved_name: source.name,
                    content: source.content,
                })
            },
        );
        Ok(options)
    }
}

const fn shader_kind(kind: StageKind) -> ShaderKind {
    match kind {
        StageKind::Raygen => ShaderKind::RayGeneration,
        StageKind::Miss => ShaderKind::Miss,
        StageKind::Intersection => ShaderKind::Intersection,
        StageKind::ClosestHit => ShaderKind::ClosestHit,
        StageKind::AnyHit => ShaderKind::AnyHit,
    }
}

impl ShaderBackend for ShadercBackend {
    fn compile(
        &self,
        request: &CompileRequest<'_>,
        include: &IncludeFn<'_>,
    ) -> Result<vk::ShaderModule, CompileError> {
        let compiler = Compiler::new()
            .map_err(|e| CompileError::Source(format!("failed to create compiler: {e}")))?;
        let options = self.options(include)?;

        let artifact = compiler
            .compile_into_spirv(
                request.text,
                shader_kind(request.kind),
                request.name,
                SHADER_ENTRY_POINT,
                Some(&options),
            )
            .map_err(|e| CompileError::Source(e.to_string()))?;
        if artifact.get_num_warnings() > 0 {
            tracing::warn!(
                "Shader warnings in {}:\n{}",
                request.name,
                artifact.get_warning_messages()
            );
        }

        let create_info = vk::ShaderModuleCreateInfo::default().code(artifact.as_binary());
        // SAFETY: the device outlives the backend and the code is valid SPIR-V.
        unsafe { self.device.create_shader_module(&create_info, None) }.map_err(|e| {
            CompileError::Device(GpuError::ShaderModule(format!("{}: {e}", request.name)))
        })
    }

    unsafe fn destroy(&self, module: vk::ShaderModule) {
        // SAFETY: the caller guarantees the module is no longer needed.
        unsafe { self.device.destroy_shader_module(module, None) };
    }
}
