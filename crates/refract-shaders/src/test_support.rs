//! Deterministic compile backend and pipeline target for tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ash::vk::{self, Handle};
use parking_lot::{Mutex, MutexGuard};
use refract_gpu::GpuError;
use tracing_subscriber::EnvFilter;

use crate::commit::PipelineTarget;
use crate::compiler::{CompileRequest, IncludeFn, ShaderBackend};
use crate::error::CompileError;
use crate::program::SceneShaders;

const MAX_INCLUDE_DEPTH: usize = 16;

/// Route logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Backend that "compiles" by following `#include "..."` lines.
///
/// `#error` fails the compile, `#device_lost` fails it with a device error.
/// Each success returns a new unique module handle.
pub struct MockBackend {
    next_handle: AtomicU64,
    compiles: AtomicUsize,
    gate: Mutex<()>,
    destroyed: Mutex<Vec<vk::ShaderModule>>,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            compiles: AtomicUsize::new(0),
            gate: Mutex::new(()),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    /// Block every compile until the guard is dropped.
    #[must_use]
    pub fn hold(&self) -> MutexGuard<'_, ()> {
        self.gate.lock()
    }

    /// Number of compiles that reached the backend.
    #[must_use]
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    /// Modules destroyed so far, in order.
    #[must_use]
    pub fn destroyed(&self) -> Vec<vk::ShaderModule> {
        self.destroyed.lock().clone()
    }

    fn scan(text: &str, include: &IncludeFn<'_>, depth: usize) -> Result<(), CompileError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(CompileError::Source("include depth exceeded".to_string()));
        }
        for line in text.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix("#include") {
                let name = rest.trim().trim_matches('"');
                let included = include(name).map_err(CompileError::Source)?;
                Self::scan(&included.content, include, depth + 1)?;
            } else if line.starts_with("#error") {
                return Err(CompileError::Source(format!("error directive: {line}")));
            } else if line.starts_with("#device_lost") {
                return Err(CompileError::Device(GpuError::Vulkan(
                    vk::Result::ERROR_DEVICE_LOST,
                )));
            }
        }
        Ok(())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderBackend for MockBackend {
    fn compile(
        &self,
        request: &CompileRequest<'_>,
        include: &IncludeFn<'_>,
    ) -> Result<vk::ShaderModule, CompileError> {
        drop(self.gate.lock());
        self.compiles.fetch_add(1, Ordering::SeqCst);
        Self::scan(request.text, include, 0).map_err(|e| match e {
            CompileError::Source(message) => {
                CompileError::Source(format!("{}: {message}", request.name))
            }
            device => device,
        })?;
        let raw = self.next_handle.fetch_add(1, Ordering::SeqCst);
        Ok(vk::ShaderModule::from_raw(raw))
    }

    unsafe fn destroy(&self, module: vk::ShaderModule) {
        self.destroyed.lock().push(module);
    }
}

/// Pipeline target that records every rebuild.
#[derive(Default)]
pub struct RecordingTarget {
    pub rebuilds: usize,
    /// Modules of the last rebuild, in pipeline stage order.
    pub last_modules: Vec<vk::ShaderModule>,
    /// Fail every rebuild with a device error.
    pub fail: bool,
}

impl PipelineTarget for RecordingTarget {
    fn rebuild(&mut self, shaders: &SceneShaders) -> Result<(), GpuError> {
        if self.fail {
            return Err(GpuError::PipelineCreation("rebuild failed".to_string()));
        }
        self.last_modules = shaders
            .stage_modules()
            .ok_or_else(|| GpuError::InvalidState("incomplete program set".to_string()))?;
        self.rebuilds += 1;
        Ok(())
    }
}
