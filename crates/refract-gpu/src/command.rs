//! Single-time command submission and staged uploads.

use crate::error::Result;
use crate::memory::{GpuAllocator, GpuBuffer};
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Command pool for one-off transfer work on the owner thread.
pub struct CommandPool {
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool })
    }

    /// Get the raw pool handle.
    #[must_use]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Record, submit and wait for a single-time command buffer.
///
/// Blocks until `queue` is idle.
///
/// # Safety
/// All handles must be valid and `pool` must belong to `queue`'s family.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool.handle())
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let cmd = device.allocate_command_buffers(&alloc_info)?[0];

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(cmd, &begin_info)?;
    f(cmd);
    device.end_command_buffer(cmd)?;

    let cmd_buffers = [cmd];
    let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
    let submitted = device
        .queue_submit(queue, &[submit_info], vk::Fence::null())
        .and_then(|()| device.queue_wait_idle(queue));

    device.free_command_buffers(pool.handle(), &cmd_buffers);

    submitted?;
    Ok(())
}

/// Upload `data` into a new device-local buffer through a staging copy.
///
/// The staging buffer is freed before returning; the copy has completed on
/// the GPU once this returns.
///
/// # Safety
/// All handles must be valid and `pool` must belong to `queue`'s family.
pub unsafe fn upload_staged(
    device: &ash::Device,
    allocator: &mut GpuAllocator,
    pool: &CommandPool,
    queue: vk::Queue,
    data: &[u8],
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<GpuBuffer> {
    let size = data.len() as u64;
    let mut staging = allocator.create_buffer_with_data(
        data,
        vk::BufferUsageFlags::TRANSFER_SRC,
        &format!("{name}_staging"),
    )?;

    let mut buffer = match allocator.create_buffer(
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
        name,
    ) {
        Ok(buffer) => buffer,
        Err(e) => {
            allocator.free_buffer(&mut staging)?;
            return Err(e);
        }
    };

    let copied = execute_single_time_commands(device, pool, queue, |cmd| {
        let region = vk::BufferCopy::default().size(size);
        device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
    });

    allocator.free_buffer(&mut staging)?;
    if let Err(e) = copied {
        allocator.free_buffer(&mut buffer)?;
        return Err(e);
    }

    tracing::debug!("Uploaded {size} bytes to {name}");
    Ok(buffer)
}
