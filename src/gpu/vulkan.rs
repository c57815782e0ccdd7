//! # Vulkan Device
//!
//! [`GpuDevice`] on top of `ash`, created against the OpenXR system's
//! Vulkan requirements.
//!
//! ## Plain English
//!
//! The headset runtime decides which GPU we must use and which Vulkan
//! extensions must be on. [`VulkanBootstrap`] creates the Vulkan instance
//! and device the way the runtime asks. [`VulkanDevice`] then adds what the
//! pipeline needs: a staging buffer the CPU can write into directly, two
//! eye textures, one command buffer and a fence to wait on.

use std::ffi::CString;
use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use openxr as xr;

use crate::error::{GpuErrorKind, OpenXRErrorKind, PassthroughError, PassthroughResult, SetupErrorKind};
use crate::{Eye, EYE_COUNT};

use super::{Extent2D, GpuCommand, GpuDevice, ImageAccess, ImageSlot, PixelOrder, Rect};

// ============================================
// FORMATS
// ============================================

/// Swapchain formats we can blit into, most preferred first.
///
/// sRGB first: camera bytes are already sRGB-encoded, so an sRGB texture
/// feeding an sRGB swapchain round-trips them unchanged.
const PREFERRED_FORMATS: [(vk::Format, PixelOrder); 4] = [
    (vk::Format::B8G8R8A8_SRGB, PixelOrder::Bgra),
    (vk::Format::R8G8B8A8_SRGB, PixelOrder::Rgba),
    (vk::Format::B8G8R8A8_UNORM, PixelOrder::Bgra),
    (vk::Format::R8G8B8A8_UNORM, PixelOrder::Rgba),
];

/// Picks the first supported format from [`PREFERRED_FORMATS`].
pub fn choose_swapchain_format(offered: &[u32]) -> Option<(u32, PixelOrder)> {
    PREFERRED_FORMATS
        .iter()
        .map(|&(format, order)| (format.as_raw() as u32, order))
        .find(|(raw, _)| offered.contains(raw))
}

/// Layout, access mask and pipeline stage for an access state.
fn access_info(access: ImageAccess) -> (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags) {
    match access {
        ImageAccess::Undefined => (
            vk::ImageLayout::UNDEFINED,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        ),
        ImageAccess::TransferDst => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        ImageAccess::TransferSrc => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        ImageAccess::ShaderRead => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        ImageAccess::ColorAttachment => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
    }
}

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

const COLOR_LAYERS: vk::ImageSubresourceLayers = vk::ImageSubresourceLayers {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    mip_level: 0,
    base_array_layer: 0,
    layer_count: 1,
};

fn vk_err(call: &'static str) -> impl Fn(vk::Result) -> PassthroughError {
    move |e| GpuErrorKind::call(call, e).into()
}

// ============================================
// BOOTSTRAP
// ============================================

/// The Vulkan instance and device the OpenXR session is bound to.
pub struct VulkanBootstrap {
    _entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_family_index: u32,
}

impl VulkanBootstrap {
    /// Creates instance and device with the extensions the runtime asks for.
    pub fn new(xr_instance: &xr::Instance, system: xr::SystemId) -> PassthroughResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuErrorKind::call("vkGetInstanceProcAddr (loader)", e))?;

        let reqs = xr_instance
            .graphics_requirements::<xr::Vulkan>(system)
            .map_err(|e| OpenXRErrorKind::call("xrGetVulkanGraphicsRequirementsKHR", e))?;
        let api_version = vk::make_api_version(
            0,
            reqs.min_api_version_supported.major() as u32,
            reqs.min_api_version_supported.minor() as u32,
            reqs.min_api_version_supported.patch(),
        );

        let instance_exts = xr_instance
            .vulkan_legacy_instance_extensions(system)
            .map_err(|e| OpenXRErrorKind::call("xrGetVulkanInstanceExtensionsKHR", e))?;
        let instance_exts = parse_extension_list(&instance_exts)?;
        let instance_ext_ptrs: Vec<*const std::os::raw::c_char> =
            instance_exts.iter().map(|s| s.as_ptr()).collect();

        let app_name = CString::new("stereo-passthrough").map_err(|e| PassthroughError::Internal(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .engine_name(&app_name)
            .api_version(api_version);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&instance_ext_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(vk_err("vkCreateInstance"))?;

        // From here on the instance must be destroyed on failure.
        match Self::create_device(xr_instance, system, &instance) {
            Ok((physical_device, device, queue_family_index)) => Ok(Self {
                _entry: entry,
                instance,
                physical_device,
                device,
                queue_family_index,
            }),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    fn create_device(
        xr_instance: &xr::Instance,
        system: xr::SystemId,
        instance: &ash::Instance,
    ) -> PassthroughResult<(vk::PhysicalDevice, ash::Device, u32)> {
        let physical_device =
            unsafe { xr_instance.vulkan_graphics_device(system, instance.handle().as_raw() as *const _) }
                .map_err(|e| OpenXRErrorKind::call("xrGetVulkanGraphicsDeviceKHR", e))?;
        let physical_device = vk::PhysicalDevice::from_raw(physical_device as u64);

        let queue_family_index = find_graphics_queue_family(instance, physical_device)?;

        let device_exts = xr_instance
            .vulkan_legacy_device_extensions(system)
            .map_err(|e| OpenXRErrorKind::call("xrGetVulkanDeviceExtensionsKHR", e))?;
        let device_exts = parse_extension_list(&device_exts)?;
        let device_ext_ptrs: Vec<*const std::os::raw::c_char> = device_exts.iter().map(|s| s.as_ptr()).collect();

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities);

        let device_create = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_extension_names(&device_ext_ptrs);

        let device = unsafe { instance.create_device(physical_device, &device_create, None) }
            .map_err(vk_err("vkCreateDevice"))?;

        Ok((physical_device, device, queue_family_index))
    }

    /// The handles an OpenXR Vulkan session is created from.
    pub fn session_create_info(&self) -> xr::vulkan::SessionCreateInfo {
        xr::vulkan::SessionCreateInfo {
            instance: self.instance.handle().as_raw() as *const _,
            physical_device: self.physical_device.as_raw() as *const _,
            device: self.device.handle().as_raw() as *const _,
            queue_family_index: self.queue_family_index,
            queue_index: 0,
        }
    }

    fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
        what: &'static str,
    ) -> PassthroughResult<u32> {
        let mem = unsafe { self.instance.get_physical_device_memory_properties(self.physical_device) };
        (0..mem.memory_type_count)
            .find(|&i| {
                (type_bits & (1 << i)) != 0 && mem.memory_types[i as usize].property_flags.contains(properties)
            })
            .ok_or_else(|| SetupErrorKind::NoMemoryType(what).into())
    }
}

impl Drop for VulkanBootstrap {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

fn parse_extension_list(list: &str) -> PassthroughResult<Vec<CString>> {
    list.split_whitespace()
        .map(|s| CString::new(s).map_err(|e| PassthroughError::Internal(e.to_string())))
        .collect()
}

fn find_graphics_queue_family(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> PassthroughResult<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|idx| idx as u32)
        .ok_or_else(|| SetupErrorKind::NoGraphicsQueue.into())
}

// ============================================
// DEVICE
// ============================================

/// A device-local image with its memory.
struct DeviceImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
}

/// One eye's registered swapchain images.
#[derive(Default)]
struct TargetSet {
    images: Vec<vk::Image>,
    extent: Option<Extent2D>,
}

/// [`GpuDevice`] backed by Vulkan.
pub struct VulkanDevice {
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    /// A submission timed out and the fence has not been seen signalled yet
    fence_pending: bool,

    staging_buffer: vk::Buffer,
    staging_memory: vk::DeviceMemory,
    staging_ptr: *mut u8,
    staging_len: usize,

    textures: Vec<DeviceImage>,
    targets: [TargetSet; EYE_COUNT],

    eye_extent: Extent2D,
    format: vk::Format,
    order: PixelOrder,
    timeout: Duration,

    // Dropped last: owns the device everything above belongs to.
    ctx: VulkanBootstrap,
}

impl VulkanDevice {
    /// Allocates staging, eye textures and command objects.
    ///
    /// `format` is the swapchain format; the eye textures share it so the
    /// blit never converts channel order.
    pub fn new(
        ctx: VulkanBootstrap,
        eye_extent: Extent2D,
        format: u32,
        order: PixelOrder,
        timeout: Duration,
    ) -> PassthroughResult<Self> {
        let device = &ctx.device;
        let queue = unsafe { device.get_device_queue(ctx.queue_family_index, 0) };

        let command_pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(ctx.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool =
            unsafe { device.create_command_pool(&command_pool_info, None) }.map_err(vk_err("vkCreateCommandPool"))?;

        // Everything created below is released by Drop if a later step fails.
        let mut this = Self {
            queue,
            command_pool,
            command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            fence_pending: false,
            staging_buffer: vk::Buffer::null(),
            staging_memory: vk::DeviceMemory::null(),
            staging_ptr: std::ptr::null_mut(),
            staging_len: 0,
            textures: Vec::with_capacity(EYE_COUNT),
            targets: Default::default(),
            eye_extent,
            format: vk::Format::from_raw(format as i32),
            order,
            timeout,
            ctx,
        };

        let command_buffer_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(this.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        this.command_buffer = unsafe { this.ctx.device.allocate_command_buffers(&command_buffer_info) }
            .map_err(vk_err("vkAllocateCommandBuffers"))?
            .into_iter()
            .next()
            .ok_or_else(|| PassthroughError::Internal("no command buffer allocated".into()))?;

        let fence_info = vk::FenceCreateInfo::builder();
        this.fence = unsafe { this.ctx.device.create_fence(&fence_info, None) }.map_err(vk_err("vkCreateFence"))?;

        this.create_staging()?;
        for _ in Eye::ALL {
            let texture = this.create_eye_texture()?;
            this.textures.push(texture);
        }

        log::info!(
            "Vulkan device ready: eye textures {} {:?}, staging {} bytes",
            eye_extent,
            this.format,
            this.staging_len
        );
        Ok(this)
    }

    /// Host-visible, coherent, persistently mapped; exactly one eye of RGBA.
    fn create_staging(&mut self) -> PassthroughResult<()> {
        let size = self.eye_extent.rgba_len() as vk::DeviceSize;
        let device = &self.ctx.device;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        self.staging_buffer =
            unsafe { device.create_buffer(&buffer_info, None) }.map_err(vk_err("vkCreateBuffer"))?;

        let req = unsafe { device.get_buffer_memory_requirements(self.staging_buffer) };
        let memory_type_index = self.ctx.find_memory_type(
            req.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            "staging buffer",
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(req.size)
            .memory_type_index(memory_type_index);
        self.staging_memory =
            unsafe { device.allocate_memory(&alloc_info, None) }.map_err(vk_err("vkAllocateMemory"))?;

        unsafe {
            device
                .bind_buffer_memory(self.staging_buffer, self.staging_memory, 0)
                .map_err(vk_err("vkBindBufferMemory"))?;
            let ptr = device
                .map_memory(self.staging_memory, 0, size, vk::MemoryMapFlags::empty())
                .map_err(vk_err("vkMapMemory"))?;
            self.staging_ptr = ptr.cast::<u8>();
        }
        self.staging_len = size as usize;
        Ok(())
    }

    fn create_eye_texture(&self) -> PassthroughResult<DeviceImage> {
        let device = &self.ctx.device;
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.format)
            .extent(vk::Extent3D {
                width: self.eye_extent.width,
                height: self.eye_extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::SAMPLED,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&image_info, None) }.map_err(vk_err("vkCreateImage"))?;

        let allocated = (|| -> PassthroughResult<vk::DeviceMemory> {
            let req = unsafe { device.get_image_memory_requirements(image) };
            let memory_type_index = self.ctx.find_memory_type(
                req.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                "eye texture",
            )?;
            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(req.size)
                .memory_type_index(memory_type_index);
            let memory = unsafe { device.allocate_memory(&alloc_info, None) }.map_err(vk_err("vkAllocateMemory"))?;
            if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
                unsafe { device.free_memory(memory, None) };
                return Err(vk_err("vkBindImageMemory")(e));
            }
            Ok(memory)
        })();

        match allocated {
            Ok(memory) => Ok(DeviceImage { image, memory }),
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                Err(e)
            }
        }
    }

    fn resolve(&self, slot: ImageSlot) -> PassthroughResult<(vk::Image, Extent2D)> {
        match slot {
            ImageSlot::EyeTexture(eye) => self
                .textures
                .get(eye.index())
                .map(|t| (t.image, self.eye_extent))
                .ok_or_else(|| PassthroughError::Internal(format!("{} eye texture missing", eye))),
            ImageSlot::Target { eye, index } => {
                let set = &self.targets[eye.index()];
                match (set.images.get(index as usize), set.extent) {
                    (Some(&image), Some(extent)) => Ok((image, extent)),
                    _ => Err(GpuErrorKind::UnknownTarget { eye, index }.into()),
                }
            }
        }
    }

    fn check_region(slot: ImageSlot, extent: Extent2D, rect: &Rect) -> PassthroughResult<()> {
        if !extent.contains(rect) {
            return Err(GpuErrorKind::OutOfBounds(format!("{} ({:?} in {})", slot, rect, extent)).into());
        }
        Ok(())
    }

    /// Waits for the fence with the configured timeout.
    fn wait_fence(&mut self) -> PassthroughResult<()> {
        let timeout_ns = u64::try_from(self.timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.ctx.device.wait_for_fences(&[self.fence], true, timeout_ns) } {
            Ok(()) => {
                self.fence_pending = false;
                Ok(())
            }
            Err(vk::Result::TIMEOUT) => {
                self.fence_pending = true;
                Err(GpuErrorKind::Timeout(self.timeout).into())
            }
            Err(e) => Err(vk_err("vkWaitForFences")(e)),
        }
    }

    fn record(&self, command: &GpuCommand) -> PassthroughResult<()> {
        let device = &self.ctx.device;
        let cb = self.command_buffer;

        match *command {
            GpuCommand::Barrier { slot, from, to } => {
                if to == ImageAccess::Undefined {
                    return Err(GpuErrorKind::InvalidTransition {
                        slot: slot.to_string(),
                        expected: "a defined target state".into(),
                        actual: to.to_string(),
                    }
                    .into());
                }
                let (image, _) = self.resolve(slot)?;
                let (old_layout, src_access, src_stage) = access_info(from);
                let (new_layout, dst_access, dst_stage) = access_info(to);

                let barrier = vk::ImageMemoryBarrier::builder()
                    .old_layout(old_layout)
                    .new_layout(new_layout)
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(COLOR_RANGE);

                unsafe {
                    device.cmd_pipeline_barrier(
                        cb,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        std::slice::from_ref(&barrier),
                    );
                }
            }

            GpuCommand::CopyStagingToImage { slot, extent } => {
                if extent.rgba_len() > self.staging_len {
                    return Err(PassthroughError::StagingOverflow {
                        required: extent.rgba_len(),
                        capacity: self.staging_len,
                    });
                }
                let (image, image_extent) = self.resolve(slot)?;
                Self::check_region(slot, image_extent, &extent.full_rect())?;

                let region = vk::BufferImageCopy::builder()
                    .image_subresource(COLOR_LAYERS)
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    });

                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cb,
                        self.staging_buffer,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        std::slice::from_ref(&region),
                    );
                }
            }

            GpuCommand::Clear { slot, color } => {
                let (image, _) = self.resolve(slot)?;
                let value = vk::ClearColorValue { float32: color };
                unsafe {
                    device.cmd_clear_color_image(
                        cb,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &value,
                        std::slice::from_ref(&COLOR_RANGE),
                    );
                }
            }

            GpuCommand::Blit {
                src,
                src_rect,
                dst,
                dst_rect,
            } => {
                let (src_image, src_extent) = self.resolve(src)?;
                let (dst_image, dst_extent) = self.resolve(dst)?;
                Self::check_region(src, src_extent, &src_rect)?;
                Self::check_region(dst, dst_extent, &dst_rect)?;

                let blit = vk::ImageBlit::builder()
                    .src_subresource(COLOR_LAYERS)
                    .src_offsets(rect_offsets(&src_rect))
                    .dst_subresource(COLOR_LAYERS)
                    .dst_offsets(rect_offsets(&dst_rect));

                unsafe {
                    device.cmd_blit_image(
                        cb,
                        src_image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst_image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        std::slice::from_ref(&blit),
                        vk::Filter::LINEAR,
                    );
                }
            }
        }
        Ok(())
    }
}

fn rect_offsets(rect: &Rect) -> [vk::Offset3D; 2] {
    [
        vk::Offset3D {
            x: rect.x as i32,
            y: rect.y as i32,
            z: 0,
        },
        vk::Offset3D {
            x: (rect.x + rect.width) as i32,
            y: (rect.y + rect.height) as i32,
            z: 1,
        },
    ]
}

impl GpuDevice for VulkanDevice {
    fn eye_extent(&self) -> Extent2D {
        self.eye_extent
    }

    fn pixel_order(&self) -> PixelOrder {
        self.order
    }

    fn staging_mut(&mut self) -> &mut [u8] {
        // Mapped for the lifetime of the device. Callers drain a timed-out
        // batch through `wait_idle` before writing.
        unsafe { std::slice::from_raw_parts_mut(self.staging_ptr, self.staging_len) }
    }

    fn wait_idle(&mut self) -> PassthroughResult<()> {
        if self.fence_pending {
            log::debug!("Draining a timed-out GPU batch");
            self.wait_fence()?;
        }
        Ok(())
    }

    fn execute(&mut self, commands: &[GpuCommand]) -> PassthroughResult<()> {
        if commands.is_empty() {
            return Ok(());
        }
        self.wait_idle()?;

        unsafe {
            let device = &self.ctx.device;
            device.reset_fences(&[self.fence]).map_err(vk_err("vkResetFences"))?;
            device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(vk_err("vkResetCommandBuffer"))?;
            let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(vk_err("vkBeginCommandBuffer"))?;
        }

        for command in commands {
            self.record(command)?;
        }

        unsafe {
            let device = &self.ctx.device;
            device
                .end_command_buffer(self.command_buffer)
                .map_err(vk_err("vkEndCommandBuffer"))?;
            let submit_info = vk::SubmitInfo::builder().command_buffers(std::slice::from_ref(&self.command_buffer));
            device
                .queue_submit(self.queue, std::slice::from_ref(&submit_info), self.fence)
                .map_err(vk_err("vkQueueSubmit"))?;
        }

        self.wait_fence()
    }

    fn register_targets(&mut self, eye: Eye, handles: &[u64], extent: Extent2D) -> PassthroughResult<()> {
        self.targets[eye.index()] = TargetSet {
            images: handles.iter().map(|&raw| vk::Image::from_raw(raw)).collect(),
            extent: Some(extent),
        };
        log::debug!("Registered {} {} swapchain images of {}", handles.len(), eye, extent);
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let device = &self.ctx.device;
        unsafe {
            let _ = device.device_wait_idle();
            for texture in self.textures.drain(..) {
                device.destroy_image(texture.image, None);
                device.free_memory(texture.memory, None);
            }
            if self.staging_memory != vk::DeviceMemory::null() {
                if !self.staging_ptr.is_null() {
                    device.unmap_memory(self.staging_memory);
                }
                device.free_memory(self.staging_memory, None);
            }
            if self.staging_buffer != vk::Buffer::null() {
                device.destroy_buffer(self.staging_buffer, None);
            }
            if self.fence != vk::Fence::null() {
                device.destroy_fence(self.fence, None);
            }
            if self.command_pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.command_pool, None);
            }
        }
    }
}

// ============================================
// TESTS
// ============================================
