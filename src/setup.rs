//! # Setup Pipeline
//!
//! Brings up everything the loop needs, in order, stopping at the first
//! failure.
//!
//! ## Plain English
//!
//! Each step needs what the step before it made: no Vulkan device without
//! an OpenXR system, no session without a Vulkan device, no swapchains
//! without a session. So each step is its own type holding exactly what has
//! been built so far, and the only way forward is the method that builds
//! the next one:
//!
//! ```text
//!   XrEntryStage ──► InstanceStage ──► SystemStage ──► GraphicsStage ──► SessionStage ──► (runtime, device)
//!     loader           instance          headset        Vulkan device      session          swapchains
//! ```
//!
//! The capture source is opened first: its real resolution decides how big
//! the eye textures and the staging buffer are.

use openxr as xr;

use crate::capture::{CaptureMode, CaptureRequest, CaptureSource};
use crate::config::Config;
use crate::error::{OpenXRErrorKind, PassthroughError, PassthroughResult, SetupErrorKind};
use crate::gpu::{choose_swapchain_format, Extent2D, GpuDevice, PixelOrder, SoftwareDevice, VulkanBootstrap, VulkanDevice};
use crate::runtime::{DisplayRuntime, EyeSwapchain, HeadlessRuntime, OpenXrRuntime};
use crate::{Eye, EYE_COUNT};

/// Swapchain images per eye in headless mode.
const HEADLESS_IMAGE_COUNT: u32 = 3;

const APP_NAME: &str = "stereo-passthrough";

/// Labels a step's error so the top-level message says where it failed.
fn step(name: &'static str) -> impl FnOnce(PassthroughError) -> PassthroughError {
    move |e| {
        log::error!("Setup failed at '{}': {}", name, e);
        PassthroughError::setup(name, e)
    }
}

// ============================================
// CONFIG & CAPTURE
// ============================================

/// Rejects an invalid configuration, logging every problem found.
pub fn validate_config(config: &Config) -> PassthroughResult<()> {
    let errors = config.validate();
    for error in &errors {
        log::error!("Invalid configuration: {}", error);
    }
    match errors.into_iter().next() {
        Some(first) => Err(PassthroughError::setup("validate configuration", first.into())),
        None => Ok(()),
    }
}

/// Step 1: opens the capture source and reads back what it delivers.
pub fn open_capture<C: CaptureSource + ?Sized>(source: &mut C, config: &Config) -> PassthroughResult<CaptureMode> {
    log::info!("Step 1: Opening capture source ({})", source.describe());
    let request = CaptureRequest::from_config(config);
    let mode = source.open(&request).map_err(step("open capture source"))?;

    if mode.width == 0 || mode.width % 2 != 0 {
        source.close();
        return Err(step("open capture source")(SetupErrorKind::OddCaptureWidth(mode.width).into()));
    }
    if mode.height == 0 {
        source.close();
        return Err(step("open capture source")(SetupErrorKind::ZeroCaptureHeight.into()));
    }

    if (mode.width, mode.height, mode.fps) != (request.width, request.height, request.fps) {
        log::warn!(
            "Capture negotiated {}x{} @ {} FPS (requested {}x{} @ {})",
            mode.width,
            mode.height,
            mode.fps,
            request.width,
            request.height,
            request.fps
        );
    }
    log::info!(
        "Capture ready: {}x{} @ {} FPS, eyes {}",
        mode.width,
        mode.height,
        mode.fps,
        eye_extent(&mode)
    );
    Ok(mode)
}

/// Size of one eye for a negotiated capture mode.
pub fn eye_extent(mode: &CaptureMode) -> Extent2D {
    Extent2D::new(mode.eye_width(), mode.height)
}

/// Hands every eye's swapchain images to the device.
fn register_targets<R, D>(runtime: &R, device: &mut D) -> PassthroughResult<()>
where
    R: DisplayRuntime + ?Sized,
    D: GpuDevice + ?Sized,
{
    for eye in Eye::ALL {
        device.register_targets(eye, runtime.target_handles(eye), runtime.target_extent(eye))?;
    }
    Ok(())
}

// ============================================
// HEADLESS
// ============================================

/// Builds the scripted runtime and the software device.
pub fn build_headless(config: &Config, mode: &CaptureMode) -> PassthroughResult<(HeadlessRuntime, SoftwareDevice)> {
    let (width, height) = config.headless_target;
    let target = Extent2D::new(width, height);
    log::info!("Step 2: Starting headless runtime ({} targets per eye)", target);

    let runtime = HeadlessRuntime::started(target, HEADLESS_IMAGE_COUNT);
    let mut device = SoftwareDevice::new(eye_extent(mode), PixelOrder::Rgba);
    register_targets(&runtime, &mut device).map_err(step("register swapchain images"))?;

    log::info!("Headless setup complete");
    Ok((runtime, device))
}

// ============================================
// OPENXR STAGES
// ============================================

/// Builds the OpenXR runtime and the Vulkan device, step by step.
pub fn build_openxr(config: &Config, mode: &CaptureMode) -> PassthroughResult<(OpenXrRuntime, VulkanDevice)> {
    let built = XrEntryStage::load()
        .map_err(step("load OpenXR loader"))?
        .create_instance()
        .map_err(step("create OpenXR instance"))?
        .select_system()
        .map_err(step("select head-mounted system"))?
        .create_graphics()
        .map_err(step("create Vulkan device"))?
        .create_session()
        .map_err(step("create OpenXR session"))?
        .create_targets(config, eye_extent(mode))
        .map_err(step("create swapchains"))?;

    log::info!("OpenXR setup complete");
    Ok(built)
}

/// The OpenXR loader.
pub struct XrEntryStage {
    entry: xr::Entry,
}

impl XrEntryStage {
    /// Step 2: loads the OpenXR loader library.
    pub fn load() -> PassthroughResult<Self> {
        log::info!("Step 2: Loading OpenXR loader");
        let entry = unsafe { xr::Entry::load() }.map_err(|e| OpenXRErrorKind::LoaderUnavailable(e.to_string()))?;
        Ok(Self { entry })
    }

    /// Step 3: creates an instance with Vulkan support.
    pub fn create_instance(self) -> PassthroughResult<InstanceStage> {
        log::info!("Step 3: Creating OpenXR instance");
        let available = self
            .entry
            .enumerate_extensions()
            .map_err(|e| OpenXRErrorKind::call("xrEnumerateInstanceExtensionProperties", e))?;
        if !available.khr_vulkan_enable {
            return Err(SetupErrorKind::MissingExtension("XR_KHR_vulkan_enable").into());
        }

        let mut extensions = xr::ExtensionSet::default();
        extensions.khr_vulkan_enable = true;

        let app_info = xr::ApplicationInfo {
            application_name: APP_NAME,
            application_version: 1,
            engine_name: APP_NAME,
            engine_version: 1,
        };
        let instance = self
            .entry
            .create_instance(&app_info, &extensions, &[])
            .map_err(|e| OpenXRErrorKind::call("xrCreateInstance", e))?;

        match instance.properties() {
            Ok(props) => log::info!("OpenXR runtime: {} {}", props.runtime_name, props.runtime_version),
            Err(e) => log::warn!("Could not read OpenXR runtime properties: {:?}", e),
        }
        Ok(InstanceStage { instance })
    }
}

/// An OpenXR instance.
pub struct InstanceStage {
    instance: xr::Instance,
}

impl InstanceStage {
    /// Step 4: finds the headset and its recommended per-eye size.
    pub fn select_system(self) -> PassthroughResult<SystemStage> {
        log::info!("Step 4: Selecting head-mounted system");
        let system = self
            .instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(|e| OpenXRErrorKind::call("xrGetSystem", e))?;

        if let Ok(props) = self.instance.system_properties(system) {
            log::info!("Headset: {}", props.system_name);
        }

        let views = self
            .instance
            .enumerate_view_configuration_views(system, xr::ViewConfigurationType::PRIMARY_STEREO)
            .map_err(|e| OpenXRErrorKind::call("xrEnumerateViewConfigurationViews", e))?;
        if views.len() != EYE_COUNT {
            return Err(SetupErrorKind::UnsupportedViewCount(views.len()).into());
        }
        let view_extents = [
            Extent2D::new(views[0].recommended_image_rect_width, views[0].recommended_image_rect_height),
            Extent2D::new(views[1].recommended_image_rect_width, views[1].recommended_image_rect_height),
        ];
        log::info!("Recommended eye size: {} / {}", view_extents[0], view_extents[1]);

        Ok(SystemStage {
            instance: self.instance,
            system,
            view_extents,
        })
    }
}

/// A selected headset.
pub struct SystemStage {
    instance: xr::Instance,
    system: xr::SystemId,
    view_extents: [Extent2D; EYE_COUNT],
}

impl SystemStage {
    /// Step 5: creates the Vulkan instance and device the runtime asks for.
    pub fn create_graphics(self) -> PassthroughResult<GraphicsStage> {
        log::info!("Step 5: Creating Vulkan device for the headset");
        let vulkan = VulkanBootstrap::new(&self.instance, self.system)?;
        Ok(GraphicsStage {
            instance: self.instance,
            system: self.system,
            view_extents: self.view_extents,
            vulkan,
        })
    }
}

/// A Vulkan device bound to the headset's GPU.
pub struct GraphicsStage {
    instance: xr::Instance,
    system: xr::SystemId,
    view_extents: [Extent2D; EYE_COUNT],
    vulkan: VulkanBootstrap,
}

impl GraphicsStage {
    /// Step 6: creates the session on top of the Vulkan device.
    pub fn create_session(self) -> PassthroughResult<SessionStage> {
        log::info!("Step 6: Creating OpenXR session");
        let create_info = self.vulkan.session_create_info();
        let (session, frame_waiter, frame_stream) = unsafe {
            self.instance
                .create_session::<xr::Vulkan>(self.system, &create_info)
                .map_err(|e| OpenXRErrorKind::call("xrCreateSession", e))?
        };

        let space = session
            .create_reference_space(
                xr::ReferenceSpaceType::LOCAL,
                xr::Posef {
                    orientation: xr::Quaternionf {
                        x: 0.0,
                        y: 0.0,
                        z: 0.0,
                        w: 1.0,
                    },
                    position: xr::Vector3f { x: 0.0, y: 0.0, z: 0.0 },
                },
            )
            .map_err(|e| OpenXRErrorKind::call("xrCreateReferenceSpace", e))?;

        Ok(SessionStage {
            space,
            frame_stream,
            frame_waiter,
            session,
            instance: self.instance,
            view_extents: self.view_extents,
            vulkan: self.vulkan,
        })
    }
}

/// A session with its frame loop handles. Fields drop top to bottom, so
/// the session goes before the Vulkan device it was created on.
pub struct SessionStage {
    space: xr::Space,
    frame_stream: xr::FrameStream<xr::Vulkan>,
    frame_waiter: xr::FrameWaiter,
    session: xr::Session<xr::Vulkan>,
    instance: xr::Instance,
    view_extents: [Extent2D; EYE_COUNT],
    vulkan: VulkanBootstrap,
}

impl SessionStage {
    /// Step 7: creates one swapchain per eye and the device that writes them.
    pub fn create_targets(self, config: &Config, eye_extent: Extent2D) -> PassthroughResult<(OpenXrRuntime, VulkanDevice)> {
        log::info!("Step 7: Creating swapchains and eye textures");
        let formats = self
            .session
            .enumerate_swapchain_formats()
            .map_err(|e| OpenXRErrorKind::call("xrEnumerateSwapchainFormats", e))?;
        let (format, order) =
            choose_swapchain_format(&formats).ok_or_else(|| SetupErrorKind::NoSwapchainFormat(formats.clone()))?;
        log::info!("Swapchain format {} ({:?})", format, order);

        let mut swapchains = Vec::with_capacity(EYE_COUNT);
        for eye in Eye::ALL {
            let extent = self.view_extents[eye.index()];
            let create_info = xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT | xr::SwapchainUsageFlags::TRANSFER_DST,
                format,
                sample_count: 1,
                width: extent.width,
                height: extent.height,
                face_count: 1,
                array_size: 1,
                mip_count: 1,
            };
            let swapchain = self
                .session
                .create_swapchain(&create_info)
                .map_err(|e| OpenXRErrorKind::call("xrCreateSwapchain", e))?;
            let handles = swapchain
                .enumerate_images()
                .map_err(|e| OpenXRErrorKind::call("xrEnumerateSwapchainImages", e))?;
            log::info!("{} swapchain: {} images of {}", eye, handles.len(), extent);
            swapchains.push(EyeSwapchain {
                swapchain,
                extent,
                handles,
            });
        }

        let mut device = VulkanDevice::new(self.vulkan, eye_extent, format, order, config.gpu_timeout)?;
        let runtime = OpenXrRuntime::new(
            self.instance,
            self.session,
            self.frame_waiter,
            self.frame_stream,
            self.space,
            swapchains,
        );
        register_targets(&runtime, &mut device)?;
        Ok((runtime, device))
    }
}

// ============================================
// TESTS
// ============================================
