//! Lifecycle of the graphics device, swap chain and framebuffer views.
//!
//! Setup is a fixed sequence of steps. Each step only runs from its predecessor state,
//! holds the manager's lock for its whole duration and records the furthest state actually
//! reached. Teardown uses that high-water mark to release exactly what was built, so it is
//! safe after a failure at any step.

use std::sync::atomic::{AtomicI8, AtomicU64, Ordering};
use std::time::Duration;

use crate::backend::{
    BackendError, DepthStencilDesc, FeatureLevel, GraphicsBackend, PixelFormat, RawWindow,
    SampleDesc, SwapChainDesc, Viewport,
};
use crate::error::DeviceError;
use crate::lock::{NamedMutex, ScopedMutexGuard, DEFAULT_LOCK_TIMEOUT};

pub const MINIMUM_FEATURE_LEVEL: FeatureLevel = FeatureLevel::V11_0;

pub const DEFAULT_SAMPLE_COUNT: u32 = 4;

/// Resize requests give up quickly instead of queueing behind a running setup or resize.
pub const DEFAULT_RESIZE_TIMEOUT: Duration = Duration::from_millis(50);

const LOCK_NAME: &str = "graphics-device-manager";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i8)]
pub enum DeviceState {
    InitError = -1,
    Free = 0,
    DeviceInitialized,
    SwapChainDescribed,
    SwapChainCreated,
    RenderTargetViewCreated,
    DepthStencilBufferCreated,
    ViewsBound,
    ViewportCreated,
}

impl DeviceState {
    /// The setup states in order, `InitError` excluded.
    pub const LIFECYCLE: [DeviceState; 8] = [
        DeviceState::Free,
        DeviceState::DeviceInitialized,
        DeviceState::SwapChainDescribed,
        DeviceState::SwapChainCreated,
        DeviceState::RenderTargetViewCreated,
        DeviceState::DepthStencilBufferCreated,
        DeviceState::ViewsBound,
        DeviceState::ViewportCreated,
    ];

    pub fn is_ready(self) -> bool {
        self == DeviceState::ViewportCreated
    }

    fn from_raw(raw: i8) -> DeviceState {
        DeviceState::LIFECYCLE
            .into_iter()
            .find(|state| *state as i8 == raw)
            .unwrap_or(DeviceState::InitError)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MultisampleSupport {
    pub sample_count: u32,
    pub quality_levels: u32,
}

struct Resources<B: GraphicsBackend> {
    state: DeviceState,
    last_valid: DeviceState,

    width: u32,
    height: u32,
    windowed: bool,
    msaa_enabled: bool,
    multisample: Option<MultisampleSupport>,
    sample: SampleDesc,
    viewport_offset: (f32, f32),

    device: Option<B::Device>,
    context: Option<B::Context>,
    swap_chain_desc: Option<SwapChainDesc>,
    swap_chain: Option<B::SwapChain>,
    render_target_view: Option<B::RenderTargetView>,
    depth_stencil_desc: Option<DepthStencilDesc>,
    depth_stencil_buffer: Option<B::Texture>,
    depth_stencil_view: Option<B::DepthStencilView>,
    viewport: Option<Viewport>,
}

impl<B: GraphicsBackend> Resources<B> {
    fn empty() -> Self {
        Self {
            state: DeviceState::Free,
            last_valid: DeviceState::Free,
            width: 0,
            height: 0,
            windowed: true,
            msaa_enabled: false,
            multisample: None,
            sample: SampleDesc::SINGLE,
            viewport_offset: (0.0, 0.0),
            device: None,
            context: None,
            swap_chain_desc: None,
            swap_chain: None,
            render_target_view: None,
            depth_stencil_desc: None,
            depth_stencil_buffer: None,
            depth_stencil_view: None,
            viewport: None,
        }
    }

    fn reached(&mut self, state: DeviceState) {
        self.state = state;
        self.last_valid = state;
    }

    fn holds_nothing(&self) -> bool {
        self.device.is_none()
            && self.context.is_none()
            && self.swap_chain.is_none()
            && self.render_target_view.is_none()
            && self.depth_stencil_buffer.is_none()
            && self.depth_stencil_view.is_none()
    }

    /// Releases everything up to the high-water mark, views first and the device last.
    fn release(&mut self, backend: &B) {
        let reached = self.last_valid;
        if reached > DeviceState::Free {
            log::debug!("releasing graphics resources built up to {reached:?}");
        }

        if reached >= DeviceState::RenderTargetViewCreated {
            drop(self.render_target_view.take());
        }
        if reached >= DeviceState::DepthStencilBufferCreated {
            drop(self.depth_stencil_view.take());
        }
        if reached >= DeviceState::SwapChainCreated {
            if let (false, Some(swap_chain)) = (self.windowed, self.swap_chain.as_ref()) {
                if let Err(err) = backend.leave_fullscreen(swap_chain) {
                    log::warn!("failed to leave fullscreen, continuing teardown: {err}");
                }
            }
            drop(self.swap_chain.take());
        }
        if reached >= DeviceState::DepthStencilBufferCreated {
            drop(self.depth_stencil_buffer.take());
        }
        if reached >= DeviceState::DeviceInitialized {
            if let Some(context) = self.context.as_ref() {
                if let Err(err) = backend.clear_state(context) {
                    log::warn!("failed to clear pipeline state, continuing teardown: {err}");
                }
            }
            drop(self.context.take());
            drop(self.device.take());
        }

        debug_assert!(
            self.holds_nothing(),
            "resource outlived its high-water mark {reached:?}"
        );
        *self = Self::empty();
    }
}

/// Lock-free copy of the fields callers poll every frame.
struct Observed {
    state: AtomicI8,
    last_valid: AtomicI8,
    size: AtomicU64,
}

impl Observed {
    fn new() -> Self {
        Self {
            state: AtomicI8::new(DeviceState::Free as i8),
            last_valid: AtomicI8::new(DeviceState::Free as i8),
            size: AtomicU64::new(0),
        }
    }

    fn publish<B: GraphicsBackend>(&self, resources: &Resources<B>) {
        self.state.store(resources.state as i8, Ordering::Release);
        self.last_valid
            .store(resources.last_valid as i8, Ordering::Release);
        let size = (u64::from(resources.width) << 32) | u64::from(resources.height);
        self.size.store(size, Ordering::Release);
    }
}

pub struct GraphicsDeviceManager<B: GraphicsBackend> {
    backend: B,
    resources: NamedMutex<Resources<B>>,
    resize_timeout: Duration,
    observed: Observed,
}

impl<B: GraphicsBackend> GraphicsDeviceManager<B> {
    pub fn new(backend: B) -> Self {
        Self::with_timeouts(backend, DEFAULT_LOCK_TIMEOUT, DEFAULT_RESIZE_TIMEOUT)
    }

    pub fn with_timeouts(backend: B, lock_timeout: Duration, resize_timeout: Duration) -> Self {
        Self {
            backend,
            resources: NamedMutex::with_timeout(LOCK_NAME, lock_timeout, Resources::empty()),
            resize_timeout,
            observed: Observed::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::from_raw(self.observed.state.load(Ordering::Acquire))
    }

    pub fn last_valid_state(&self) -> DeviceState {
        DeviceState::from_raw(self.observed.last_valid.load(Ordering::Acquire))
    }

    /// Width and height captured by the last setup or resize.
    pub fn client_size(&self) -> (u32, u32) {
        let size = self.observed.size.load(Ordering::Acquire);
        ((size >> 32) as u32, size as u32)
    }

    /// Takes the manager's lock for direct access to the live handles.
    pub fn lock(&self) -> Result<DeviceGuard<'_, B>, DeviceError> {
        Ok(DeviceGuard {
            backend: &self.backend,
            resources: self.resources.lock()?,
        })
    }

    pub fn lock_within(&self, timeout: Duration) -> Result<DeviceGuard<'_, B>, DeviceError> {
        Ok(DeviceGuard {
            backend: &self.backend,
            resources: self.resources.lock_within(timeout)?,
        })
    }

    fn step<T>(
        &self,
        operation: &'static str,
        expected: DeviceState,
        f: impl FnOnce(&B, &mut Resources<B>) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut resources = self.resources.lock()?;

        let result = if resources.state == expected {
            f(&self.backend, &mut *resources)
        } else {
            Err(DeviceError::InvalidStateTransition {
                operation,
                expected,
                found: resources.state,
            })
        };

        match &result {
            Ok(_) => log::debug!("{operation}: now {:?}", resources.state),
            Err(err) => {
                log::error!("{operation}: {err}");
                resources.state = DeviceState::InitError;
            }
        }

        self.observed.publish(&*resources);
        result
    }

    pub fn create_device_and_context(&self) -> Result<(), DeviceError> {
        self.step("create_device_and_context", DeviceState::Free, |backend, res| {
            let created = backend
                .create_device(MINIMUM_FEATURE_LEVEL)
                .map_err(DeviceError::DeviceCreationFailed)?;

            if created.feature_level < MINIMUM_FEATURE_LEVEL {
                return Err(DeviceError::UnsupportedCapabilityLevel {
                    required: MINIMUM_FEATURE_LEVEL,
                    found: created.feature_level,
                });
            }

            log::info!(
                "created graphics device at feature level {}",
                created.feature_level
            );
            res.device = Some(created.device);
            res.context = Some(created.context);
            res.reached(DeviceState::DeviceInitialized);
            Ok(())
        })
    }

    /// Returns the number of quality levels, which is also cached for the swap chain.
    pub fn check_multisample_support(&self, sample_count: u32) -> Result<u32, DeviceError> {
        self.step(
            "check_multisample_support",
            DeviceState::DeviceInitialized,
            |backend, res| {
                let device = res.device.as_ref().ok_or(DeviceError::MissingResource {
                    resource: "device",
                })?;

                let quality_levels = backend
                    .multisample_quality(device, PixelFormat::BACK_BUFFER, sample_count)
                    .map_err(|source| DeviceError::ResourceCreationFailed {
                        resource: "multisample quality query",
                        source,
                    })?;

                if quality_levels == 0 {
                    return Err(DeviceError::MultisampleUnsupported { sample_count });
                }

                res.multisample = Some(MultisampleSupport {
                    sample_count,
                    quality_levels,
                });
                Ok(quality_levels)
            },
        )
    }

    pub fn describe_swap_chain(
        &self,
        enable_msaa: bool,
        fullscreen: bool,
        width: u32,
        height: u32,
        window: RawWindow,
    ) -> Result<(), DeviceError> {
        self.step(
            "describe_swap_chain",
            DeviceState::DeviceInitialized,
            |_, res| {
                if window.is_null() {
                    return Err(DeviceError::InvalidWindowHandle);
                }
                if width == 0 || height == 0 {
                    return Err(DeviceError::InvalidDimensions { width, height });
                }

                let sample = if enable_msaa {
                    let support = res
                        .multisample
                        .ok_or(DeviceError::MultisampleNotQueried)?;
                    SampleDesc::multisampled(support.sample_count, support.quality_levels)
                } else {
                    SampleDesc::SINGLE
                };

                res.width = width;
                res.height = height;
                res.windowed = !fullscreen;
                res.msaa_enabled = enable_msaa;
                res.sample = sample;
                res.swap_chain_desc = Some(SwapChainDesc {
                    width,
                    height,
                    refresh_rate: (60, 1),
                    format: PixelFormat::BACK_BUFFER,
                    sample,
                    buffer_count: 1,
                    window,
                    windowed: !fullscreen,
                });
                res.reached(DeviceState::SwapChainDescribed);
                Ok(())
            },
        )
    }

    /// The factory that created the device is found through device -> adapter -> factory.
    /// Both intermediates are locals and go away on every path out of this step.
    pub fn create_swap_chain(&self) -> Result<(), DeviceError> {
        self.step(
            "create_swap_chain",
            DeviceState::SwapChainDescribed,
            |backend, res| {
                let device = res.device.as_ref().ok_or(DeviceError::MissingResource {
                    resource: "device",
                })?;
                let desc = res.swap_chain_desc.ok_or(DeviceError::MissingResource {
                    resource: "swap chain description",
                })?;

                let adapter = backend.adapter(device).map_err(creation_failed("adapter"))?;
                let factory = backend
                    .factory(&adapter)
                    .map_err(creation_failed("presentation factory"))?;
                let swap_chain = backend
                    .create_swap_chain(&factory, device, &desc)
                    .map_err(creation_failed("swap chain"))?;
                drop(factory);
                drop(adapter);

                res.swap_chain = Some(swap_chain);
                res.reached(DeviceState::SwapChainCreated);
                Ok(())
            },
        )
    }

    pub fn create_render_target_view(&self) -> Result<(), DeviceError> {
        self.step(
            "create_render_target_view",
            DeviceState::SwapChainCreated,
            |backend, res| {
                let device = res.device.as_ref().ok_or(DeviceError::MissingResource {
                    resource: "device",
                })?;
                let swap_chain = res.swap_chain.as_ref().ok_or(DeviceError::MissingResource {
                    resource: "swap chain",
                })?;

                let back_buffer = backend
                    .back_buffer(swap_chain)
                    .map_err(creation_failed("back buffer"))?;
                // The view keeps its own reference to the back buffer.
                let view = backend
                    .create_render_target_view(device, &back_buffer)
                    .map_err(creation_failed("render target view"))?;
                drop(back_buffer);

                res.render_target_view = Some(view);
                res.reached(DeviceState::RenderTargetViewCreated);
                Ok(())
            },
        )
    }

    pub fn create_depth_stencil_buffer_and_view(&self) -> Result<(), DeviceError> {
        self.step(
            "create_depth_stencil_buffer_and_view",
            DeviceState::RenderTargetViewCreated,
            |backend, res| {
                let device = res.device.as_ref().ok_or(DeviceError::MissingResource {
                    resource: "device",
                })?;

                let desc = DepthStencilDesc::new(res.width, res.height, res.sample);
                let buffer = backend
                    .create_depth_stencil_buffer(device, &desc)
                    .map_err(creation_failed("depth/stencil buffer"))?;
                let view = backend
                    .create_depth_stencil_view(device, &buffer)
                    .map_err(creation_failed("depth/stencil view"))?;

                res.depth_stencil_desc = Some(desc);
                res.depth_stencil_buffer = Some(buffer);
                res.depth_stencil_view = Some(view);
                res.reached(DeviceState::DepthStencilBufferCreated);
                Ok(())
            },
        )
    }

    pub fn bind_output_views(&self) -> Result<(), DeviceError> {
        self.step(
            "bind_output_views",
            DeviceState::DepthStencilBufferCreated,
            |backend, res| {
                let (Some(context), Some(render_target), Some(depth_stencil)) = (
                    res.context.as_ref(),
                    res.render_target_view.as_ref(),
                    res.depth_stencil_view.as_ref(),
                ) else {
                    return Err(DeviceError::MissingResource {
                        resource: "context or output views",
                    });
                };

                backend.bind_output_views(context, render_target, depth_stencil);
                res.reached(DeviceState::ViewsBound);
                Ok(())
            },
        )
    }

    pub fn set_default_viewport(&self, offset_x: f32, offset_y: f32) -> Result<(), DeviceError> {
        self.step(
            "set_default_viewport",
            DeviceState::ViewsBound,
            |backend, res| {
                let context = res.context.as_ref().ok_or(DeviceError::MissingResource {
                    resource: "device context",
                })?;

                let viewport = Viewport::full(offset_x, offset_y, res.width, res.height);
                backend.set_viewport(context, &viewport);

                res.viewport_offset = (offset_x, offset_y);
                res.viewport = Some(viewport);
                res.reached(DeviceState::ViewportCreated);
                Ok(())
            },
        )
    }

    /// Rebuilds the framebuffer at a new size. Only valid once setup has completed; a
    /// request that cannot take the lock within the resize timeout is rejected, not queued.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), DeviceError> {
        let mut guard = self.resources.lock_within(self.resize_timeout)?;
        let res = &mut *guard;

        if res.state != DeviceState::ViewportCreated {
            return Err(DeviceError::InvalidStateTransition {
                operation: "resize",
                expected: DeviceState::ViewportCreated,
                found: res.state,
            });
        }
        if width == 0 || height == 0 {
            return Err(DeviceError::InvalidDimensions { width, height });
        }

        res.width = width;
        res.height = height;

        let result = rebuild_framebuffer(&self.backend, res);
        match &result {
            Ok(()) => log::info!("resized framebuffer to {width}x{height}"),
            Err(err) => {
                log::error!("resize: {err}");
                res.state = DeviceState::InitError;
            }
        }

        self.observed.publish(&*res);
        result
    }

    /// Releases everything that was built and returns the manager to `Free`.
    pub fn teardown(&self) -> Result<(), DeviceError> {
        let mut resources = self.resources.lock()?;
        resources.release(&self.backend);
        self.observed.publish(&*resources);
        Ok(())
    }
}

impl<B: GraphicsBackend> Drop for GraphicsDeviceManager<B> {
    fn drop(&mut self) {
        self.resources.get_mut().release(&self.backend);
    }
}

fn creation_failed(resource: &'static str) -> impl FnOnce(BackendError) -> DeviceError {
    move |source| DeviceError::ResourceCreationFailed { resource, source }
}

fn resize_failed(stage: &'static str) -> impl FnOnce(BackendError) -> DeviceError {
    move |source| DeviceError::ResizeFailed { stage, source }
}

fn rebuild_framebuffer<B: GraphicsBackend>(
    backend: &B,
    res: &mut Resources<B>,
) -> Result<(), DeviceError> {
    // Views go before the buffer they reference.
    drop(res.render_target_view.take());
    drop(res.depth_stencil_view.take());
    drop(res.depth_stencil_buffer.take());
    res.depth_stencil_desc = None;
    res.viewport = None;

    let (Some(device), Some(context), Some(swap_chain)) = (
        res.device.as_ref(),
        res.context.as_ref(),
        res.swap_chain.as_ref(),
    ) else {
        return Err(DeviceError::MissingResource {
            resource: "device, context or swap chain",
        });
    };

    let buffer_count = res.swap_chain_desc.map_or(1, |desc| desc.buffer_count);
    backend
        .resize_buffers(
            swap_chain,
            buffer_count,
            res.width,
            res.height,
            PixelFormat::BACK_BUFFER,
        )
        .map_err(resize_failed("resizing the swap chain buffers"))?;

    let back_buffer = backend
        .back_buffer(swap_chain)
        .map_err(resize_failed("acquiring the back buffer"))?;
    let render_target_view = backend
        .create_render_target_view(device, &back_buffer)
        .map_err(resize_failed("creating the render target view"))?;
    drop(back_buffer);

    let desc = DepthStencilDesc::new(res.width, res.height, res.sample);
    let depth_stencil_buffer = backend
        .create_depth_stencil_buffer(device, &desc)
        .map_err(resize_failed("creating the depth/stencil buffer"))?;
    let depth_stencil_view = backend
        .create_depth_stencil_view(device, &depth_stencil_buffer)
        .map_err(resize_failed("creating the depth/stencil view"))?;

    backend.bind_output_views(context, &render_target_view, &depth_stencil_view);

    let (offset_x, offset_y) = res.viewport_offset;
    let viewport = Viewport::full(offset_x, offset_y, res.width, res.height);
    backend.set_viewport(context, &viewport);

    if let Some(desc) = res.swap_chain_desc.as_mut() {
        desc.width = res.width;
        desc.height = res.height;
    }
    res.render_target_view = Some(render_target_view);
    res.depth_stencil_desc = Some(desc);
    res.depth_stencil_buffer = Some(depth_stencil_buffer);
    res.depth_stencil_view = Some(depth_stencil_view);
    res.viewport = Some(viewport);
    Ok(())
}

/// Holds the manager's lock; the live handles are only reachable through it.
pub struct DeviceGuard<'a, B: GraphicsBackend> {
    backend: &'a B,
    resources: ScopedMutexGuard<'a, Resources<B>>,
}

impl<'a, B: GraphicsBackend> DeviceGuard<'a, B> {
    pub fn state(&self) -> DeviceState {
        self.resources.state
    }

    pub fn last_valid_state(&self) -> DeviceState {
        self.resources.last_valid
    }

    pub fn is_ready(&self) -> bool {
        self.resources.state.is_ready()
    }

    pub fn client_size(&self) -> (u32, u32) {
        (self.resources.width, self.resources.height)
    }

    pub fn msaa_enabled(&self) -> bool {
        self.resources.msaa_enabled
    }

    pub fn multisample(&self) -> Option<MultisampleSupport> {
        self.resources.multisample
    }

    pub fn device(&self) -> Option<&B::Device> {
        self.resources.device.as_ref()
    }

    pub fn context(&self) -> Option<&B::Context> {
        self.resources.context.as_ref()
    }

    pub fn swap_chain(&self) -> Option<&B::SwapChain> {
        self.resources.swap_chain.as_ref()
    }

    pub fn swap_chain_desc(&self) -> Option<&SwapChainDesc> {
        self.resources.swap_chain_desc.as_ref()
    }

    pub fn render_target_view(&self) -> Option<&B::RenderTargetView> {
        self.resources.render_target_view.as_ref()
    }

    pub fn depth_stencil_buffer(&self) -> Option<&B::Texture> {
        self.resources.depth_stencil_buffer.as_ref()
    }

    pub fn depth_stencil_desc(&self) -> Option<&DepthStencilDesc> {
        self.resources.depth_stencil_desc.as_ref()
    }

    pub fn depth_stencil_view(&self) -> Option<&B::DepthStencilView> {
        self.resources.depth_stencil_view.as_ref()
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.resources.viewport
    }

    pub fn present(&self, sync_interval: u32) -> Result<(), DeviceError> {
        if !self.is_ready() {
            return Err(DeviceError::InvalidStateTransition {
                operation: "present",
                expected: DeviceState::ViewportCreated,
                found: self.resources.state,
            });
        }

        let swap_chain = self.swap_chain().ok_or(DeviceError::MissingResource {
            resource: "swap chain",
        })?;
        self.backend
            .present(swap_chain, sync_interval)
            .map_err(DeviceError::PresentFailed)
    }
}
