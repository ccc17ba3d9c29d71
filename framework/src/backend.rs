//! The seam between the device manager and a native graphics API.
//!
//! Every native object is an owned value: dropping it releases the underlying reference.
//! The manager never calls an explicit release, it only decides when values go out of scope.

use std::fmt;

use thiserror::Error;

/// Failure reported by the native API, with its result code.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{operation} failed with {code:#010x}: {message}")]
pub struct BackendError {
    pub operation: &'static str,
    pub code: i32,
    pub message: String,
}

impl BackendError {
    pub fn new(operation: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self {
            operation,
            code,
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureLevel {
    pub major: u8,
    pub minor: u8,
}

impl FeatureLevel {
    pub const V10_0: FeatureLevel = FeatureLevel::new(10, 0);
    pub const V10_1: FeatureLevel = FeatureLevel::new(10, 1);
    pub const V11_0: FeatureLevel = FeatureLevel::new(11, 0);

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.major, self.minor)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8Unorm,
    D24UnormS8Uint,
}

impl PixelFormat {
    pub const BACK_BUFFER: PixelFormat = PixelFormat::Rgba8Unorm;
    pub const DEPTH_STENCIL: PixelFormat = PixelFormat::D24UnormS8Uint;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleDesc {
    pub count: u32,
    pub quality: u32,
}

impl SampleDesc {
    pub const SINGLE: SampleDesc = SampleDesc {
        count: 1,
        quality: 0,
    };

    /// `max_quality` is the level count reported by the device; the usable levels are
    /// `0..max_quality`, so the highest one is picked.
    pub fn multisampled(count: u32, max_quality: u32) -> Self {
        Self {
            count,
            quality: max_quality.saturating_sub(1),
        }
    }
}

/// Platform window handle. Zero is the null handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RawWindow(pub isize);

impl RawWindow {
    pub const NULL: RawWindow = RawWindow(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    /// Numerator and denominator.
    pub refresh_rate: (u32, u32),
    pub format: PixelFormat,
    pub sample: SampleDesc,
    pub buffer_count: u32,
    pub window: RawWindow,
    pub windowed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthStencilDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub sample: SampleDesc,
}

impl DepthStencilDesc {
    pub fn new(width: u32, height: u32, sample: SampleDesc) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::DEPTH_STENCIL,
            sample,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub top_left_x: f32,
    pub top_left_y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Covers `width` x `height` starting at the offset, with the full [0, 1] depth range.
    pub fn full(offset_x: f32, offset_y: f32, width: u32, height: u32) -> Self {
        Self {
            top_left_x: offset_x,
            top_left_y: offset_y,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

pub struct CreatedDevice<B: GraphicsBackend + ?Sized> {
    pub device: B::Device,
    pub context: B::Context,
    pub feature_level: FeatureLevel,
}

/// Native graphics API used by [`crate::device::GraphicsDeviceManager`].
pub trait GraphicsBackend {
    type Device;
    type Context;
    type Adapter;
    type Factory;
    type SwapChain;
    type Texture;
    type RenderTargetView;
    type DepthStencilView;

    fn create_device(
        &self,
        minimum: FeatureLevel,
    ) -> Result<CreatedDevice<Self>, BackendError>;

    /// Number of quality levels for `sample_count` samples in `format`; zero means unsupported.
    fn multisample_quality(
        &self,
        device: &Self::Device,
        format: PixelFormat,
        sample_count: u32,
    ) -> Result<u32, BackendError>;

    fn adapter(&self, device: &Self::Device) -> Result<Self::Adapter, BackendError>;

    fn factory(&self, adapter: &Self::Adapter) -> Result<Self::Factory, BackendError>;

    fn create_swap_chain(
        &self,
        factory: &Self::Factory,
        device: &Self::Device,
        desc: &SwapChainDesc,
    ) -> Result<Self::SwapChain, BackendError>;

    fn back_buffer(&self, swap_chain: &Self::SwapChain) -> Result<Self::Texture, BackendError>;

    fn create_render_target_view(
        &self,
        device: &Self::Device,
        texture: &Self::Texture,
    ) -> Result<Self::RenderTargetView, BackendError>;

    fn create_depth_stencil_buffer(
        &self,
        device: &Self::Device,
        desc: &DepthStencilDesc,
    ) -> Result<Self::Texture, BackendError>;

    fn create_depth_stencil_view(
        &self,
        device: &Self::Device,
        buffer: &Self::Texture,
    ) -> Result<Self::DepthStencilView, BackendError>;

    fn bind_output_views(
        &self,
        context: &Self::Context,
        render_target: &Self::RenderTargetView,
        depth_stencil: &Self::DepthStencilView,
    );

    fn set_viewport(&self, context: &Self::Context, viewport: &Viewport);

    fn resize_buffers(
        &self,
        swap_chain: &Self::SwapChain,
        buffer_count: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(), BackendError>;

    /// A swap chain must be windowed when its last reference goes away.
    fn leave_fullscreen(&self, swap_chain: &Self::SwapChain) -> Result<(), BackendError>;

    /// Unbinds everything from the pipeline before the context goes away.
    fn clear_state(&self, context: &Self::Context) -> Result<(), BackendError>;

    fn present(&self, swap_chain: &Self::SwapChain, sync_interval: u32) -> Result<(), BackendError>;
}
