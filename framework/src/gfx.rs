//! Direct3D 11 implementation of [`GraphicsBackend`] plus a few drawing helpers.

use windows::{
    core::{Interface, PCSTR},
    Win32::{
        Foundation::{E_POINTER, HMODULE, HWND},
        Graphics::{
            Direct3D::{
                Fxc::{
                    D3DCompile, D3DCOMPILE_DEBUG, D3DCOMPILE_ENABLE_STRICTNESS,
                    D3DCOMPILE_OPTIMIZATION_LEVEL3, D3DCOMPILE_SKIP_OPTIMIZATION,
                },
                ID3DBlob, D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP,
                D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1,
                D3D_FEATURE_LEVEL_11_0,
            },
            Direct3D11::{
                D3D11CreateDevice, ID3D11DepthStencilView, ID3D11Device, ID3D11DeviceContext,
                ID3D11RenderTargetView, ID3D11Texture2D, D3D11_BIND_DEPTH_STENCIL,
                D3D11_CLEAR_DEPTH, D3D11_CLEAR_STENCIL, D3D11_CREATE_DEVICE_DEBUG,
                D3D11_CREATE_DEVICE_FLAG, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC,
                D3D11_USAGE_DEFAULT, D3D11_VIEWPORT,
            },
            Dxgi::{
                Common::{
                    DXGI_FORMAT, DXGI_FORMAT_D24_UNORM_S8_UINT, DXGI_FORMAT_R8G8B8A8_UNORM,
                    DXGI_MODE_DESC, DXGI_MODE_SCALING_UNSPECIFIED,
                    DXGI_MODE_SCANLINE_ORDER_UNSPECIFIED, DXGI_RATIONAL, DXGI_SAMPLE_DESC,
                },
                DXGIGetDebugInterface1, IDXGIAdapter, IDXGIDebug1, IDXGIDevice, IDXGIFactory,
                IDXGISwapChain, DXGI_DEBUG_ALL, DXGI_DEBUG_RLO_DETAIL,
                DXGI_DEBUG_RLO_IGNORE_INTERNAL, DXGI_PRESENT, DXGI_SWAP_CHAIN_DESC,
                DXGI_SWAP_CHAIN_FLAG, DXGI_SWAP_EFFECT_DISCARD, DXGI_USAGE_RENDER_TARGET_OUTPUT,
            },
        },
    },
};

use crate::backend::{
    BackendError, CreatedDevice, DepthStencilDesc, FeatureLevel, GraphicsBackend, PixelFormat,
    SampleDesc, SwapChainDesc, Viewport,
};
use crate::config::{AppConfig, DriverKind};
use crate::util::AsCString;

/// Tags a failed native call with the operation that made it.
pub fn native_error(operation: &'static str) -> impl FnOnce(windows::core::Error) -> BackendError {
    move |err| BackendError::new(operation, err.code().0, err.message().to_string())
}

/// Unwraps an out-parameter the call promised to fill.
fn returned<T>(operation: &'static str, object: Option<T>) -> Result<T, BackendError> {
    object.ok_or_else(|| {
        BackendError::new(operation, E_POINTER.0, "call succeeded without returning an object")
    })
}

fn dxgi_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        PixelFormat::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
    }
}

fn sample_desc(sample: SampleDesc) -> DXGI_SAMPLE_DESC {
    DXGI_SAMPLE_DESC {
        Count: sample.count,
        Quality: sample.quality,
    }
}

/// `D3D_FEATURE_LEVEL_11_0` is `0xb000`: major in bits 12..16, minor in bits 8..12.
fn feature_level(level: D3D_FEATURE_LEVEL) -> FeatureLevel {
    FeatureLevel::new(((level.0 >> 12) & 0xf) as u8, ((level.0 >> 8) & 0xf) as u8)
}

pub struct D3D11Backend {
    driver: DriverKind,
    debug_layer: bool,
}

impl D3D11Backend {
    pub fn new(driver: DriverKind, debug_layer: bool) -> Self {
        Self {
            driver,
            debug_layer,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.driver, config.debug_layer)
    }

    fn driver_type(&self) -> D3D_DRIVER_TYPE {
        match self.driver {
            DriverKind::Hardware => D3D_DRIVER_TYPE_HARDWARE,
            DriverKind::Warp => D3D_DRIVER_TYPE_WARP,
        }
    }

    fn create_device_with_flags(
        &self,
        flags: D3D11_CREATE_DEVICE_FLAG,
    ) -> Result<CreatedDevice<Self>, BackendError> {
        // Lower levels are accepted here so the caller can report what the adapter offers.
        let levels = [
            D3D_FEATURE_LEVEL_11_0,
            D3D_FEATURE_LEVEL_10_1,
            D3D_FEATURE_LEVEL_10_0,
        ];

        let mut device = None;
        let mut context = None;
        let mut level = D3D_FEATURE_LEVEL::default();
        unsafe {
            D3D11CreateDevice(
                None,
                self.driver_type(),
                HMODULE::default(),
                flags,
                Some(&levels),
                D3D11_SDK_VERSION,
                Some(&mut device),
                Some(&mut level),
                Some(&mut context),
            )
        }
        .map_err(native_error("D3D11CreateDevice"))?;

        Ok(CreatedDevice {
            device: returned("D3D11CreateDevice", device)?,
            context: returned("D3D11CreateDevice", context)?,
            feature_level: feature_level(level),
        })
    }
}

impl GraphicsBackend for D3D11Backend {
    type Device = ID3D11Device;
    type Context = ID3D11DeviceContext;
    type Adapter = IDXGIAdapter;
    type Factory = IDXGIFactory;
    type SwapChain = IDXGISwapChain;
    type Texture = ID3D11Texture2D;
    type RenderTargetView = ID3D11RenderTargetView;
    type DepthStencilView = ID3D11DepthStencilView;

    fn create_device(&self, minimum: FeatureLevel) -> Result<CreatedDevice<Self>, BackendError> {
        log::debug!(
            "creating {:?} device, need feature level {minimum}",
            self.driver
        );

        if !self.debug_layer {
            return self.create_device_with_flags(D3D11_CREATE_DEVICE_FLAG(0));
        }

        // The debug layer needs the SDK layers installed; run without it when it is missing.
        match self.create_device_with_flags(D3D11_CREATE_DEVICE_DEBUG) {
            Err(err) => {
                log::warn!("debug layer unavailable ({err}), creating device without it");
                self.create_device_with_flags(D3D11_CREATE_DEVICE_FLAG(0))
            }
            created => created,
        }
    }

    fn multisample_quality(
        &self,
        device: &ID3D11Device,
        format: PixelFormat,
        sample_count: u32,
    ) -> Result<u32, BackendError> {
        unsafe { device.CheckMultisampleQualityLevels(dxgi_format(format), sample_count) }
            .map_err(native_error("CheckMultisampleQualityLevels"))
    }

    fn adapter(&self, device: &ID3D11Device) -> Result<IDXGIAdapter, BackendError> {
        let dxgi_device: IDXGIDevice = device
            .cast()
            .map_err(native_error("QueryInterface(IDXGIDevice)"))?;
        unsafe { dxgi_device.GetAdapter() }.map_err(native_error("IDXGIDevice::GetAdapter"))
    }

    fn factory(&self, adapter: &IDXGIAdapter) -> Result<IDXGIFactory, BackendError> {
        unsafe { adapter.GetParent::<IDXGIFactory>() }
            .map_err(native_error("IDXGIAdapter::GetParent"))
    }

    fn create_swap_chain(
        &self,
        factory: &IDXGIFactory,
        device: &ID3D11Device,
        desc: &SwapChainDesc,
    ) -> Result<IDXGISwapChain, BackendError> {
        let native = DXGI_SWAP_CHAIN_DESC {
            BufferDesc: DXGI_MODE_DESC {
                Width: desc.width,
                Height: desc.height,
                RefreshRate: DXGI_RATIONAL {
                    Numerator: desc.refresh_rate.0,
                    Denominator: desc.refresh_rate.1,
                },
                Format: dxgi_format(desc.format),
                ScanlineOrdering: DXGI_MODE_SCANLINE_ORDER_UNSPECIFIED,
                Scaling: DXGI_MODE_SCALING_UNSPECIFIED,
            },
            SampleDesc: sample_desc(desc.sample),
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            OutputWindow: HWND(desc.window.0 as _),
            Windowed: desc.windowed.into(),
            SwapEffect: DXGI_SWAP_EFFECT_DISCARD,
            Flags: 0,
        };

        let mut swap_chain = None;
        unsafe { factory.CreateSwapChain(device, &native, &mut swap_chain) }
            .ok()
            .map_err(native_error("IDXGIFactory::CreateSwapChain"))?;
        returned("IDXGIFactory::CreateSwapChain", swap_chain)
    }

    fn back_buffer(&self, swap_chain: &IDXGISwapChain) -> Result<ID3D11Texture2D, BackendError> {
        unsafe { swap_chain.GetBuffer::<ID3D11Texture2D>(0) }
            .map_err(native_error("IDXGISwapChain::GetBuffer"))
    }

    fn create_render_target_view(
        &self,
        device: &ID3D11Device,
        texture: &ID3D11Texture2D,
    ) -> Result<ID3D11RenderTargetView, BackendError> {
        let mut view = None;
        unsafe { device.CreateRenderTargetView(texture, None, Some(&mut view)) }
            .map_err(native_error("CreateRenderTargetView"))?;
        returned("CreateRenderTargetView", view)
    }

    fn create_depth_stencil_buffer(
        &self,
        device: &ID3D11Device,
        desc: &DepthStencilDesc,
    ) -> Result<ID3D11Texture2D, BackendError> {
        let native = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: dxgi_format(desc.format),
            SampleDesc: sample_desc(desc.sample),
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_DEPTH_STENCIL.0 as u32,
            CPUAccessFlags: Default::default(),
            MiscFlags: Default::default(),
        };

        let mut texture = None;
        unsafe { device.CreateTexture2D(&native, None, Some(&mut texture)) }
            .map_err(native_error("CreateTexture2D"))?;
        returned("CreateTexture2D", texture)
    }

    fn create_depth_stencil_view(
        &self,
        device: &ID3D11Device,
        buffer: &ID3D11Texture2D,
    ) -> Result<ID3D11DepthStencilView, BackendError> {
        let mut view = None;
        unsafe { device.CreateDepthStencilView(buffer, None, Some(&mut view)) }
            .map_err(native_error("CreateDepthStencilView"))?;
        returned("CreateDepthStencilView", view)
    }

    fn bind_output_views(
        &self,
        context: &ID3D11DeviceContext,
        render_target: &ID3D11RenderTargetView,
        depth_stencil: &ID3D11DepthStencilView,
    ) {
        unsafe { context.OMSetRenderTargets(Some(&[Some(render_target.clone())]), depth_stencil) };
    }

    fn set_viewport(&self, context: &ID3D11DeviceContext, viewport: &Viewport) {
        let native = D3D11_VIEWPORT {
            TopLeftX: viewport.top_left_x,
            TopLeftY: viewport.top_left_y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        };
        unsafe { context.RSSetViewports(Some(&[native])) };
    }

    fn resize_buffers(
        &self,
        swap_chain: &IDXGISwapChain,
        buffer_count: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(), BackendError> {
        unsafe {
            swap_chain.ResizeBuffers(
                buffer_count,
                width,
                height,
                dxgi_format(format),
                DXGI_SWAP_CHAIN_FLAG(0),
            )
        }
        .map_err(native_error("IDXGISwapChain::ResizeBuffers"))
    }

    fn leave_fullscreen(&self, swap_chain: &IDXGISwapChain) -> Result<(), BackendError> {
        unsafe { swap_chain.SetFullscreenState(false, None) }
            .map_err(native_error("IDXGISwapChain::SetFullscreenState"))
    }

    fn clear_state(&self, context: &ID3D11DeviceContext) -> Result<(), BackendError> {
        unsafe { context.ClearState() };
        Ok(())
    }

    fn present(&self, swap_chain: &IDXGISwapChain, sync_interval: u32) -> Result<(), BackendError> {
        unsafe { swap_chain.Present(sync_interval, DXGI_PRESENT(0)) }
            .ok()
            .map_err(native_error("IDXGISwapChain::Present"))
    }
}

/// Clears the colour target and resets depth to 1 and stencil to 0.
pub fn clear_views(
    context: &ID3D11DeviceContext,
    render_target: &ID3D11RenderTargetView,
    depth_stencil: &ID3D11DepthStencilView,
    color: &[f32; 4],
) {
    unsafe {
        context.ClearRenderTargetView(render_target, color);
        context.ClearDepthStencilView(
            depth_stencil,
            (D3D11_CLEAR_DEPTH.0 | D3D11_CLEAR_STENCIL.0) as u32,
            1.0,
            0,
        );
    }
}

/// Compiles HLSL source. On failure the compiler output becomes the error message.
pub fn compile_shader(source: &str, entry_point: &str, target: &str) -> Result<ID3DBlob, BackendError> {
    let entry_point = entry_point.as_c_string();
    let target = target.as_c_string();

    let flags = if cfg!(debug_assertions) {
        D3DCOMPILE_ENABLE_STRICTNESS | D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
    } else {
        D3DCOMPILE_ENABLE_STRICTNESS | D3DCOMPILE_OPTIMIZATION_LEVEL3
    };

    let mut code = None;
    let mut errors = None;
    let compiled = unsafe {
        D3DCompile(
            source.as_ptr() as *const _,
            source.len(),
            None,
            None,
            None,
            PCSTR(entry_point.as_ptr() as _),
            PCSTR(target.as_ptr() as _),
            flags,
            0,
            &mut code,
            Some(&mut errors),
        )
    };

    if let Err(err) = compiled {
        let message = errors
            .as_ref()
            .map(|errors| String::from_utf8_lossy(blob_bytes(errors)).into_owned())
            .unwrap_or_else(|| err.message().to_string());
        return Err(BackendError::new("D3DCompile", err.code().0, message));
    }

    returned("D3DCompile", code)
}

pub fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

/// Lists objects the debug layer still considers alive. Debug builds only.
pub fn report_live_objects() {
    unsafe {
        if cfg!(debug_assertions) {
            if let Ok(dxgi_debug) = DXGIGetDebugInterface1::<IDXGIDebug1>(0) {
                let _ = dxgi_debug.ReportLiveObjects(
                    DXGI_DEBUG_ALL,
                    DXGI_DEBUG_RLO_DETAIL | DXGI_DEBUG_RLO_IGNORE_INTERNAL,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_level_decodes_native_value() {
        assert_eq!(feature_level(D3D_FEATURE_LEVEL_11_0), FeatureLevel::V11_0);
        assert_eq!(feature_level(D3D_FEATURE_LEVEL_10_1), FeatureLevel::V10_1);
    }

    #[test]
    fn formats_map_to_dxgi() {
        assert_eq!(dxgi_format(PixelFormat::BACK_BUFFER), DXGI_FORMAT_R8G8B8A8_UNORM);
        assert_eq!(dxgi_format(PixelFormat::DEPTH_STENCIL), DXGI_FORMAT_D24_UNORM_S8_UINT);
    }

    #[test]
    fn bad_hlsl_reports_compiler_output() {
        let err = compile_shader("float4 main() : SV_Target { return oops; }", "main", "ps_5_0")
            .unwrap_err();
        assert_eq!(err.operation, "D3DCompile");
        assert!(err.message.contains("oops"), "{}", err.message);
    }
}
