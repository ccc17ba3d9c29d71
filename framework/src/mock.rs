//! Recording stand-ins for the graphics backend and the clock, used by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{
    BackendError, CreatedDevice, DepthStencilDesc, FeatureLevel, GraphicsBackend, PixelFormat,
    SwapChainDesc, Viewport,
};
use crate::clock::TimeSource;

const E_FAIL: i32 = 0x8000_4005_u32 as i32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Device,
    Context,
    Adapter,
    Factory,
    SwapChain,
    BackBuffer,
    RenderTargetView,
    DepthStencilBuffer,
    DepthStencilView,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Device,
        ResourceKind::Context,
        ResourceKind::Adapter,
        ResourceKind::Factory,
        ResourceKind::SwapChain,
        ResourceKind::BackBuffer,
        ResourceKind::RenderTargetView,
        ResourceKind::DepthStencilBuffer,
        ResourceKind::DepthStencilView,
    ];
}

/// Backend operations that can be told to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MockOp {
    CreateDevice,
    MultisampleQuality,
    Adapter,
    Factory,
    CreateSwapChain,
    BackBuffer,
    CreateRenderTargetView,
    CreateDepthStencilBuffer,
    CreateDepthStencilView,
    ResizeBuffers,
    LeaveFullscreen,
    ClearState,
    Present,
}

/// Side effects on the context and swap chain, in call order.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    BindOutputViews {
        render_target: u64,
        depth_stencil: u64,
    },
    SetViewport(Viewport),
    ResizeBuffers {
        width: u32,
        height: u32,
    },
    LeaveFullscreen {
        swap_chain: u64,
    },
    ClearState,
    Present {
        sync_interval: u32,
    },
}

struct LedgerState {
    next_id: u64,
    live: HashMap<u64, ResourceKind>,
    created: HashMap<ResourceKind, usize>,
    released: HashMap<ResourceKind, usize>,
    release_order: Vec<ResourceKind>,
    double_releases: usize,
    calls: Vec<Call>,
    failing: HashSet<MockOp>,
    feature_level: FeatureLevel,
    quality_levels: u32,
    swap_chain_size: (u32, u32),
}

type Hook = Arc<dyn Fn() + Send + Sync>;

pub struct Ledger {
    state: Mutex<LedgerState>,
    resize_hook: Mutex<Option<Hook>>,
}

impl Ledger {
    fn release(&self, kind: ResourceKind, id: u64) {
        let mut state = self.state.lock();
        if state.live.remove(&id).is_none() {
            state.double_releases += 1;
        }
        *state.released.entry(kind).or_default() += 1;
        state.release_order.push(kind);
    }
}

/// Every native object the mock hands out. Dropping it is recorded as a release.
pub struct MockResource {
    kind: ResourceKind,
    id: u64,
    size: (u32, u32),
    ledger: Arc<Ledger>,
}

impl MockResource {
    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

impl Drop for MockResource {
    fn drop(&mut self) {
        self.ledger.release(self.kind, self.id);
    }
}

#[derive(Clone)]
pub struct MockBackend {
    ledger: Arc<Ledger>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::configured(FeatureLevel::V11_0, 4)
    }

    pub fn with_feature_level(feature_level: FeatureLevel) -> Self {
        Self::configured(feature_level, 4)
    }

    pub fn with_quality(quality_levels: u32) -> Self {
        Self::configured(FeatureLevel::V11_0, quality_levels)
    }

    fn configured(feature_level: FeatureLevel, quality_levels: u32) -> Self {
        let state = LedgerState {
            next_id: 1,
            live: HashMap::new(),
            created: HashMap::new(),
            released: HashMap::new(),
            release_order: Vec::new(),
            double_releases: 0,
            calls: Vec::new(),
            failing: HashSet::new(),
            feature_level,
            quality_levels,
            swap_chain_size: (0, 0),
        };
        Self {
            ledger: Arc::new(Ledger {
                state: Mutex::new(state),
                resize_hook: Mutex::new(None),
            }),
        }
    }

    pub fn fail_on(&self, op: MockOp) {
        self.ledger.state.lock().failing.insert(op);
    }

    pub fn succeed_on(&self, op: MockOp) {
        self.ledger.state.lock().failing.remove(&op);
    }

    /// Runs `hook` inside every `resize_buffers` call, before it records anything.
    pub fn on_resize(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.ledger.resize_hook.lock() = Some(Arc::new(hook));
    }

    pub fn clear_resize_hook(&self) {
        *self.ledger.resize_hook.lock() = None;
    }

    pub fn live(&self, kind: ResourceKind) -> usize {
        self.ledger
            .state
            .lock()
            .live
            .values()
            .filter(|live| **live == kind)
            .count()
    }

    pub fn live_total(&self) -> usize {
        self.ledger.state.lock().live.len()
    }

    pub fn live_kinds(&self) -> Vec<ResourceKind> {
        self.ledger.state.lock().live.values().copied().collect()
    }

    pub fn created(&self, kind: ResourceKind) -> usize {
        self.ledger
            .state
            .lock()
            .created
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn released(&self, kind: ResourceKind) -> usize {
        self.ledger
            .state
            .lock()
            .released
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn double_releases(&self) -> usize {
        self.ledger.state.lock().double_releases
    }

    pub fn release_order(&self) -> Vec<ResourceKind> {
        self.ledger.state.lock().release_order.clone()
    }

    pub fn clear_release_order(&self) {
        self.ledger.state.lock().release_order.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.ledger.state.lock().calls.clone()
    }

    fn check(&self, op: MockOp, operation: &'static str) -> Result<(), BackendError> {
        if self.ledger.state.lock().failing.contains(&op) {
            Err(BackendError::new(operation, E_FAIL, "injected failure"))
        } else {
            Ok(())
        }
    }

    fn record(&self, call: Call) {
        self.ledger.state.lock().calls.push(call);
    }

    fn make(&self, kind: ResourceKind, size: (u32, u32)) -> MockResource {
        let mut state = self.ledger.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.live.insert(id, kind);
        *state.created.entry(kind).or_default() += 1;
        MockResource {
            kind,
            id,
            size,
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl GraphicsBackend for MockBackend {
    type Device = MockResource;
    type Context = MockResource;
    type Adapter = MockResource;
    type Factory = MockResource;
    type SwapChain = MockResource;
    type Texture = MockResource;
    type RenderTargetView = MockResource;
    type DepthStencilView = MockResource;

    fn create_device(&self, _minimum: FeatureLevel) -> Result<CreatedDevice<Self>, BackendError> {
        self.check(MockOp::CreateDevice, "D3D11CreateDevice")?;
        let feature_level = self.ledger.state.lock().feature_level;
        Ok(CreatedDevice {
            device: self.make(ResourceKind::Device, (0, 0)),
            context: self.make(ResourceKind::Context, (0, 0)),
            feature_level,
        })
    }

    fn multisample_quality(
        &self,
        _device: &MockResource,
        _format: PixelFormat,
        _sample_count: u32,
    ) -> Result<u32, BackendError> {
        self.check(MockOp::MultisampleQuality, "CheckMultisampleQualityLevels")?;
        Ok(self.ledger.state.lock().quality_levels)
    }

    fn adapter(&self, _device: &MockResource) -> Result<MockResource, BackendError> {
        self.check(MockOp::Adapter, "IDXGIDevice::GetAdapter")?;
        Ok(self.make(ResourceKind::Adapter, (0, 0)))
    }

    fn factory(&self, _adapter: &MockResource) -> Result<MockResource, BackendError> {
        self.check(MockOp::Factory, "IDXGIAdapter::GetParent")?;
        Ok(self.make(ResourceKind::Factory, (0, 0)))
    }

    fn create_swap_chain(
        &self,
        _factory: &MockResource,
        _device: &MockResource,
        desc: &SwapChainDesc,
    ) -> Result<MockResource, BackendError> {
        self.check(MockOp::CreateSwapChain, "IDXGIFactory::CreateSwapChain")?;
        let size = (desc.width, desc.height);
        self.ledger.state.lock().swap_chain_size = size;
        Ok(self.make(ResourceKind::SwapChain, size))
    }

    fn back_buffer(&self, _swap_chain: &MockResource) -> Result<MockResource, BackendError> {
        self.check(MockOp::BackBuffer, "IDXGISwapChain::GetBuffer")?;
        let size = self.ledger.state.lock().swap_chain_size;
        Ok(self.make(ResourceKind::BackBuffer, size))
    }

    fn create_render_target_view(
        &self,
        _device: &MockResource,
        texture: &MockResource,
    ) -> Result<MockResource, BackendError> {
        self.check(MockOp::CreateRenderTargetView, "CreateRenderTargetView")?;
        Ok(self.make(ResourceKind::RenderTargetView, texture.size))
    }

    fn create_depth_stencil_buffer(
        &self,
        _device: &MockResource,
        desc: &DepthStencilDesc,
    ) -> Result<MockResource, BackendError> {
        self.check(MockOp::CreateDepthStencilBuffer, "CreateTexture2D")?;
        Ok(self.make(ResourceKind::DepthStencilBuffer, (desc.width, desc.height)))
    }

    fn create_depth_stencil_view(
        &self,
        _device: &MockResource,
        buffer: &MockResource,
    ) -> Result<MockResource, BackendError> {
        self.check(MockOp::CreateDepthStencilView, "CreateDepthStencilView")?;
        Ok(self.make(ResourceKind::DepthStencilView, buffer.size))
    }

    fn bind_output_views(
        &self,
        _context: &MockResource,
        render_target: &MockResource,
        depth_stencil: &MockResource,
    ) {
        self.record(Call::BindOutputViews {
            render_target: render_target.id,
            depth_stencil: depth_stencil.id,
        });
    }

    fn set_viewport(&self, _context: &MockResource, viewport: &Viewport) {
        self.record(Call::SetViewport(*viewport));
    }

    fn resize_buffers(
        &self,
        _swap_chain: &MockResource,
        _buffer_count: u32,
        width: u32,
        height: u32,
        _format: PixelFormat,
    ) -> Result<(), BackendError> {
        let hook = self.ledger.resize_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }

        self.check(MockOp::ResizeBuffers, "IDXGISwapChain::ResizeBuffers")?;
        self.record(Call::ResizeBuffers { width, height });
        self.ledger.state.lock().swap_chain_size = (width, height);
        Ok(())
    }

    fn leave_fullscreen(&self, swap_chain: &MockResource) -> Result<(), BackendError> {
        self.record(Call::LeaveFullscreen {
            swap_chain: swap_chain.id,
        });
        self.check(MockOp::LeaveFullscreen, "IDXGISwapChain::SetFullscreenState")
    }

    fn clear_state(&self, _context: &MockResource) -> Result<(), BackendError> {
        self.record(Call::ClearState);
        self.check(MockOp::ClearState, "ID3D11DeviceContext::ClearState")
    }

    fn present(&self, _swap_chain: &MockResource, sync_interval: u32) -> Result<(), BackendError> {
        self.check(MockOp::Present, "IDXGISwapChain::Present")?;
        self.record(Call::Present { sync_interval });
        Ok(())
    }
}

/// A counter the test moves by hand.
#[derive(Clone)]
pub struct ManualTime {
    counts: Arc<AtomicI64>,
    available: Arc<AtomicBool>,
    frequency: i64,
}

impl ManualTime {
    pub fn new(frequency: i64) -> Self {
        Self {
            counts: Arc::new(AtomicI64::new(0)),
            available: Arc::new(AtomicBool::new(true)),
            frequency,
        }
    }

    pub fn set(&self, counts: i64) {
        self.counts.store(counts, Ordering::SeqCst);
    }

    pub fn advance(&self, counts: i64) {
        self.counts.fetch_add(counts, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, seconds: f64) {
        self.advance((seconds * self.frequency as f64).round() as i64);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn frequency(&self) -> Option<i64> {
        (self.frequency > 0).then_some(self.frequency)
    }

    fn now(&self) -> Option<i64> {
        self.available
            .load(Ordering::SeqCst)
            .then(|| self.counts.load(Ordering::SeqCst))
    }
}
