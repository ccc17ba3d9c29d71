//! Window-system independent half of the application: pause and resize policy, the frame
//! clock and frame statistics. `os` feeds it window messages.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::backend::{GraphicsBackend, RawWindow};
use crate::clock::{FrameClock, TimeSource};
use crate::config::AppConfig;
use crate::device::{DeviceState, GraphicsDeviceManager, DEFAULT_SAMPLE_COUNT};
use crate::error::DeviceError;
use crate::lock::NamedMutex;

/// How long graphics setup waits for the resize gate.
pub const INIT_GATE_TIMEOUT: Duration = Duration::from_millis(100);

/// How long a size notification waits for the resize gate.
pub const SIZE_GATE_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MouseButtons(pub u32);

impl MouseButtons {
    pub const LEFT: MouseButtons = MouseButtons(0x0001);
    pub const RIGHT: MouseButtons = MouseButtons(0x0002);
    pub const MIDDLE: MouseButtons = MouseButtons(0x0010);

    pub fn contains(self, other: MouseButtons) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

/// What the application draws. Errors from `init` and `draw` end the message loop.
pub trait Scene<B: GraphicsBackend> {
    fn title(&self) -> &str;

    fn init(&mut self, graphics: &GraphicsDeviceManager<B>) -> Result<(), Box<dyn Error>>;

    /// Called after the framebuffer was rebuilt.
    fn on_resize(&mut self, _aspect_ratio: f32) {}

    fn update(&mut self, dt: f32);

    fn draw(&mut self, graphics: &GraphicsDeviceManager<B>) -> Result<(), Box<dyn Error>>;

    fn on_mouse_down(&mut self, _buttons: MouseButtons, _x: i32, _y: i32) {}

    fn on_mouse_up(&mut self, _buttons: MouseButtons, _x: i32, _y: i32) {}

    fn on_mouse_move(&mut self, _buttons: MouseButtons, _x: i32, _y: i32) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeKind {
    Minimized,
    Maximized,
    Restored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// The framebuffer was rebuilt; the scene should refresh its projection.
    Resized,
    /// The user is dragging the frame; the resize happens when the drag ends.
    Deferred,
    /// Nothing to rebuild: minimized, zero sized or graphics not set up yet.
    Skipped,
    /// Setup or another resize held the gate. The next size event tries again.
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameReport {
    pub fps: f32,
    pub frame_time_ms: f32,
}

impl FrameReport {
    pub fn caption(&self, title: &str) -> String {
        format!(
            "{title}    fps: {:.0}   mspf: {:.3}",
            self.fps, self.frame_time_ms
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameTick {
    Paused,
    Frame {
        dt: f32,
        report: Option<FrameReport>,
    },
}

/// Frame rate averaged over windows of at least one second of total time.
#[derive(Debug, Default)]
pub struct FrameStats {
    frames: u32,
    window_start: f32,
}

impl FrameStats {
    pub fn count_frame(&mut self) {
        self.frames += 1;
    }

    pub fn sample(&mut self, total_time: f32) -> Option<FrameReport> {
        let elapsed = total_time - self.window_start;
        if elapsed < 1.0 {
            return None;
        }

        let frames = std::mem::take(&mut self.frames);
        self.window_start = total_time;
        if frames == 0 {
            return None;
        }

        let fps = frames as f32 / elapsed;
        Some(FrameReport {
            fps,
            frame_time_ms: 1000.0 / fps,
        })
    }
}

#[derive(Debug)]
struct ShellState {
    minimized: bool,
    maximized: bool,
    resizing: bool,
    width: u32,
    height: u32,
}

pub struct ApplicationShell<B: GraphicsBackend, T: TimeSource> {
    graphics: GraphicsDeviceManager<B>,
    clock: FrameClock<T>,
    // Also serves as the resize gate.
    state: NamedMutex<ShellState>,
    paused: AtomicBool,
    stats: FrameStats,
    enable_msaa: bool,
    fullscreen: bool,
}

impl<B: GraphicsBackend, T: TimeSource> ApplicationShell<B, T> {
    pub fn new(backend: B, time: T, config: &AppConfig) -> Self {
        Self {
            graphics: GraphicsDeviceManager::with_timeouts(
                backend,
                config.lock_timeout,
                config.resize_timeout,
            ),
            clock: FrameClock::new(time),
            state: NamedMutex::new(
                "resize-gate",
                ShellState {
                    minimized: false,
                    maximized: false,
                    resizing: false,
                    width: config.width,
                    height: config.height,
                },
            ),
            paused: AtomicBool::new(false),
            stats: FrameStats::default(),
            enable_msaa: config.enable_msaa,
            fullscreen: config.fullscreen,
        }
    }

    pub fn graphics(&self) -> &GraphicsDeviceManager<B> {
        &self.graphics
    }

    pub fn clock(&self) -> &FrameClock<T> {
        &self.clock
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
        if paused {
            self.clock.stop();
        } else {
            self.clock.start();
        }
    }

    /// Width over height of the framebuffer; `None` until the graphics are ready.
    pub fn aspect_ratio(&self) -> Option<f32> {
        if !self.graphics.state().is_ready() {
            return None;
        }
        match self.graphics.client_size() {
            (_, 0) => None,
            (width, height) => Some(width as f32 / height as f32),
        }
    }

    /// Runs the whole setup sequence for `window` at the current client size.
    pub fn init_graphics(&self, window: RawWindow) -> Result<(), DeviceError> {
        let state = self.state.lock_within(INIT_GATE_TIMEOUT)?;
        let graphics = &self.graphics;

        let current = graphics.state();
        if current != DeviceState::Free {
            return Err(DeviceError::InvalidStateTransition {
                operation: "init_graphics",
                expected: DeviceState::Free,
                found: current,
            });
        }

        graphics.create_device_and_context()?;
        if self.enable_msaa {
            let quality = graphics.check_multisample_support(DEFAULT_SAMPLE_COUNT)?;
            log::info!("{DEFAULT_SAMPLE_COUNT}x MSAA with {quality} quality levels");
        }
        graphics.describe_swap_chain(
            self.enable_msaa,
            self.fullscreen,
            state.width,
            state.height,
            window,
        )?;
        graphics.create_swap_chain()?;
        graphics.create_render_target_view()?;
        graphics.create_depth_stencil_buffer_and_view()?;
        graphics.bind_output_views()?;
        graphics.set_default_viewport(0.0, 0.0)?;

        log::info!("graphics ready at {}x{}", state.width, state.height);
        Ok(())
    }

    pub fn on_activate(&self, active: bool) {
        self.set_paused(!active);
    }

    pub fn on_size(
        &self,
        kind: SizeKind,
        width: u32,
        height: u32,
    ) -> Result<ResizeOutcome, DeviceError> {
        let Ok(mut state) = self.state.lock_within(SIZE_GATE_TIMEOUT) else {
            log::debug!("size event {width}x{height} rejected, resize gate is busy");
            return Ok(ResizeOutcome::Rejected);
        };
        state.width = width;
        state.height = height;

        match kind {
            SizeKind::Minimized => {
                self.set_paused(true);
                state.minimized = true;
                state.maximized = false;
                Ok(ResizeOutcome::Skipped)
            }
            SizeKind::Maximized => {
                self.set_paused(false);
                state.minimized = false;
                state.maximized = true;
                self.resize(width, height)
            }
            SizeKind::Restored if state.minimized => {
                self.set_paused(false);
                state.minimized = false;
                self.resize(width, height)
            }
            SizeKind::Restored if state.maximized => {
                self.set_paused(false);
                state.maximized = false;
                self.resize(width, height)
            }
            SizeKind::Restored if state.resizing => Ok(ResizeOutcome::Deferred),
            SizeKind::Restored => self.resize(width, height),
        }
    }

    pub fn on_enter_size_move(&self) {
        match self.state.lock_within(SIZE_GATE_TIMEOUT) {
            Ok(mut state) => state.resizing = true,
            Err(err) => log::warn!("entering size/move: {err}"),
        }
        self.set_paused(true);
    }

    pub fn on_exit_size_move(&self) -> Result<ResizeOutcome, DeviceError> {
        self.set_paused(false);
        let Ok(mut state) = self.state.lock_within(SIZE_GATE_TIMEOUT) else {
            return Ok(ResizeOutcome::Rejected);
        };
        state.resizing = false;
        self.resize(state.width, state.height)
    }

    fn resize(&self, width: u32, height: u32) -> Result<ResizeOutcome, DeviceError> {
        if width == 0 || height == 0 || !self.graphics.state().is_ready() {
            return Ok(ResizeOutcome::Skipped);
        }
        match self.graphics.resize(width, height) {
            Ok(()) => Ok(ResizeOutcome::Resized),
            Err(err) if err.is_transient() => {
                log::debug!("resize to {width}x{height} rejected: {err}");
                Ok(ResizeOutcome::Rejected)
            }
            Err(err) => Err(err),
        }
    }

    /// Advances the clock. `None` once the clock has become invalid.
    pub fn tick(&mut self) -> Option<FrameTick> {
        if !self.clock.is_valid() {
            return None;
        }

        let dt = self.clock.tick();
        if self.is_paused() {
            return Some(FrameTick::Paused);
        }

        self.stats.count_frame();
        let report = self.stats.sample(self.clock.total_time());
        Some(FrameTick::Frame { dt, report })
    }

    /// One idle iteration: tick, then update and draw the scene unless paused.
    pub fn run_frame<S: Scene<B> + ?Sized>(
        &mut self,
        scene: &mut S,
    ) -> Result<Option<FrameTick>, Box<dyn Error>> {
        let tick = self.tick();
        if let Some(FrameTick::Frame { dt, .. }) = tick {
            scene.update(dt);
            scene.draw(&self.graphics)?;
        }
        Ok(tick)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::backend::SampleDesc;
    use crate::mock::{ManualTime, MockBackend, ResourceKind};

    const WINDOW: RawWindow = RawWindow(42);

    #[derive(Default)]
    struct RecordingScene {
        updates: Vec<f32>,
        draws: usize,
        fail_draw: bool,
    }

    impl Scene<MockBackend> for RecordingScene {
        fn title(&self) -> &str {
            "recording"
        }

        fn init(&mut self, _: &GraphicsDeviceManager<MockBackend>) -> Result<(), Box<dyn Error>> {
            Ok(())
        }

        fn update(&mut self, dt: f32) {
            self.updates.push(dt);
        }

        fn draw(&mut self, graphics: &GraphicsDeviceManager<MockBackend>) -> Result<(), Box<dyn Error>> {
            if self.fail_draw {
                return Err("device lost".into());
            }
            graphics.lock()?.present(0)?;
            self.draws += 1;
            Ok(())
        }
    }

    fn shell(config: &AppConfig) -> (MockBackend, ManualTime, ApplicationShell<MockBackend, ManualTime>) {
        let backend = MockBackend::new();
        let time = ManualTime::new(1_000);
        let shell = ApplicationShell::new(backend.clone(), time.clone(), config);
        (backend, time, shell)
    }

    fn ready_shell() -> (MockBackend, ManualTime, ApplicationShell<MockBackend, ManualTime>) {
        let (backend, time, shell) = shell(&AppConfig::default());
        shell.init_graphics(WINDOW).unwrap();
        (backend, time, shell)
    }

    #[test]
    fn init_graphics_runs_the_whole_sequence() {
        let (_, _, shell) = ready_shell();
        assert_eq!(shell.graphics().state(), DeviceState::ViewportCreated);
        assert_eq!(shell.graphics().client_size(), (800, 600));
        assert_relative_eq!(shell.aspect_ratio().unwrap(), 800.0 / 600.0);

        let guard = shell.graphics().lock().unwrap();
        assert_eq!(guard.swap_chain_desc().unwrap().sample.count, 4);
    }

    #[test]
    fn second_init_leaves_a_ready_device_alone() {
        let (backend, _, shell) = ready_shell();
        let created = backend.created(ResourceKind::Device);

        let err = shell.init_graphics(WINDOW).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::InvalidStateTransition {
                found: DeviceState::ViewportCreated,
                ..
            }
        ));
        assert_eq!(shell.graphics().state(), DeviceState::ViewportCreated);
        assert_eq!(backend.created(ResourceKind::Device), created);
        assert!(shell.graphics().lock().unwrap().is_ready());
    }

    #[test]
    fn aspect_ratio_is_unknown_before_init() {
        let (_, _, shell) = shell(&AppConfig::default());
        assert_eq!(shell.aspect_ratio(), None);
    }

    #[test]
    fn init_graphics_without_msaa_skips_the_query() {
        let config = AppConfig {
            enable_msaa: false,
            ..AppConfig::default()
        };
        let (_, _, shell) = shell(&config);
        shell.init_graphics(WINDOW).unwrap();

        let guard = shell.graphics().lock().unwrap();
        assert!(guard.multisample().is_none());
        assert_eq!(guard.swap_chain_desc().unwrap().sample, SampleDesc::SINGLE);
    }

    #[test]
    fn size_before_init_only_records_dimensions() {
        let (_, _, shell) = shell(&AppConfig::default());
        assert_eq!(
            shell.on_size(SizeKind::Restored, 1024, 768).unwrap(),
            ResizeOutcome::Skipped
        );

        shell.init_graphics(WINDOW).unwrap();
        assert_eq!(shell.graphics().client_size(), (1024, 768));
    }

    #[test]
    fn minimize_pauses_and_restore_resizes() {
        let (_, _, shell) = ready_shell();

        assert_eq!(
            shell.on_size(SizeKind::Minimized, 0, 0).unwrap(),
            ResizeOutcome::Skipped
        );
        assert!(shell.is_paused());
        assert!(shell.clock().is_stopped());

        assert_eq!(
            shell.on_size(SizeKind::Restored, 640, 480).unwrap(),
            ResizeOutcome::Resized
        );
        assert!(!shell.is_paused());
        assert_eq!(shell.graphics().client_size(), (640, 480));
    }

    #[test]
    fn maximize_and_restore_both_resize() {
        let (_, _, shell) = ready_shell();
        assert_eq!(
            shell.on_size(SizeKind::Maximized, 1920, 1080).unwrap(),
            ResizeOutcome::Resized
        );
        assert_eq!(
            shell.on_size(SizeKind::Restored, 800, 600).unwrap(),
            ResizeOutcome::Resized
        );
        assert_eq!(shell.graphics().client_size(), (800, 600));
    }

    #[test]
    fn dragging_defers_the_resize_until_release() {
        let (_, _, shell) = ready_shell();

        shell.on_enter_size_move();
        assert!(shell.is_paused());
        assert_eq!(
            shell.on_size(SizeKind::Restored, 900, 700).unwrap(),
            ResizeOutcome::Deferred
        );
        assert_eq!(
            shell.on_size(SizeKind::Restored, 1000, 720).unwrap(),
            ResizeOutcome::Deferred
        );
        assert_eq!(shell.graphics().client_size(), (800, 600));

        assert_eq!(shell.on_exit_size_move().unwrap(), ResizeOutcome::Resized);
        assert!(!shell.is_paused());
        assert_eq!(shell.graphics().client_size(), (1000, 720));
    }

    #[test]
    fn busy_device_rejects_the_size_event() {
        let (_, _, shell) = ready_shell();
        let guard = shell.graphics().lock().unwrap();

        assert_eq!(
            shell.on_size(SizeKind::Restored, 640, 480).unwrap(),
            ResizeOutcome::Rejected
        );
        drop(guard);

        assert_eq!(
            shell.on_size(SizeKind::Restored, 640, 480).unwrap(),
            ResizeOutcome::Resized
        );
    }

    #[test]
    fn failed_resize_is_reported() {
        let (backend, _, shell) = ready_shell();
        backend.fail_on(crate::mock::MockOp::ResizeBuffers);

        let err = shell.on_size(SizeKind::Restored, 640, 480).unwrap_err();
        assert!(matches!(err, DeviceError::ResizeFailed { .. }));
        assert_eq!(
            shell.on_size(SizeKind::Restored, 640, 480).unwrap(),
            ResizeOutcome::Skipped
        );
    }

    #[test]
    fn deactivation_pauses_the_clock() {
        let (_, time, mut shell) = ready_shell();
        shell.on_activate(false);
        time.advance_secs(5.0);
        assert_eq!(shell.tick(), Some(FrameTick::Paused));

        shell.on_activate(true);
        time.advance_secs(0.25);
        assert!(matches!(shell.tick(), Some(FrameTick::Frame { .. })));
        assert_relative_eq!(shell.clock().total_time(), 0.25, epsilon = 1e-5);
    }

    #[test]
    fn run_frame_updates_and_draws_only_when_running() {
        let (backend, time, mut shell) = ready_shell();
        let mut scene = RecordingScene::default();

        time.advance_secs(0.5);
        shell.run_frame(&mut scene).unwrap();
        assert_eq!(scene.draws, 1);
        assert_relative_eq!(scene.updates[0], 0.5, epsilon = 1e-5);

        shell.on_activate(false);
        assert_eq!(
            shell.run_frame(&mut scene).unwrap(),
            Some(FrameTick::Paused)
        );
        assert_eq!(scene.draws, 1);
        assert_eq!(scene.updates.len(), 1);

        shell.on_activate(true);
        scene.fail_draw = true;
        assert!(shell.run_frame(&mut scene).is_err());
        assert_eq!(
            backend
                .calls()
                .iter()
                .filter(|call| matches!(call, crate::mock::Call::Present { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn tick_reports_frame_rate_once_per_second() {
        let (_, time, mut shell) = ready_shell();

        let mut reports = Vec::new();
        for _ in 0..120 {
            time.advance(10);
            if let Some(FrameTick::Frame {
                report: Some(report),
                ..
            }) = shell.tick()
            {
                reports.push(report);
            }
        }

        assert_eq!(reports.len(), 1);
        assert_relative_eq!(reports[0].fps, 100.0, epsilon = 1e-3);
        assert_relative_eq!(reports[0].frame_time_ms, 10.0, epsilon = 1e-3);
    }

    #[test]
    fn invalid_clock_ends_ticking() {
        let (_, time, mut shell) = ready_shell();
        time.set_available(false);
        assert_eq!(shell.tick(), Some(FrameTick::Frame { dt: 0.0, report: None }));
        assert_eq!(shell.tick(), None);
    }

    #[test]
    fn frame_stats_skip_empty_windows() {
        let mut stats = FrameStats::default();
        assert_eq!(stats.sample(0.5), None);
        assert_eq!(stats.sample(1.5), None);

        stats.count_frame();
        stats.count_frame();
        assert_eq!(stats.sample(2.0), None);
        let report = stats.sample(3.5).unwrap();
        assert_relative_eq!(report.fps, 1.0);
        assert_relative_eq!(report.frame_time_ms, 1000.0);

        stats.count_frame();
        assert_eq!(stats.sample(2.0), None);
    }

    #[test]
    fn caption_carries_rate_and_frame_time() {
        let report = FrameReport {
            fps: 59.6,
            frame_time_ms: 16.778,
        };
        assert_eq!(report.caption("Box"), "Box    fps: 60   mspf: 16.778");
    }

    #[test]
    fn mouse_buttons_match_by_bit() {
        let both = MouseButtons(MouseButtons::LEFT.0 | MouseButtons::RIGHT.0);
        assert!(both.contains(MouseButtons::LEFT));
        assert!(both.contains(MouseButtons::RIGHT));
        assert!(!both.contains(MouseButtons::MIDDLE));
        assert!(!MouseButtons::default().contains(MouseButtons::default()));
    }
}
