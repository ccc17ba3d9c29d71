use std::{cell::RefCell, error::Error, rc::Rc};

use windows::{
    core::{s, PCSTR},
    Win32::{
        Foundation::{HWND, LPARAM, LRESULT, RECT, WPARAM},
        Graphics::Gdi::UpdateWindow,
        System::{LibraryLoader::GetModuleHandleA, Threading::Sleep},
        UI::{
            Input::KeyboardAndMouse::{ReleaseCapture, SetCapture},
            WindowsAndMessaging::{
                AdjustWindowRect, CreateWindowExA, DefWindowProcA, DestroyWindow,
                DispatchMessageA, GetClientRect, IsWindow, LoadCursorA, PeekMessageA,
                PostQuitMessage, RegisterClassExA, SetWindowTextA, ShowWindow, TranslateMessage,
                CS_HREDRAW, CS_VREDRAW, CW_USEDEFAULT, IDC_ARROW, MINMAXINFO, MNC_CLOSE, MSG,
                PM_REMOVE, SIZE_MAXIMIZED, SIZE_MINIMIZED, SIZE_RESTORED, SW_SHOW,
                WA_INACTIVE, WM_ACTIVATE, WM_DESTROY, WM_ENTERSIZEMOVE, WM_EXITSIZEMOVE,
                WM_GETMINMAXINFO, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MBUTTONDOWN, WM_MBUTTONUP,
                WM_MENUCHAR, WM_MOUSEMOVE, WM_NCDESTROY, WM_QUIT, WM_RBUTTONDOWN, WM_RBUTTONUP,
                WM_SIZE, WNDCLASSEXA, WS_OVERLAPPEDWINDOW,
            },
        },
    },
};

use crate::{
    backend::RawWindow,
    clock::PerformanceCounter,
    config::AppConfig,
    error::DeviceError,
    gfx::{report_live_objects, D3D11Backend},
    registry::{dispatch, WindowId, WindowRegistry},
    shell::{ApplicationShell, FrameTick, MouseButtons, ResizeOutcome, Scene, SizeKind},
    util::{print_debug_string, AsCString},
};

const MINIMUM_TRACK_SIZE: i32 = 200;

/// Handles messages for one window. `None` passes the message to the default procedure.
trait WindowHandler {
    fn handle(&mut self, hwnd: HWND, message: u32, wparam: WPARAM, lparam: LPARAM)
        -> Option<LRESULT>;
}

thread_local! {
    static WINDOWS: RefCell<WindowRegistry<dyn WindowHandler>> = RefCell::new(WindowRegistry::new());
}

fn loword(value: usize) -> u32 {
    (value & 0xffff) as u32
}

fn hiword(value: usize) -> u32 {
    ((value >> 16) & 0xffff) as u32
}

/// Client coordinates packed in `lparam`; negative when the mouse is captured outside.
fn point(lparam: LPARAM) -> (i32, i32) {
    let x = (lparam.0 & 0xffff) as i16;
    let y = ((lparam.0 >> 16) & 0xffff) as i16;
    (x as i32, y as i32)
}

pub struct Window {
    hwnd: HWND,
}

impl Window {
    fn new(
        title: impl Into<String>,
        window_size: (i32, i32),
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let instance = unsafe { GetModuleHandleA(None) }?;

        let class_name = s!("D3D11FrameworkWindow");

        let wc = WNDCLASSEXA {
            cbSize: std::mem::size_of::<WNDCLASSEXA>() as u32,
            style: CS_HREDRAW | CS_VREDRAW,
            lpfnWndProc: Some(wndproc),
            hInstance: instance.into(),
            hCursor: unsafe { LoadCursorA(None, PCSTR(IDC_ARROW.0 as _)) }?,
            lpszClassName: class_name,
            ..Default::default()
        };

        if unsafe { RegisterClassExA(&wc) } == 0 {
            return Err(windows::core::Error::from_win32().into());
        }

        let mut window_rect = RECT {
            left: 0,
            top: 0,
            right: window_size.0,
            bottom: window_size.1,
        };
        unsafe { AdjustWindowRect(&mut window_rect, WS_OVERLAPPEDWINDOW, false) }?;

        let title = title.into();

        let hwnd = unsafe {
            CreateWindowExA(
                Default::default(),
                class_name,
                PCSTR(title.as_c_string().as_ptr() as _),
                WS_OVERLAPPEDWINDOW,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                window_rect.right - window_rect.left,
                window_rect.bottom - window_rect.top,
                None, // No parent window.
                None, // No menus.
                instance,
                None,
            )
        }?;

        if hwnd == HWND::default() {
            return Err("failed to create a window handle".into());
        }

        Ok(Self { hwnd })
    }

    pub fn get_handle(&self) -> HWND {
        self.hwnd
    }

    fn id(&self) -> WindowId {
        WindowId(self.hwnd.0 as isize)
    }

    pub fn raw(&self) -> RawWindow {
        RawWindow(self.hwnd.0 as isize)
    }

    pub fn get_physical_size(&self) -> (u32, u32) {
        let mut window_rect = RECT::default();
        if let Err(e) = unsafe { GetClientRect(self.hwnd, &mut window_rect) } {
            log::warn!("failed to get client rect {e}");
        }

        (
            (window_rect.right - window_rect.left).max(0) as u32,
            (window_rect.bottom - window_rect.top).max(0) as u32,
        )
    }

    pub fn show(&self) {
        unsafe {
            let _ = ShowWindow(self.hwnd, SW_SHOW);
            let _ = UpdateWindow(self.hwnd);
        }
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        unsafe {
            if IsWindow(self.hwnd).as_bool() {
                let _ = DestroyWindow(self.hwnd);
            }
        }
    }
}

struct App<S> {
    shell: ApplicationShell<D3D11Backend, PerformanceCounter>,
    scene: S,
    title: String,
    hwnd: HWND,
}

impl<S: Scene<D3D11Backend>> App<S> {
    fn init(&mut self, window: RawWindow) -> Result<(), Box<dyn Error>> {
        self.shell.init_graphics(window)?;
        self.scene.init(self.shell.graphics())?;
        self.notify_aspect_ratio();
        Ok(())
    }

    fn notify_aspect_ratio(&mut self) {
        if let Some(aspect_ratio) = self.shell.aspect_ratio() {
            self.scene.on_resize(aspect_ratio);
        }
    }

    fn set_caption(&self, caption: &str) {
        let caption = caption.as_c_string();
        if let Err(e) = unsafe { SetWindowTextA(self.hwnd, PCSTR(caption.as_ptr() as _)) } {
            log::warn!("failed to set window caption {e}");
        }
    }

    /// One pass of the render loop when no messages are waiting.
    fn idle(&mut self) -> Result<(), Box<dyn Error>> {
        match self.shell.run_frame(&mut self.scene)? {
            None => Err("high-resolution frame clock is unavailable".into()),
            Some(FrameTick::Paused) => {
                unsafe { Sleep(100) };
                Ok(())
            }
            Some(FrameTick::Frame {
                report: Some(report),
                ..
            }) => {
                self.set_caption(&report.caption(&self.title));
                Ok(())
            }
            Some(FrameTick::Frame { .. }) => Ok(()),
        }
    }

    fn after_resize(&mut self, outcome: Result<ResizeOutcome, DeviceError>) {
        match outcome {
            Ok(ResizeOutcome::Resized) => self.notify_aspect_ratio(),
            Ok(outcome) => log::trace!("size event: {outcome:?}"),
            Err(err) => log::error!("resize failed: {err}"),
        }
    }
}

impl<S: Scene<D3D11Backend>> WindowHandler for App<S> {
    fn handle(
        &mut self,
        hwnd: HWND,
        message: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> Option<LRESULT> {
        match message {
            WM_ACTIVATE => {
                self.shell.on_activate(loword(wparam.0) != WA_INACTIVE);
            }

            WM_SIZE => {
                let (width, height) = (loword(lparam.0 as usize), hiword(lparam.0 as usize));
                let kind = match wparam.0 as u32 {
                    SIZE_MINIMIZED => SizeKind::Minimized,
                    SIZE_MAXIMIZED => SizeKind::Maximized,
                    SIZE_RESTORED => SizeKind::Restored,
                    _ => return None,
                };
                let outcome = self.shell.on_size(kind, width, height);
                self.after_resize(outcome);
            }

            WM_ENTERSIZEMOVE => self.shell.on_enter_size_move(),

            WM_EXITSIZEMOVE => {
                let outcome = self.shell.on_exit_size_move();
                self.after_resize(outcome);
            }

            WM_DESTROY => unsafe { PostQuitMessage(0) },

            // Alt+key with no mnemonic would otherwise beep.
            WM_MENUCHAR => return Some(LRESULT((MNC_CLOSE as isize) << 16)),

            WM_GETMINMAXINFO => {
                let info = lparam.0 as *mut MINMAXINFO;
                if let Some(info) = unsafe { info.as_mut() } {
                    info.ptMinTrackSize.x = MINIMUM_TRACK_SIZE;
                    info.ptMinTrackSize.y = MINIMUM_TRACK_SIZE;
                }
            }

            WM_LBUTTONDOWN | WM_MBUTTONDOWN | WM_RBUTTONDOWN => {
                unsafe { SetCapture(hwnd) };
                let (x, y) = point(lparam);
                self.scene
                    .on_mouse_down(MouseButtons(wparam.0 as u32), x, y);
            }

            WM_LBUTTONUP | WM_MBUTTONUP | WM_RBUTTONUP => {
                if let Err(e) = unsafe { ReleaseCapture() } {
                    log::debug!("failed to release mouse capture {e}");
                }
                let (x, y) = point(lparam);
                self.scene.on_mouse_up(MouseButtons(wparam.0 as u32), x, y);
            }

            WM_MOUSEMOVE => {
                let (x, y) = point(lparam);
                self.scene
                    .on_mouse_move(MouseButtons(wparam.0 as u32), x, y);
            }

            _ => return None,
        }

        Some(LRESULT::default())
    }
}

extern "system" fn wndproc(hwnd: HWND, message: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    let id = WindowId(hwnd.0 as isize);

    // Messages sent during CreateWindowExA arrive before the window is registered.
    let handler = WINDOWS.with(|windows| {
        windows
            .try_borrow()
            .ok()
            .and_then(|windows| windows.get(id))
    });
    let handled = handler
        .and_then(|handler| {
            dispatch(&handler, |handler| handler.handle(hwnd, message, wparam, lparam))
        })
        .flatten();

    if message == WM_NCDESTROY {
        WINDOWS.with(|windows| {
            if let Ok(mut windows) = windows.try_borrow_mut() {
                windows.remove(id);
            }
        });
    }

    handled.unwrap_or_else(|| unsafe { DefWindowProcA(hwnd, message, wparam, lparam) })
}

fn message_loop<S: Scene<D3D11Backend>>(app: &RefCell<App<S>>) -> Result<(), Box<dyn Error>> {
    app.borrow().shell.clock().reset();

    let mut message = MSG::default();
    loop {
        if unsafe { PeekMessageA(&mut message, None, 0, 0, PM_REMOVE) }.as_bool() {
            unsafe {
                let _ = TranslateMessage(&message);
                DispatchMessageA(&message);
            }

            if message.message == WM_QUIT {
                return Ok(());
            }
        } else {
            app.borrow_mut().idle()?;
        }
    }
}

/// Creates the window and graphics for `scene` and runs until the window closes.
pub fn run<S>(mut config: AppConfig, scene: S) -> Result<(), Box<dyn Error>>
where
    S: Scene<D3D11Backend> + 'static,
{
    log::info!("starting {}", config.title);

    let window = Window::new(
        config.title.as_str(),
        (config.width as i32, config.height as i32),
    )?;
    (config.width, config.height) = window.get_physical_size();

    let shell = ApplicationShell::new(
        D3D11Backend::from_config(&config),
        PerformanceCounter,
        &config,
    );
    let app = Rc::new(RefCell::new(App {
        shell,
        scene,
        title: config.title.clone(),
        hwnd: window.get_handle(),
    }));

    let handler: Rc<RefCell<dyn WindowHandler>> = app.clone();
    WINDOWS.with(|windows| windows.borrow_mut().insert(window.id(), handler));

    let initialized = app.borrow_mut().init(window.raw());
    if let Err(e) = initialized {
        print_debug_string(&format!("initialization failed: {e}\n"));
        return Err(e);
    }
    window.show();

    let result = message_loop(&app);
    if let Err(e) = &result {
        log::error!("leaving message loop: {e}");
    }

    let id = window.id();
    drop(window);
    WINDOWS.with(|windows| windows.borrow_mut().remove(id));
    drop(app);

    report_live_objects();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_words_unpack() {
        let packed = (600usize << 16) | 800;
        assert_eq!(loword(packed), 800);
        assert_eq!(hiword(packed), 600);
    }

    #[test]
    fn points_are_signed() {
        let packed = LPARAM((((-5i16) as u16 as isize) << 16) | ((-20i16) as u16 as isize));
        assert_eq!(point(packed), (-20, -5));
    }
}
