use std::ffi::CString;
use std::io;

pub trait AsCString {
    fn as_c_string(&self) -> CString;
}

impl AsCString for str {
    /// Strings with an interior nul become empty.
    fn as_c_string(&self) -> CString {
        CString::new(self).unwrap_or_default()
    }
}

impl AsCString for String {
    fn as_c_string(&self) -> CString {
        self.as_str().as_c_string()
    }
}

#[cfg(windows)]
pub fn print_debug_string(s: &str) {
    use windows::{core::PCSTR, Win32::System::Diagnostics::Debug::OutputDebugStringA};

    if cfg!(debug_assertions) {
        let message = s.as_c_string();
        unsafe {
            OutputDebugStringA(PCSTR(message.as_ptr() as _));
        }
    }
}

#[cfg(not(windows))]
pub fn print_debug_string(s: &str) {
    if cfg!(debug_assertions) {
        eprint!("{s}");
    }
}

/// Sends everything written to it to the debugger output.
pub struct DebugStringWriter;

impl io::Write for DebugStringWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        print_debug_string(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Installs the logger. The level comes from `RUST_LOG` and defaults to `info`. Windows
/// applications have no console, so there the records go to the debugger output.
pub fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if cfg!(windows) {
        builder
            .target(env_logger::Target::Pipe(Box::new(DebugStringWriter)))
            .write_style(env_logger::WriteStyle::Never);
    }

    if builder.try_init().is_err() {
        log::debug!("logger was already installed");
    }
}
