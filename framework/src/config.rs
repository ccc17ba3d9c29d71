use std::time::Duration;

use crate::device::DEFAULT_RESIZE_TIMEOUT;
use crate::lock::DEFAULT_LOCK_TIMEOUT;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriverKind {
    #[default]
    Hardware,
    /// The software rasterizer.
    Warp,
}

/// Switches accepted on the command line. Each may be written as `-name` or `/name`, in any
/// case.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandLine {
    pub use_warp_device: bool,
    pub disable_msaa: bool,
    pub fullscreen: bool,
    pub debug_layer: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

fn is_switch(arg: &str, name: &str) -> bool {
    arg.strip_prefix(['-', '/'])
        .is_some_and(|rest| rest.eq_ignore_ascii_case(name))
}

fn parse_dimension<S: AsRef<str>>(name: &str, value: Option<S>) -> Option<u32> {
    let Some(value) = value else {
        log::warn!("-{name} expects a value");
        return None;
    };
    match value.as_ref().parse::<u32>() {
        Ok(0) | Err(_) => {
            log::warn!("ignoring invalid -{name} value `{}`", value.as_ref());
            None
        }
        Ok(parsed) => Some(parsed),
    }
}

impl CommandLine {
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut command_line = CommandLine::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            if is_switch(arg, "warp") {
                command_line.use_warp_device = true;
            } else if is_switch(arg, "nomsaa") {
                command_line.disable_msaa = true;
            } else if is_switch(arg, "fullscreen") {
                command_line.fullscreen = true;
            } else if is_switch(arg, "debug") {
                command_line.debug_layer = true;
            } else if is_switch(arg, "width") {
                command_line.width = parse_dimension("width", args.next());
            } else if is_switch(arg, "height") {
                command_line.height = parse_dimension("height", args.next());
            }
        }

        command_line
    }
}

pub fn build_command_line() -> CommandLine {
    CommandLine::parse(std::env::args().skip(1))
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub enable_msaa: bool,
    pub fullscreen: bool,
    pub driver: DriverKind,
    pub debug_layer: bool,
    pub lock_timeout: Duration,
    pub resize_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "D3D11 Application".to_string(),
            width: 800,
            height: 600,
            enable_msaa: true,
            fullscreen: false,
            driver: DriverKind::Hardware,
            debug_layer: cfg!(debug_assertions),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            resize_timeout: DEFAULT_RESIZE_TIMEOUT,
        }
    }
}

impl AppConfig {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_command_line(mut self, command_line: &CommandLine) -> Self {
        if command_line.use_warp_device {
            self.driver = DriverKind::Warp;
            self.title.push_str(" (WARP)");
        }
        if command_line.disable_msaa {
            self.enable_msaa = false;
        }
        if command_line.fullscreen {
            self.fullscreen = true;
        }
        if command_line.debug_layer {
            self.debug_layer = true;
        }
        if let Some(width) = command_line.width {
            self.width = width;
        }
        if let Some(height) = command_line.height {
            self.height = height;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_accept_either_prefix_in_any_case() {
        let command_line = CommandLine::parse(["/WARP", "-NoMsaa", "-fullscreen", "/Debug"]);
        assert!(command_line.use_warp_device);
        assert!(command_line.disable_msaa);
        assert!(command_line.fullscreen);
        assert!(command_line.debug_layer);
    }

    #[test]
    fn unknown_and_bare_arguments_are_ignored() {
        let command_line = CommandLine::parse(["warp", "--warp", "-wrap", "file.txt"]);
        assert_eq!(command_line, CommandLine::default());
    }

    #[test]
    fn dimensions_take_the_next_argument() {
        let command_line = CommandLine::parse(["-width", "1280", "/height", "720"]);
        assert_eq!(command_line.width, Some(1280));
        assert_eq!(command_line.height, Some(720));
    }

    #[test]
    fn invalid_dimensions_are_dropped() {
        let command_line = CommandLine::parse(["-width", "wide", "-height", "0"]);
        assert_eq!(command_line.width, None);
        assert_eq!(command_line.height, None);

        assert_eq!(CommandLine::parse(["-width"]).width, None);
    }

    #[test]
    fn config_defaults() {
        let config = AppConfig::new("Box");
        assert_eq!(config.title, "Box");
        assert_eq!((config.width, config.height), (800, 600));
        assert!(config.enable_msaa);
        assert!(!config.fullscreen);
        assert_eq!(config.driver, DriverKind::Hardware);
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.resize_timeout, Duration::from_millis(50));
    }

    #[test]
    fn command_line_overrides_defaults() {
        let command_line = CommandLine::parse(["-warp", "-nomsaa", "-width", "1024"]);
        let config = AppConfig::new("Init Direct3D").with_command_line(&command_line);
        assert_eq!(config.title, "Init Direct3D (WARP)");
        assert_eq!(config.driver, DriverKind::Warp);
        assert!(!config.enable_msaa);
        assert_eq!((config.width, config.height), (1024, 600));
    }
}
