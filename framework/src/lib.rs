pub mod backend;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
#[cfg(windows)]
pub mod gfx;
pub mod lock;
#[cfg(test)]
mod mock;
#[cfg(windows)]
pub mod os;
pub mod registry;
pub mod shell;
pub mod util;
