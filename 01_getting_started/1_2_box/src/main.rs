#![windows_subsystem = "windows"]
#![cfg_attr(not(windows), allow(dead_code))]

mod camera;
mod geometry;
#[cfg(windows)]
mod scene;

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use framework::{
        config::{build_command_line, AppConfig},
        shell::Scene,
        util::init_logging,
    };

    init_logging();

    let scene = scene::BoxScene::default();
    let config = AppConfig::new(scene.title()).with_command_line(&build_command_line());

    framework::os::run(config, scene)
}

#[cfg(not(windows))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    Err("Direct3D 11 requires Windows".into())
}
