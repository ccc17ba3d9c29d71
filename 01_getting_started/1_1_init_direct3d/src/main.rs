#![windows_subsystem = "windows"]

#[cfg(windows)]
mod scene {
    use std::error::Error;

    use framework::{
        device::GraphicsDeviceManager,
        error::DeviceError,
        gfx::{clear_views, D3D11Backend},
        shell::Scene,
    };

    const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

    #[derive(Default)]
    pub struct InitDirect3D;

    impl Scene<D3D11Backend> for InitDirect3D {
        fn title(&self) -> &str {
            "Init Direct3D"
        }

        fn init(&mut self, graphics: &GraphicsDeviceManager<D3D11Backend>) -> Result<(), Box<dyn Error>> {
            log::info!("device ready in state {:?}", graphics.state());
            Ok(())
        }

        fn update(&mut self, _dt: f32) {}

        fn draw(&mut self, graphics: &GraphicsDeviceManager<D3D11Backend>) -> Result<(), Box<dyn Error>> {
            let guard = graphics.lock()?;
            let (Some(context), Some(render_target), Some(depth_stencil)) = (
                guard.context(),
                guard.render_target_view(),
                guard.depth_stencil_view(),
            ) else {
                return Err(DeviceError::MissingResource {
                    resource: "output views",
                }
                .into());
            };

            clear_views(context, render_target, depth_stencil, &CLEAR_COLOR);
            guard.present(0)?;

            Ok(())
        }
    }
}

#[cfg(windows)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use framework::{
        config::{build_command_line, AppConfig},
        shell::Scene,
        util::init_logging,
    };

    init_logging();

    let scene = scene::InitDirect3D;
    let config = AppConfig::new(scene.title()).with_command_line(&build_command_line());

    framework::os::run(config, scene)
}

#[cfg(not(windows))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    Err("Direct3D 11 requires Windows".into())
}
