use std::f32::consts::{FRAC_PI_4, PI};

use framework::shell::MouseButtons;
use glam::{Mat4, Vec3};

const MIN_RADIUS: f32 = 3.0;
const MAX_RADIUS: f32 = 15.0;
const PHI_MARGIN: f32 = 0.1;
const DEGREES_PER_PIXEL: f32 = 0.25;
const ZOOM_PER_PIXEL: f32 = 0.005;

/// Camera on a sphere around the origin, always looking at it.
#[derive(Clone, Copy, Debug)]
pub struct OrbitCamera {
    pub theta: f32,
    pub phi: f32,
    pub radius: f32,
    last_mouse: (i32, i32),
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            theta: 1.5 * PI,
            phi: 0.25 * PI,
            radius: 5.0,
            last_mouse: (0, 0),
        }
    }
}

impl OrbitCamera {
    pub fn position(&self) -> Vec3 {
        Vec3::new(
            self.radius * self.phi.sin() * self.theta.cos(),
            self.radius * self.phi.cos(),
            self.radius * self.phi.sin() * self.theta.sin(),
        )
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_lh(self.position(), Vec3::ZERO, Vec3::Y)
    }

    pub fn projection(aspect_ratio: f32) -> Mat4 {
        Mat4::perspective_lh(FRAC_PI_4, aspect_ratio, 1.0, 1000.0)
    }

    pub fn begin_drag(&mut self, x: i32, y: i32) {
        self.last_mouse = (x, y);
    }

    /// Left button orbits, right button zooms.
    pub fn drag(&mut self, buttons: MouseButtons, x: i32, y: i32) {
        let dx = (x - self.last_mouse.0) as f32;
        let dy = (y - self.last_mouse.1) as f32;

        if buttons.contains(MouseButtons::LEFT) {
            self.theta += (DEGREES_PER_PIXEL * dx).to_radians();
            self.phi = (self.phi + (DEGREES_PER_PIXEL * dy).to_radians())
                .clamp(PHI_MARGIN, PI - PHI_MARGIN);
        } else if buttons.contains(MouseButtons::RIGHT) {
            self.radius =
                (self.radius + ZOOM_PER_PIXEL * (dx - dy)).clamp(MIN_RADIUS, MAX_RADIUS);
        }

        self.last_mouse = (x, y);
    }
}
