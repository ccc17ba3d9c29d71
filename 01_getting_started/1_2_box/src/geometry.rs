use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BoxVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];
const YELLOW: [f32; 4] = [1.0, 1.0, 0.0, 1.0];
const CYAN: [f32; 4] = [0.0, 1.0, 1.0, 1.0];
const MAGENTA: [f32; 4] = [1.0, 0.0, 1.0, 1.0];

pub const BOX_VERTICES: [BoxVertex; 8] = [
    BoxVertex { position: [-1.0, -1.0, -1.0], color: WHITE },
    BoxVertex { position: [-1.0, 1.0, -1.0], color: BLACK },
    BoxVertex { position: [1.0, 1.0, -1.0], color: RED },
    BoxVertex { position: [1.0, -1.0, -1.0], color: GREEN },
    BoxVertex { position: [-1.0, -1.0, 1.0], color: BLUE },
    BoxVertex { position: [-1.0, 1.0, 1.0], color: YELLOW },
    BoxVertex { position: [1.0, 1.0, 1.0], color: CYAN },
    BoxVertex { position: [1.0, -1.0, 1.0], color: MAGENTA },
];

/// Clockwise when seen from outside the cube.
#[rustfmt::skip]
pub const BOX_INDICES: [u32; 36] = [
    // front
    0, 1, 2, 0, 2, 3,
    // back
    4, 6, 5, 4, 7, 6,
    // left
    4, 5, 1, 4, 1, 0,
    // right
    3, 2, 6, 3, 6, 7,
    // top
    1, 5, 6, 1, 6, 2,
    // bottom
    4, 0, 3, 4, 3, 7,
];
