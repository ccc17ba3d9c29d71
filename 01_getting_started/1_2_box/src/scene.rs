use std::{error::Error, f32::consts::TAU, mem};

use bytemuck::{Pod, Zeroable};
use framework::{
    device::GraphicsDeviceManager,
    error::DeviceError,
    gfx::{blob_bytes, clear_views, compile_shader, native_error, D3D11Backend},
    shell::{MouseButtons, Scene},
};
use glam::Mat4;
use windows::{
    core::s,
    Win32::Graphics::{
        Direct3D::D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        Direct3D11::{
            ID3D11Buffer, ID3D11Device, ID3D11DeviceContext, ID3D11InputLayout,
            ID3D11PixelShader, ID3D11VertexShader, D3D11_BIND_CONSTANT_BUFFER,
            D3D11_BIND_INDEX_BUFFER, D3D11_BIND_VERTEX_BUFFER, D3D11_BUFFER_DESC,
            D3D11_CPU_ACCESS_WRITE, D3D11_INPUT_ELEMENT_DESC, D3D11_INPUT_PER_VERTEX_DATA,
            D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_WRITE_DISCARD, D3D11_SUBRESOURCE_DATA,
            D3D11_USAGE_DYNAMIC, D3D11_USAGE_IMMUTABLE,
        },
        Dxgi::Common::{
            DXGI_FORMAT_R32G32B32A32_FLOAT, DXGI_FORMAT_R32G32B32_FLOAT, DXGI_FORMAT_R32_UINT,
        },
    },
};

use crate::{
    camera::OrbitCamera,
    geometry::{BoxVertex, BOX_INDICES, BOX_VERTICES},
};

const SHADER_SOURCE: &str = include_str!("box.hlsl");
const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 1.0, 1.0];
/// Radians per second.
const SPIN_RATE: f32 = 0.5;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ObjectConstants {
    world_view_proj: [f32; 16],
}

struct PipelineResources {
    vertex_buffer: ID3D11Buffer,
    index_buffer: ID3D11Buffer,
    constant_buffer: ID3D11Buffer,
    input_layout: ID3D11InputLayout,
    vertex_shader: ID3D11VertexShader,
    pixel_shader: ID3D11PixelShader,
}

fn created<T>(
    operation: &'static str,
    result: windows::core::Result<()>,
    object: Option<T>,
) -> Result<T, Box<dyn Error>> {
    result.map_err(native_error(operation))?;
    Ok(object.ok_or(DeviceError::MissingResource { resource: operation })?)
}

fn create_buffer(
    device: &ID3D11Device,
    desc: &D3D11_BUFFER_DESC,
    contents: Option<&[u8]>,
) -> Result<ID3D11Buffer, Box<dyn Error>> {
    let initial = contents.map(|bytes| D3D11_SUBRESOURCE_DATA {
        pSysMem: bytes.as_ptr() as *const _,
        SysMemPitch: 0,
        SysMemSlicePitch: 0,
    });

    let mut buffer = None;
    let result = unsafe {
        device.CreateBuffer(
            desc,
            initial.as_ref().map(|data| data as *const _),
            Some(&mut buffer),
        )
    };
    created("ID3D11Device::CreateBuffer", result, buffer)
}

impl PipelineResources {
    fn new(device: &ID3D11Device) -> Result<Self, Box<dyn Error>> {
        let vertices: &[u8] = bytemuck::cast_slice(&BOX_VERTICES);
        let vertex_buffer = create_buffer(
            device,
            &D3D11_BUFFER_DESC {
                ByteWidth: vertices.len() as u32,
                Usage: D3D11_USAGE_IMMUTABLE,
                BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
                ..Default::default()
            },
            Some(vertices),
        )?;

        let indices: &[u8] = bytemuck::cast_slice(&BOX_INDICES);
        let index_buffer = create_buffer(
            device,
            &D3D11_BUFFER_DESC {
                ByteWidth: indices.len() as u32,
                Usage: D3D11_USAGE_IMMUTABLE,
                BindFlags: D3D11_BIND_INDEX_BUFFER.0 as u32,
                ..Default::default()
            },
            Some(indices),
        )?;

        let constant_buffer = create_buffer(
            device,
            &D3D11_BUFFER_DESC {
                ByteWidth: mem::size_of::<ObjectConstants>() as u32,
                Usage: D3D11_USAGE_DYNAMIC,
                BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
                CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
                ..Default::default()
            },
            None,
        )?;

        let vs_blob = compile_shader(SHADER_SOURCE, "VSMain", "vs_5_0")?;
        let ps_blob = compile_shader(SHADER_SOURCE, "PSMain", "ps_5_0")?;
        let vs_bytecode = blob_bytes(&vs_blob);
        let ps_bytecode = blob_bytes(&ps_blob);

        let mut vertex_shader = None;
        let result =
            unsafe { device.CreateVertexShader(vs_bytecode, None, Some(&mut vertex_shader)) };
        let vertex_shader = created("ID3D11Device::CreateVertexShader", result, vertex_shader)?;

        let mut pixel_shader = None;
        let result =
            unsafe { device.CreatePixelShader(ps_bytecode, None, Some(&mut pixel_shader)) };
        let pixel_shader = created("ID3D11Device::CreatePixelShader", result, pixel_shader)?;

        let layout = [
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("POSITION"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: mem::offset_of!(BoxVertex, position) as u32,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("COLOR"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32A32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: mem::offset_of!(BoxVertex, color) as u32,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];
        let mut input_layout = None;
        let result =
            unsafe { device.CreateInputLayout(&layout, vs_bytecode, Some(&mut input_layout)) };
        let input_layout = created("ID3D11Device::CreateInputLayout", result, input_layout)?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            constant_buffer,
            input_layout,
            vertex_shader,
            pixel_shader,
        })
    }

    fn upload_constants(
        &self,
        context: &ID3D11DeviceContext,
        constants: &ObjectConstants,
    ) -> Result<(), Box<dyn Error>> {
        let bytes = bytemuck::bytes_of(constants);
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();

        unsafe {
            context
                .Map(
                    &self.constant_buffer,
                    0,
                    D3D11_MAP_WRITE_DISCARD,
                    0,
                    Some(&mut mapped),
                )
                .map_err(native_error("ID3D11DeviceContext::Map"))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.pData as *mut u8, bytes.len());
            context.Unmap(&self.constant_buffer, 0);
        }

        Ok(())
    }

    fn bind(&self, context: &ID3D11DeviceContext) {
        let stride = mem::size_of::<BoxVertex>() as u32;
        let offset = 0u32;

        unsafe {
            context.IASetInputLayout(&self.input_layout);
            context.IASetPrimitiveTopology(D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            context.IASetVertexBuffers(
                0,
                1,
                Some(&Some(self.vertex_buffer.clone())),
                Some(&stride),
                Some(&offset),
            );
            context.IASetIndexBuffer(&self.index_buffer, DXGI_FORMAT_R32_UINT, 0);

            context.VSSetShader(&self.vertex_shader, None);
            context.VSSetConstantBuffers(0, Some(&[Some(self.constant_buffer.clone())]));
            context.PSSetShader(&self.pixel_shader, None);
        }
    }
}

/// A spinning colour cube seen through an orbit camera.
pub struct BoxScene {
    camera: OrbitCamera,
    projection: Mat4,
    spin: f32,
    pipeline: Option<PipelineResources>,
}

impl Default for BoxScene {
    fn default() -> Self {
        Self {
            camera: OrbitCamera::default(),
            projection: OrbitCamera::projection(4.0 / 3.0),
            spin: 0.0,
            pipeline: None,
        }
    }
}

impl BoxScene {
    fn world_view_proj(&self) -> Mat4 {
        self.projection * self.camera.view() * Mat4::from_rotation_y(self.spin)
    }
}

impl Scene<D3D11Backend> for BoxScene {
    fn title(&self) -> &str {
        "Box Demo"
    }

    fn init(&mut self, graphics: &GraphicsDeviceManager<D3D11Backend>) -> Result<(), Box<dyn Error>> {
        let guard = graphics.lock()?;
        let device = guard.device().ok_or(DeviceError::MissingResource { resource: "device" })?;

        self.pipeline = Some(PipelineResources::new(device)?);
        log::info!("box pipeline created");

        Ok(())
    }

    fn on_resize(&mut self, aspect_ratio: f32) {
        self.projection = OrbitCamera::projection(aspect_ratio);
    }

    fn update(&mut self, dt: f32) {
        self.spin = (self.spin + SPIN_RATE * dt) % TAU;
    }

    fn draw(&mut self, graphics: &GraphicsDeviceManager<D3D11Backend>) -> Result<(), Box<dyn Error>> {
        let pipeline = self.pipeline.as_ref().ok_or(DeviceError::MissingResource {
            resource: "box pipeline",
        })?;

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

        let constants = ObjectConstants {
            world_view_proj: self.world_view_proj().to_cols_array(),
        };
        pipeline.upload_constants(context, &constants)?;
        pipeline.bind(context);

        unsafe { context.DrawIndexed(BOX_INDICES.len() as u32, 0, 0) };

        guard.present(0)?;

        Ok(())
    }

    fn on_mouse_down(&mut self, _buttons: MouseButtons, x: i32, y: i32) {
        self.camera.begin_drag(x, y);
    }

    fn on_mouse_move(&mut self, buttons: MouseButtons, x: i32, y: i32) {
        self.camera.drag(buttons, x, y);
    }
}
