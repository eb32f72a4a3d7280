// Geometry - the coloured quad drawn by GeometryApp
//
// Vertex format, the static quad data, and a Scene that owns the pipeline
// plus the vertex/index buffers feeding it.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::mem::{offset_of, size_of};

use crate::backend::buffer::BufferResource;
use crate::backend::frames::RecordCommands;
use crate::backend::pipeline::{create_graphics_pipeline, VertexLayout};
use crate::backend::shader::{create_shader_module, load_spirv};
use crate::backend::DeviceContext;
use crate::config::ShaderConfig;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec2,
    pub color: Vec3,
}

impl Vertex {
    const fn new(x: f32, y: f32, r: f32, g: f32, b: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            color: Vec3::new(r, g, b),
        }
    }
}

pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new(-0.5, -0.5, 1.0, 0.0, 0.0),
    Vertex::new(0.5, -0.5, 0.0, 1.0, 0.0),
    Vertex::new(0.5, 0.5, 0.0, 0.0, 1.0),
    Vertex::new(-0.5, 0.5, 1.0, 1.0, 1.0),
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Binding 0, interleaved: location 0 = position, location 1 = color.
pub fn vertex_layout() -> VertexLayout {
    VertexLayout {
        bindings: vec![vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)],
        attributes: vec![
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Vertex, position) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Vertex, color) as u32),
        ],
    }
}

/// Pipeline and buffers for one indexed draw.
pub struct Scene {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    vertex_buffer: BufferResource,
    index_buffer: BufferResource,
    index_count: u32,
}

impl Scene {
    pub fn new(
        context: &DeviceContext,
        render_pass: vk::RenderPass,
        shaders: &ShaderConfig,
    ) -> Result<Self> {
        let vert_code = load_spirv(&shaders.vertex)?;
        let frag_code = load_spirv(&shaders.fragment)?;

        let device = &context.device;
        let vert_module = create_shader_module(device, &vert_code)?;
        let frag_module = match create_shader_module(device, &frag_code) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let pipeline = create_graphics_pipeline(
            device,
            render_pass,
            &vertex_layout(),
            vert_module,
            frag_module,
        );

        // Modules are only needed while the pipeline is being built
        unsafe {
            device.destroy_shader_module(vert_module, None);
            device.destroy_shader_module(frag_module, None);
        }
        let (pipeline, layout) = pipeline?;

        let buffers = Self::create_buffers(context);
        let (vertex_buffer, index_buffer) = match buffers {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe {
                    device.destroy_pipeline(pipeline, None);
                    device.destroy_pipeline_layout(layout, None);
                }
                return Err(e);
            }
        };

        log::info!(
            "Scene ready: {} vertices ({} bytes), {} indices ({} bytes)",
            QUAD_VERTICES.len(),
            vertex_buffer.size(),
            QUAD_INDICES.len(),
            index_buffer.size()
        );

        Ok(Self {
            pipeline,
            layout,
            vertex_buffer,
            index_buffer,
            index_count: QUAD_INDICES.len() as u32,
        })
    }

    fn create_buffers(context: &DeviceContext) -> Result<(BufferResource, BufferResource)> {
        let mut vertex_buffer = BufferResource::with_data(
            context,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &QUAD_VERTICES,
        )
        .context("Failed to create vertex buffer")?;

        let index_buffer = match BufferResource::with_data(
            context,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &QUAD_INDICES,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                vertex_buffer.release(context);
                return Err(e).context("Failed to create index buffer");
            }
        };

        if cfg!(debug_assertions) {
            match vertex_buffer.read_back(context) {
                Ok(stored) if stored.as_slice() != bytemuck::cast_slice::<Vertex, u8>(&QUAD_VERTICES) => {
                    log::warn!("Vertex buffer contents differ from the uploaded data");
                }
                Ok(_) => {}
                Err(e) => log::warn!("Could not read back vertex buffer: {}", e),
            }
        }

        Ok((vertex_buffer, index_buffer))
    }

    /// Destroy the pipeline and release both buffers. Safe to call twice.
    pub fn release(&mut self, context: &DeviceContext) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                context.device.destroy_pipeline(self.pipeline, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                context.device.destroy_pipeline_layout(self.layout, None);
            }
        }
        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
        self.vertex_buffer.release(context);
        self.index_buffer.release(context);
    }
}

impl RecordCommands for Scene {
    fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle()], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.handle(), 0, vk::IndexType::UINT16);
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
        }
    }
}
