//! wgpu implementation of [`GpuBackend`].

use std::num::NonZeroU64;

use crate::backend::{BufferKind, DrawBindings, FineCullBindings, GpuBackend};
use crate::buffer::{
    check_buffer_size, create_index_buffer, create_readback_buffer, create_sized_buffer,
    create_uniform_buffer, create_vertex_buffer,
};
use crate::error::{RenderError, RenderResult};
use crate::mesh::MeshProvider;
use crate::shader::{ShaderBuilder, FINE_CULL_WGSL, GRASS_WGSL};
use crate::uniforms::{
    DrawIndexedArgs, FineCullUniforms, GrassGlobals, APPEND_COUNTER_SIZE, FINE_CULL_WORKGROUP_SIZE,
};

/// Format of the offscreen color target.
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Format of the depth target.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Largest work-group count per dispatch dimension.
const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

struct MeshBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
}

/// Headless wgpu device rendering into an offscreen color target.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,
    color_texture: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    cull_pipeline: wgpu::ComputePipeline,
    cull_bind_group_layout: wgpu::BindGroupLayout,
    draw_pipeline: wgpu::RenderPipeline,
    draw_bind_group_layout: wgpu::BindGroupLayout,
    cull_uniform_buffer: wgpu::Buffer,
    globals_buffer: wgpu::Buffer,
    mesh: Option<MeshBuffers>,
    encoder: Option<wgpu::CommandEncoder>,
    clear_color: wgpu::Color,
}

impl WgpuBackend {
    /// Creates a backend without a window.
    pub async fn new_headless(width: u32, height: u32) -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..wgpu::InstanceDescriptor::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| RenderError::AdapterCreationFailed)?;

        // Position and append buffers grow with the instance count, so take
        // everything the adapter offers.
        let limits = adapter.limits();
        log::info!(
            "using adapter {:?} (storage binding limit {} bytes)",
            adapter.get_info().name,
            limits.max_storage_buffer_binding_size
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("grassfield device (headless)"),
                required_features: wgpu::Features::empty(),
                required_limits: limits,
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        let width = width.max(1);
        let height = height.max(1);
        let (color_texture, color_view) = Self::create_color_texture(&device, width, height);
        let depth_view = Self::create_depth_view(&device, width, height);

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let (cull_pipeline, cull_bind_group_layout) = Self::create_cull_pipeline(&device)?;
        let (draw_pipeline, draw_bind_group_layout) = Self::create_draw_pipeline(&device)?;
        if let Some(error) = device.pop_error_scope().await {
            return Err(RenderError::ShaderCompilationFailed(error.to_string()));
        }

        let cull_uniform_buffer = create_uniform_buffer(
            &device,
            &FineCullUniforms::new(glam::Mat4::IDENTITY, 0.0, 0, 0),
            Some("fine cull uniforms"),
        );
        let globals_buffer =
            create_uniform_buffer(&device, &GrassGlobals::default(), Some("grass globals"));

        Ok(Self {
            device,
            queue,
            width,
            height,
            color_texture,
            color_view,
            depth_view,
            cull_pipeline,
            cull_bind_group_layout,
            draw_pipeline,
            draw_bind_group_layout,
            cull_uniform_buffer,
            globals_buffer,
            mesh: None,
            encoder: None,
            clear_color: wgpu::Color {
                r: 0.52,
                g: 0.70,
                b: 0.88,
                a: 1.0,
            },
        })
    }

    /// Target width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Target height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    fn create_color_texture(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("grass color target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("grass depth target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    fn storage_entry(binding: u32, visibility: wgpu::ShaderStages, read_only: bool) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages, size: u64) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: NonZeroU64::new(size),
            },
            count: None,
        }
    }

    fn create_cull_pipeline(
        device: &wgpu::Device,
    ) -> RenderResult<(wgpu::ComputePipeline, wgpu::BindGroupLayout)> {
        let shader = ShaderBuilder::new()
            .with_source(FINE_CULL_WGSL)
            .with_label("fine cull shader")
            .build_module(device)?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fine cull bind group layout"),
            entries: &[
                // Positions
                Self::storage_entry(0, wgpu::ShaderStages::COMPUTE, true),
                // Visible cells
                Self::storage_entry(1, wgpu::ShaderStages::COMPUTE, true),
                // Visible instances (append)
                Self::storage_entry(2, wgpu::ShaderStages::COMPUTE, false),
                Self::uniform_entry(
                    3,
                    wgpu::ShaderStages::COMPUTE,
                    std::mem::size_of::<FineCullUniforms>() as u64,
                ),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("fine cull pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("fine cull pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Ok((pipeline, bind_group_layout))
    }

    fn create_draw_pipeline(
        device: &wgpu::Device,
    ) -> RenderResult<(wgpu::RenderPipeline, wgpu::BindGroupLayout)> {
        let shader = ShaderBuilder::new()
            .with_source(GRASS_WGSL)
            .with_label("grass shader")
            .build_module(device)?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("grass bind group layout"),
            entries: &[
                Self::uniform_entry(
                    0,
                    wgpu::ShaderStages::VERTEX_FRAGMENT,
                    std::mem::size_of::<GrassGlobals>() as u64,
                ),
                Self::storage_entry(1, wgpu::ShaderStages::VERTEX, true),
                Self::storage_entry(2, wgpu::ShaderStages::VERTEX, true),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("grass pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("grass pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 3]>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None, // Blades are seen from both sides
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Ok((pipeline, bind_group_layout))
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("grass frame encoder"),
            })
        })
    }

    /// Bytes per row of a texture copy, padded to wgpu's alignment.
    fn aligned_bytes_per_row(width: u32) -> u32 {
        let unpadded = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        unpadded.div_ceil(align) * align
    }

    fn map_and_read(&self, buffer: &wgpu::Buffer) -> RenderResult<Vec<u8>> {
        let buffer_slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());
        rx.recv()
            .map_err(|_| RenderError::BufferMapFailed)?
            .map_err(|_| RenderError::BufferMapFailed)?;

        let data = buffer_slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(data)
    }

    /// Reads the color target back as tightly packed RGBA8 rows.
    pub fn read_pixels(&mut self) -> RenderResult<Vec<u8>> {
        let bytes_per_row = Self::aligned_bytes_per_row(self.width);
        let readback = create_readback_buffer(
            &self.device,
            u64::from(bytes_per_row) * u64::from(self.height),
            Some("grass color readback"),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("color readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.color_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let data = self.map_and_read(&readback)?;
        let row_bytes = (self.width * 4) as usize;
        let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
        for row in data.chunks_exact(bytes_per_row as usize) {
            pixels.extend_from_slice(&row[..row_bytes]);
        }
        Ok(pixels)
    }
}

/// Splits a work-group count into X and Y so neither exceeds the per-dimension limit.
fn split_workgroups(workgroups: u32) -> (u32, u32) {
    if workgroups <= MAX_WORKGROUPS_PER_DIMENSION {
        (workgroups, 1)
    } else {
        (
            MAX_WORKGROUPS_PER_DIMENSION,
            workgroups.div_ceil(MAX_WORKGROUPS_PER_DIMENSION),
        )
    }
}

impl GpuBackend for WgpuBackend {
    type Buffer = wgpu::Buffer;

    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> RenderResult<wgpu::Buffer> {
        check_buffer_size(kind, size, &self.device.limits())?;
        Ok(create_sized_buffer(&self.device, kind, size))
    }

    fn write_buffer(&mut self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        if !data.is_empty() {
            self.queue.write_buffer(buffer, offset, data);
        }
    }

    fn release_buffer(&mut self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }

    fn upload_mesh(&mut self, mesh: &dyn MeshProvider) -> RenderResult<()> {
        let vertices: Vec<[f32; 3]> = mesh.vertices().iter().map(|v| v.to_array()).collect();
        if vertices.is_empty() || mesh.index_count() == 0 {
            return Err(RenderError::BufferCreationFailed("mesh has no triangles".into()));
        }
        self.mesh = Some(MeshBuffers {
            vertices: create_vertex_buffer(&self.device, &vertices, Some("grass mesh vertices")),
            indices: create_index_buffer(&self.device, mesh.indices(), Some("grass mesh indices")),
        });
        Ok(())
    }

    fn set_globals(&mut self, globals: &GrassGlobals) {
        self.queue
            .write_buffer(&self.globals_buffer, 0, bytemuck::bytes_of(globals));
    }

    fn begin_frame(&mut self) {
        if self.encoder.is_some() {
            log::warn!("begin_frame called twice; continuing the open frame");
        }
        self.encoder();
    }

    fn reset_counter(&mut self, visible_instances: &wgpu::Buffer) {
        self.encoder()
            .clear_buffer(visible_instances, 0, Some(APPEND_COUNTER_SIZE));
    }

    fn set_fine_cull_params(&mut self, uniforms: &FineCullUniforms) {
        self.queue
            .write_buffer(&self.cull_uniform_buffer, 0, bytemuck::bytes_of(uniforms));
    }

    fn dispatch_fine_cull(&mut self, bindings: &FineCullBindings<'_, wgpu::Buffer>, workgroups: u32) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fine cull bind group"),
            layout: &self.cull_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: bindings.positions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bindings.visible_cells.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bindings.visible_instances.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.cull_uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let (x, y) = split_workgroups(workgroups);
        let pipeline = self.cull_pipeline.clone();
        let encoder = self.encoder();
        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("fine cull pass"),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&pipeline);
        compute_pass.set_bind_group(0, &bind_group, &[]);
        compute_pass.dispatch_workgroups(x, y, 1);
        log::trace!(
            "fine cull: {workgroups} work groups of {FINE_CULL_WORKGROUP_SIZE} ({x} x {y})"
        );
    }

    fn copy_counter(&mut self, src: &wgpu::Buffer, dst: &wgpu::Buffer, dst_offset: u64) {
        self.encoder()
            .copy_buffer_to_buffer(src, 0, dst, dst_offset, APPEND_COUNTER_SIZE);
    }

    fn draw_indexed_indirect(&mut self, bindings: &DrawBindings<'_, wgpu::Buffer>) {
        let Some(mesh) = self.mesh.as_ref() else {
            log::warn!("indirect draw issued before a mesh was uploaded; skipped");
            return;
        };
        let (vertices, indices) = (mesh.vertices.clone(), mesh.indices.clone());

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("grass bind group"),
            layout: &self.draw_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.globals_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bindings.positions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bindings.visible_instances.as_entire_binding(),
                },
            ],
        });

        let pipeline = self.draw_pipeline.clone();
        let color_view = self.color_view.clone();
        let depth_view = self.depth_view.clone();
        let clear_color = self.clear_color;
        let encoder = self.encoder();
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("grass pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear_color),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            ..Default::default()
        });
        render_pass.set_pipeline(&pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.set_vertex_buffer(0, vertices.slice(..));
        render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
        render_pass.draw_indexed_indirect(bindings.draw_args, 0);
    }

    fn end_frame(&mut self) -> RenderResult<()> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        Ok(())
    }

    fn read_draw_args(&mut self, draw_args: &wgpu::Buffer) -> RenderResult<DrawIndexedArgs> {
        let size = std::mem::size_of::<DrawIndexedArgs>() as u64;
        let readback = create_readback_buffer(&self.device, size, Some("draw args readback"));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("draw args readback encoder"),
            });
        encoder.copy_buffer_to_buffer(draw_args, 0, &readback, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let data = self.map_and_read(&readback)?;
        data.get(..size as usize)
            .map(bytemuck::pod_read_unaligned)
            .ok_or(RenderError::BufferMapFailed)
    }
}
