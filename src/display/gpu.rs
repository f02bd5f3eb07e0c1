//! WebGPU texture target rendering the frame quad offscreen

use std::mem::size_of;

use glam::Mat4;
use tracing::{info, instrument};
use wgpu::util::DeviceExt;
use wgpu::*;

use super::{QuadVertex, TextureTarget, QUAD_VERTICES};
use crate::error::{PipelineError, Result};
use crate::processing::ProcessedRaster;

const FRAME_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
const VERTEX_ATTRIBUTES: [VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

const SHADER: &str = r#"
    struct Uniforms {
        mvp: mat4x4<f32>,
    };

    @group(0) @binding(0) var<uniform> uniforms: Uniforms;
    @group(0) @binding(1) var frame_texture: texture_2d<f32>;
    @group(0) @binding(2) var frame_sampler: sampler;

    struct VertexOutput {
        @builtin(position) position: vec4<f32>,
        @location(0) uv: vec2<f32>,
    };

    @vertex
    fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
        var out: VertexOutput;
        out.position = uniforms.mvp * vec4<f32>(position, 0.0, 1.0);
        out.uv = uv;
        return out;
    }

    @fragment
    fn fs_main(frag: VertexOutput) -> @location(0) vec4<f32> {
        return textureSample(frame_texture, frame_sampler, frag.uv);
    }
"#;

struct FrameTexture {
    texture: Texture,
    bind_group: BindGroup,
    width: u32,
    height: u32,
}

struct RenderTarget {
    _texture: Texture,
    view: TextureView,
}

/// Headless wgpu target: frame texture + full-screen quad into an offscreen
/// render target of viewport size.
pub struct GpuTarget {
    device: Device,
    queue: Queue,
    pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    sampler: Sampler,
    vertex_buffer: Buffer,
    uniform_buffer: Buffer,
    frame: Option<FrameTexture>,
    output: RenderTarget,
}

impl GpuTarget {
    /// Initialize WebGPU without a window.
    #[instrument]
    pub fn new(viewport_width: u32, viewport_height: u32) -> Result<Self> {
        pollster::block_on(Self::init(viewport_width, viewport_height))
    }

    async fn init(viewport_width: u32, viewport_height: u32) -> Result<Self> {
        info!("Initializing WebGPU texture target");

        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        // Get adapter - prefer high-performance
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| PipelineError::Gpu("No suitable GPU adapter found".into()))?;

        info!("GPU: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("edgecam device"),
                    required_features: Features::empty(),
                    required_limits: Limits::downlevel_defaults(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| PipelineError::Gpu(e.to_string()))?;

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("frame bind group layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::VERTEX,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline = Self::create_render_pipeline(&device, &bind_group_layout);

        // Linear filtering, clamped edges
        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("frame sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });

        let vertex_buffer = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("quad vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
        });

        let uniform_buffer = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("projection"),
            contents: bytemuck::cast_slice(&Mat4::IDENTITY.to_cols_array()),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        let output = Self::create_output(&device, viewport_width, viewport_height);

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            vertex_buffer,
            uniform_buffer,
            frame: None,
            output,
        })
    }

    fn create_output(device: &Device, width: u32, height: u32) -> RenderTarget {
        let texture = device.create_texture(&TextureDescriptor {
            label: Some("viewport"),
            size: Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: FRAME_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        RenderTarget {
            _texture: texture,
            view,
        }
    }

    fn write_frame(&self, texture: &Texture, raster: &ProcessedRaster) {
        self.queue.write_texture(
            ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            raster.data(),
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * raster.width()),
                rows_per_image: Some(raster.height()),
            },
            Extent3d {
                width: raster.width(),
                height: raster.height(),
                depth_or_array_layers: 1,
            },
        );
    }

    fn create_render_pipeline(device: &Device, layout: &BindGroupLayout) -> RenderPipeline {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Display Shader"),
            source: ShaderSource::Wgsl(SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Display Pipeline Layout"),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Display Pipeline"),
            layout: Some(&pipeline_layout),
            cache: None,
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[VertexBufferLayout {
                    array_stride: size_of::<QuadVertex>() as BufferAddress,
                    step_mode: VertexStepMode::Vertex,
                    attributes: &VERTEX_ATTRIBUTES,
                }],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(ColorTargetState {
                    format: FRAME_FORMAT,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
        })
    }
}

impl TextureTarget for GpuTarget {
    fn allocate(&mut self, raster: &ProcessedRaster) -> Result<()> {
        // Drop the old texture first so its memory can be reused.
        self.frame = None;

        let max = self.device.limits().max_texture_dimension_2d;
        if raster.width() > max || raster.height() > max {
            return Err(PipelineError::AllocationFailure(format!(
                "{}x{} exceeds max texture dimension {max}",
                raster.width(),
                raster.height()
            )));
        }

        self.device.push_error_scope(ErrorFilter::Validation);
        self.device.push_error_scope(ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some("Frame Texture"),
            size: Extent3d {
                width: raster.width(),
                height: raster.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: FRAME_FORMAT,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        let invalid = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = out_of_memory.or(invalid) {
            return Err(PipelineError::AllocationFailure(err.to_string()));
        }

        self.write_frame(&texture, raster);

        let view = texture.create_view(&TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("frame bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        self.frame = Some(FrameTexture {
            texture,
            bind_group,
            width: raster.width(),
            height: raster.height(),
        });
        Ok(())
    }

    fn update(&mut self, raster: &ProcessedRaster) -> Result<()> {
        let frame = self
            .frame
            .as_ref()
            .ok_or_else(|| PipelineError::Gpu("update before allocate".into()))?;
        if (frame.width, frame.height) != raster.dimensions() {
            return Err(PipelineError::InvalidDimensions(format!(
                "update {}x{} into {}x{} texture",
                raster.width(),
                raster.height(),
                frame.width,
                frame.height
            )));
        }
        self.write_frame(&frame.texture, raster);
        Ok(())
    }

    fn draw(&mut self, quad: &[QuadVertex; 4], projection: &Mat4) -> Result<()> {
        let Some(frame) = self.frame.as_ref() else {
            return Ok(());
        };

        self.queue.write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(quad));
        self.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::cast_slice(&projection.to_cols_array()),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &self.output.view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::BLACK),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &frame.bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.draw(0..4, 0..1); // Two-triangle strip
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn resize_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        self.output = Self::create_output(&self.device, width, height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplaySink;

    #[test]
    fn test_gpu_present_when_adapter_available() {
        let target = match GpuTarget::new(64, 48) {
            Ok(target) => target,
            Err(e) => {
                eprintln!("skipping GPU test: {e}");
                return;
            }
        };
        let mut sink = DisplaySink::new(target, 64, 48);
        let frame = ProcessedRaster::filled(16, 8, [10, 20, 30, 255]).unwrap();
        sink.present(&frame).unwrap();
        sink.present(&frame).unwrap();
        assert_eq!(sink.stats().allocations, 1);
        assert_eq!(sink.stats().updates, 1);
    }
}
