// renderer.rs — wgpu implementation of the sphere's graphics services
//
// Every GPU step runs inside a validation + out-of-memory error scope; anything
// caught there is returned as a GraphicsApiError and treated as fatal upstream.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use image::RgbaImage;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::error::{GraphicsApiError, ShaderCompileError};
use crate::gpu::{
    EyeDrawList, GraphicsBackend, ShaderCode, TextureHandle, TextureUploader,
    FRAGMENT_ENTRY_POINT, MVP_UNIFORM, POSITION_ATTRIBUTE, TEX_COORD_ATTRIBUTE,
    VERTEX_ENTRY_POINT,
};
use crate::mesh::{SphereMesh, TexCoord2, Vertex3};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const POSITION_LOCATION: u32 = 0;
const TEX_COORD_LOCATION: u32 = 1;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SphereUniform {
    mvp: [[f32; 4]; 4],
}

/// Program objects, resolved once when the shader is linked.
struct RenderState {
    pipeline: wgpu::RenderPipeline,
    position_location: u32,
    tex_coord_location: u32,
}

struct MeshBuffers {
    positions: wgpu::Buffer,
    tex_coords: wgpu::Buffer,
}

struct PhotoTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

struct FrameTarget {
    output: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

pub struct WgpuBackend {
    surface: wgpu::Surface,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,

    // uniforms
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group_layout: wgpu::BindGroupLayout,
    uniform_bind_group: wgpu::BindGroup,

    // photo textures
    texture_bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    textures: HashMap<TextureHandle, PhotoTexture>,
    next_texture_id: u64,

    render_state: Option<RenderState>,
    mesh: Option<MeshBuffers>,
    frame: Option<FrameTarget>,
}

/// Runs `f` inside validation and out-of-memory error scopes.
fn scoped<T>(
    device: &wgpu::Device,
    label: &'static str,
    f: impl FnOnce() -> T,
) -> Result<T, GraphicsApiError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());

    if let Some(error) = validation {
        log::error!("{}: {}", label, error);
        return Err(GraphicsApiError::Validation {
            label,
            message: error.to_string(),
        });
    }
    if out_of_memory.is_some() {
        log::error!("{}: out of GPU memory", label);
        return Err(GraphicsApiError::OutOfMemory { label });
    }
    Ok(value)
}

fn create_depth_view(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        size: wgpu::Extent3d {
            width: config.width.max(1),
            height: config.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        label: Some("depth_texture"),
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

impl WgpuBackend {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = unsafe { instance.create_surface(window.as_ref()) }
            .context("failed to create window surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("no compatible GPU adapter"))?;
        log::info!("using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    label: None,
                },
                None,
            )
            .await
            .context("failed to open GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow!("surface reports no formats"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);
        let depth_view = create_depth_view(&device, &config);

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(MVP_UNIFORM),
            contents: bytemuck::cast_slice(&[SphereUniform {
                mvp: glam::Mat4::IDENTITY.to_cols_array_2d(),
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let uniform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
                label: Some("uniform_bind_group_layout"),
            });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
            label: Some("uniform_bind_group"),
        });

        let texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
                label: Some("texture_bind_group_layout"),
            });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::Repeat, // u wraps across the seam
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            surface,
            device,
            queue,
            config,
            depth_view,
            uniform_buffer,
            uniform_bind_group_layout,
            uniform_bind_group,
            texture_bind_group_layout,
            sampler,
            textures: HashMap::new(),
            next_texture_id: 1,
            render_state: None,
            mesh: None,
            frame: None,
        })
    }

    fn acquire_frame(&mut self) -> Result<Option<FrameTarget>, GraphicsApiError> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("surface lost, reconfiguring");
                let (surface, device, config) = (&self.surface, &self.device, &self.config);
                scoped(device, "begin_frame", || surface.configure(device, config))?;
                self.surface
                    .get_current_texture()
                    .map_err(|source| GraphicsApiError::Surface {
                        label: "begin_frame",
                        source,
                    })?
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("surface timed out, skipping frame");
                return Ok(None);
            }
            Err(source) => {
                return Err(GraphicsApiError::Surface {
                    label: "begin_frame",
                    source,
                })
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Some(FrameTarget { output, view }))
    }
}

impl TextureUploader for WgpuBackend {
    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn upload_texture(
        &mut self,
        label: &str,
        image: &RgbaImage,
    ) -> Result<TextureHandle, GraphicsApiError> {
        let (width, height) = image.dimensions();
        let texture_size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let device = &self.device;
        let queue = &self.queue;
        let layout = &self.texture_bind_group_layout;
        let sampler = &self.sampler;
        let photo = scoped(device, "upload_texture", || {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                size: texture_size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                label: Some(label),
                view_formats: &[],
            });

            queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                image,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * width),
                    rows_per_image: Some(height),
                },
                texture_size,
            );

            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
                label: Some("photo_bind_group"),
            });
            PhotoTexture {
                texture,
                bind_group,
            }
        })?;

        let handle = TextureHandle::new(self.next_texture_id);
        self.next_texture_id += 1;
        self.textures.insert(handle, photo);
        log::debug!("uploaded {} as {:?} ({}x{})", label, handle, width, height);
        Ok(handle)
    }

    fn release_texture(&mut self, handle: TextureHandle) -> Result<(), GraphicsApiError> {
        if let Some(photo) = self.textures.remove(&handle) {
            scoped(&self.device, "release_texture", || photo.texture.destroy())?;
            log::debug!("released {:?}", handle);
        }
        Ok(())
    }
}

impl GraphicsBackend for WgpuBackend {
    fn link_program(&mut self, shader: &ShaderCode) -> Result<(), ShaderCompileError> {
        shader.check_entry_points()?;

        let device = &self.device;
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sphere_pipeline_layout"),
            bind_group_layouts: &[
                &self.uniform_bind_group_layout,
                &self.texture_bind_group_layout,
            ],
            push_constant_ranges: &[],
        });
        let surface_format = self.config.format;

        let pipeline = scoped(device, "link_program", || {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(shader.label.as_str()),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shader.wgsl.as_str())),
            });

            let vertex_buffers = [
                wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex3>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Float32x3,
                        offset: 0,
                        shader_location: POSITION_LOCATION,
                    }],
                },
                wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<TexCoord2>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Float32x2,
                        offset: 0,
                        shader_location: TEX_COORD_LOCATION,
                    }],
                },
            ];

            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("sphere_pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: VERTEX_ENTRY_POINT,
                    buffers: &vertex_buffers,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: FRAGMENT_ENTRY_POINT,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: surface_format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                // Viewed from inside: clockwise faces point outwards and are culled.
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Cw,
                    cull_mode: Some(wgpu::Face::Front),
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
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
            })
        })
        .map_err(|err| ShaderCompileError::Link(err.to_string()))?;

        log::info!(
            "program linked from {}: {}@{} {}@{} {}@group(0)",
            shader.label,
            POSITION_ATTRIBUTE,
            POSITION_LOCATION,
            TEX_COORD_ATTRIBUTE,
            TEX_COORD_LOCATION,
            MVP_UNIFORM
        );
        self.render_state = Some(RenderState {
            pipeline,
            position_location: POSITION_LOCATION,
            tex_coord_location: TEX_COORD_LOCATION,
        });
        Ok(())
    }

    fn upload_mesh(&mut self, mesh: &SphereMesh) -> Result<(), GraphicsApiError> {
        let device = &self.device;
        let buffers = scoped(device, "upload_mesh", || MeshBuffers {
            positions: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(POSITION_ATTRIBUTE),
                contents: bytemuck::cast_slice(mesh.positions()),
                usage: wgpu::BufferUsages::VERTEX,
            }),
            tex_coords: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(TEX_COORD_ATTRIBUTE),
                contents: bytemuck::cast_slice(mesh.tex_coords()),
                usage: wgpu::BufferUsages::VERTEX,
            }),
        })?;
        log::info!(
            "mesh uploaded: {} strips, {} vertices",
            mesh.strips().len(),
            mesh.positions().len()
        );
        self.mesh = Some(buffers);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), GraphicsApiError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.config.width = width;
        self.config.height = height;

        let (surface, device, config) = (&self.surface, &self.device, &self.config);
        self.depth_view = scoped(device, "resize", || {
            surface.configure(device, config);
            create_depth_view(device, config)
        })?;
        Ok(())
    }

    fn begin_frame(&mut self, clear_color: [f32; 4]) -> Result<bool, GraphicsApiError> {
        let Some(target) = self.acquire_frame()? else {
            return Ok(false);
        };

        let [r, g, b, a] = clear_color.map(f64::from);
        let device = &self.device;
        let queue = &self.queue;
        let depth_view = &self.depth_view;
        scoped(device, "begin_frame", || {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clear Encoder"),
            });
            {
                let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Clear Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                            store: true,
                        },
                    })],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: depth_view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: true,
                        }),
                        stencil_ops: None,
                    }),
                });
            }
            queue.submit(std::iter::once(encoder.finish()));
        })?;

        self.frame = Some(target);
        Ok(true)
    }

    fn draw_eye(&mut self, eye: &EyeDrawList<'_>) -> Result<(), GraphicsApiError> {
        let Some(frame) = &self.frame else {
            return Ok(());
        };
        let state = self
            .render_state
            .as_ref()
            .ok_or(GraphicsApiError::ProgramMissing { label: "draw_eye" })?;
        let mesh = self
            .mesh
            .as_ref()
            .ok_or(GraphicsApiError::MeshMissing { label: "draw_eye" })?;
        let photo = self
            .textures
            .get(&eye.texture)
            .ok_or(GraphicsApiError::UnknownTexture {
                label: "draw_eye",
                handle: eye.texture,
            })?;
        let vp = eye.viewport;
        if vp.width == 0 || vp.height == 0 {
            return Ok(());
        }

        let device = &self.device;
        let queue = &self.queue;
        let uniform_buffer = &self.uniform_buffer;
        let uniform_bind_group = &self.uniform_bind_group;
        let depth_view = &self.depth_view;
        scoped(device, "draw_eye", || {
            queue.write_buffer(
                uniform_buffer,
                0,
                bytemuck::cast_slice(&[SphereUniform {
                    mvp: eye.view_projection.to_cols_array_2d(),
                }]),
            );

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Eye Encoder"),
            });
            {
                let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Eye Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &frame.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: true,
                        },
                    })],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: depth_view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: true,
                        }),
                        stencil_ops: None,
                    }),
                });

                render_pass.set_viewport(
                    vp.x as f32,
                    vp.y as f32,
                    vp.width as f32,
                    vp.height as f32,
                    0.0,
                    1.0,
                );
                render_pass.set_pipeline(&state.pipeline);
                render_pass.set_bind_group(0, uniform_bind_group, &[]);
                render_pass.set_bind_group(1, &photo.bind_group, &[]);
                render_pass.set_vertex_buffer(state.position_location, mesh.positions.slice(..));
                render_pass.set_vertex_buffer(state.tex_coord_location, mesh.tex_coords.slice(..));
                for strip in eye.strips {
                    render_pass.draw(strip.vertices(), 0..1);
                }
            }
            queue.submit(std::iter::once(encoder.finish()));
        })
    }

    fn end_frame(&mut self) -> Result<(), GraphicsApiError> {
        if let Some(frame) = self.frame.take() {
            scoped(&self.device, "end_frame", || frame.output.present())?;
        }
        Ok(())
    }
}
