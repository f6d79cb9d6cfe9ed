//! Device buffers, textures and bind group layouts.

use bytemuck::{Pod, Zeroable};
use half::f16;
use wgpu::util::DeviceExt;

use crate::backend::PresentTarget;
use crate::scene::EnvironmentMap;
use crate::sbvh::GpuSceneData;

/// `PathState` in `kernels.wgsl`: four vec3+scalar slots plus the hit record.
pub(super) const PATH_STATE_SIZE: u64 = 80;
/// Albedo and normal `vec4<f32>` per pixel.
pub(super) const FEATURE_SIZE: u64 = 32;
/// `array<atomic<u32>, 4>` ray counters.
pub(super) const STATS_SIZE: u64 = 16;

/// Per-dispatch uniform.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(super) struct FrameUniform {
    pub iteration: u32,
    pub _pad: [u32; 3],
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Group 0: scene, path state, accumulator, counters, environment, denoiser guides.
pub(super) fn scene_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("wt_scene_layout"),
        entries: &[
            uniform_entry(0),
            uniform_entry(1),
            storage_entry(2, true),
            storage_entry(3, true),
            storage_entry(4, true),
            storage_entry(5, false),
            storage_entry(6, false),
            storage_entry(7, false),
            wgpu::BindGroupLayoutEntry {
                binding: 8,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 9,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            storage_entry(10, true),
            storage_entry(11, false),
        ],
    })
}

/// Group 1: the display texture a kernel writes.
pub(super) fn output_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("wt_output_layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::Rgba8Unorm,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        }],
    })
}

/// Tonemapped RGBA8 texture the kernels write and the window samples.
pub(super) struct DisplayTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub bind_group: wgpu::BindGroup,
}

impl DisplayTarget {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, width: u32, height: u32, label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            }],
        });
        Self { texture, view, bind_group }
    }
}

/// Per-pixel storage, reallocated on resize.
pub(super) struct RenderTargets {
    pub width: u32,
    pub height: u32,
    pub paths: wgpu::Buffer,
    pub accum: wgpu::Buffer,
    pub features: wgpu::Buffer,
    pub fronts: [DisplayTarget; 2],
    pub pixel: DisplayTarget,
}

impl RenderTargets {
    pub fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, width: u32, height: u32) -> Self {
        let pixels = u64::from(width) * u64::from(height);
        let paths = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("wt_paths"),
            size: pixels * PATH_STATE_SIZE,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let accum = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("wt_accum"),
            size: pixels * 16,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let features = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("wt_features"),
            size: pixels * FEATURE_SIZE,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Self {
            width,
            height,
            paths,
            accum,
            features,
            fronts: [
                DisplayTarget::new(device, layout, width, height, "wt_front0"),
                DisplayTarget::new(device, layout, width, height, "wt_front1"),
            ],
            pixel: DisplayTarget::new(device, layout, width, height, "wt_pixel_buffer"),
        }
    }

    pub fn display(&self, target: PresentTarget) -> &DisplayTarget {
        match target {
            PresentTarget::Front(f) => &self.fronts[f.index()],
            PresentTarget::PixelBuffer => &self.pixel,
        }
    }
}

/// Hierarchy, triangles and materials.
pub(super) struct SceneBuffers {
    pub nodes: wgpu::Buffer,
    pub triangles: wgpu::Buffer,
    pub materials: wgpu::Buffer,
}

impl SceneBuffers {
    pub fn new(device: &wgpu::Device, data: &GpuSceneData) -> Self {
        // wgpu rejects zero-sized bindings
        let init = |label: &str, bytes: &[u8], min: usize| {
            let zeros = vec![0u8; min];
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: if bytes.is_empty() { &zeros } else { bytes },
                usage: wgpu::BufferUsages::STORAGE,
            })
        };
        Self {
            nodes: init("wt_nodes", data.nodes_bytes(), 32),
            triangles: init("wt_triangles", data.triangles_bytes(), 96),
            materials: init("wt_materials", data.materials_bytes(), 32),
        }
    }

    pub fn empty(device: &wgpu::Device) -> Self {
        Self::new(
            device,
            &GpuSceneData {
                nodes: Vec::new(),
                triangles: Vec::new(),
                materials: Vec::new(),
            },
        )
    }
}

/// Environment texture, sampler and sampling CDFs.
pub(super) struct EnvResources {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub cdf: wgpu::Buffer,
}

impl EnvResources {
    /// 1x1 black map bound until a real one is uploaded.
    pub fn placeholder(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let data = [f16::ZERO, f16::ZERO, f16::ZERO, f16::ONE];
        Self::create(device, queue, 1, 1, bytemuck::cast_slice(&data), &[1.0, 1.0])
    }

    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, env: &EnvironmentMap) -> Self {
        let data: Vec<f16> = env.pixels.iter().copied().map(f16::from_f32).collect();
        let mut cdf = Vec::with_capacity(env.conditional_cdf.len() + env.marginal_cdf.len());
        cdf.extend_from_slice(&env.conditional_cdf);
        cdf.extend_from_slice(&env.marginal_cdf);
        Self::create(device, queue, env.width, env.height, bytemuck::cast_slice(&data), &cdf)
    }

    fn create(device: &wgpu::Device, queue: &wgpu::Queue, width: u32, height: u32, texels: &[u8], cdf: &[f32]) -> Self {
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("wt_env_texture"),
                size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba16Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            texels,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("wt_env_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let cdf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("wt_env_cdf"),
            contents: bytemuck::cast_slice(cdf),
            usage: wgpu::BufferUsages::STORAGE,
        });
        Self { texture, view, sampler, cdf }
    }
}
