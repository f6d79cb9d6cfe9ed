//! wgpu compute backend.
//!
//! All seven stages live in `kernels.wgsl` and share one bind group layout.
//! Each enqueue writes the frame uniform and submits its own command buffer,
//! so a per-stage iteration value is never overwritten before the stage that
//! reads it has been queued.

mod readback;
mod resources;

use wgpu::util::DeviceExt;

use self::readback::StatsReadback;
use self::resources::{EnvResources, FrameUniform, RenderTargets, SceneBuffers, STATS_SIZE};
use super::{
    tonemap_rgba8, ComputeBackend, FeatureBuffers, FrontBuffer, PixelFormat, Pixels,
    PresentTarget, RenderStats, Snapshot,
};
use crate::params::{GpuRenderParams, RenderParams};
use crate::scene::EnvironmentMap;
use crate::sbvh::GpuSceneData;
use crate::util::{Error, Result};

const WORKGROUP: u32 = 8;

struct Kernels {
    reset: wgpu::ComputePipeline,
    ray_gen: wgpu::ComputePipeline,
    extend: wgpu::ComputePipeline,
    explicit_sample: wgpu::ComputePipeline,
    splat: wgpu::ComputePipeline,
    splat_preview: wgpu::ComputePipeline,
    megakernel: wgpu::ComputePipeline,
}

impl Kernels {
    fn new(device: &wgpu::Device, layouts: &[&wgpu::BindGroupLayout]) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("wt_kernels"),
            source: wgpu::ShaderSource::Wgsl(include_str!("kernels.wgsl").into()),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("wt_pipeline_layout"),
            bind_group_layouts: layouts,
            push_constant_ranges: &[],
        });
        let pipeline = |entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        Self {
            reset: pipeline("reset"),
            ray_gen: pipeline("ray_gen"),
            extend: pipeline("extend"),
            explicit_sample: pipeline("explicit_sample"),
            splat: pipeline("splat"),
            splat_preview: pipeline("splat_preview"),
            megakernel: pipeline("megakernel"),
        }
    }
}

/// GPU implementation of [`ComputeBackend`].
///
/// Created from a device the window already owns, so display textures can be
/// sampled directly by the presentation layer.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    scene_layout: wgpu::BindGroupLayout,
    output_layout: wgpu::BindGroupLayout,
    kernels: Kernels,

    params: wgpu::Buffer,
    frame: wgpu::Buffer,
    counters: wgpu::Buffer,
    scene: SceneBuffers,
    env: EnvResources,
    targets: Option<RenderTargets>,
    bind_group: Option<wgpu::BindGroup>,

    readback: StatsReadback,
    /// Bumped whenever display textures are reallocated.
    generation: u64,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let scene_layout = resources::scene_layout(&device);
        let output_layout = resources::output_layout(&device);
        let kernels = Kernels::new(&device, &[&scene_layout, &output_layout]);

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("wt_params"),
            size: std::mem::size_of::<GpuRenderParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("wt_frame"),
            size: std::mem::size_of::<FrameUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let counters = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("wt_counters"),
            contents: &[0u8; STATS_SIZE as usize],
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });
        let scene = SceneBuffers::empty(&device);
        let env = EnvResources::placeholder(&device, &queue);
        let readback = StatsReadback::new(&device);

        log::debug!("wgpu compute backend ready");
        Self {
            device,
            queue,
            scene_layout,
            output_layout,
            kernels,
            params,
            frame,
            counters,
            scene,
            env,
            targets: None,
            bind_group: None,
            readback,
            generation: 0,
        }
    }

    /// Current render target size, if allocated.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.targets.as_ref().map(|t| (t.width, t.height))
    }

    /// Texture view the window should draw for `target`.
    pub fn target_view(&self, target: PresentTarget) -> Option<&wgpu::TextureView> {
        self.targets.as_ref().map(|t| &t.display(target).view)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn rebuild_bind_group(&mut self) {
        let Some(targets) = &self.targets else {
            self.bind_group = None;
            return;
        };
        fn buffer(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
            wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            }
        }
        self.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("wt_scene_bind_group"),
            layout: &self.scene_layout,
            entries: &[
                buffer(0, &self.params),
                buffer(1, &self.frame),
                buffer(2, &self.scene.nodes),
                buffer(3, &self.scene.triangles),
                buffer(4, &self.scene.materials),
                buffer(5, &targets.paths),
                buffer(6, &targets.accum),
                buffer(7, &self.counters),
                wgpu::BindGroupEntry {
                    binding: 8,
                    resource: wgpu::BindingResource::TextureView(&self.env.view),
                },
                wgpu::BindGroupEntry {
                    binding: 9,
                    resource: wgpu::BindingResource::Sampler(&self.env.sampler),
                },
                buffer(10, &self.env.cdf),
                buffer(11, &targets.features),
            ],
        }));
    }

    fn dispatch(
        &self,
        stage: &'static str,
        kernel: impl Fn(&Kernels) -> &wgpu::ComputePipeline,
        iteration: u32,
        target: PresentTarget,
    ) -> Result<()> {
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| Error::backend(stage, "render targets not allocated"))?;
        let bind_group = self
            .bind_group
            .as_ref()
            .ok_or_else(|| Error::backend(stage, "bind group not built"))?;

        let frame = FrameUniform { iteration, _pad: [0; 3] };
        self.queue.write_buffer(&self.frame, 0, bytemuck::bytes_of(&frame));

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(stage),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(stage),
                timestamp_writes: None,
            });
            pass.set_pipeline(kernel(&self.kernels));
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_bind_group(1, &targets.display(target).bind_group, &[]);
            pass.dispatch_workgroups(
                targets.width.div_ceil(WORKGROUP),
                targets.height.div_ceil(WORKGROUP),
                1,
            );
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

// Stages that never write the display still need group 1 bound.
const SCRATCH: PresentTarget = PresentTarget::PixelBuffer;

impl ComputeBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.size() == Some((width, height)) {
            return Ok(());
        }
        if width == 0 || height == 0 {
            return Err(Error::backend("resize", format!("invalid size {width}x{height}")));
        }
        let _span = tracing::info_span!("gpu_resize", width, height).entered();
        self.targets = Some(RenderTargets::new(&self.device, &self.output_layout, width, height));
        self.generation += 1;
        self.rebuild_bind_group();
        log::debug!("Render targets resized to {width}x{height}");
        Ok(())
    }

    fn upload_scene(&mut self, scene: &GpuSceneData) -> Result<()> {
        let _span = tracing::info_span!("gpu_upload_scene").entered();
        self.scene = SceneBuffers::new(&self.device, scene);
        self.rebuild_bind_group();
        log::info!(
            "Uploaded {} nodes, {} triangles, {} materials",
            scene.node_count(),
            scene.tri_count(),
            scene.materials.len()
        );
        Ok(())
    }

    fn upload_env_map(&mut self, env: &EnvironmentMap) -> Result<()> {
        let _span = tracing::info_span!("gpu_upload_env").entered();
        self.env = EnvResources::new(&self.device, &self.queue, env);
        self.rebuild_bind_group();
        log::info!("Uploaded {}x{} environment map", env.width, env.height);
        Ok(())
    }

    fn update_params(&mut self, params: &RenderParams) -> Result<()> {
        self.queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&params.to_gpu()));
        Ok(())
    }

    fn enqueue_reset(&mut self) -> Result<()> {
        self.dispatch("reset", |k| &k.reset, 0, SCRATCH)
    }

    fn enqueue_ray_gen(&mut self) -> Result<()> {
        self.dispatch("ray_gen", |k| &k.ray_gen, 0, SCRATCH)
    }

    fn enqueue_extend(&mut self) -> Result<()> {
        self.dispatch("extend", |k| &k.extend, 0, SCRATCH)
    }

    fn enqueue_explicit_sample(&mut self, iteration: u32) -> Result<()> {
        self.dispatch("explicit_sample", |k| &k.explicit_sample, iteration, SCRATCH)
    }

    fn enqueue_splat(&mut self, front: FrontBuffer) -> Result<()> {
        self.dispatch("splat", |k| &k.splat, 0, PresentTarget::Front(front))
    }

    fn enqueue_splat_preview(&mut self, front: FrontBuffer) -> Result<()> {
        self.dispatch("splat_preview", |k| &k.splat_preview, 0, PresentTarget::Front(front))
    }

    fn enqueue_megakernel(&mut self, iteration: u32) -> Result<()> {
        self.dispatch("megakernel", |k| &k.megakernel, iteration, PresentTarget::PixelBuffer)
    }

    fn finish_queue(&mut self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| Error::backend("finish_queue", e.to_string()))
    }

    fn stats(&self) -> RenderStats {
        self.readback.latest()
    }

    fn fetch_stats_async(&mut self) -> Result<()> {
        self.readback.collect()?;
        self.readback.request(&self.device, &self.queue, &self.counters);
        Ok(())
    }

    fn reset_stats(&mut self) -> Result<()> {
        self.queue.write_buffer(&self.counters, 0, &[0u8; STATS_SIZE as usize]);
        self.readback.reset();
        Ok(())
    }

    fn snapshot(&mut self, target: PresentTarget, format: PixelFormat) -> Result<Snapshot> {
        let _span = tracing::info_span!("gpu_snapshot").entered();
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| Error::backend("snapshot", "render targets not allocated"))?;
        let (width, height) = (targets.width, targets.height);
        let pixels = match format {
            PixelFormat::Display => Pixels::Rgb8(readback::read_display(
                &self.device,
                &self.queue,
                &targets.display(target).texture,
                width,
                height,
            )?),
            PixelFormat::Radiance => Pixels::RgbF32(readback::read_radiance(
                &self.device,
                &self.queue,
                &targets.accum,
                width,
                height,
            )?),
        };
        Ok(Snapshot { width, height, pixels })
    }

    fn read_features(&mut self) -> Result<FeatureBuffers> {
        let _span = tracing::info_span!("gpu_read_features").entered();
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| Error::backend("read_features", "render targets not allocated"))?;
        let (width, height) = (targets.width, targets.height);
        let color = readback::read_radiance(&self.device, &self.queue, &targets.accum, width, height)?;
        let (albedo, normal) =
            readback::read_features(&self.device, &self.queue, &targets.features, width, height)?;
        Ok(FeatureBuffers { width, height, color, albedo, normal })
    }

    fn write_display(&mut self, target: PresentTarget, color: &[f32]) -> Result<()> {
        let targets = self
            .targets
            .as_ref()
            .ok_or_else(|| Error::backend("write_display", "render targets not allocated"))?;
        let (width, height) = (targets.width, targets.height);
        let expected = width as usize * height as usize * 3;
        if color.len() != expected {
            return Err(Error::backend(
                "write_display",
                format!("{} floats for a {width}x{height} target", color.len()),
            ));
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &targets.display(target).texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &tonemap_rgba8(color),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        self.queue.submit(None);
        Ok(())
    }
}
