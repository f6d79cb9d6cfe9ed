//! Headless backend that records the stage stream instead of executing it.
//!
//! Used by the integration tests and by `wavetrace --dry-run` to inspect the
//! orchestrator's per-frame dispatch without a GPU.

use super::{
    ComputeBackend, FeatureBuffers, FrontBuffer, PixelFormat, Pixels, PresentTarget, RenderStats,
    Snapshot,
};
use crate::params::RenderParams;
use crate::scene::EnvironmentMap;
use crate::sbvh::GpuSceneData;
use crate::util::{Error, Result};

/// One recorded backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resize(u32, u32),
    UploadScene { triangles: u32, nodes: u32 },
    UploadEnvMap(u32, u32),
    UpdateParams,
    Reset,
    RayGen,
    Extend,
    ExplicitSample(u32),
    Splat(FrontBuffer),
    SplatPreview(FrontBuffer),
    Megakernel(u32),
    Finish,
    FetchStats,
    ResetStats,
    Snapshot(PresentTarget),
    ReadFeatures,
    WriteDisplay(PresentTarget),
}

impl Stage {
    /// Stable name used for failure injection and logging.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Resize(..) => "resize",
            Stage::UploadScene { .. } => "upload_scene",
            Stage::UploadEnvMap(..) => "upload_env_map",
            Stage::UpdateParams => "update_params",
            Stage::Reset => "reset",
            Stage::RayGen => "ray_gen",
            Stage::Extend => "extend",
            Stage::ExplicitSample(_) => "explicit_sample",
            Stage::Splat(_) => "splat",
            Stage::SplatPreview(_) => "splat_preview",
            Stage::Megakernel(_) => "megakernel",
            Stage::Finish => "finish",
            Stage::FetchStats => "fetch_stats",
            Stage::ResetStats => "reset_stats",
            Stage::Snapshot(_) => "snapshot",
            Stage::ReadFeatures => "read_features",
            Stage::WriteDisplay(_) => "write_display",
        }
    }

    /// True for the kernels that make up a frame.
    pub fn is_kernel(&self) -> bool {
        matches!(
            self,
            Stage::Reset
                | Stage::RayGen
                | Stage::Extend
                | Stage::ExplicitSample(_)
                | Stage::Splat(_)
                | Stage::SplatPreview(_)
                | Stage::Megakernel(_)
        )
    }
}

/// Backend double that logs every call.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub stages: Vec<Stage>,
    /// Last parameter block pushed.
    pub params: Option<RenderParams>,
    /// Stage name that fails with a backend error.
    pub fail_on: Option<&'static str>,
    /// Last color written through [`ComputeBackend::write_display`].
    pub displayed: Option<Vec<f32>>,
    pub width: u32,
    pub height: u32,
    pub counters: RenderStats,
    pub fetched: RenderStats,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget recorded stages (parameters and counters are kept).
    pub fn clear(&mut self) {
        self.stages.clear();
    }

    /// Recorded kernel stages only, without sync and bookkeeping calls.
    pub fn kernels(&self) -> Vec<Stage> {
        self.stages.iter().copied().filter(Stage::is_kernel).collect()
    }

    fn record(&mut self, stage: Stage) -> Result<()> {
        if self.fail_on == Some(stage.name()) {
            return Err(Error::backend(stage.name(), "injected failure"));
        }
        self.stages.push(stage);
        Ok(())
    }

    fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl ComputeBackend for RecordingBackend {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.record(Stage::Resize(width, height))?;
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn upload_scene(&mut self, scene: &GpuSceneData) -> Result<()> {
        self.record(Stage::UploadScene {
            triangles: scene.tri_count(),
            nodes: scene.node_count(),
        })
    }

    fn upload_env_map(&mut self, env: &EnvironmentMap) -> Result<()> {
        self.record(Stage::UploadEnvMap(env.width, env.height))
    }

    fn update_params(&mut self, params: &RenderParams) -> Result<()> {
        self.record(Stage::UpdateParams)?;
        self.params = Some(params.clone());
        Ok(())
    }

    fn enqueue_reset(&mut self) -> Result<()> {
        self.record(Stage::Reset)
    }

    fn enqueue_ray_gen(&mut self) -> Result<()> {
        self.record(Stage::RayGen)?;
        self.counters.primary_rays += self.pixels();
        Ok(())
    }

    fn enqueue_extend(&mut self) -> Result<()> {
        self.record(Stage::Extend)?;
        self.counters.extension_rays += self.pixels();
        Ok(())
    }

    fn enqueue_explicit_sample(&mut self, iteration: u32) -> Result<()> {
        self.record(Stage::ExplicitSample(iteration))?;
        self.counters.shadow_rays += self.pixels();
        Ok(())
    }

    fn enqueue_splat(&mut self, front: FrontBuffer) -> Result<()> {
        self.record(Stage::Splat(front))?;
        self.counters.samples += self.pixels();
        Ok(())
    }

    fn enqueue_splat_preview(&mut self, front: FrontBuffer) -> Result<()> {
        self.record(Stage::SplatPreview(front))?;
        self.counters.samples += self.pixels();
        Ok(())
    }

    fn enqueue_megakernel(&mut self, iteration: u32) -> Result<()> {
        self.record(Stage::Megakernel(iteration))?;
        let bounces = self.params.as_ref().map_or(1, |p| u64::from(p.max_bounces));
        self.counters.primary_rays += self.pixels();
        self.counters.extension_rays += self.pixels() * bounces;
        self.counters.shadow_rays += self.pixels() * (bounces + 1);
        self.counters.samples += self.pixels();
        Ok(())
    }

    fn finish_queue(&mut self) -> Result<()> {
        self.record(Stage::Finish)
    }

    fn stats(&self) -> RenderStats {
        self.fetched
    }

    fn fetch_stats_async(&mut self) -> Result<()> {
        self.record(Stage::FetchStats)?;
        self.fetched = self.counters;
        Ok(())
    }

    fn reset_stats(&mut self) -> Result<()> {
        self.record(Stage::ResetStats)?;
        self.counters = RenderStats::default();
        self.fetched = RenderStats::default();
        Ok(())
    }

    fn snapshot(&mut self, target: PresentTarget, format: PixelFormat) -> Result<Snapshot> {
        self.record(Stage::Snapshot(target))?;
        let n = self.pixels() as usize * 3;
        let pixels = match format {
            PixelFormat::Display => Pixels::Rgb8(vec![128; n]),
            PixelFormat::Radiance => Pixels::RgbF32(vec![0.5; n]),
        };
        Ok(Snapshot {
            width: self.width,
            height: self.height,
            pixels,
        })
    }

    /// Constant radiance 0.5, albedo 0.25 and +Y normals.
    fn read_features(&mut self) -> Result<FeatureBuffers> {
        self.record(Stage::ReadFeatures)?;
        let n = self.pixels() as usize;
        Ok(FeatureBuffers {
            width: self.width,
            height: self.height,
            color: vec![0.5; n * 3],
            albedo: vec![0.25; n * 3],
            normal: [0.0, 1.0, 0.0].repeat(n),
        })
    }

    fn write_display(&mut self, target: PresentTarget, color: &[f32]) -> Result<()> {
        self.record(Stage::WriteDisplay(target))?;
        self.displayed = Some(color.to_vec());
        Ok(())
    }
}
