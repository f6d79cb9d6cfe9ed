//! Compute backend dispatch contract.
//!
//! The orchestrator decides *which* stages run each frame; a backend only
//! knows how to enqueue them. Enqueues are fire-and-forget on one in-order
//! queue; [`ComputeBackend::finish_queue`] is the only host/device sync point
//! besides pixel readback.
//!
//! - [`recording::RecordingBackend`] - headless backend that records the stage stream
//! - `gpu::WgpuBackend` - WGSL compute kernels (feature `viewer`)
//! - [`postprocess::PostProcessStage`] - optional denoiser hook

pub mod postprocess;
pub mod recording;
#[cfg(feature = "viewer")]
pub mod gpu;

use std::time::Duration;

use crate::params::RenderParams;
use crate::scene::EnvironmentMap;
use crate::sbvh::GpuSceneData;
use crate::util::Result;

/// Frame pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Reset / ray-gen / extend / explicit-sample / splat, communicating
    /// through device-resident path state.
    #[default]
    Wavefront,
    /// One self-contained kernel per frame.
    Megakernel,
}

impl PipelineMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Wavefront => Self::Megakernel,
            Self::Megakernel => Self::Wavefront,
        }
    }
}

/// Double-buffer index for wavefront presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontBuffer(pub u8);

impl FrontBuffer {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn toggle(&mut self) {
        self.0 ^= 1;
    }
}

/// What the presentation surface should draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentTarget {
    /// One of the two wavefront display buffers.
    Front(FrontBuffer),
    /// The single megakernel pixel buffer.
    PixelBuffer,
}

/// Pixel readback encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Tonemapped 8-bit RGB, as displayed.
    Display,
    /// Linear radiance (accumulated sum divided by sample count).
    Radiance,
}

/// Pixels read back for a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    Rgb8(Vec<u8>),
    RgbF32(Vec<f32>),
}

/// Snapshot readback result.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub width: u32,
    pub height: u32,
    pub pixels: Pixels,
}

/// Denoiser inputs read back after accumulation: linear radiance plus the
/// first-hit albedo and shading normal, each `width * height * 3` floats.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBuffers {
    pub width: u32,
    pub height: u32,
    pub color: Vec<f32>,
    pub albedo: Vec<f32>,
    pub normal: Vec<f32>,
}

impl FeatureBuffers {
    /// Float count of one buffer.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Device ray counters, cumulative since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    pub primary_rays: u64,
    pub extension_rays: u64,
    pub shadow_rays: u64,
    pub samples: u64,
}

/// Throughput in millions per second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PerfNumbers {
    pub primary: f64,
    pub extension: f64,
    pub shadow: f64,
    pub samples: f64,
}

impl PerfNumbers {
    pub fn from_stats(stats: &RenderStats, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return Self::default();
        }
        let rate = |n: u64| n as f64 / secs * 1e-6;
        Self {
            primary: rate(stats.primary_rays),
            extension: rate(stats.extension_rays),
            shadow: rate(stats.shadow_rays),
            samples: rate(stats.samples),
        }
    }

    /// All ray kinds combined, in MRays/s.
    pub fn total(&self) -> f64 {
        self.primary + self.extension + self.shadow
    }
}

/// Dispatch contract between the orchestrator and a device.
///
/// Every operation returns a [`Result`]; failures during stage execution
/// are [`crate::Error::Backend`] and therefore fatal.
pub trait ComputeBackend {
    /// Allocate per-pixel storage for a `width` × `height` render target.
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
    fn upload_scene(&mut self, scene: &GpuSceneData) -> Result<()>;
    fn upload_env_map(&mut self, env: &EnvironmentMap) -> Result<()>;
    /// Push the full parameter block.
    fn update_params(&mut self, params: &RenderParams) -> Result<()>;

    /// Clear path state and the accumulation buffer.
    fn enqueue_reset(&mut self) -> Result<()>;
    fn enqueue_ray_gen(&mut self) -> Result<()>;
    /// Trace extension rays for all live paths.
    fn enqueue_extend(&mut self) -> Result<()>;
    /// Shade hits and trace shadow rays; `iteration` seeds the RNG.
    fn enqueue_explicit_sample(&mut self, iteration: u32) -> Result<()>;
    /// Resolve finished paths into the accumulator and the given display buffer.
    fn enqueue_splat(&mut self, front: FrontBuffer) -> Result<()>;
    /// Like splat, but also includes paths that are still in flight.
    fn enqueue_splat_preview(&mut self, front: FrontBuffer) -> Result<()>;
    /// Full path tracing in one kernel, writing the pixel buffer.
    fn enqueue_megakernel(&mut self, iteration: u32) -> Result<()>;

    /// Block until all enqueued work has completed.
    fn finish_queue(&mut self) -> Result<()>;

    /// Most recently fetched counters; may be stale.
    fn stats(&self) -> RenderStats;
    /// Start an asynchronous counter transfer; consumed by a later [`stats`](Self::stats).
    fn fetch_stats_async(&mut self) -> Result<()>;
    fn reset_stats(&mut self) -> Result<()>;

    /// Read back the pixels of `target` for the snapshot writer.
    fn snapshot(&mut self, target: PresentTarget, format: PixelFormat) -> Result<Snapshot>;

    /// Read back accumulated radiance and the first-hit feature buffers.
    fn read_features(&mut self) -> Result<FeatureBuffers>;
    /// Tonemap linear `color` into the display buffer of `target`.
    fn write_display(&mut self, target: PresentTarget, color: &[f32]) -> Result<()>;
}

/// Display encoding shared by the kernels and host-side writes:
/// Reinhard, then gamma 2.2, to 8-bit RGBA.
pub fn tonemap_rgba8(color: &[f32]) -> Vec<u8> {
    let encode = |c: f32| {
        let c = c.max(0.0);
        ((c / (1.0 + c)).powf(1.0 / 2.2) * 255.0 + 0.5) as u8
    };
    color
        .chunks_exact(3)
        .flat_map(|px| [encode(px[0]), encode(px[1]), encode(px[2]), 255])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_buffer_toggle() {
        let mut f = FrontBuffer::default();
        assert_eq!(f.index(), 0);
        f.toggle();
        assert_eq!(f.index(), 1);
        f.toggle();
        assert_eq!(f.index(), 0);
    }

    #[test]
    fn test_perf_numbers() {
        let stats = RenderStats {
            primary_rays: 2_000_000,
            extension_rays: 1_000_000,
            shadow_rays: 3_000_000,
            samples: 2_000_000,
        };
        let perf = PerfNumbers::from_stats(&stats, Duration::from_secs(2));
        assert!((perf.primary - 1.0).abs() < 1e-9);
        assert!((perf.total() - 3.0).abs() < 1e-9);
        assert_eq!(PerfNumbers::from_stats(&stats, Duration::ZERO), PerfNumbers::default());
    }

    #[test]
    fn test_tonemap_rgba8() {
        let bytes = tonemap_rgba8(&[0.0, 1.0, 1e9, -2.0, 0.0, 0.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], 0);
        // 0.5 ^ (1 / 2.2)
        assert_eq!(bytes[1], 186);
        assert_eq!(bytes[2], 255);
        assert_eq!(bytes[3], 255);
        assert_eq!(bytes[4], 0);
    }

    #[test]
    fn test_pipeline_toggle() {
        assert_eq!(PipelineMode::Wavefront.toggled(), PipelineMode::Megakernel);
        assert_eq!(PipelineMode::Megakernel.toggled(), PipelineMode::Wavefront);
    }
}
