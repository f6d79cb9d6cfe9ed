//! Device → host transfers: asynchronous ray counters and blocking pixel reads.

use std::sync::Arc;

use parking_lot::Mutex;

use super::resources::{FEATURE_SIZE, STATS_SIZE};
use crate::backend::RenderStats;
use crate::util::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum MapState {
    #[default]
    Idle,
    Pending,
    Ready,
    Failed,
}

/// Double-hop counter readback: copy into a staging buffer, map it, and pick
/// the values up on a later frame once the map completes.
pub(super) struct StatsReadback {
    staging: wgpu::Buffer,
    state: Arc<Mutex<MapState>>,
    latest: RenderStats,
    /// Drop the in-flight values; they predate a counter reset.
    discard: bool,
}

impl StatsReadback {
    pub fn new(device: &wgpu::Device) -> Self {
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("wt_stats_staging"),
            size: STATS_SIZE,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            staging,
            state: Arc::new(Mutex::new(MapState::Idle)),
            latest: RenderStats::default(),
            discard: false,
        }
    }

    pub fn latest(&self) -> RenderStats {
        self.latest
    }

    pub fn reset(&mut self) {
        self.latest = RenderStats::default();
        self.discard = *self.state.lock() != MapState::Idle;
    }

    /// Consume a completed map, if any.
    pub fn collect(&mut self) -> Result<()> {
        let state = *self.state.lock();
        match state {
            MapState::Ready => {
                {
                    let data = self.staging.slice(..).get_mapped_range();
                    let counters: &[u32] = bytemuck::cast_slice(&data);
                    if !self.discard {
                        self.latest = RenderStats {
                            primary_rays: u64::from(counters[0]),
                            extension_rays: u64::from(counters[1]),
                            shadow_rays: u64::from(counters[2]),
                            samples: u64::from(counters[3]),
                        };
                    }
                }
                self.staging.unmap();
                self.discard = false;
                *self.state.lock() = MapState::Idle;
                Ok(())
            }
            MapState::Failed => {
                *self.state.lock() = MapState::Idle;
                Err(Error::backend("fetch_stats", "counter buffer map failed"))
            }
            MapState::Idle | MapState::Pending => Ok(()),
        }
    }

    /// Start a new transfer unless one is still in flight.
    pub fn request(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, counters: &wgpu::Buffer) {
        if *self.state.lock() != MapState::Idle {
            return;
        }
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("wt_stats_copy"),
        });
        encoder.copy_buffer_to_buffer(counters, 0, &self.staging, 0, STATS_SIZE);
        queue.submit(Some(encoder.finish()));

        *self.state.lock() = MapState::Pending;
        let state = Arc::clone(&self.state);
        self.staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            *state.lock() = if result.is_ok() { MapState::Ready } else { MapState::Failed };
        });
        if let Err(e) = device.poll(wgpu::PollType::Poll) {
            log::debug!("Stats poll: {e}");
        }
    }
}

/// Copy `size` bytes of `source` to the host, blocking until done.
fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    stage: &'static str,
    encode: impl FnOnce(&mut wgpu::CommandEncoder, &wgpu::Buffer),
    size: u64,
) -> Result<Vec<u8>> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("wt_snapshot_staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some(stage),
    });
    encode(&mut encoder, &staging);
    queue.submit(Some(encoder.finish()));

    let (tx, rx) = std::sync::mpsc::channel();
    staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        // The receiver outlives the blocking poll below.
        tx.send(result).ok();
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| Error::backend(stage, e.to_string()))?;
    rx.recv()
        .map_err(|e| Error::backend(stage, e.to_string()))?
        .map_err(|e| Error::backend(stage, e.to_string()))?;

    let bytes = staging.slice(..).get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

/// RGB8 pixels of an RGBA8 texture.
pub(super) fn read_display(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<Vec<u8>> {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let bytes_per_row = (width * 4).div_ceil(align) * align;
    let bytes = read_buffer(
        device,
        queue,
        "snapshot",
        |encoder, staging| {
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(bytes_per_row),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            );
        },
        u64::from(bytes_per_row) * u64::from(height),
    )?;

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for row in bytes.chunks_exact(bytes_per_row as usize) {
        for px in row[..width as usize * 4].chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }
    }
    Ok(rgb)
}

/// Linear radiance from the accumulator: summed RGB divided by sample count.
pub(super) fn read_radiance(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    accum: &wgpu::Buffer,
    width: u32,
    height: u32,
) -> Result<Vec<f32>> {
    let size = u64::from(width) * u64::from(height) * 16;
    let bytes = read_buffer(
        device,
        queue,
        "snapshot",
        |encoder, staging| encoder.copy_buffer_to_buffer(accum, 0, staging, 0, size),
        size,
    )?;
    let sums: Vec<[f32; 4]> = bytemuck::pod_collect_to_vec(&bytes);
    Ok(resolve_radiance(&sums))
}

/// First-hit albedo and normal as two RGB float planes.
pub(super) fn read_features(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    features: &wgpu::Buffer,
    width: u32,
    height: u32,
) -> Result<(Vec<f32>, Vec<f32>)> {
    let size = u64::from(width) * u64::from(height) * FEATURE_SIZE;
    let bytes = read_buffer(
        device,
        queue,
        "read_features",
        |encoder, staging| encoder.copy_buffer_to_buffer(features, 0, staging, 0, size),
        size,
    )?;
    let texels: Vec<[f32; 4]> = bytemuck::pod_collect_to_vec(&bytes);
    Ok(split_features(&texels))
}

fn split_features(texels: &[[f32; 4]]) -> (Vec<f32>, Vec<f32>) {
    let mut albedo = Vec::with_capacity(texels.len() / 2 * 3);
    let mut normal = Vec::with_capacity(texels.len() / 2 * 3);
    for pair in texels.chunks_exact(2) {
        albedo.extend_from_slice(&pair[0][..3]);
        normal.extend_from_slice(&pair[1][..3]);
    }
    (albedo, normal)
}

/// `rgb / w` per pixel; unsampled pixels are black.
fn resolve_radiance(sums: &[[f32; 4]]) -> Vec<f32> {
    sums.iter()
        .flat_map(|&[r, g, b, n]| {
            if n > 0.0 {
                [r / n, g / n, b / n]
            } else {
                [0.0; 3]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_radiance() {
        let sums = [[2.0, 4.0, 6.0, 2.0], [1.0, 1.0, 1.0, 0.0]];
        assert_eq!(resolve_radiance(&sums), vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_split_features() {
        let texels = [
            [0.5, 0.25, 0.125, 1.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.9, 0.8, 0.7, 1.0],
            [0.0, 0.0, -1.0, 0.0],
        ];
        let (albedo, normal) = split_features(&texels);
        assert_eq!(albedo, vec![0.5, 0.25, 0.125, 0.9, 0.8, 0.7]);
        assert_eq!(normal, vec![0.0, 1.0, 0.0, 0.0, 0.0, -1.0]);
    }
}
