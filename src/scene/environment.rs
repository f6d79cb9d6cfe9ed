//! Equirectangular environment map with importance sampling tables.

use std::path::Path;

use image::{GenericImageView, ImageReader};

use crate::util::{Error, Result};

/// Decoded HDR environment plus the CDFs the kernels sample from.
#[derive(Debug, Clone)]
pub struct EnvironmentMap {
    pub width: u32,
    pub height: u32,
    /// Linear RGBA, row-major, `width * height * 4` floats.
    pub pixels: Vec<f32>,
    /// Per-row conditional CDFs, `width * height` entries.
    pub conditional_cdf: Vec<f32>,
    /// Marginal CDF over rows, `height` entries.
    pub marginal_cdf: Vec<f32>,
    /// Sum of sin-weighted luminance, used to normalize sampling pdfs.
    pub total_luminance: f32,
}

impl EnvironmentMap {
    /// Load an HDR/EXR (or any format the image crate decodes) file.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = ImageReader::open(path).map_err(|e| match Error::from_open(e, path) {
            Error::FileNotFound(p) => Error::EnvMap(format!("{} not found", p.display())),
            other => other,
        })?;
        let img = reader.decode()?;
        let (width, height) = img.dimensions();
        let rgba = img.to_rgba32f();
        let map = Self::from_pixels(width, height, rgba.into_raw())?;
        log::info!("Loaded environment map {} ({width}x{height})", path.display());
        Ok(map)
    }

    /// Build from raw linear RGBA data. Fails if the map carries no energy.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 || pixels.len() != width as usize * height as usize * 4 {
            return Err(Error::EnvMap(format!(
                "bad dimensions {width}x{height} for {} floats",
                pixels.len()
            )));
        }
        let luminance: Vec<f32> = pixels
            .chunks_exact(4)
            .map(|px| 0.2126 * px[0] + 0.7152 * px[1] + 0.0722 * px[2])
            .collect();
        let (conditional_cdf, marginal_cdf, total_luminance) = build_env_cdfs(width, height, &luminance);
        if !(total_luminance > 0.0 && total_luminance.is_finite()) {
            return Err(Error::EnvMap("environment map is black".into()));
        }
        Ok(Self {
            width,
            height,
            pixels,
            conditional_cdf,
            marginal_cdf,
            total_luminance,
        })
    }
}

/// Build importance sampling CDFs from luminance data.
/// Returns (conditional_cdf, marginal_cdf, total_luminance).
///
/// Rows are weighted by sin(theta) to account for the solid angle of the
/// equirectangular projection.
fn build_env_cdfs(width: u32, height: u32, luminance: &[f32]) -> (Vec<f32>, Vec<f32>, f32) {
    let w = width as usize;
    let h = height as usize;

    let mut conditional_cdf = vec![0.0f32; w * h];
    let mut row_integrals = vec![0.0f32; h];

    for (y, row) in conditional_cdf.chunks_exact_mut(w).enumerate() {
        let theta = std::f32::consts::PI * (y as f32 + 0.5) / h as f32;
        let sin_theta = theta.sin();

        let mut row_sum = 0.0f32;
        for (x, cdf) in row.iter_mut().enumerate() {
            row_sum += luminance[y * w + x].max(0.0) * sin_theta;
            *cdf = row_sum;
        }
        if row_sum > 0.0 {
            row.iter_mut().for_each(|c| *c /= row_sum);
        } else {
            // Uniform row so the sampler never divides by zero.
            for (x, c) in row.iter_mut().enumerate() {
                *c = (x + 1) as f32 / w as f32;
            }
        }
        row_integrals[y] = row_sum;
    }

    let mut marginal_cdf = vec![0.0f32; h];
    let mut total = 0.0f32;
    for (m, r) in marginal_cdf.iter_mut().zip(&row_integrals) {
        total += r;
        *m = total;
    }
    if total > 0.0 {
        marginal_cdf.iter_mut().for_each(|m| *m /= total);
    }

    (conditional_cdf, marginal_cdf, total)
}
