//! Post-process hook for an external denoiser.
//!
//! The filter itself is supplied by the embedder through [`PostProcessStage`];
//! [`PostProcess`] owns the enable switch and blends the filtered image with
//! the noisy input. The tracer runs it after accumulation on every displayed
//! frame and on HDR snapshots.

use super::FeatureBuffers;
use crate::util::{Error, Result};

/// Guide images for one filter call, each `width * height * 3` floats.
#[derive(Debug, Clone, Copy)]
pub struct DenoiseInput<'a> {
    pub width: u32,
    pub height: u32,
    /// Noisy linear radiance.
    pub color: &'a [f32],
    /// First-hit surface albedo.
    pub albedo: &'a [f32],
    /// First-hit shading normal, zero on a miss.
    pub normal: &'a [f32],
}

/// A filter over linear RGB float images guided by albedo and normal.
pub trait PostProcessStage: Send {
    /// Called whenever the render resolution changes.
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
    /// Filter `input.color` into `output`, which has the same length.
    fn denoise(&mut self, input: &DenoiseInput<'_>, output: &mut [f32]) -> Result<()>;
}

/// Enable flag and blend factor around a [`PostProcessStage`].
pub struct PostProcess {
    stage: Box<dyn PostProcessStage>,
    enabled: bool,
    blend: f32,
    size: (u32, u32),
    scratch: Vec<f32>,
}

impl PostProcess {
    pub fn new(stage: Box<dyn PostProcessStage>) -> Self {
        Self {
            stage,
            enabled: true,
            blend: 0.0,
            size: (0, 0),
            scratch: Vec::new(),
        }
    }

    pub fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fraction of the *noisy* input kept in the output, clamped to `[0, 1]`.
    pub fn set_blend(&mut self, blend: f32) {
        self.blend = if blend.is_nan() { 0.0 } else { blend.clamp(0.0, 1.0) };
    }

    pub fn blend(&self) -> f32 {
        self.blend
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.size != (width, height) {
            self.stage.resize(width, height)?;
            self.size = (width, height);
        }
        Ok(())
    }

    /// Filter `features.color` in place. A disabled stage leaves it untouched.
    pub fn execute(&mut self, features: &mut FeatureBuffers) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let expected = features.len();
        for (name, buf) in [
            ("color", &features.color),
            ("albedo", &features.albedo),
            ("normal", &features.normal),
        ] {
            if buf.len() != expected {
                return Err(Error::backend(
                    "postprocess",
                    format!("{name} buffer holds {} floats, expected {expected}", buf.len()),
                ));
            }
        }
        let (width, height) = (features.width, features.height);
        self.resize(width, height)?;

        self.scratch.clear();
        self.scratch.resize(expected, 0.0);
        let input = DenoiseInput {
            width,
            height,
            color: &features.color,
            albedo: &features.albedo,
            normal: &features.normal,
        };
        self.stage.denoise(&input, &mut self.scratch)?;

        let keep = self.blend;
        for (c, d) in features.color.iter_mut().zip(&self.scratch) {
            *c = keep * *c + (1.0 - keep) * d;
        }
        Ok(())
    }
}
