//! Render parameters mirrored between host and device.
//!
//! [`RenderParams`] is the host copy mutated by input handlers and scene
//! loads. [`GpuRenderParams`] is its `Pod` uniform image, pushed wholesale
//! whenever the orchestrator's dirty flag is set.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Pinhole camera with an orthonormal basis. `fov` is vertical, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub fov: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.0, 3.5),
            direction: Vec3::NEG_Z,
            right: Vec3::X,
            up: Vec3::Y,
            fov: 60.0,
        }
    }
}

/// Rectangular area light: `position` is the center, `size` spans `right` × `up`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaLight {
    pub position: Vec3,
    pub normal: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub size: Vec2,
    /// Emitted radiance.
    pub emission: Vec3,
}

impl Default for AreaLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(1.0, 1.0, 0.0),
            normal: Vec3::NEG_X,
            right: Vec3::NEG_Z,
            up: Vec3::Y,
            size: Vec2::splat(0.5),
            emission: Vec3::splat(200.0),
        }
    }
}

/// Which light sources are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightMode {
    Both,
    Environment,
    AreaLight,
}

/// Which estimator paths use for light transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Implicit + explicit, combined with MIS.
    Mis,
    Explicit,
    Implicit,
}

/// Host-side render parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    /// Device pixels (framebuffer size × render scale).
    pub width: u32,
    pub height: u32,
    pub tri_count: u32,
    pub light_count: u32,
    pub object_count: u32,
    pub node_count: u32,
    pub camera: Camera,
    pub light: AreaLight,
    pub env_strength: f32,
    pub env_width: u32,
    pub env_height: u32,
    pub env_luminance: f32,
    pub sample_implicit: bool,
    pub sample_explicit: bool,
    pub use_area_light: bool,
    pub use_env_map: bool,
    pub max_bounces: u32,
    /// Half of the scene bounding diagonal.
    pub world_radius: f32,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            tri_count: 0,
            light_count: 0,
            object_count: 0,
            node_count: 0,
            camera: Camera::default(),
            light: AreaLight::default(),
            env_strength: 1.0,
            env_width: 0,
            env_height: 0,
            env_luminance: 0.0,
            sample_implicit: true,
            sample_explicit: true,
            use_area_light: true,
            use_env_map: false,
            max_bounces: 4,
            world_radius: 1.0,
        }
    }
}

impl RenderParams {
    pub fn sampling_mode(&self) -> SamplingMode {
        match (self.sample_implicit, self.sample_explicit) {
            (true, false) => SamplingMode::Implicit,
            (false, true) => SamplingMode::Explicit,
            _ => SamplingMode::Mis,
        }
    }

    /// both → explicit → implicit → both
    pub fn toggle_sampling_mode(&mut self) -> SamplingMode {
        if self.sample_implicit && self.sample_explicit {
            self.sample_implicit = false;
        } else if self.sample_explicit {
            self.sample_explicit = false;
            self.sample_implicit = true;
        } else {
            self.sample_explicit = true;
        }
        self.sampling_mode()
    }

    pub fn light_mode(&self) -> LightMode {
        match (self.use_area_light, self.use_env_map) {
            (true, true) => LightMode::Both,
            (false, true) => LightMode::Environment,
            _ => LightMode::AreaLight,
        }
    }

    /// both → environment → area → both. Without an environment map nothing
    /// changes and `None` is returned.
    pub fn toggle_light_mode(&mut self, has_env_map: bool) -> Option<LightMode> {
        if !has_env_map {
            return None;
        }
        if self.use_area_light && self.use_env_map {
            self.use_area_light = false;
        } else if self.use_env_map {
            self.use_env_map = false;
            self.use_area_light = true;
        } else {
            self.use_env_map = true;
        }
        Some(self.light_mode())
    }

    /// Flag word consumed by the kernels.
    pub fn flags(&self) -> u32 {
        let mut f = 0;
        if self.sample_implicit {
            f |= GpuRenderParams::SAMPLE_IMPLICIT;
        }
        if self.sample_explicit {
            f |= GpuRenderParams::SAMPLE_EXPLICIT;
        }
        if self.use_area_light {
            f |= GpuRenderParams::USE_AREA_LIGHT;
        }
        if self.use_env_map && self.env_width > 0 {
            f |= GpuRenderParams::USE_ENV_MAP;
        }
        f
    }

    pub fn to_gpu(&self) -> GpuRenderParams {
        let cam = &self.camera;
        let light = &self.light;
        GpuRenderParams {
            cam_pos: cam.position.to_array(),
            fov: cam.fov,
            cam_dir: cam.direction.to_array(),
            world_radius: self.world_radius,
            cam_right: cam.right.to_array(),
            env_strength: self.env_strength,
            cam_up: cam.up.to_array(),
            env_luminance: self.env_luminance,
            light_pos: light.position.to_array(),
            light_size_x: light.size.x,
            light_normal: light.normal.to_array(),
            light_size_y: light.size.y,
            light_right: light.right.to_array(),
            _pad0: 0.0,
            light_up: light.up.to_array(),
            _pad1: 0.0,
            light_e: light.emission.to_array(),
            _pad2: 0.0,
            width: self.width,
            height: self.height,
            tri_count: self.tri_count,
            light_count: self.light_count,
            object_count: self.object_count,
            max_bounces: self.max_bounces,
            flags: self.flags(),
            node_count: self.node_count,
            env_width: self.env_width,
            env_height: self.env_height,
            _pad3: [0; 2],
        }
    }
}

/// Uniform block (192 bytes). Each vec3 shares its 16-byte slot with a scalar.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuRenderParams {
    pub cam_pos: [f32; 3],
    pub fov: f32,
    pub cam_dir: [f32; 3],
    pub world_radius: f32,
    pub cam_right: [f32; 3],
    pub env_strength: f32,
    pub cam_up: [f32; 3],
    pub env_luminance: f32,
    pub light_pos: [f32; 3],
    pub light_size_x: f32,
    pub light_normal: [f32; 3],
    pub light_size_y: f32,
    pub light_right: [f32; 3],
    pub _pad0: f32,
    pub light_up: [f32; 3],
    pub _pad1: f32,
    pub light_e: [f32; 3],
    pub _pad2: f32,
    pub width: u32,
    pub height: u32,
    pub tri_count: u32,
    pub light_count: u32,
    pub object_count: u32,
    pub max_bounces: u32,
    pub flags: u32,
    pub node_count: u32,
    pub env_width: u32,
    pub env_height: u32,
    pub _pad3: [u32; 2],
}

impl GpuRenderParams {
    pub const SAMPLE_IMPLICIT: u32 = 1;
    pub const SAMPLE_EXPLICIT: u32 = 1 << 1;
    pub const USE_AREA_LIGHT: u32 = 1 << 2;
    pub const USE_ENV_MAP: u32 = 1 << 3;
}
