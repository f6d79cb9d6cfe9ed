//! Per-frame render orchestration.
//!
//! [`Tracer`] owns the host copy of the render parameters and the
//! accumulation state. Each [`Tracer::update`] call:
//!
//! 1. applies input (keypresses, held keys, mouse)
//! 2. waits for the previous presentation to retire
//! 3. pushes parameters if dirty and restarts accumulation
//! 4. enqueues the stages for the active pipeline
//! 5. drains the queue
//! 6. runs the denoiser, if one is enabled, then presents (and flips the
//!    front buffer in wavefront mode)
//! 7. prints throughput at most once per stats interval
//! 8. starts the asynchronous stats transfer
//! 9. advances the iteration and writes periodic snapshots
//!
//! The dirty flag is the only way accumulation restarts.

mod stats;
mod surface;

pub use stats::{format_perf, StatsPrinter};
pub use surface::{HeadlessSurface, NoPicker, PresentationSurface, ScenePicker, ScriptedPicker};

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use glam::Vec2;

use crate::backend::postprocess::PostProcess;
use crate::backend::{
    ComputeBackend, FrontBuffer, PerfNumbers, PipelineMode, PixelFormat, Pixels, PresentTarget,
    Snapshot,
};
use crate::camera::{aim_light, CameraRig};
use crate::input::{Action, InputEvent, KeyBindings, Motion, MouseButton, FOV_RANGE, HELD_KEYS};
use crate::params::{Camera, RenderParams};
use crate::persist;
use crate::sbvh::{load_or_build, GpuSceneData};
use crate::scene::{EnvironmentMap, Scene};
use crate::settings::Settings;
use crate::snapshot::SnapshotWriter;
use crate::util::{Error, Result};

/// Mutable orchestrator state.
#[derive(Debug, Clone)]
pub struct TracerState {
    pub params: RenderParams,
    pub rig: CameraRig,
    /// Parameters changed since the last push.
    pub params_dirty: bool,
    /// Frames accumulated since the last reset; 0 means preview.
    pub iteration: u32,
    pub front_buffer: FrontBuffer,
    pub pipeline: PipelineMode,
    /// An environment map has been uploaded to the device.
    pub has_env_map: bool,
    pub scene_hash: String,
    pub scene_path: PathBuf,
    /// What the last [`Tracer::update`] drew.
    pub last_presented: Option<PresentTarget>,
    drag: Option<Vec2>,
    left_down: bool,
}

impl Default for TracerState {
    fn default() -> Self {
        Self {
            params: RenderParams::default(),
            rig: CameraRig::default(),
            params_dirty: true,
            iteration: 0,
            front_buffer: FrontBuffer::default(),
            pipeline: PipelineMode::default(),
            has_env_map: false,
            scene_hash: String::new(),
            scene_path: PathBuf::new(),
            last_presented: None,
            drag: None,
            left_down: false,
        }
    }
}

/// Render pipeline orchestrator over a [`ComputeBackend`].
pub struct Tracer<B: ComputeBackend> {
    backend: B,
    settings: Settings,
    bindings: KeyBindings,
    picker: Box<dyn ScenePicker>,
    state: TracerState,
    stats: StatsPrinter,
    snapshots: SnapshotWriter,
    pending_writes: Vec<JoinHandle<Result<PathBuf>>>,
    denoiser: Option<PostProcess>,
}

impl<B: ComputeBackend> Tracer<B> {
    /// Set up the device for `framebuffer` and load the first scene.
    ///
    /// With no `scene` the picker is asked; cancelling it loads the default
    /// scene from the settings.
    pub fn new(
        mut backend: B,
        settings: Settings,
        picker: Box<dyn ScenePicker>,
        scene: Option<&Path>,
        framebuffer: (u32, u32),
    ) -> Result<Self> {
        let mut state = TracerState {
            pipeline: settings.pipeline,
            ..TracerState::default()
        };
        let (width, height) = scaled_size(framebuffer, settings.render_scale);
        state.params.width = width;
        state.params.height = height;
        backend.resize(width, height)?;

        let interval = Duration::try_from_secs_f32(settings.stats_interval_secs)
            .unwrap_or(Duration::from_secs(1));
        let stats = StatsPrinter::new(interval, Instant::now());
        let snapshots = SnapshotWriter::new(&settings.snapshot_dir, settings.snapshot_format);

        let mut tracer = Self {
            backend,
            settings,
            bindings: KeyBindings::default(),
            picker,
            state,
            stats,
            snapshots,
            pending_writes: Vec::new(),
            denoiser: None,
        };
        tracer.init_scene(scene)?;
        Ok(tracer)
    }

    pub fn state(&self) -> &TracerState {
        &self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn bindings_mut(&mut self) -> &mut KeyBindings {
        &mut self.bindings
    }

    /// Throughput from the last stats print.
    pub fn perf(&self) -> PerfNumbers {
        self.stats.latest()
    }

    /// Filter applied to every displayed frame and to HDR snapshots. The
    /// blend factor comes from the settings.
    pub fn set_denoiser(&mut self, denoiser: Option<PostProcess>) {
        self.denoiser = denoiser.map(|mut d| {
            d.set_blend(self.settings.denoise_blend);
            d
        });
    }

    /// Mutate parameters from outside the input path (UI widgets). Always
    /// restarts accumulation.
    pub fn edit_params(&mut self, f: impl FnOnce(&mut RenderParams)) {
        f(&mut self.state.params);
        self.state.params_dirty = true;
    }

    /// Run one frame at the current wall-clock time.
    pub fn update<S: PresentationSurface + ?Sized>(&mut self, surface: &mut S) -> Result<()> {
        self.update_at(surface, Instant::now())
    }

    /// Run one frame; `now` drives the stats throttle.
    pub fn update_at<S: PresentationSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        now: Instant,
    ) -> Result<()> {
        for event in surface.poll_events() {
            self.handle_event(event)?;
        }
        self.poll_held_keys(&*surface);
        if self.state.params_dirty {
            self.state.rig.apply(&mut self.state.params.camera);
        }

        surface.wait_for_present();

        if self.state.params_dirty {
            self.push_params(surface.framebuffer_size())?;
        }

        self.dispatch()?;
        self.backend.finish_queue()?;

        let target = match self.state.pipeline {
            PipelineMode::Wavefront => PresentTarget::Front(self.state.front_buffer),
            PipelineMode::Megakernel => PresentTarget::PixelBuffer,
        };
        self.denoise_display(target)?;
        surface.present(target)?;
        self.state.last_presented = Some(target);
        if self.state.pipeline == PipelineMode::Wavefront {
            self.state.front_buffer.toggle();
        }

        self.stats.tick(&mut self.backend, now)?;
        self.backend.fetch_stats_async()?;

        self.state.iteration += 1;
        let interval = self.settings.snapshot_interval;
        if interval > 0 && self.state.iteration % interval == 0 {
            self.request_snapshot()?;
        }
        self.reap_writes();
        Ok(())
    }

    fn push_params(&mut self, framebuffer: (u32, u32)) -> Result<()> {
        let (width, height) = scaled_size(framebuffer, self.settings.render_scale);
        let params = &mut self.state.params;
        if (width, height) != (params.width, params.height) {
            self.backend.resize(width, height)?;
            params.width = width;
            params.height = height;
        }
        self.backend.update_params(params)?;
        self.state.params_dirty = false;
        self.state.iteration = 0;
        Ok(())
    }

    fn dispatch(&mut self) -> Result<()> {
        let iteration = self.state.iteration;
        let front = self.state.front_buffer;
        let b = &mut self.backend;

        match self.state.pipeline {
            PipelineMode::Wavefront if iteration == 0 => {
                let _span = tracing::info_span!("wavefront_preview").entered();
                b.enqueue_reset()?;
                b.enqueue_ray_gen()?;
                b.enqueue_extend()?;
                b.enqueue_explicit_sample(iteration)?;
                b.enqueue_extend()?;
                b.enqueue_explicit_sample(iteration + 1)?;
                b.enqueue_splat_preview(front)?;
            }
            PipelineMode::Wavefront => {
                let _span = tracing::info_span!("wavefront", iteration).entered();
                b.enqueue_ray_gen()?;
                b.enqueue_extend()?;
                b.enqueue_explicit_sample(iteration)?;
                b.enqueue_splat(front)?;
            }
            PipelineMode::Megakernel => {
                let _span = tracing::info_span!("megakernel", iteration).entered();
                b.enqueue_megakernel(iteration)?;
            }
        }
        Ok(())
    }

    /// Filter the accumulated frame into `target`. A recoverable filter
    /// failure leaves the noisy frame on screen.
    fn denoise_display(&mut self, target: PresentTarget) -> Result<()> {
        let Some(denoiser) = self.denoiser.as_mut().filter(|d| d.is_enabled()) else {
            return Ok(());
        };
        let _span = tracing::info_span!("denoise").entered();
        let mut features = self.backend.read_features()?;
        match denoiser.execute(&mut features) {
            Ok(()) => self.backend.write_display(target, &features.color),
            Err(e) if !e.is_fatal() => {
                log::warn!("Denoiser skipped: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Route one input event.
    pub fn handle_event(&mut self, event: InputEvent) -> Result<()> {
        match event {
            InputEvent::KeyPressed(key) => {
                if let Some(action) = self.bindings.action(key) {
                    self.handle_action(action)?;
                }
            }
            InputEvent::MouseButton { button: MouseButton::Left, pressed, x, y } => {
                self.state.left_down = pressed;
                self.state.drag = pressed.then_some(Vec2::new(x, y));
            }
            InputEvent::MouseButton { .. } => {}
            InputEvent::CursorMoved { x, y } => {
                if self.state.left_down {
                    let pos = Vec2::new(x, y);
                    let last = self.state.drag.unwrap_or(pos);
                    self.state.rig.rotation += pos - last;
                    self.state.drag = Some(pos);
                    self.state.params_dirty = true;
                }
            }
            InputEvent::Scroll(delta) => {
                if delta != 0.0 {
                    self.state.rig.scroll(delta);
                }
            }
        }
        Ok(())
    }

    /// Apply one keypress action. Only [`Error::is_fatal`] errors escape.
    pub fn handle_action(&mut self, action: Action) -> Result<()> {
        log::debug!("action {action:?}");
        match action {
            Action::QuickLoadScene(key) => match self.settings.scene_shortcuts.get(&key).cloned() {
                Some(path) => self.reinit_scene(Some(&path))?,
                None => log::info!("No scene bound to key {key}"),
            },
            Action::OpenScenePicker => self.reinit_scene(None)?,
            Action::ToggleLightMode => {
                match self.state.params.toggle_light_mode(self.state.has_env_map) {
                    Some(mode) => log::info!("Light mode: {mode:?}"),
                    None => log::info!("No environment map loaded"),
                }
            }
            Action::ToggleSamplingMode => {
                let mode = self.state.params.toggle_sampling_mode();
                log::info!("Sampling mode: {mode:?}");
            }
            Action::TogglePipeline => {
                self.state.pipeline = self.state.pipeline.toggled();
                log::info!("Pipeline: {:?}", self.state.pipeline);
            }
            Action::ResetCamera => {
                self.state.params.camera = Camera::default();
                self.state.rig.rotation = Vec2::ZERO;
            }
            Action::LoadState => self.load_state()?,
            Action::AimLightAtCamera => {
                let camera = self.state.params.camera;
                aim_light(&mut self.state.params.light, &camera);
            }
            Action::IncreaseBounces => {
                let p = &mut self.state.params;
                p.max_bounces = p.max_bounces.saturating_add(1);
                log::info!("Max bounces: {}", p.max_bounces);
            }
            Action::DecreaseBounces => {
                let p = &mut self.state.params;
                p.max_bounces = p.max_bounces.saturating_sub(1);
                log::info!("Max bounces: {}", p.max_bounces);
            }
            Action::SaveState => {
                if let Err(e) = self.save_state() {
                    log::error!("Failed to save state: {e}");
                }
            }
            Action::Snapshot => self.request_snapshot()?,
        }
        if action.marks_dirty() {
            self.state.params_dirty = true;
        }
        Ok(())
    }

    /// Apply every held key once.
    pub fn poll_held_keys<S: PresentationSurface + ?Sized>(&mut self, surface: &S) {
        let step = self.state.rig.step();
        for &(key, motion) in HELD_KEYS {
            if !surface.is_key_down(key) {
                continue;
            }
            let p = &mut self.state.params;
            match motion {
                Motion::Move { forward, right, up } => {
                    let cam = &mut p.camera;
                    cam.position += step * (forward * cam.direction + right * cam.right + up * cam.up);
                }
                Motion::Rotate { yaw, pitch } => {
                    self.state.rig.rotation += Vec2::new(yaw, pitch);
                }
                Motion::Fov(delta) => {
                    p.camera.fov = (p.camera.fov + delta).clamp(FOV_RANGE.0, FOV_RANGE.1);
                }
                Motion::LightSize(factor) => p.light.size *= factor,
                Motion::LightPower(factor) => p.light.emission *= factor,
                Motion::EnvStrength(factor) => p.env_strength *= factor,
            }
            self.state.params_dirty = true;
        }
    }

    /// Write camera/light state for the current scene.
    pub fn save_state(&self) -> Result<PathBuf> {
        persist::save(
            &self.settings.state_dir(),
            &self.state.scene_hash,
            &self.state.params,
            &self.state.rig,
        )
    }

    /// Restore saved state for the current scene; a missing or truncated
    /// file keeps the current values.
    pub fn load_state(&mut self) -> Result<()> {
        let dir = self.settings.state_dir();
        let s = &mut self.state;
        match persist::load(&dir, &s.scene_hash, &mut s.params, &mut s.rig) {
            Ok(()) => Ok(()),
            Err(Error::FileNotFound(path)) => {
                log::info!("No saved state at {}", path.display());
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                log::warn!("Ignoring saved state: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Read back the last presented image and write it on a background thread.
    pub fn request_snapshot(&mut self) -> Result<()> {
        let target = self.state.last_presented.unwrap_or(match self.state.pipeline {
            PipelineMode::Wavefront => PresentTarget::Front(self.state.front_buffer),
            PipelineMode::Megakernel => PresentTarget::PixelBuffer,
        });
        let format = self.snapshots.format().pixel_format();
        let denoiser = self.denoiser.as_mut().filter(|d| d.is_enabled());

        // Display snapshots already hold the filtered frame.
        let snapshot = match (format, denoiser) {
            (PixelFormat::Radiance, Some(denoiser)) => {
                let mut features = self.backend.read_features()?;
                denoiser.execute(&mut features)?;
                Snapshot {
                    width: features.width,
                    height: features.height,
                    pixels: Pixels::RgbF32(features.color),
                }
            }
            _ => self.backend.snapshot(target, format)?,
        };
        self.pending_writes.push(self.snapshots.spawn(snapshot));
        Ok(())
    }

    /// Path of the most recently completed snapshot.
    pub fn last_snapshot(&self) -> Option<PathBuf> {
        self.snapshots.last_written()
    }

    fn reap_writes(&mut self) {
        self.pending_writes.retain(|h| !h.is_finished());
    }

    /// Wait for outstanding snapshot writes.
    pub fn finish(&mut self) {
        for handle in self.pending_writes.drain(..) {
            if handle.join().is_err() {
                log::error!("Snapshot writer panicked");
            }
        }
    }

    /// Replace the current scene. Load failures keep the old scene on the device.
    fn reinit_scene(&mut self, requested: Option<&Path>) -> Result<()> {
        match self.init_scene(requested) {
            Err(e) if !e.is_fatal() => {
                log::error!("Scene switch failed, keeping {}: {e}", self.state.scene_path.display());
                Ok(())
            }
            other => other,
        }
    }

    fn select_scene(&mut self, requested: Option<&Path>) -> Result<Scene> {
        let default = self.settings.default_scene.clone();
        let path = match requested {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => self.picker.pick_scene().unwrap_or_else(|| default.clone()),
        };
        match Scene::load(&path) {
            Err(e) if !e.is_fatal() && path != default => {
                log::warn!("Cannot load {}: {e}; falling back to {}", path.display(), default.display());
                Scene::load(&default)
            }
            result => result,
        }
    }

    /// Select, hash, restore state, upload environment and hierarchy.
    fn init_scene(&mut self, requested: Option<&Path>) -> Result<()> {
        let _span = tracing::info_span!("init_scene").entered();
        let mut scene = self.select_scene(requested)?;

        let p = &mut self.state.params;
        p.env_strength = 1.0;
        p.use_env_map = false;
        p.use_area_light = true;
        p.max_bounces = 4;
        p.sample_implicit = true;
        p.sample_explicit = true;
        p.tri_count = scene.tri_count();
        p.light_count = scene.light_count();
        p.object_count = scene.object_count;
        self.state.scene_hash = scene.hash().to_owned();

        self.load_state()?;
        self.init_env_map()?;

        let sbvh = load_or_build(
            &self.settings.hierarchy_dir(),
            &self.state.scene_hash,
            &scene.triangles,
            &self.settings.sbvh,
        )?;
        let p = &mut self.state.params;
        p.world_radius = sbvh.world_radius();
        p.node_count = sbvh.node_count() as u32;

        let gpu = GpuSceneData::new(&sbvh, &scene.triangles, &scene.materials);
        self.backend.upload_scene(&gpu)?;
        scene.drop_geometry();

        self.settings.add_recent(scene.source.clone());
        self.state.scene_path = scene.source;
        self.state.params_dirty = true;
        Ok(())
    }

    /// Upload the configured environment map once; afterwards only re-enable it.
    fn init_env_map(&mut self) -> Result<()> {
        if !self.state.has_env_map {
            let Some(path) = self.settings.env_map.clone() else {
                return Ok(());
            };
            let env = match EnvironmentMap::load(&path) {
                Ok(env) => env,
                Err(e) if !e.is_fatal() => {
                    log::warn!("Environment map disabled: {e}");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            self.backend.upload_env_map(&env)?;
            let p = &mut self.state.params;
            p.env_width = env.width;
            p.env_height = env.height;
            p.env_luminance = env.total_luminance;
            self.state.has_env_map = true;
        }
        self.state.params.use_env_map = true;
        Ok(())
    }
}

impl<B: ComputeBackend> Drop for Tracer<B> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Device pixel size for a framebuffer, never below 1×1.
pub fn scaled_size(framebuffer: (u32, u32), scale: f32) -> (u32, u32) {
    let apply = |v: u32| ((v as f32 * scale) as u32).max(1);
    (apply(framebuffer.0), apply(framebuffer.1))
}
