//! Lighting and sampling toggles, camera reset, snapshots with a denoiser.

mod common;

use std::sync::{Arc, Mutex};

use common::*;
use wavetrace::backend::postprocess::{DenoiseInput, PostProcess, PostProcessStage};
use wavetrace::backend::recording::Stage;
use wavetrace::backend::{FrontBuffer, PipelineMode, PresentTarget};
use wavetrace::input::{Action, Key};
use wavetrace::params::{LightMode, SamplingMode};
use wavetrace::settings::SnapshotFormat;
use wavetrace::tracer::HeadlessSurface;

#[test]
fn test_sampling_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = tracer(sandbox(dir.path()));
    assert_eq!(t.state().params.sampling_mode(), SamplingMode::Mis);

    let mut seen = Vec::new();
    for _ in 0..3 {
        t.handle_action(Action::ToggleSamplingMode).unwrap();
        let p = &t.state().params;
        seen.push((p.sample_implicit, p.sample_explicit));
    }
    assert_eq!(seen, vec![(false, true), (true, false), (true, true)]);
}

#[test]
fn test_light_toggle_without_env_map() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = tracer(sandbox(dir.path()));
    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    t.update(&mut surface).unwrap();
    let before = t.state().params.clone();
    assert_eq!(before.light_mode(), LightMode::AreaLight);

    surface.press(Key::H);
    t.update(&mut surface).unwrap();
    assert_eq!(t.state().params.use_area_light, before.use_area_light);
    assert_eq!(t.state().params.use_env_map, before.use_env_map);
}

#[test]
fn test_light_cycle_with_env_map() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = sandbox(dir.path());
    settings.env_map = Some(write_env_map(&dir.path().join("sky.hdr")));
    let t = tracer_with(settings, Box::new(wavetrace::tracer::NoPicker), None);
    assert!(t.backend().stages.contains(&Stage::UploadEnvMap(8, 4)));
    assert!(t.state().has_env_map);

    let mut t = t;
    assert_eq!(t.state().params.light_mode(), LightMode::Both);
    assert!(t.state().params.env_luminance > 0.0);
    let mut modes = Vec::new();
    for _ in 0..3 {
        t.handle_action(Action::ToggleLightMode).unwrap();
        modes.push(t.state().params.light_mode());
    }
    assert_eq!(modes, vec![LightMode::Environment, LightMode::AreaLight, LightMode::Both]);
}

#[test]
fn test_bad_env_map_is_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = sandbox(dir.path());
    settings.env_map = Some(dir.path().join("nope.hdr"));
    let t = tracer(settings);
    assert!(!t.state().has_env_map);
    assert!(!t.state().params.use_env_map);
}

#[test]
fn test_bounces_and_camera_reset() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = tracer(sandbox(dir.path()));
    for _ in 0..6 {
        t.handle_action(Action::DecreaseBounces).unwrap();
    }
    assert_eq!(t.state().params.max_bounces, 0);

    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    surface.hold(Key::Left, true);
    surface.hold(Key::D, true);
    t.update(&mut surface).unwrap();
    surface.held.clear();
    assert_ne!(t.state().rig.rotation.x, 0.0);

    surface.press(Key::F1);
    t.update(&mut surface).unwrap();
    assert_eq!(t.state().rig.rotation.x, 0.0);
    assert_eq!(t.state().params.camera, wavetrace::params::Camera::default());
}

#[test]
fn test_aim_light_follows_camera() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = tracer(sandbox(dir.path()));
    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    surface.hold(Key::Right, true);
    t.update(&mut surface).unwrap();
    surface.held.clear();

    surface.press(Key::Space);
    t.update(&mut surface).unwrap();
    let p = &t.state().params;
    assert_eq!(p.light.normal, p.camera.direction);
    assert_eq!(t.state().iteration, 1);
}

/// Replaces every channel with a constant.
struct Constant(f32);

impl PostProcessStage for Constant {
    fn resize(&mut self, _width: u32, _height: u32) -> wavetrace::Result<()> {
        Ok(())
    }

    fn denoise(&mut self, _input: &DenoiseInput<'_>, output: &mut [f32]) -> wavetrace::Result<()> {
        output.fill(self.0);
        Ok(())
    }
}

/// Buffer lengths and first values the stage was handed.
#[derive(Debug, Clone, PartialEq)]
struct Seen {
    lens: [usize; 3],
    color: f32,
    albedo: f32,
    normal: [f32; 3],
}

/// Outputs albedo times the normal's y and logs every call.
struct Guided {
    seen: Arc<Mutex<Vec<Seen>>>,
    fail: bool,
}

impl PostProcessStage for Guided {
    fn resize(&mut self, _width: u32, _height: u32) -> wavetrace::Result<()> {
        Ok(())
    }

    fn denoise(&mut self, input: &DenoiseInput<'_>, output: &mut [f32]) -> wavetrace::Result<()> {
        self.seen.lock().unwrap().push(Seen {
            lens: [input.color.len(), input.albedo.len(), input.normal.len()],
            color: input.color[0],
            albedo: input.albedo[0],
            normal: [input.normal[0], input.normal[1], input.normal[2]],
        });
        if self.fail {
            return Err(wavetrace::Error::other("filter unavailable"));
        }
        for (i, o) in output.iter_mut().enumerate() {
            *o = input.albedo[i] * input.normal[i - i % 3 + 1];
        }
        Ok(())
    }
}

fn guided(fail: bool) -> (PostProcess, Arc<Mutex<Vec<Seen>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let stage = Guided { seen: Arc::clone(&seen), fail };
    (PostProcess::new(Box::new(stage)), seen)
}

#[test]
fn test_denoiser_filters_displayed_frame() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = sandbox(dir.path());
    settings.denoise_blend = 0.5;
    let mut t = tracer(settings);
    let (denoiser, seen) = guided(false);
    t.set_denoiser(Some(denoiser));

    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    t.update(&mut surface).unwrap();

    let n = (WIDTH * HEIGHT * 3) as usize;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Seen { lens: [n; 3], color: 0.5, albedo: 0.25, normal: [0.0, 1.0, 0.0] }]
    );
    // Filtered after the queue drains, written before stats and present
    let stages = &t.backend().stages;
    let tail = &stages[stages.len() - 4..];
    let front = PresentTarget::Front(FrontBuffer(0));
    assert_eq!(
        tail,
        &[Stage::Finish, Stage::ReadFeatures, Stage::WriteDisplay(front), Stage::FetchStats]
    );
    assert_eq!(surface.presented, vec![front]);

    // Half noisy 0.5, half filtered 0.25
    let shown = t.backend().displayed.clone().unwrap();
    assert_eq!(shown.len(), n);
    assert!(shown.iter().all(|&c| (c - 0.375).abs() < 1e-6));
}

#[test]
fn test_denoiser_in_megakernel_and_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = sandbox(dir.path());
    settings.pipeline = PipelineMode::Megakernel;
    let mut t = tracer(settings);
    let (denoiser, seen) = guided(false);
    t.set_denoiser(Some(denoiser));

    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    t.update(&mut surface).unwrap();
    assert!(t.backend().stages.contains(&Stage::WriteDisplay(PresentTarget::PixelBuffer)));

    let (mut denoiser, _) = guided(false);
    denoiser.enable(false);
    t.set_denoiser(Some(denoiser));
    t.backend_mut().clear();
    t.update(&mut surface).unwrap();
    assert!(!t.backend().stages.contains(&Stage::ReadFeatures));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_denoiser_failure_keeps_noisy_frame() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = tracer(sandbox(dir.path()));
    let (denoiser, seen) = guided(true);
    t.set_denoiser(Some(denoiser));

    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    t.update(&mut surface).unwrap();
    t.update(&mut surface).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert!(t.backend().displayed.is_none());
    assert_eq!(surface.presented.len(), 2);
}

#[test]
fn test_hdr_snapshot_goes_through_denoiser() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = sandbox(dir.path());
    settings.snapshot_format = SnapshotFormat::Hdr;
    let mut t = tracer(settings);
    t.set_denoiser(Some(PostProcess::new(Box::new(Constant(2.0)))));

    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    t.update(&mut surface).unwrap();
    surface.press(Key::F5);
    t.update(&mut surface).unwrap();
    t.finish();

    let path = t.last_snapshot().expect("snapshot written");
    assert_eq!(path.extension().unwrap(), "hdr");
    let img = image::open(&path).unwrap().to_rgb32f();
    assert_eq!((img.width(), img.height()), (WIDTH, HEIGHT));
    let px = img.get_pixel(3, 3).0;
    assert!(px.iter().all(|c| (c - 2.0).abs() < 1e-3), "{px:?}");
}
