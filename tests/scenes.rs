//! Scene selection, hierarchy cache reuse and saved state.

mod common;

use std::collections::VecDeque;
use std::path::Path;

use common::*;
use glam::Vec3;
use wavetrace::backend::recording::Stage;
use wavetrace::input::Key;
use wavetrace::scene::Scene;
use wavetrace::sbvh::hierarchy_path;
use wavetrace::tracer::{HeadlessSurface, NoPicker, ScriptedPicker};

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[test]
fn test_hash_ignores_path_and_reuses_cache() {
    let dir = tempfile::tempdir().unwrap();
    let settings = sandbox(dir.path());
    let a = write_obj(&dir.path().join("a/scene.obj"), SCENE_OBJ);
    let b = write_obj(&dir.path().join("b/renamed.obj"), SCENE_OBJ);
    assert_eq!(Scene::load(&a).unwrap().hash(), Scene::load(&b).unwrap().hash());

    let hierarchies = settings.hierarchy_dir();
    let mut settings = settings;
    settings.scene_shortcuts.insert(2, b.clone());

    let mut t = tracer_with(settings, Box::new(NoPicker), Some(&a));
    let hash = t.state().scene_hash.clone();
    let cache = hierarchy_path(&hierarchies, &hash);
    assert!(cache.is_file());
    assert_eq!(files_in(&hierarchies), 1);
    let written = std::fs::metadata(&cache).unwrap().modified().unwrap();

    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    surface.press(Key::Num2);
    t.update(&mut surface).unwrap();
    assert_eq!(t.state().scene_path, b);
    assert_eq!(t.state().scene_hash, hash);
    assert_eq!(files_in(&hierarchies), 1);
    assert_eq!(std::fs::metadata(&cache).unwrap().modified().unwrap(), written);
}

#[test]
fn test_scene_switch_uploads_new_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = sandbox(dir.path());
    let other = write_obj(&dir.path().join("other.obj"), OTHER_OBJ);
    settings.scene_shortcuts.insert(1, other.clone());
    let mut t = tracer(settings);
    assert_eq!(t.state().params.tri_count, 6);

    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    t.update(&mut surface).unwrap();
    t.backend_mut().clear();

    surface.press(Key::Num1);
    t.update(&mut surface).unwrap();
    assert_eq!(t.state().scene_path, other);
    assert_eq!(t.state().params.tri_count, 1);
    assert!(t
        .backend()
        .stages
        .iter()
        .any(|s| matches!(s, Stage::UploadScene { triangles: 1, .. })));
    // Switching restarts accumulation
    assert!(t.backend().kernels().contains(&Stage::Reset));

    // Unbound shortcut is ignored
    surface.press(Key::Num4);
    t.update(&mut surface).unwrap();
    assert_eq!(t.state().scene_path, other);
}

#[test]
fn test_missing_scene_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let settings = sandbox(dir.path());
    let default = settings.default_scene.clone();

    let t = tracer_with(settings, Box::new(NoPicker), Some(&dir.path().join("missing.obj")));
    assert_eq!(t.state().scene_path, default);
    assert_eq!(t.state().params.tri_count, 6);
}

#[test]
fn test_picker_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let settings = sandbox(dir.path());
    let picked = write_obj(&dir.path().join("picked.obj"), OTHER_OBJ);

    let picker = ScriptedPicker(VecDeque::from([picked.clone()]));
    let mut t = tracer_with(settings.clone(), Box::new(picker), None);
    assert_eq!(t.state().scene_path, picked);

    // Picker is now exhausted: L cancels and loads the default
    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    surface.press(Key::L);
    t.update(&mut surface).unwrap();
    assert_eq!(t.state().scene_path, settings.default_scene);
    assert_eq!(t.settings().recent_files.first(), Some(&settings.default_scene));
}

#[test]
fn test_failed_switch_keeps_current_scene() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = sandbox(dir.path());
    settings.scene_shortcuts.insert(3, dir.path().join("gone.obj"));
    let default = settings.default_scene.clone();
    let other = write_obj(&dir.path().join("other.obj"), OTHER_OBJ);
    let mut t = tracer_with(settings, Box::new(NoPicker), Some(&other));

    // With the default gone too there is nothing to fall back to
    std::fs::remove_file(&default).unwrap();
    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    surface.press(Key::Num3);
    t.update(&mut surface).unwrap();
    assert_eq!(t.state().scene_path, other);
    assert_eq!(t.state().params.tri_count, 1);
}

#[test]
fn test_unsupported_and_empty_scenes() {
    let dir = tempfile::tempdir().unwrap();
    let txt = write_obj(&dir.path().join("notes.txt"), "hello");
    assert!(Scene::load(&txt).is_err());

    let empty = write_obj(&dir.path().join("empty.obj"), "v 0 0 0\n");
    let err = Scene::load(&empty).unwrap_err();
    assert!(!err.is_fatal());
}

#[test]
fn test_backend_failure_during_setup_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let backend = wavetrace::backend::recording::RecordingBackend {
        fail_on: Some("upload_scene"),
        ..Default::default()
    };
    let result = wavetrace::tracer::Tracer::new(
        backend,
        sandbox(dir.path()),
        Box::new(NoPicker),
        None,
        (WIDTH, HEIGHT),
    );
    assert!(result.err().unwrap().is_fatal());
}

#[test]
fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let settings = sandbox(dir.path());

    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    let (camera, light, rig) = {
        let mut t = tracer(settings.clone());
        t.edit_params(|p| {
            p.camera.fov = 33.5;
            p.camera.position = Vec3::new(0.25, 1.5, -3.0);
            p.light.emission = Vec3::new(7.0, 6.0, 5.0);
        });
        surface.push(wavetrace::input::InputEvent::Scroll(-1.0));
        surface.hold(Key::Right, true);
        t.update(&mut surface).unwrap();
        surface.hold(Key::Right, false);

        surface.press(Key::F2);
        t.update(&mut surface).unwrap();
        (t.state().params.camera, t.state().params.light, t.state().rig)
    };
    assert!(files_in(&settings.state_dir()) == 1);

    let t = tracer(settings);
    assert_eq!(t.state().params.camera.fov, 33.5);
    assert_eq!(t.state().params.camera.position, camera.position);
    assert_eq!(t.state().params.light, light);
    assert_eq!(t.state().rig, rig);
}

#[test]
fn test_load_state_restores_and_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = tracer(sandbox(dir.path()));
    let mut surface = HeadlessSurface::new(WIDTH, HEIGHT);
    t.update(&mut surface).unwrap();

    // F3 without a saved file keeps the current values
    let fov = t.state().params.camera.fov;
    surface.press(Key::F3);
    t.update(&mut surface).unwrap();
    assert_eq!(t.state().params.camera.fov, fov);
    assert_eq!(t.state().iteration, 1);

    t.save_state().unwrap();
    t.edit_params(|p| p.camera.fov = fov + 10.0);
    surface.press(Key::F3);
    t.update(&mut surface).unwrap();
    assert_eq!(t.state().params.camera.fov, fov);
}

#[test]
fn test_bundled_default_scene_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/cornell.obj");
    let scene = Scene::load(&path).unwrap();
    assert_eq!(scene.tri_count(), 32);
    assert_eq!(scene.light_count(), 2);
    let bounds = scene.bounds();
    assert_eq!(bounds.min, Vec3::new(-1.2, 0.0, -1.2));
    assert_eq!(bounds.max, Vec3::new(1.2, 2.4, 1.2));
}
