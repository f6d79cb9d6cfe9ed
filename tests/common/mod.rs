//! Shared fixtures: a tiny OBJ scene and settings sandboxed in a temp dir.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use wavetrace::backend::recording::{RecordingBackend, Stage};
use wavetrace::settings::Settings;
use wavetrace::tracer::{NoPicker, ScenePicker, Tracer};

pub const WIDTH: u32 = 32;
pub const HEIGHT: u32 = 24;

/// Floor quad plus a tetrahedron.
pub const SCENE_OBJ: &str = "\
o floor
v -2 0 -2
v  2 0 -2
v  2 0  2
v -2 0  2
f 1 2 3
f 1 3 4
o tetra
v 0 0.5 0
v 1 0.5 0
v 0 1.5 0
v 0 0.5 1
f 5 6 7
f 5 7 8
f 5 8 6
f 6 8 7
";

/// A different mesh (one triangle) for scene-switch tests.
pub const OTHER_OBJ: &str = "\
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
";

pub fn write_obj(path: &Path, contents: &str) -> PathBuf {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::write(path, contents).unwrap();
    path.to_path_buf()
}

/// Settings with every directory inside `root` and `root/default.obj` as
/// the default scene.
pub fn sandbox(root: &Path) -> Settings {
    let default_scene = write_obj(&root.join("default.obj"), SCENE_OBJ);
    Settings {
        data_dir: root.join("data"),
        snapshot_dir: root.join("shots"),
        default_scene,
        ..Settings::default()
    }
}

pub fn tracer_with(
    settings: Settings,
    picker: Box<dyn ScenePicker>,
    scene: Option<&Path>,
) -> Tracer<RecordingBackend> {
    Tracer::new(RecordingBackend::new(), settings, picker, scene, (WIDTH, HEIGHT)).unwrap()
}

/// Tracer on the default scene with the setup calls cleared.
pub fn tracer(settings: Settings) -> Tracer<RecordingBackend> {
    let mut t = tracer_with(settings, Box::new(NoPicker), None);
    t.backend_mut().clear();
    t
}

/// Kernel stages recorded since the last clear, then clear.
pub fn take_kernels(t: &mut Tracer<RecordingBackend>) -> Vec<Stage> {
    let kernels = t.backend().kernels();
    t.backend_mut().clear();
    kernels
}

pub fn count(stages: &[Stage], name: &str) -> usize {
    stages.iter().filter(|s| s.name() == name).count()
}

/// Write a small non-black equirectangular HDR.
pub fn write_env_map(path: &Path) -> PathBuf {
    let img = image::Rgb32FImage::from_pixel(8, 4, image::Rgb([1.0, 0.5, 0.25]));
    image::DynamicImage::ImageRgb32F(img).save(path).unwrap();
    path.to_path_buf()
}
