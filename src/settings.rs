//! Persistent application settings.
//!
//! Looked up in `./settings.json` first, then in
//! `<config dir>/wavetrace/settings.json`; missing or unparsable files fall
//! back to defaults. Out-of-range values are clamped on load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::PipelineMode;
use crate::sbvh::{SbvhConfig, MAX_DEPTH};

const FILE_NAME: &str = "settings.json";
const MAX_RECENT_FILES: usize = 10;

/// Snapshot image encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotFormat {
    /// Tonemapped 8-bit PNG, as displayed.
    #[default]
    Png,
    /// Linear Radiance HDR.
    Hdr,
}

impl SnapshotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Hdr => "hdr",
        }
    }
}

/// Application settings that persist between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Display
    /// Device pixels per framebuffer pixel.
    pub render_scale: f32,
    pub window_width: f32,
    pub window_height: f32,

    // Files
    /// Root for `hierarchies/` and `states/`.
    pub data_dir: PathBuf,
    /// Used when the picker is cancelled or a scene fails to load.
    pub default_scene: PathBuf,
    /// Keys 1-5.
    pub scene_shortcuts: BTreeMap<u8, PathBuf>,
    pub env_map: Option<PathBuf>,
    pub recent_files: Vec<PathBuf>,

    // Output
    /// Write a snapshot every N iterations (0 disables).
    pub snapshot_interval: u32,
    pub snapshot_format: SnapshotFormat,
    pub snapshot_dir: PathBuf,
    pub stats_interval_secs: f32,

    // Rendering
    pub pipeline: PipelineMode,
    pub sbvh: SbvhConfig,
    pub denoise_blend: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            render_scale: 1.0,
            window_width: 1280.0,
            window_height: 720.0,
            data_dir: PathBuf::from("data"),
            default_scene: PathBuf::from("assets/cornell.obj"),
            scene_shortcuts: BTreeMap::new(),
            env_map: None,
            recent_files: Vec::new(),
            snapshot_interval: 1000,
            snapshot_format: SnapshotFormat::Png,
            snapshot_dir: PathBuf::from("."),
            stats_interval_secs: 1.0,
            pipeline: PipelineMode::Wavefront,
            sbvh: SbvhConfig::default(),
            denoise_blend: 0.0,
        }
    }
}

impl Settings {
    /// Per-user settings file path.
    fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("wavetrace");
            p.push(FILE_NAME);
            p
        })
    }

    /// Load settings: working directory, then user config dir, then defaults.
    pub fn load() -> Self {
        let local = PathBuf::from(FILE_NAME);
        let settings = std::iter::once(local)
            .chain(Self::user_path())
            .find_map(|p| Self::load_from(&p));
        settings.unwrap_or_default()
    }

    /// Parse a specific file. `None` if it is missing or malformed.
    pub fn load_from(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Self>(&text) {
            Ok(mut s) => {
                log::info!("Settings loaded from {}", path.display());
                s.validate();
                Some(s)
            }
            Err(e) => {
                log::warn!("Ignoring malformed settings {}: {e}", path.display());
                None
            }
        }
    }

    /// Clamp out-of-range values.
    pub fn validate(&mut self) {
        if !self.render_scale.is_finite() {
            self.render_scale = 1.0;
        }
        self.render_scale = self.render_scale.clamp(0.05, 4.0);
        if !(self.stats_interval_secs.is_finite() && self.stats_interval_secs > 0.0) {
            self.stats_interval_secs = 1.0;
        }
        self.denoise_blend = self.denoise_blend.clamp(0.0, 1.0);
        self.sbvh.max_leaf_size = self.sbvh.max_leaf_size.clamp(1, 64);
        self.sbvh.max_depth = self.sbvh.max_depth.clamp(1, MAX_DEPTH);
        if !(self.sbvh.alpha >= 0.0) {
            self.sbvh.alpha = SbvhConfig::default().alpha;
        }
        self.scene_shortcuts.retain(|k, _| (1..=5).contains(k));
        self.window_width = self.window_width.max(320.0);
        self.window_height = self.window_height.max(240.0);
    }

    /// Save settings to the per-user file.
    pub fn save(&self) {
        if let Some(path) = Self::user_path() {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).ok();
            }
            if let Ok(json) = serde_json::to_string_pretty(self) {
                if let Err(e) = std::fs::write(&path, json) {
                    log::warn!("Failed to save settings {}: {e}", path.display());
                }
            }
        }
    }

    /// `data_dir/hierarchies`
    pub fn hierarchy_dir(&self) -> PathBuf {
        self.data_dir.join("hierarchies")
    }

    /// `data_dir/states`
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("states")
    }

    /// Add file to recent files list (moves to top if already present)
    pub fn add_recent(&mut self, path: PathBuf) {
        self.recent_files.retain(|p| p != &path);
        self.recent_files.insert(0, path);
        self.recent_files.truncate(MAX_RECENT_FILES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        std::fs::write(&path, r#"{ "render_scale": 0.5, "scene_shortcuts": { "2": "assets/box.obj" } }"#).unwrap();

        let s = Settings::load_from(&path).unwrap();
        assert_eq!(s.render_scale, 0.5);
        assert_eq!(s.scene_shortcuts.get(&2), Some(&PathBuf::from("assets/box.obj")));
        assert_eq!(s.snapshot_interval, 1000);
        assert_eq!(s.default_scene, PathBuf::from("assets/cornell.obj"));
    }

    #[test]
    fn test_validate_clamps() {
        let mut s = Settings {
            render_scale: 100.0,
            stats_interval_secs: -1.0,
            denoise_blend: 3.0,
            ..Settings::default()
        };
        s.scene_shortcuts.insert(9, PathBuf::from("x.obj"));
        s.sbvh.max_leaf_size = 0;
        s.sbvh.max_depth = 64;
        s.validate();
        assert_eq!(s.render_scale, 4.0);
        assert_eq!(s.stats_interval_secs, 1.0);
        assert_eq!(s.denoise_blend, 1.0);
        assert!(s.scene_shortcuts.is_empty());
        assert_eq!(s.sbvh.max_leaf_size, 1);
        assert_eq!(s.sbvh.max_depth, MAX_DEPTH);
    }

    #[test]
    fn test_malformed_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Settings::load_from(&path).is_none());
    }

    #[test]
    fn test_enums_serialize_snake_case() {
        let json = serde_json::to_string(&Settings::default()).unwrap();
        assert!(json.contains(r#""pipeline":"wavefront""#));
        assert!(json.contains(r#""snapshot_format":"png""#));
        assert!(json.contains(r#""split_mode":"sah""#));
    }

    #[test]
    fn test_recent_files() {
        let mut s = Settings::default();
        s.add_recent(PathBuf::from("a.obj"));
        s.add_recent(PathBuf::from("b.obj"));
        s.add_recent(PathBuf::from("a.obj"));
        assert_eq!(s.recent_files, vec![PathBuf::from("a.obj"), PathBuf::from("b.obj")]);
    }

    #[test]
    fn test_dirs() {
        let s = Settings::default();
        assert_eq!(s.hierarchy_dir(), PathBuf::from("data/hierarchies"));
        assert_eq!(s.state_dir(), PathBuf::from("data/states"));
    }
}
