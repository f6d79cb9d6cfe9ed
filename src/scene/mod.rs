//! Scene geometry, materials and content hashing.
//!
//! A [`Scene`] is the triangle soup handed to the SBVH builder and the
//! compute backend. Its [content hash](Scene::hash) keys both the hierarchy
//! cache and the saved render state, so the same geometry reached through a
//! different path (copy, symlink, rename) reuses both.

pub mod environment;
pub mod loader;
mod triangle;

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

pub use environment::EnvironmentMap;
pub use triangle::{Hit, Material, Triangle};

use crate::sbvh::Aabb;
use crate::util::{Error, Result};

/// Loaded scene geometry.
#[derive(Debug, Clone)]
pub struct Scene {
    pub triangles: Vec<Triangle>,
    pub materials: Vec<Material>,
    /// Number of meshes/objects in the source file.
    pub object_count: u32,
    /// File the scene was loaded from (informational; not part of the hash).
    pub source: PathBuf,
    hash: String,
    tri_count: u32,
    light_count: u32,
}

impl Scene {
    /// Load an `.obj` or `.ply` file.
    pub fn load(path: &Path) -> Result<Self> {
        let _span = tracing::info_span!("scene_load", path = %path.display()).entered();
        if !path.is_file() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let (triangles, materials, object_count) = match ext.as_str() {
            "obj" => loader::load_obj(path)?,
            "ply" => loader::load_ply(path)?,
            other => return Err(Error::UnsupportedFormat(other.to_string())),
        };
        let scene = Self::from_triangles(triangles, materials, object_count, path)?;
        log::info!(
            "Loaded {} ({} triangles, {} objects, hash {})",
            path.display(),
            scene.tri_count,
            scene.object_count,
            scene.hash
        );
        Ok(scene)
    }

    /// Build a scene from in-memory geometry. Fails on an empty triangle list.
    pub fn from_triangles(
        triangles: Vec<Triangle>,
        mut materials: Vec<Material>,
        object_count: u32,
        source: impl Into<PathBuf>,
    ) -> Result<Self> {
        let source = source.into();
        if triangles.is_empty() {
            return Err(Error::EmptyScene(source));
        }
        if materials.is_empty() {
            materials.push(Material::default());
        }
        // Clamp dangling material ids instead of reading past the table on the GPU.
        let max_id = materials.len() as u32 - 1;
        let triangles: Vec<Triangle> = triangles
            .into_iter()
            .map(|mut t| {
                t.material_id = t.material_id.min(max_id);
                t
            })
            .collect();

        let light_count = triangles
            .iter()
            .filter(|t| materials[t.material_id as usize].is_emissive())
            .count() as u32;

        Ok(Self {
            hash: content_hash(&triangles),
            tri_count: triangles.len() as u32,
            light_count,
            triangles,
            materials,
            object_count: object_count.max(1),
            source,
        })
    }

    /// Hex digest of the geometry content.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Triangle count at load time; stays valid after [`Scene::drop_geometry`].
    pub fn tri_count(&self) -> u32 {
        self.tri_count
    }

    /// Number of emissive triangles.
    pub fn light_count(&self) -> u32 {
        self.light_count
    }

    pub fn bounds(&self) -> Aabb {
        self.triangles.iter().fold(Aabb::EMPTY, |acc, t| acc.union(&t.aabb()))
    }

    /// Release the host copy of the triangles once the device owns them.
    pub fn drop_geometry(&mut self) {
        self.triangles = Vec::new();
    }
}

/// Digest of positions, normals, material ids and triangle count.
///
/// The source path is deliberately excluded.
pub fn content_hash(triangles: &[Triangle]) -> String {
    let mut hasher = Md5::new();
    hasher.update((triangles.len() as u64).to_le_bytes());
    for t in triangles {
        for p in t.v.iter().chain(t.n.iter()) {
            hasher.update(bytemuck::bytes_of(&p.to_array()));
        }
        hasher.update(t.material_id.to_le_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
