//! Binary hierarchy cache keyed by scene content hash.
//!
//! File layout (little-endian):
//! ```text
//! magic "SBVH" | version u32 | tri_count u32 | node_count u32 | index_count u32
//! node_count × { min xyz f32, left_or_first u32, max xyz f32, count u32 }
//! index_count × u32
//! ```
//! A file is reused whenever it exists under the scene-hash path. Import
//! checks the structure so a truncated or foreign file is reported as
//! [`Error::InvalidCache`] and rebuilt instead of crashing traversal.

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;

use super::{build_sbvh, BvhNode, Sbvh, SbvhConfig};
use crate::scene::Triangle;
use crate::util::{Error, Result};

const MAGIC: &[u8; 4] = b"SBVH";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 4 + 4 * 4;
const NODE_SIZE: usize = 32;

/// `<dir>/hierarchy_<hash>.bin`
pub fn hierarchy_path(dir: &Path, hash: &str) -> PathBuf {
    dir.join(format!("hierarchy_{hash}.bin"))
}

/// Write the hierarchy to `path`, creating parent directories.
#[tracing::instrument(skip(sbvh), fields(nodes = sbvh.nodes.len()))]
pub fn export(sbvh: &Sbvh, tri_count: usize, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut w = BufWriter::new(File::create(path)?);

    w.write_all(MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;
    w.write_u32::<LittleEndian>(tri_count as u32)?;
    w.write_u32::<LittleEndian>(sbvh.nodes.len() as u32)?;
    w.write_u32::<LittleEndian>(sbvh.indices.len() as u32)?;

    for node in &sbvh.nodes {
        for v in node.aabb_min {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.write_u32::<LittleEndian>(node.left_or_first)?;
        for v in node.aabb_max {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.write_u32::<LittleEndian>(node.count)?;
    }
    for &idx in &sbvh.indices {
        w.write_u32::<LittleEndian>(idx)?;
    }
    w.flush()?;
    Ok(())
}

/// Read a hierarchy written by [`export`].
///
/// `tri_count` is the size of the triangle list the indices must fall into.
#[tracing::instrument]
pub fn import(path: &Path, tri_count: usize) -> Result<Sbvh> {
    let file = File::open(path).map_err(|e| Error::from_open(e, path))?;
    // SAFETY: the file is opened read-only and not modified while mapped.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MmapFailed(e.to_string()))?;
    parse(&mmap, tri_count)
}

fn parse(data: &[u8], tri_count: usize) -> Result<Sbvh> {
    if data.len() < HEADER_SIZE {
        return Err(Error::invalid_cache("file shorter than header"));
    }
    if &data[..4] != MAGIC {
        return Err(Error::invalid_cache("bad magic"));
    }
    let mut r = Cursor::new(&data[4..]);
    let version = r.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(Error::invalid_cache(format!("unsupported version {version}")));
    }
    let stored_tris = r.read_u32::<LittleEndian>()? as usize;
    let node_count = r.read_u32::<LittleEndian>()? as usize;
    let index_count = r.read_u32::<LittleEndian>()? as usize;

    if stored_tris != tri_count {
        log::warn!("Hierarchy cache was built for {stored_tris} triangles, scene has {tri_count}");
    }
    let expected = HEADER_SIZE + node_count * NODE_SIZE + index_count * 4;
    if node_count == 0 || data.len() != expected {
        return Err(Error::invalid_cache(format!(
            "size mismatch: {} bytes, expected {expected}",
            data.len()
        )));
    }

    let mut nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        let mut aabb_min = [0.0f32; 3];
        r.read_f32_into::<LittleEndian>(&mut aabb_min)?;
        let left_or_first = r.read_u32::<LittleEndian>()?;
        let mut aabb_max = [0.0f32; 3];
        r.read_f32_into::<LittleEndian>(&mut aabb_max)?;
        let count = r.read_u32::<LittleEndian>()?;
        nodes.push(BvhNode {
            aabb_min,
            left_or_first,
            aabb_max,
            count,
        });
    }
    let mut indices = vec![0u32; index_count];
    r.read_u32_into::<LittleEndian>(&mut indices)?;

    for (i, node) in nodes.iter().enumerate() {
        let first = node.left_or_first as usize;
        let valid = if node.is_leaf() {
            first + node.count as usize <= index_count
        } else {
            first > i && first + 1 < node_count
        };
        if !valid {
            return Err(Error::invalid_cache(format!("node {i} out of range")));
        }
    }
    if let Some(bad) = indices.iter().find(|&&idx| idx as usize >= tri_count) {
        return Err(Error::invalid_cache(format!(
            "triangle index {bad} exceeds triangle count {tri_count}"
        )));
    }

    Ok(Sbvh { nodes, indices })
}

/// Import `hierarchy_<hash>.bin` from `dir` if it exists, otherwise build and export it.
///
/// Unreadable cache files are rebuilt and overwritten. A failed export only
/// costs the next visit a rebuild.
pub fn load_or_build(
    dir: &Path,
    hash: &str,
    triangles: &[Triangle],
    config: &SbvhConfig,
) -> Result<Sbvh> {
    let path = hierarchy_path(dir, hash);

    if path.exists() {
        let start = Instant::now();
        match import(&path, triangles.len()) {
            Ok(sbvh) => {
                log::info!(
                    "Loaded hierarchy {} ({} nodes) in {:.1?}",
                    path.display(),
                    sbvh.nodes.len(),
                    start.elapsed()
                );
                return Ok(sbvh);
            }
            Err(e) if !e.is_fatal() => {
                log::warn!("Discarding hierarchy cache {}: {e}", path.display());
            }
            Err(e) => return Err(e),
        }
    }

    let start = Instant::now();
    let sbvh = build_sbvh(triangles, config);
    log::info!(
        "Built SBVH over {} triangles ({} nodes, {} refs) in {:.1?}",
        triangles.len(),
        sbvh.nodes.len(),
        sbvh.indices.len(),
        start.elapsed()
    );

    if let Err(e) = export(&sbvh, triangles.len(), &path) {
        log::warn!("Failed to write hierarchy cache {}: {e}", path.display());
    }
    Ok(sbvh)
}
