//! Saved render state (`state_<hash>.dat`).
//!
//! The file is a flat little-endian record whose field order is fixed by
//! [`STATE_LAYOUT`]. Save and load walk the same table, so a field can't be
//! written without also being read back. New fields may only be appended;
//! readers ignore trailing bytes they do not know about.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;

use crate::camera::CameraRig;
use crate::params::RenderParams;
use crate::util::{Error, Result};

/// One persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateItem {
    CameraYaw,
    CameraPitch,
    CameraSpeed,
    CameraFov,
    CameraDirection,
    CameraPosition,
    CameraRight,
    CameraUp,
    LightNormal,
    LightPosition,
    LightRight,
    LightUp,
    LightEmission,
    LightSizeX,
    LightSizeY,
    EnvStrength,
    MaxBounces,
    UseAreaLight,
    UseEnvMap,
    SampleExplicit,
    SampleImplicit,
}

/// On-disk field order.
pub const STATE_LAYOUT: &[StateItem] = &[
    StateItem::CameraYaw,
    StateItem::CameraPitch,
    StateItem::CameraSpeed,
    StateItem::CameraFov,
    StateItem::CameraDirection,
    StateItem::CameraPosition,
    StateItem::CameraRight,
    StateItem::CameraUp,
    StateItem::LightNormal,
    StateItem::LightPosition,
    StateItem::LightRight,
    StateItem::LightUp,
    StateItem::LightEmission,
    StateItem::LightSizeX,
    StateItem::LightSizeY,
    StateItem::EnvStrength,
    StateItem::MaxBounces,
    StateItem::UseAreaLight,
    StateItem::UseEnvMap,
    StateItem::SampleExplicit,
    StateItem::SampleImplicit,
];

impl StateItem {
    /// Encoded size in bytes.
    pub const fn size(self) -> usize {
        match self {
            StateItem::CameraDirection
            | StateItem::CameraPosition
            | StateItem::CameraRight
            | StateItem::CameraUp
            | StateItem::LightNormal
            | StateItem::LightPosition
            | StateItem::LightRight
            | StateItem::LightUp
            | StateItem::LightEmission => 12,
            _ => 4,
        }
    }
}

/// Mutable view of the storage behind a [`StateItem`].
enum Slot<'a> {
    F32(&'a mut f32),
    Vec3(&'a mut Vec3),
    U32(&'a mut u32),
    /// Stored as a u32 0/1.
    Flag(&'a mut bool),
}

fn slot<'a>(item: StateItem, params: &'a mut RenderParams, rig: &'a mut CameraRig) -> Slot<'a> {
    let cam = &mut params.camera;
    let light = &mut params.light;
    match item {
        StateItem::CameraYaw => Slot::F32(&mut rig.rotation.x),
        StateItem::CameraPitch => Slot::F32(&mut rig.rotation.y),
        StateItem::CameraSpeed => Slot::F32(&mut rig.speed),
        StateItem::CameraFov => Slot::F32(&mut cam.fov),
        StateItem::CameraDirection => Slot::Vec3(&mut cam.direction),
        StateItem::CameraPosition => Slot::Vec3(&mut cam.position),
        StateItem::CameraRight => Slot::Vec3(&mut cam.right),
        StateItem::CameraUp => Slot::Vec3(&mut cam.up),
        StateItem::LightNormal => Slot::Vec3(&mut light.normal),
        StateItem::LightPosition => Slot::Vec3(&mut light.position),
        StateItem::LightRight => Slot::Vec3(&mut light.right),
        StateItem::LightUp => Slot::Vec3(&mut light.up),
        StateItem::LightEmission => Slot::Vec3(&mut light.emission),
        StateItem::LightSizeX => Slot::F32(&mut light.size.x),
        StateItem::LightSizeY => Slot::F32(&mut light.size.y),
        StateItem::EnvStrength => Slot::F32(&mut params.env_strength),
        StateItem::MaxBounces => Slot::U32(&mut params.max_bounces),
        StateItem::UseAreaLight => Slot::Flag(&mut params.use_area_light),
        StateItem::UseEnvMap => Slot::Flag(&mut params.use_env_map),
        StateItem::SampleExplicit => Slot::Flag(&mut params.sample_explicit),
        StateItem::SampleImplicit => Slot::Flag(&mut params.sample_implicit),
    }
}

/// Walk [`STATE_LAYOUT`] in order.
fn visit(
    params: &mut RenderParams,
    rig: &mut CameraRig,
    mut f: impl FnMut(StateItem, Slot<'_>) -> Result<()>,
) -> Result<()> {
    for &item in STATE_LAYOUT {
        f(item, slot(item, params, rig))?;
    }
    Ok(())
}

/// Size in bytes of a complete state record.
pub fn state_size() -> usize {
    STATE_LAYOUT.iter().map(|item| item.size()).sum()
}

/// `<dir>/state_<hash>.dat`
pub fn state_path(dir: &Path, hash: &str) -> PathBuf {
    dir.join(format!("state_{hash}.dat"))
}

/// Serialize the persisted fields.
pub fn encode(params: &RenderParams, rig: &CameraRig) -> Result<Vec<u8>> {
    let mut params = params.clone();
    let mut rig = *rig;
    let mut out = Vec::with_capacity(state_size());
    visit(&mut params, &mut rig, |_, s| {
        match s {
            Slot::F32(v) => out.write_f32::<LittleEndian>(*v)?,
            Slot::Vec3(v) => {
                for c in v.to_array() {
                    out.write_f32::<LittleEndian>(c)?;
                }
            }
            Slot::U32(v) => out.write_u32::<LittleEndian>(*v)?,
            Slot::Flag(v) => out.write_u32::<LittleEndian>(u32::from(*v))?,
        }
        Ok(())
    })?;
    Ok(out)
}

/// Parse a state record into `params`/`rig`. Nothing is modified unless the
/// whole record is present.
pub fn decode(data: &[u8], params: &mut RenderParams, rig: &mut CameraRig) -> Result<()> {
    let mut new_params = params.clone();
    let mut new_rig = *rig;
    let mut r = Cursor::new(data);

    visit(&mut new_params, &mut new_rig, |item, s| {
        let truncated = |_: std::io::Error| Error::InvalidState(format!("truncated at {item:?}"));
        match s {
            Slot::F32(v) => *v = r.read_f32::<LittleEndian>().map_err(truncated)?,
            Slot::Vec3(v) => {
                let mut xyz = [0.0f32; 3];
                r.read_f32_into::<LittleEndian>(&mut xyz).map_err(truncated)?;
                *v = Vec3::from_array(xyz);
            }
            Slot::U32(v) => *v = r.read_u32::<LittleEndian>().map_err(truncated)?,
            Slot::Flag(v) => *v = r.read_u32::<LittleEndian>().map_err(truncated)? != 0,
        }
        Ok(())
    })?;

    let extra = data.len() - r.position() as usize;
    if extra > 0 {
        log::debug!("Ignoring {extra} trailing bytes in state file");
    }
    *params = new_params;
    *rig = new_rig;
    Ok(())
}

/// Write the state file for `hash` into `dir`.
pub fn save(dir: &Path, hash: &str, params: &RenderParams, rig: &CameraRig) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = state_path(dir, hash);
    let mut file = fs::File::create(&path)?;
    file.write_all(&encode(params, rig)?)?;
    log::info!("State dumped to {}", path.display());
    Ok(path)
}

/// Load the state file for `hash` from `dir`.
///
/// A missing file yields [`Error::FileNotFound`]; callers treat both that and
/// a truncated file as "keep defaults".
pub fn load(dir: &Path, hash: &str, params: &mut RenderParams, rig: &mut CameraRig) -> Result<()> {
    let path = state_path(dir, hash);
    let data = fs::read(&path).map_err(|e| Error::from_open(e, &path))?;
    decode(&data, params, rig)?;
    log::info!("State imported from {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn modified() -> (RenderParams, CameraRig) {
        let mut p = RenderParams::default();
        p.camera.fov = 47.25;
        p.camera.position = Vec3::new(-1.5, 2.0, 9.125);
        p.camera.direction = Vec3::new(0.1, -0.2, 0.97);
        p.light.emission = Vec3::new(1.0, 2.0, 3.0);
        p.light.size = Vec2::new(0.3, 0.7);
        p.env_strength = 0.33;
        p.max_bounces = 9;
        p.use_env_map = true;
        p.sample_implicit = false;
        let rig = CameraRig {
            rotation: Vec2::new(12.5, 300.0),
            speed: 3.75,
        };
        (p, rig)
    }

    #[test]
    fn test_record_size() {
        // 4 camera scalars, 9 vec3s, 3 light/env scalars, bounces, 4 flags.
        assert_eq!(state_size(), 4 * 4 + 9 * 12 + 3 * 4 + 4 + 4 * 4);
        let bytes = encode(&RenderParams::default(), &CameraRig::default()).unwrap();
        assert_eq!(bytes.len(), state_size());
    }

    #[test]
    fn test_item_sizes_match_encoding() {
        let (mut p, mut rig) = modified();
        let mut covered = 0;
        for &item in STATE_LAYOUT {
            let expected = match slot(item, &mut p, &mut rig) {
                Slot::Vec3(_) => 12,
                _ => 4,
            };
            assert_eq!(item.size(), expected, "{item:?}");
            covered += item.size();
        }
        assert_eq!(covered, encode(&p, &rig).unwrap().len());
    }

    #[test]
    fn test_field_order() {
        let (p, rig) = modified();
        let bytes = encode(&p, &rig).unwrap();
        assert_eq!(&bytes[0..4], &12.5f32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3.75f32.to_le_bytes());
        assert_eq!(&bytes[12..16], &47.25f32.to_le_bytes());
        // Last field is sample_implicit.
        assert_eq!(&bytes[bytes.len() - 4..], &0u32.to_le_bytes());
    }

    #[test]
    fn test_decode_truncated_leaves_target_untouched() {
        let (p, rig) = modified();
        let bytes = encode(&p, &rig).unwrap();

        let mut target = RenderParams::default();
        let mut target_rig = CameraRig::default();
        let err = decode(&bytes[..bytes.len() - 2], &mut target, &mut target_rig).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(target, RenderParams::default());
        assert_eq!(target_rig, CameraRig::default());
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let (p, rig) = modified();
        let mut bytes = encode(&p, &rig).unwrap();
        bytes.extend_from_slice(&[1, 2, 3, 4]);

        let mut target = RenderParams::default();
        let mut target_rig = CameraRig::default();
        decode(&bytes, &mut target, &mut target_rig).unwrap();
        assert_eq!(target, p);
        assert_eq!(target_rig, rig);
    }

    #[test]
    fn test_missing_file_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = RenderParams::default();
        let mut rig = CameraRig::default();
        let err = load(dir.path(), "nothing", &mut p, &mut rig).unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
        assert!(!err.is_fatal());
    }
}
