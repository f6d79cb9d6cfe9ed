//! Mesh file readers: Wavefront OBJ (via `tobj`) and Stanford PLY.
//!
//! Both produce a flat triangle list. Missing vertex normals are replaced by
//! area-weighted smooth normals accumulated per vertex.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use glam::Vec3;

use super::{Material, Triangle};
use crate::util::{Error, Result};

/// Triangles, materials, object count.
pub type MeshData = (Vec<Triangle>, Vec<Material>, u32);

/// Load an OBJ file; `usemtl` diffuse colors become albedo, `Ke` becomes emission.
pub fn load_obj(path: &Path) -> Result<MeshData> {
    let (models, materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ..Default::default()
        },
    )?;

    let mut out_materials: Vec<Material> = match materials {
        Ok(mats) => mats.iter().map(convert_material).collect(),
        Err(e) => {
            log::warn!("Ignoring OBJ materials for {}: {e}", path.display());
            Vec::new()
        }
    };
    // Slot for meshes without `usemtl`.
    let fallback_id = out_materials.len() as u32;
    out_materials.push(Material::default());

    let mut triangles = Vec::new();
    for model in &models {
        let mesh = &model.mesh;
        let positions: Vec<Vec3> = mesh.positions.chunks_exact(3).map(Vec3::from_slice).collect();
        let normals: Vec<Vec3> = if mesh.normals.len() == mesh.positions.len() {
            mesh.normals.chunks_exact(3).map(Vec3::from_slice).collect()
        } else {
            smooth_normals(&positions, &mesh.indices)
        };
        let material_id = mesh.material_id.map_or(fallback_id, |id| id as u32);
        append_triangles(&mut triangles, &positions, &normals, &mesh.indices, material_id)?;
    }

    Ok((triangles, out_materials, models.len() as u32))
}

fn convert_material(m: &tobj::Material) -> Material {
    let albedo = m.diffuse.map(Vec3::from).unwrap_or(Vec3::splat(0.8));
    let emission = m
        .unknown_param
        .get("Ke")
        .and_then(|s| parse_vec3(s))
        .unwrap_or(Vec3::ZERO);
    Material { albedo, emission }
}

fn parse_vec3(s: &str) -> Option<Vec3> {
    let v: Vec<f32> = s.split_whitespace().filter_map(|t| t.parse().ok()).collect();
    (v.len() == 3).then(|| Vec3::new(v[0], v[1], v[2]))
}

fn append_triangles(
    out: &mut Vec<Triangle>,
    positions: &[Vec3],
    normals: &[Vec3],
    indices: &[u32],
    material_id: u32,
) -> Result<()> {
    for face in indices.chunks_exact(3) {
        let idx = [face[0] as usize, face[1] as usize, face[2] as usize];
        if idx.iter().any(|&i| i >= positions.len()) {
            return Err(Error::MeshParse(format!("vertex index out of range in face {face:?}")));
        }
        out.push(Triangle {
            v: idx.map(|i| positions[i]),
            n: idx.map(|i| normals[i]),
            material_id,
        });
    }
    Ok(())
}

/// Area-weighted per-vertex normals.
pub fn smooth_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for face in indices.chunks_exact(3) {
        let [i0, i1, i2] = [face[0] as usize, face[1] as usize, face[2] as usize];
        if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
            continue;
        }
        // Unnormalized cross product weights by area.
        let n = (positions[i1] - positions[i0]).cross(positions[i2] - positions[i0]);
        normals[i0] += n;
        normals[i1] += n;
        normals[i2] += n;
    }
    normals
        .into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
        .collect()
}

// PLY

#[derive(Debug, Clone, Copy, PartialEq)]
enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "char" | "int8" => Self::I8,
            "uchar" | "uint8" => Self::U8,
            "short" | "int16" => Self::I16,
            "ushort" | "uint16" => Self::U16,
            "int" | "int32" => Self::I32,
            "uint" | "uint32" => Self::U32,
            "float" | "float32" => Self::F32,
            "double" | "float64" => Self::F64,
            other => return Err(Error::MeshParse(format!("unknown PLY type '{other}'"))),
        })
    }

    fn read_binary<R: Read>(self, r: &mut R) -> Result<f64> {
        Ok(match self {
            Self::I8 => r.read_i8()? as f64,
            Self::U8 => r.read_u8()? as f64,
            Self::I16 => r.read_i16::<LittleEndian>()? as f64,
            Self::U16 => r.read_u16::<LittleEndian>()? as f64,
            Self::I32 => r.read_i32::<LittleEndian>()? as f64,
            Self::U32 => r.read_u32::<LittleEndian>()? as f64,
            Self::F32 => r.read_f32::<LittleEndian>()? as f64,
            Self::F64 => r.read_f64::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Clone)]
enum Property {
    Scalar { name: String, ty: Scalar },
    List { name: String, count: Scalar, item: Scalar },
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    props: Vec<Property>,
}

struct PlyHeader {
    format: PlyFormat,
    elements: Vec<Element>,
}

fn parse_err(msg: impl Into<String>) -> Error {
    Error::MeshParse(msg.into())
}

fn read_header<R: BufRead>(r: &mut R) -> Result<PlyHeader> {
    let mut line = String::new();
    r.read_line(&mut line)?;
    if line.trim() != "ply" {
        return Err(parse_err("missing 'ply' magic"));
    }

    let mut format = None;
    let mut elements: Vec<Element> = Vec::new();
    loop {
        line.clear();
        if r.read_line(&mut line)? == 0 {
            return Err(parse_err("unexpected end of header"));
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["end_header"] => break,
            ["format", "ascii", _] => format = Some(PlyFormat::Ascii),
            ["format", "binary_little_endian", _] => format = Some(PlyFormat::BinaryLittleEndian),
            ["format", other, _] => return Err(Error::UnsupportedFormat(format!("PLY {other}"))),
            ["comment", ..] | ["obj_info", ..] | [] => {}
            ["element", name, count] => elements.push(Element {
                name: name.to_string(),
                count: count.parse().map_err(|_| parse_err(format!("bad element count '{count}'")))?,
                props: Vec::new(),
            }),
            ["property", "list", count, item, name] => {
                let element = elements.last_mut().ok_or_else(|| parse_err("property before element"))?;
                element.props.push(Property::List {
                    name: name.to_string(),
                    count: Scalar::parse(count)?,
                    item: Scalar::parse(item)?,
                });
            }
            ["property", ty, name] => {
                let element = elements.last_mut().ok_or_else(|| parse_err("property before element"))?;
                element.props.push(Property::Scalar {
                    name: name.to_string(),
                    ty: Scalar::parse(ty)?,
                });
            }
            _ => return Err(parse_err(format!("unrecognized header line '{}'", line.trim()))),
        }
    }

    let format = format.ok_or_else(|| parse_err("missing format line"))?;
    Ok(PlyHeader { format, elements })
}

/// One decoded element row: scalar values and list values, in property order.
enum Value {
    Scalar(f64),
    List(Vec<f64>),
}

fn read_row_ascii<'a, I: Iterator<Item = &'a str>>(tokens: &mut I, props: &[Property]) -> Result<Vec<Value>> {
    let mut next = || -> Result<f64> {
        tokens
            .next()
            .ok_or_else(|| parse_err("unexpected end of data"))?
            .parse::<f64>()
            .map_err(|e| parse_err(e.to_string()))
    };
    let mut row = Vec::with_capacity(props.len());
    for p in props {
        match p {
            Property::Scalar { .. } => row.push(Value::Scalar(next()?)),
            Property::List { .. } => {
                let n = next()? as usize;
                let items = (0..n).map(|_| next()).collect::<Result<Vec<_>>>()?;
                row.push(Value::List(items));
            }
        }
    }
    Ok(row)
}

fn read_row_binary<R: Read>(r: &mut R, props: &[Property]) -> Result<Vec<Value>> {
    let mut row = Vec::with_capacity(props.len());
    for p in props {
        match *p {
            Property::Scalar { ty, .. } => row.push(Value::Scalar(ty.read_binary(r)?)),
            Property::List { count, item, .. } => {
                let n = count.read_binary(r)? as usize;
                let items = (0..n).map(|_| item.read_binary(r)).collect::<Result<Vec<_>>>()?;
                row.push(Value::List(items));
            }
        }
    }
    Ok(row)
}

fn prop_index(props: &[Property], wanted: &str) -> Option<usize> {
    props.iter().position(|p| match p {
        Property::Scalar { name, .. } | Property::List { name, .. } => name == wanted,
    })
}

/// A face list entry as a vertex index. Rejects negative, fractional and
/// out-of-range values before they reach the triangle table.
fn face_index(v: f64) -> Result<u32> {
    if !(v.is_finite() && v.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&v)) {
        return Err(parse_err(format!("invalid face index {v}")));
    }
    Ok(v as u32)
}

fn scalar(row: &[Value], idx: usize) -> f32 {
    match &row[idx] {
        Value::Scalar(v) => *v as f32,
        Value::List(_) => 0.0,
    }
}

/// Load an ASCII or binary little-endian PLY file. Polygons are fan-triangulated.
pub fn load_ply(path: &Path) -> Result<MeshData> {
    let file = File::open(path).map_err(|e| Error::from_open(e, path))?;
    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader)?;

    let mut ascii_body = String::new();
    if header.format == PlyFormat::Ascii {
        reader.read_to_string(&mut ascii_body)?;
    }
    let mut tokens = ascii_body.split_whitespace();

    let mut positions: Vec<Vec3> = Vec::new();
    let mut normals: Vec<Vec3> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();

    for element in &header.elements {
        let props = &element.props;
        let xyz = ["x", "y", "z"].map(|n| prop_index(props, n));
        let nxyz = ["nx", "ny", "nz"].map(|n| prop_index(props, n));
        let faces = prop_index(props, "vertex_indices").or_else(|| prop_index(props, "vertex_index"));

        for _ in 0..element.count {
            let row = match header.format {
                PlyFormat::Ascii => read_row_ascii(&mut tokens, props)?,
                PlyFormat::BinaryLittleEndian => read_row_binary(&mut reader, props)?,
            };

            match element.name.as_str() {
                "vertex" => {
                    if let [Some(x), Some(y), Some(z)] = xyz {
                        positions.push(Vec3::new(scalar(&row, x), scalar(&row, y), scalar(&row, z)));
                    }
                    if let [Some(x), Some(y), Some(z)] = nxyz {
                        normals.push(Vec3::new(scalar(&row, x), scalar(&row, y), scalar(&row, z)));
                    }
                }
                "face" => {
                    if let Some(Value::List(poly)) = faces.map(|i| &row[i]) {
                        let poly = poly.iter().map(|&v| face_index(v)).collect::<Result<Vec<_>>>()?;
                        for k in 1..poly.len().saturating_sub(1) {
                            indices.extend([poly[0], poly[k], poly[k + 1]]);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    if positions.is_empty() {
        return Err(parse_err("PLY has no vertex positions"));
    }
    let normals: Vec<Vec3> = if normals.len() == positions.len() {
        normals.into_iter().map(|n| n.try_normalize().unwrap_or(Vec3::Y)).collect()
    } else {
        smooth_normals(&positions, &indices)
    };

    let mut triangles = Vec::with_capacity(indices.len() / 3);
    append_triangles(&mut triangles, &positions, &normals, &indices, 0)?;
    Ok((triangles, vec![Material::default()], 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    const ASCII_QUAD: &str = "ply
format ascii 1.0
comment unit quad
element vertex 4
property float x
property float y
property float z
element face 1
property list uchar int vertex_indices
end_header
0 0 0
1 0 0
1 1 0
0 1 0
4 0 1 2 3
";

    #[test]
    fn test_ascii_ply_fan_triangulates() {
        let mut file = tempfile::Builder::new().suffix(".ply").tempfile().unwrap();
        file.write_all(ASCII_QUAD.as_bytes()).unwrap();

        let (tris, mats, objects) = load_ply(file.path()).unwrap();
        assert_eq!(tris.len(), 2);
        assert_eq!(mats.len(), 1);
        assert_eq!(objects, 1);
        assert_eq!(tris[1].v[2], Vec3::new(0.0, 1.0, 0.0));
        assert!((tris[0].n[0] - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_binary_ply_with_normals() {
        let mut file = tempfile::Builder::new().suffix(".ply").tempfile().unwrap();
        write!(
            file,
            "ply\nformat binary_little_endian 1.0\nelement vertex 3\n\
             property float x\nproperty float y\nproperty float z\n\
             property float nx\nproperty float ny\nproperty float nz\n\
             element face 1\nproperty list uchar uint vertex_indices\nend_header\n"
        )
        .unwrap();
        for p in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]] {
            for v in p {
                file.write_f32::<LittleEndian>(v).unwrap();
            }
            for v in [0.0f32, 2.0, 0.0] {
                file.write_f32::<LittleEndian>(v).unwrap();
            }
        }
        file.write_u8(3).unwrap();
        for i in [0u32, 1, 2] {
            file.write_u32::<LittleEndian>(i).unwrap();
        }
        file.flush().unwrap();

        let (tris, _, _) = load_ply(file.path()).unwrap();
        assert_eq!(tris.len(), 1);
        assert_eq!(tris[0].v[2], Vec3::Z);
        assert_eq!(tris[0].n[0], Vec3::Y);
    }

    #[test]
    fn test_ply_bad_index() {
        let mut file = tempfile::Builder::new().suffix(".ply").tempfile().unwrap();
        file.write_all(ASCII_QUAD.replace("4 0 1 2 3", "3 0 1 9").as_bytes()).unwrap();
        assert!(matches!(load_ply(file.path()), Err(Error::MeshParse(_))));
    }

    #[test]
    fn test_ply_rejects_malformed_face_indices() {
        for face in ["3 0 -1 2", "3 0 1.5 2", "3 0 1 4294967296", "3 0 1 nan"] {
            let mut file = tempfile::Builder::new().suffix(".ply").tempfile().unwrap();
            file.write_all(ASCII_QUAD.replace("4 0 1 2 3", face).as_bytes()).unwrap();
            assert!(matches!(load_ply(file.path()), Err(Error::MeshParse(_))), "{face}");
        }
    }

    #[test]
    fn test_face_index() {
        assert_eq!(face_index(3.0).unwrap(), 3);
        assert_eq!(face_index(f64::from(u32::MAX)).unwrap(), u32::MAX);
        assert!(face_index(-0.5).is_err());
        assert!(face_index(f64::INFINITY).is_err());
    }

    #[test]
    fn test_ply_big_endian_unsupported() {
        let mut file = tempfile::Builder::new().suffix(".ply").tempfile().unwrap();
        file.write_all(b"ply\nformat binary_big_endian 1.0\nend_header\n").unwrap();
        assert!(matches!(load_ply(file.path()), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_obj_with_material() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("scene.mtl"),
            "newmtl lamp\nKd 0.1 0.2 0.3\nKe 4 4 4\n",
        )
        .unwrap();
        let obj = dir.path().join("scene.obj");
        std::fs::write(
            &obj,
            "mtllib scene.mtl\no a\nv 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1\nusemtl lamp\nf 1 2 3\nf 1 3 4\n",
        )
        .unwrap();

        let (tris, mats, objects) = load_obj(&obj).unwrap();
        assert_eq!(tris.len(), 2);
        assert_eq!(objects, 1);
        let m = &mats[tris[0].material_id as usize];
        assert_eq!(m.albedo, Vec3::new(0.1, 0.2, 0.3));
        assert!(m.is_emissive());
    }

    #[test]
    fn test_smooth_normals_shared_vertex() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z];
        let normals = smooth_normals(&positions, &[0, 1, 2, 0, 2, 3]);
        // Vertex 0 is shared by a +Z and a +X facing triangle.
        assert!((normals[0] - Vec3::new(1.0, 0.0, 1.0).normalize()).length() < 1e-6);
        assert_eq!(normals[1], Vec3::Z);
    }
}
