//! Minimal MetaImage (`.mha`) codec: single file, uncompressed,
//! little-endian, three dimensions.

use crate::volume::{Scalar, Volume};

use bytemuck::Pod;
use ndarray::Array3;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MetaImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing or malformed header field {0}")]
    MissingField(&'static str),

    #[error("Unsupported {found}, expected {expected}")]
    UnsupportedType {
        expected: &'static str,
        found: String,
    },

    #[error("Pixel data truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
}

pub trait MetaElement: Scalar + Pod {
    const MET_TYPE: &'static str;
}

impl MetaElement for u8 {
    const MET_TYPE: &'static str = "MET_UCHAR";
}
impl MetaElement for u16 {
    const MET_TYPE: &'static str = "MET_USHORT";
}
impl MetaElement for i16 {
    const MET_TYPE: &'static str = "MET_SHORT";
}
impl MetaElement for f32 {
    const MET_TYPE: &'static str = "MET_FLOAT";
}

const DATA_FILE_KEY: &str = "ElementDataFile";
/// Absolute index of the first voxel. `Offset` is physical and says
/// nothing about the index grid, so files without this key start at 0.
const INDEX_ORIGIN_KEY: &str = "IndexOrigin";

pub fn write<T: MetaElement>(volume: &Volume<T>, path: impl AsRef<Path>) -> Result<(), MetaImageError> {
    let (sx, sy, sz) = volume.spacing;
    let [ox, oy, oz] = volume.origin;
    let [w, h, d] = volume.extent();
    let header = format!(
        "ObjectType = Image\n\
         NDims = 3\n\
         BinaryData = True\n\
         BinaryDataByteOrderMSB = False\n\
         CompressedData = False\n\
         TransformMatrix = 1 0 0 0 1 0 0 0 1\n\
         Offset = {} {} {}\n\
         ElementSpacing = {sx} {sy} {sz}\n\
         DimSize = {w} {h} {d}\n\
         ElementType = {}\n\
         {INDEX_ORIGIN_KEY} = {ox} {oy} {oz}\n\
         {DATA_FILE_KEY} = LOCAL\n",
        ox as f32 * sx,
        oy as f32 * sy,
        oz as f32 * sz,
        T::MET_TYPE,
    );

    let data = volume.data.as_standard_layout();
    let samples = data.as_slice().unwrap_or_default();
    let mut file = fs::File::create(path.as_ref())?;
    file.write_all(header.as_bytes())?;
    file.write_all(bytemuck::cast_slice(samples))?;
    debug!(path = %path.as_ref().display(), dim = ?[w, h, d], "wrote MetaImage");
    Ok(())
}

pub fn read<T: MetaElement>(path: impl AsRef<Path>) -> Result<Volume<T>, MetaImageError> {
    let bytes = fs::read(path.as_ref())?;
    let (fields, data_start) = parse_header(&bytes)?;

    let element_type = fields
        .get("ElementType")
        .ok_or(MetaImageError::MissingField("ElementType"))?;
    if element_type != T::MET_TYPE {
        return Err(MetaImageError::UnsupportedType {
            expected: T::MET_TYPE,
            found: element_type.clone(),
        });
    }
    if fields.get("CompressedData").is_some_and(|v| v == "True") {
        return Err(MetaImageError::UnsupportedType {
            expected: "uncompressed data",
            found: "CompressedData = True".into(),
        });
    }
    let msb = fields
        .get("BinaryDataByteOrderMSB")
        .or_else(|| fields.get("ElementByteOrderMSB"));
    if msb.is_some_and(|v| v == "True") {
        return Err(MetaImageError::UnsupportedType {
            expected: "little-endian data",
            found: "BinaryDataByteOrderMSB = True".into(),
        });
    }

    let [w, h, d] = parse_triple::<usize>(&fields, "DimSize")?;
    let spacing = parse_triple::<f32>(&fields, "ElementSpacing").unwrap_or([1.0; 3]);
    let origin = if fields.contains_key(INDEX_ORIGIN_KEY) {
        parse_triple::<usize>(&fields, INDEX_ORIGIN_KEY)?
    } else {
        [0; 3]
    };

    let count = w
        .checked_mul(h)
        .and_then(|n| n.checked_mul(d))
        .ok_or(MetaImageError::MissingField("DimSize"))?;
    let expected = count
        .checked_mul(size_of::<T>())
        .ok_or(MetaImageError::MissingField("DimSize"))?;
    let payload = &bytes[data_start..];
    if payload.len() < expected {
        return Err(MetaImageError::Truncated {
            expected,
            found: payload.len(),
        });
    }

    let mut samples = vec![T::zeroed(); count];
    bytemuck::cast_slice_mut::<T, u8>(&mut samples).copy_from_slice(&payload[..expected]);
    let data = Array3::from_shape_vec((d, h, w), samples)
        .map_err(|_| MetaImageError::MissingField("DimSize"))?;

    debug!(path = %path.as_ref().display(), dim = ?[w, h, d], "read MetaImage");
    Ok(Volume::with_origin(
        data,
        origin,
        (spacing[0], spacing[1], spacing[2]),
    ))
}

/// Header key/value pairs and the byte offset where pixel data begins.
fn parse_header(bytes: &[u8]) -> Result<(HashMap<String, String>, usize), MetaImageError> {
    let mut fields = HashMap::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let line_end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |i| pos + i);
        let line = String::from_utf8_lossy(&bytes[pos..line_end]);
        pos = (line_end + 1).min(bytes.len());

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        fields.insert(key.to_string(), value.to_string());
        if key == DATA_FILE_KEY {
            if value != "LOCAL" {
                return Err(MetaImageError::MissingField(DATA_FILE_KEY));
            }
            return Ok((fields, pos));
        }
    }
    Err(MetaImageError::MissingField(DATA_FILE_KEY))
}

fn parse_triple<V: std::str::FromStr>(
    fields: &HashMap<String, String>,
    key: &'static str,
) -> Result<[V; 3], MetaImageError> {
    let values: Vec<V> = fields
        .get(key)
        .ok_or(MetaImageError::MissingField(key))?
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| MetaImageError::MissingField(key))?;
    <[V; 3]>::try_from(values).map_err(|_| MetaImageError::MissingField(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_survives_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.mha");
        let data = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as i16 - 50);
        let volume = Volume::with_origin(data, [235, 420, 1], (0.5, 0.5, 2.0));

        write(&volume, &path).unwrap();
        let loaded: Volume<i16> = read(&path).unwrap();

        assert_eq!(loaded, volume);
    }

    #[test]
    fn element_type_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.mha");
        write(&Volume::new(Array3::<f32>::zeros((1, 2, 2)), (1.0, 1.0, 1.0)), &path).unwrap();

        let err = read::<i16>(&path).unwrap_err();
        assert!(matches!(err, MetaImageError::UnsupportedType { expected: "MET_SHORT", .. }));
    }

    #[test]
    fn truncated_payload_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.mha");
        write(&Volume::new(Array3::<u16>::ones((2, 2, 2)), (1.0, 1.0, 1.0)), &path).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 3);
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            read::<u16>(&path),
            Err(MetaImageError::Truncated { expected: 16, found: 13 })
        ));
    }

    fn foreign_file(dir: &Path, msb: &str, dim_size: &str) -> std::path::PathBuf {
        let path = dir.join("foreign.mha");
        let mut bytes = format!(
            "ObjectType = Image\n\
             NDims = 3\n\
             BinaryData = True\n\
             BinaryDataByteOrderMSB = {msb}\n\
             Offset = 120 80 50\n\
             ElementSpacing = 0.5 0.5 2.5\n\
             DimSize = {dim_size}\n\
             ElementType = MET_SHORT\n\
             ElementDataFile = LOCAL\n"
        )
        .into_bytes();
        bytes.extend_from_slice(&[1, 0, 0, 2]);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn physical_offset_does_not_shift_the_index_origin() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Volume<i16> = read(foreign_file(dir.path(), "False", "2 1 1")).unwrap();
        assert_eq!(loaded.origin, [0, 0, 0]);
        assert_eq!(loaded.spacing, (0.5, 0.5, 2.5));
        assert_eq!(loaded.data().iter().copied().collect::<Vec<_>>(), vec![1, 512]);
    }

    #[test]
    fn big_endian_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = read::<i16>(foreign_file(dir.path(), "True", "2 1 1")).unwrap_err();
        assert!(matches!(
            err,
            MetaImageError::UnsupportedType { expected: "little-endian data", .. }
        ));
    }

    #[test]
    fn overflowing_dimensions_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let dim_size = format!("{} 2 1", usize::MAX);
        let err = read::<i16>(foreign_file(dir.path(), "False", &dim_size)).unwrap_err();
        assert!(matches!(err, MetaImageError::MissingField("DimSize")));
    }
}
