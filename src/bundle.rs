//! Zip bundle codec for backend exchanges.
//!
//! Every request and response body is a small zip archive:
//! - edit bundle: `edit.json`, `overlaps.json`, `labeled.dat`, optionally
//!   `raw.dat` (intensity-driven actions) and `lineage.json`
//! - edit response: `labeled.json` (array of rows), `overlaps.json`,
//!   optionally `lineage.json`
//! - export/project bundle: `dimensions.json`, `labeled.dat`, `raw.dat`,
//!   `overlaps.json`, optionally `lineage.json`
//!
//! Raw buffers are little-endian and row-major. Entries are looked up by
//! name, not position.

use std::io::{Cursor, Read, Seek, Write};

use ndarray::{ArcArray2, Array2, Array4, ArrayView2, ArrayView4};
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::BundleError;
use crate::message::{EditIntent, WriteMode};
use crate::project::{Dimensions, Lineage, LoadedProject, Overlaps};

pub const EDIT_JSON: &str = "edit.json";
pub const OVERLAPS_JSON: &str = "overlaps.json";
pub const LABELED_DAT: &str = "labeled.dat";
pub const RAW_DAT: &str = "raw.dat";
pub const LINEAGE_JSON: &str = "lineage.json";
pub const DIMENSIONS_JSON: &str = "dimensions.json";
pub const LABELED_JSON: &str = "labeled.json";

/// Header entry of an edit bundle (`edit.json`).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EditHeader<'a> {
    width: usize,
    height: usize,
    #[serde(flatten)]
    intent: &'a EditIntent,
    write_mode: WriteMode,
}

/// Parsed body of a successful edit response.
#[derive(Debug, Clone)]
pub struct EditResponse {
    pub labeled: Array2<i32>,
    pub overlaps: Overlaps,
    pub lineage: Option<Lineage>,
}

fn zip_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn add_entry<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    name: &str,
    bytes: &[u8],
) -> Result<(), BundleError> {
    writer.start_file(name, zip_options())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, BundleError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(BundleError::missing_entry(name));
        }
        Err(err) => return Err(err.into()),
    };
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

fn read_optional_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, BundleError> {
    match read_entry(archive, name) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(BundleError::MissingEntry { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

// ============================================================================
// Raw buffer encoding
// ============================================================================

fn labeled_slice_bytes(labeled: ArrayView2<'_, i32>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(labeled.len() * 4);
    for value in labeled.iter() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn raw_slice_bytes(raw: ArrayView2<'_, u8>) -> Vec<u8> {
    raw.iter().copied().collect()
}

fn labeled_volume_bytes(labeled: ArrayView4<'_, i32>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(labeled.len() * 4);
    for value in labeled.iter() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn raw_volume_bytes(raw: ArrayView4<'_, u8>) -> Vec<u8> {
    raw.iter().copied().collect()
}

fn labeled_volume_from_bytes(
    bytes: &[u8],
    dims: &Dimensions,
) -> Result<Array4<i32>, BundleError> {
    let expected = dims.labeled_len() * 4;
    if bytes.len() != expected {
        return Err(BundleError::size_mismatch(LABELED_DAT, expected, bytes.len()));
    }
    let values: Vec<i32> = bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    let shape = (dims.num_features, dims.num_frames, dims.height, dims.width);
    Array4::from_shape_vec(shape, values)
        .map_err(|err| BundleError::invalid_bundle(format!("labeled volume: {err}")))
}

fn raw_volume_from_bytes(bytes: &[u8], dims: &Dimensions) -> Result<Array4<u8>, BundleError> {
    let expected = dims.raw_len();
    if bytes.len() != expected {
        return Err(BundleError::size_mismatch(RAW_DAT, expected, bytes.len()));
    }
    let shape = (dims.num_channels, dims.num_frames, dims.height, dims.width);
    Array4::from_shape_vec(shape, bytes.to_vec())
        .map_err(|err| BundleError::invalid_bundle(format!("raw volume: {err}")))
}

// ============================================================================
// Edit bundles
// ============================================================================

/// Pack one edit request: the intent plus the current slice as base state.
pub fn write_edit_bundle(
    intent: &EditIntent,
    write_mode: WriteMode,
    labeled: &ArcArray2<i32>,
    raw: Option<&ArcArray2<u8>>,
    overlaps: &Overlaps,
    lineage: Option<&Lineage>,
) -> Result<Vec<u8>, BundleError> {
    let (height, width) = labeled.dim();
    let header = EditHeader {
        width,
        height,
        intent,
        write_mode,
    };

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    add_entry(&mut writer, EDIT_JSON, &serde_json::to_vec(&header)?)?;
    add_entry(&mut writer, OVERLAPS_JSON, &serde_json::to_vec(overlaps)?)?;
    add_entry(&mut writer, LABELED_DAT, &labeled_slice_bytes(labeled.view()))?;
    if intent.uses_raw() {
        let raw = raw.ok_or_else(|| {
            BundleError::invalid_bundle(format!(
                "action {} needs a raw slice but none is loaded",
                intent.action_name()
            ))
        })?;
        add_entry(&mut writer, RAW_DAT, &raw_slice_bytes(raw.view()))?;
    }
    if let Some(lineage) = lineage {
        add_entry(&mut writer, LINEAGE_JSON, &serde_json::to_vec(lineage)?)?;
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

/// Parse an edit response into the new slice state.
///
/// The labeled entry comes back as JSON rows; its shape must match the
/// project dimensions since slices are replaced wholesale.
pub fn read_edit_response(bytes: &[u8], dims: &Dimensions) -> Result<EditResponse, BundleError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let labeled_rows: Vec<Vec<i32>> =
        serde_json::from_slice(&read_entry(&mut archive, LABELED_JSON)?)?;
    if labeled_rows.len() != dims.height
        || labeled_rows.iter().any(|row| row.len() != dims.width)
    {
        return Err(BundleError::invalid_bundle(format!(
            "labeled response is not {}x{}",
            dims.height, dims.width
        )));
    }
    let flat: Vec<i32> = labeled_rows.into_iter().flatten().collect();
    let labeled = Array2::from_shape_vec((dims.height, dims.width), flat)
        .map_err(|err| BundleError::invalid_bundle(format!("labeled response: {err}")))?;

    let overlaps: Overlaps = serde_json::from_slice(&read_entry(&mut archive, OVERLAPS_JSON)?)?;
    let lineage = match read_optional_entry(&mut archive, LINEAGE_JSON)? {
        Some(bytes) => Some(serde_json::from_slice(&bytes)?),
        None => None,
    };

    Ok(EditResponse {
        labeled,
        overlaps,
        lineage,
    })
}

// ============================================================================
// Export / project bundles
// ============================================================================

/// Pack the full volume for upload, download, or local persistence.
pub fn write_export_bundle(
    dims: &Dimensions,
    labeled: &Array4<i32>,
    raw: &Array4<u8>,
    overlaps: &Overlaps,
    lineage: Option<&Lineage>,
) -> Result<Vec<u8>, BundleError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    add_entry(&mut writer, DIMENSIONS_JSON, &serde_json::to_vec(dims)?)?;
    add_entry(&mut writer, LABELED_DAT, &labeled_volume_bytes(labeled.view()))?;
    add_entry(&mut writer, RAW_DAT, &raw_volume_bytes(raw.view()))?;
    add_entry(&mut writer, OVERLAPS_JSON, &serde_json::to_vec(overlaps)?)?;
    if let Some(lineage) = lineage {
        add_entry(&mut writer, LINEAGE_JSON, &serde_json::to_vec(lineage)?)?;
    }
    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

/// Parse a project bundle (the export shape) into full volumes.
pub fn read_project_bundle(bytes: &[u8]) -> Result<LoadedProject, BundleError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let dimensions: Dimensions =
        serde_json::from_slice(&read_entry(&mut archive, DIMENSIONS_JSON)?)?;
    let labeled = labeled_volume_from_bytes(&read_entry(&mut archive, LABELED_DAT)?, &dimensions)?;
    let raw = raw_volume_from_bytes(&read_entry(&mut archive, RAW_DAT)?, &dimensions)?;
    let overlaps: Overlaps = serde_json::from_slice(&read_entry(&mut archive, OVERLAPS_JSON)?)?;
    let lineage = match read_optional_entry(&mut archive, LINEAGE_JSON)? {
        Some(bytes) => Some(serde_json::from_slice(&bytes)?),
        None => None,
    };

    Ok(LoadedProject {
        dimensions,
        raw,
        labeled,
        overlaps,
        lineage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn test_dims() -> Dimensions {
        Dimensions {
            width: 4,
            height: 3,
            num_frames: 2,
            num_channels: 1,
            num_features: 1,
        }
    }

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        archive.file_names().map(String::from).collect()
    }

    #[test]
    fn test_edit_bundle_entries() {
        let labeled = Array2::<i32>::zeros((3, 4)).into_shared();
        let intent = EditIntent::Erode { label: 2 };
        let bytes = write_edit_bundle(
            &intent,
            WriteMode::Overlap,
            &labeled,
            None,
            &Overlaps::new(),
            None,
        )
        .unwrap();

        let names = entry_names(&bytes);
        assert!(names.contains(&EDIT_JSON.to_string()));
        assert!(names.contains(&OVERLAPS_JSON.to_string()));
        assert!(names.contains(&LABELED_DAT.to_string()));
        assert!(!names.contains(&RAW_DAT.to_string()));
    }

    #[test]
    fn test_edit_header_shape() {
        let labeled = Array2::<i32>::zeros((3, 4)).into_shared();
        let intent = EditIntent::SwapSingleFrame { label_1: 1, label_2: 2 };
        let bytes = write_edit_bundle(
            &intent,
            WriteMode::Exclude,
            &labeled,
            None,
            &Overlaps::new(),
            None,
        )
        .unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&read_entry(&mut archive, EDIT_JSON).unwrap()).unwrap();
        assert_eq!(header["width"], 4);
        assert_eq!(header["height"], 3);
        assert_eq!(header["action"], "swap_single_frame");
        assert_eq!(header["args"]["label_1"], 1);
        assert_eq!(header["writeMode"], "exclude");
    }

    #[test]
    fn test_intensity_action_includes_raw() {
        let labeled = Array2::<i32>::zeros((3, 4)).into_shared();
        let raw = Array2::<u8>::zeros((3, 4)).into_shared();
        let intent = EditIntent::Threshold { x1: 0, y1: 0, x2: 2, y2: 2, label: 1 };
        let bytes = write_edit_bundle(
            &intent,
            WriteMode::Overlap,
            &labeled,
            Some(&raw),
            &Overlaps::new(),
            None,
        )
        .unwrap();
        assert!(entry_names(&bytes).contains(&RAW_DAT.to_string()));
    }

    #[test]
    fn test_intensity_action_without_raw_fails() {
        let labeled = Array2::<i32>::zeros((3, 4)).into_shared();
        let intent = EditIntent::Watershed { label: 1, x1: 0, y1: 0, x2: 1, y2: 1 };
        let result = write_edit_bundle(
            &intent,
            WriteMode::Overlap,
            &labeled,
            None,
            &Overlaps::new(),
            None,
        );
        assert!(matches!(result, Err(BundleError::InvalidBundle { .. })));
    }

    #[test]
    fn test_edit_response_parse() {
        let dims = Dimensions { width: 2, height: 2, num_frames: 1, num_channels: 1, num_features: 1 };
        let mut overlaps = Overlaps::new();
        overlaps.set(2, vec![1]);

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        add_entry(&mut writer, LABELED_JSON, b"[[0, 1], [2, 2]]").unwrap();
        add_entry(
            &mut writer,
            OVERLAPS_JSON,
            &serde_json::to_vec(&overlaps).unwrap(),
        )
        .unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let response = read_edit_response(&bytes, &dims).unwrap();
        assert_eq!(response.labeled[[1, 0]], 2);
        assert_eq!(response.overlaps.sub_labels(2), &[1]);
        assert!(response.lineage.is_none());
    }

    #[test]
    fn test_edit_response_wrong_shape_rejected() {
        let dims = Dimensions { width: 3, height: 2, num_frames: 1, num_channels: 1, num_features: 1 };
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        add_entry(&mut writer, LABELED_JSON, b"[[0, 1], [2, 2]]").unwrap();
        add_entry(&mut writer, OVERLAPS_JSON, b"{}").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        assert!(matches!(
            read_edit_response(&bytes, &dims),
            Err(BundleError::InvalidBundle { .. })
        ));
    }

    #[test]
    fn test_edit_response_missing_overlaps() {
        let dims = Dimensions { width: 2, height: 2, num_frames: 1, num_channels: 1, num_features: 1 };
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        add_entry(&mut writer, LABELED_JSON, b"[[0, 0], [0, 0]]").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        assert!(matches!(
            read_edit_response(&bytes, &dims),
            Err(BundleError::MissingEntry { .. })
        ));
    }

    #[test]
    fn test_project_bundle_roundtrip() {
        let dims = test_dims();
        let labeled = Array4::from_shape_fn(
            (dims.num_features, dims.num_frames, dims.height, dims.width),
            |(_, t, y, x)| (t * 100 + y * 10 + x) as i32,
        );
        let raw = Array4::from_shape_fn(
            (dims.num_channels, dims.num_frames, dims.height, dims.width),
            |(_, t, y, x)| (t + y + x) as u8,
        );
        let mut overlaps = Overlaps::new();
        overlaps.set(5, vec![1, 4]);

        let bytes = write_export_bundle(&dims, &labeled, &raw, &overlaps, None).unwrap();
        let project = read_project_bundle(&bytes).unwrap();

        assert_eq!(project.dimensions, dims);
        assert_eq!(project.labeled, labeled);
        assert_eq!(project.raw, raw);
        assert_eq!(project.overlaps, overlaps);
        assert!(project.lineage.is_none());
    }

    #[test]
    fn test_project_bundle_size_mismatch() {
        let dims = test_dims();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        add_entry(&mut writer, DIMENSIONS_JSON, &serde_json::to_vec(&dims).unwrap()).unwrap();
        add_entry(&mut writer, LABELED_DAT, &[0u8; 8]).unwrap();
        add_entry(&mut writer, RAW_DAT, &[0u8; 8]).unwrap();
        add_entry(&mut writer, OVERLAPS_JSON, b"{}").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        assert!(matches!(
            read_project_bundle(&bytes),
            Err(BundleError::SizeMismatch { .. })
        ));
    }
}
