//! Project descriptors and label metadata.
//!
//! A project is a multi-frame, multi-channel microscopy acquisition with one
//! or more label features. This module holds the descriptor types shared
//! between the bundle codec, the volume store, and the gateway:
//! - `Dimensions`: the wire shape of `dimensions.json`
//! - `Overlaps`: the label overlap table, co-versioned with the label array
//! - `Lineage`: per-label tracking relationships

use std::collections::BTreeMap;

use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// Volume dimensions as exchanged with the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub width: usize,
    pub height: usize,
    pub num_frames: usize,
    pub num_channels: usize,
    pub num_features: usize,
}

impl Dimensions {
    /// Pixels in one frame.
    pub fn frame_len(&self) -> usize {
        self.width * self.height
    }

    /// Pixels in one full labeled volume (all features, all frames).
    pub fn labeled_len(&self) -> usize {
        self.num_features * self.num_frames * self.frame_len()
    }

    /// Pixels in one full raw volume (all channels, all frames).
    pub fn raw_len(&self) -> usize {
        self.num_channels * self.num_frames * self.frame_len()
    }
}

/// Overlap table: label ID to the sub-labels that contribute to it.
///
/// Replaced wholesale together with the label array; never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Overlaps {
    map: BTreeMap<i32, Vec<i32>>,
}

impl Overlaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sub-labels contributing to `label`, empty when the label is simple.
    pub fn sub_labels(&self, label: i32) -> &[i32] {
        self.map.get(&label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set(&mut self, label: i32, sub_labels: Vec<i32>) {
        self.map.insert(label, sub_labels);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// One track in the lineage: where a label came from and what it divides into.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Track {
    #[serde(default)]
    pub parent: Option<i32>,
    #[serde(default)]
    pub daughters: Vec<i32>,
    /// Frame at which the division happens, if any
    #[serde(default)]
    pub frame_div: Option<usize>,
    /// Whether the track ends without a division being resolved
    #[serde(default)]
    pub capped: bool,
}

/// Tracking lineage for every label, keyed by label ID.
///
/// The backend owns lineage semantics; the client carries it through edit
/// bundles and replaces it from responses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lineage {
    tracks: BTreeMap<i32, Track>,
}

impl Lineage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, label: i32) -> Option<&Track> {
        self.tracks.get(&label)
    }

    pub fn insert(&mut self, label: i32, track: Track) {
        self.tracks.insert(label, track);
    }

    pub fn daughters_of(&self, parent: i32) -> &[i32] {
        self.tracks
            .get(&parent)
            .map(|t| t.daughters.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Everything parsed from a project bundle.
///
/// Raw volume axes: (channel, frame, row, column). Labeled volume axes:
/// (feature, frame, row, column).
#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub dimensions: Dimensions,
    pub raw: Array4<u8>,
    pub labeled: Array4<i32>,
    pub overlaps: Overlaps,
    pub lineage: Option<Lineage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_wire_names() {
        let dims = Dimensions {
            width: 160,
            height: 120,
            num_frames: 4,
            num_channels: 2,
            num_features: 1,
        };
        let json = serde_json::to_value(dims).unwrap();
        assert_eq!(json["numFrames"], 4);
        assert_eq!(json["numChannels"], 2);
        assert_eq!(json["numFeatures"], 1);
        let back: Dimensions = serde_json::from_value(json).unwrap();
        assert_eq!(back, dims);
    }

    #[test]
    fn test_overlaps_roundtrip_string_keys() {
        let mut overlaps = Overlaps::new();
        overlaps.set(3, vec![1, 2]);
        overlaps.set(7, vec![]);
        let json = serde_json::to_string(&overlaps).unwrap();
        // JSON object keys are strings on the wire
        assert!(json.contains("\"3\""));
        let back: Overlaps = serde_json::from_str(&json).unwrap();
        assert_eq!(back, overlaps);
        assert_eq!(back.sub_labels(3), &[1, 2]);
        assert!(back.sub_labels(99).is_empty());
    }

    #[test]
    fn test_lineage_parse_with_defaults() {
        let json = r#"{"1": {"daughters": [2, 3], "frame_div": 5},
                       "2": {"parent": 1},
                       "3": {"parent": 1, "capped": true}}"#;
        let lineage: Lineage = serde_json::from_str(json).unwrap();
        assert_eq!(lineage.daughters_of(1), &[2, 3]);
        assert_eq!(lineage.track(2).unwrap().parent, Some(1));
        assert!(lineage.track(3).unwrap().capped);
        assert!(!lineage.track(2).unwrap().capped);
    }
}
