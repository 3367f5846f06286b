//! Volume store: the authoritative label and intensity arrays.
//!
//! Holds the full 4-D volumes and the displayed position within them, and
//! publishes 2-D slices to the buses whenever either changes. An `Edited`
//! event writes its slice back into the labeled volume, so the store is
//! always the reconstruction of every committed edit; the gateway only ever
//! works on the slice copies this store publishes.

use std::collections::BTreeSet;

use ndarray::{s, Array4};

use crate::message::{LabeledEvent, LabelsEvent, RawEvent};
use crate::project::{Dimensions, LoadedProject, Overlaps};

/// Input accepted by the store.
#[derive(Debug)]
pub enum VolumeEvent {
    Loaded(LoadedProject),
    SetFrame(usize),
    SetFeature(usize),
    SetChannel(usize),
    /// Committed or restored labels to write back into the volume
    Edited(LabeledEvent),
    /// The gateway needs the full arrays for a bulk transfer
    GetArrays,
}

/// What the store hands back to the session for routing.
#[derive(Debug)]
pub enum VolumeOutput {
    /// Publish on the labeled bus
    Labeled(LabeledEvent),
    /// Publish on the raw bus
    Raw(RawEvent),
    /// Publish on the labels bus
    Labels(LabelsEvent),
    /// Direct answer to `GetArrays`
    Arrays {
        raw: Array4<u8>,
        labeled: Array4<i32>,
    },
}

#[derive(Debug)]
struct ProjectData {
    dimensions: Dimensions,
    raw: Array4<u8>,
    labeled: Array4<i32>,
    overlaps: Overlaps,
}

#[derive(Debug, Default)]
pub struct VolumeStore {
    data: Option<ProjectData>,
    frame: usize,
    feature: usize,
    channel: usize,
}

impl VolumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn feature(&self) -> usize {
        self.feature
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn dimensions(&self) -> Option<&Dimensions> {
        self.data.as_ref().map(|data| &data.dimensions)
    }

    /// Label inventory for one feature, computed from the volume.
    pub fn labels(&self, feature: usize) -> Option<LabelsEvent> {
        let data = self.data.as_ref()?;
        if feature >= data.dimensions.num_features {
            return None;
        }
        Some(labels_summary(&data.labeled, feature))
    }

    pub fn handle(&mut self, event: VolumeEvent) -> Vec<VolumeOutput> {
        match event {
            VolumeEvent::Loaded(project) => self.loaded(project),
            VolumeEvent::SetFrame(frame) => self.set_position(Some(frame), None, None),
            VolumeEvent::SetFeature(feature) => self.set_position(None, Some(feature), None),
            VolumeEvent::SetChannel(channel) => self.set_position(None, None, Some(channel)),
            VolumeEvent::Edited(event) => self.edited(event),
            VolumeEvent::GetArrays => {
                let Some(data) = self.data.as_ref() else {
                    log::warn!("volume: arrays requested before load");
                    return Vec::new();
                };
                vec![VolumeOutput::Arrays {
                    raw: data.raw.clone(),
                    labeled: data.labeled.clone(),
                }]
            }
        }
    }

    fn loaded(&mut self, project: LoadedProject) -> Vec<VolumeOutput> {
        let dims = project.dimensions;
        log::info!(
            "volume: loaded {}x{} ({} frames, {} channels, {} features)",
            dims.width,
            dims.height,
            dims.num_frames,
            dims.num_channels,
            dims.num_features
        );
        let data = ProjectData {
            dimensions: dims,
            raw: project.raw,
            labeled: project.labeled,
            overlaps: project.overlaps,
        };
        self.frame = 0;
        self.feature = 0;
        self.channel = 0;

        let mut outputs = vec![
            Self::labeled_output(&data, 0, 0),
            Self::raw_output(&data, 0, 0),
        ];
        for feature in 0..dims.num_features {
            outputs.push(VolumeOutput::Labels(labels_summary(&data.labeled, feature)));
        }
        self.data = Some(data);
        outputs
    }

    fn set_position(
        &mut self,
        frame: Option<usize>,
        feature: Option<usize>,
        channel: Option<usize>,
    ) -> Vec<VolumeOutput> {
        let Some(data) = self.data.as_ref() else {
            log::debug!("volume: position change before load, ignored");
            return Vec::new();
        };
        let dims = &data.dimensions;
        let mut outputs = Vec::new();
        if let Some(frame) = frame {
            if frame >= dims.num_frames {
                log::warn!("volume: frame {} out of range, ignored", frame);
                return Vec::new();
            }
            if frame != self.frame {
                self.frame = frame;
                outputs.push(Self::labeled_output(data, self.frame, self.feature));
                outputs.push(Self::raw_output(data, self.frame, self.channel));
            }
        }
        if let Some(feature) = feature {
            if feature >= dims.num_features {
                log::warn!("volume: feature {} out of range, ignored", feature);
                return Vec::new();
            }
            if feature != self.feature {
                self.feature = feature;
                outputs.push(Self::labeled_output(data, self.frame, self.feature));
            }
        }
        if let Some(channel) = channel {
            if channel >= dims.num_channels {
                log::warn!("volume: channel {} out of range, ignored", channel);
                return Vec::new();
            }
            if channel != self.channel {
                self.channel = channel;
                outputs.push(Self::raw_output(data, self.frame, self.channel));
            }
        }
        outputs
    }

    fn edited(&mut self, event: LabeledEvent) -> Vec<VolumeOutput> {
        let Some(data) = self.data.as_mut() else {
            log::warn!("volume: edit before load, dropped");
            return Vec::new();
        };
        let dims = &data.dimensions;
        if event.feature >= dims.num_features || event.frame >= dims.num_frames {
            log::warn!(
                "volume: edited slice ({}, {}) out of range, dropped",
                event.frame,
                event.feature
            );
            return Vec::new();
        }
        if event.labeled.dim() != (dims.height, dims.width) {
            log::warn!("volume: edited slice has wrong shape, dropped");
            return Vec::new();
        }
        data.labeled
            .slice_mut(s![event.feature, event.frame, .., ..])
            .assign(&event.labeled);
        data.overlaps = event.overlaps.clone();

        let mut outputs = vec![VolumeOutput::Labels(labels_summary(
            &data.labeled,
            event.feature,
        ))];
        if (event.frame, event.feature) == (self.frame, self.feature) {
            // The displayed slice changed under the cursor
            outputs.push(VolumeOutput::Labeled(event));
        }
        outputs
    }

    fn labeled_output(data: &ProjectData, frame: usize, feature: usize) -> VolumeOutput {
        VolumeOutput::Labeled(LabeledEvent {
            frame,
            feature,
            labeled: data
                .labeled
                .slice(s![feature, frame, .., ..])
                .to_owned()
                .into_shared(),
            overlaps: data.overlaps.clone(),
        })
    }

    fn raw_output(data: &ProjectData, frame: usize, channel: usize) -> VolumeOutput {
        VolumeOutput::Raw(RawEvent {
            frame,
            channel,
            raw: data
                .raw
                .slice(s![channel, frame, .., ..])
                .to_owned()
                .into_shared(),
        })
    }
}

fn labels_summary(labeled: &Array4<i32>, feature: usize) -> LabelsEvent {
    let mut present = BTreeSet::new();
    for &value in labeled.slice(s![feature, .., .., ..]).iter() {
        if value > 0 {
            present.insert(value);
        }
    }
    let max_label = present.iter().next_back().copied().unwrap_or(0);
    LabelsEvent {
        feature,
        labels: present.into_iter().collect(),
        max_label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    /// 2 features, 2 frames, 2 channels, 2x3 pixels. Feature 0 frame 0 holds
    /// labels 1 and 2; feature 1 is empty except frame 1.
    fn project() -> LoadedProject {
        let dims = Dimensions {
            width: 3,
            height: 2,
            num_frames: 2,
            num_channels: 2,
            num_features: 2,
        };
        let mut labeled = Array4::zeros((2, 2, 2, 3));
        labeled
            .slice_mut(s![0, 0, .., ..])
            .assign(&array![[1, 1, 0], [0, 2, 2]]);
        labeled.slice_mut(s![1, 1, .., ..]).assign(&array![[5, 0, 0], [0, 0, 0]]);
        let raw = Array::from_shape_fn((2, 2, 2, 3), |(c, f, y, x)| {
            (c * 100 + f * 50 + y * 10 + x) as u8
        });
        LoadedProject {
            dimensions: dims,
            raw,
            labeled,
            overlaps: Overlaps::new(),
            lineage: None,
        }
    }

    fn labeled_of(outputs: &[VolumeOutput]) -> Vec<&LabeledEvent> {
        outputs
            .iter()
            .filter_map(|out| match out {
                VolumeOutput::Labeled(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    fn labels_of(outputs: &[VolumeOutput]) -> Vec<&LabelsEvent> {
        outputs
            .iter()
            .filter_map(|out| match out {
                VolumeOutput::Labels(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_load_publishes_slices_and_summaries() {
        let mut store = VolumeStore::new();
        let outputs = store.handle(VolumeEvent::Loaded(project()));

        let labeled = labeled_of(&outputs);
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].labeled, array![[1, 1, 0], [0, 2, 2]].into_shared());

        let summaries = labels_of(&outputs);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].labels, vec![1, 2]);
        assert_eq!(summaries[0].max_label, 2);
        assert_eq!(summaries[1].labels, vec![5]);

        assert!(outputs
            .iter()
            .any(|out| matches!(out, VolumeOutput::Raw(event) if event.raw[[0, 0]] == 0)));
    }

    #[test]
    fn test_edit_written_back_and_republished() {
        let mut store = VolumeStore::new();
        store.handle(VolumeEvent::Loaded(project()));

        let outputs = store.handle(VolumeEvent::Edited(LabeledEvent {
            frame: 0,
            feature: 0,
            labeled: array![[3, 3, 3], [0, 0, 0]].into_shared(),
            overlaps: Overlaps::new(),
        }));
        // Displayed slice: republished with the new labels
        let labeled = labeled_of(&outputs);
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].labeled, array![[3, 3, 3], [0, 0, 0]].into_shared());
        // Labels 1 and 2 are gone from the feature
        assert_eq!(labels_of(&outputs)[0].labels, vec![3]);

        // The write stuck: switching away and back reads the new labels
        store.handle(VolumeEvent::SetFrame(1));
        let outputs = store.handle(VolumeEvent::SetFrame(0));
        assert_eq!(
            labeled_of(&outputs)[0].labeled,
            array![[3, 3, 3], [0, 0, 0]].into_shared()
        );
    }

    #[test]
    fn test_edit_to_hidden_slice_not_republished() {
        let mut store = VolumeStore::new();
        store.handle(VolumeEvent::Loaded(project()));

        let outputs = store.handle(VolumeEvent::Edited(LabeledEvent {
            frame: 1,
            feature: 0,
            labeled: array![[9, 0, 0], [0, 0, 0]].into_shared(),
            overlaps: Overlaps::new(),
        }));
        assert!(labeled_of(&outputs).is_empty());
        // Summary still covers the whole feature
        assert_eq!(labels_of(&outputs)[0].labels, vec![1, 2, 9]);
    }

    #[test]
    fn test_position_changes_publish_the_right_buses() {
        let mut store = VolumeStore::new();
        store.handle(VolumeEvent::Loaded(project()));

        let outputs = store.handle(VolumeEvent::SetFrame(1));
        assert_eq!(labeled_of(&outputs).len(), 1);
        assert!(outputs.iter().any(|out| matches!(out, VolumeOutput::Raw(_))));

        let outputs = store.handle(VolumeEvent::SetFeature(1));
        assert_eq!(labeled_of(&outputs).len(), 1);
        assert!(!outputs.iter().any(|out| matches!(out, VolumeOutput::Raw(_))));
        assert_eq!(
            labeled_of(&outputs)[0].labeled,
            array![[5, 0, 0], [0, 0, 0]].into_shared()
        );

        let outputs = store.handle(VolumeEvent::SetChannel(1));
        assert!(labeled_of(&outputs).is_empty());
        assert!(outputs.iter().any(|out| matches!(out, VolumeOutput::Raw(_))));
    }

    #[test]
    fn test_out_of_range_position_ignored() {
        let mut store = VolumeStore::new();
        store.handle(VolumeEvent::Loaded(project()));
        assert!(store.handle(VolumeEvent::SetFrame(99)).is_empty());
        assert_eq!(store.frame(), 0);
        assert!(store.handle(VolumeEvent::SetFeature(2)).is_empty());
        assert!(store.handle(VolumeEvent::SetChannel(5)).is_empty());
    }

    #[test]
    fn test_unchanged_position_publishes_nothing() {
        let mut store = VolumeStore::new();
        store.handle(VolumeEvent::Loaded(project()));
        assert!(store.handle(VolumeEvent::SetFrame(0)).is_empty());
    }

    #[test]
    fn test_get_arrays_returns_full_volumes() {
        let mut store = VolumeStore::new();
        store.handle(VolumeEvent::Loaded(project()));
        let outputs = store.handle(VolumeEvent::GetArrays);
        match outputs.as_slice() {
            [VolumeOutput::Arrays { raw, labeled }] => {
                assert_eq!(raw.dim(), (2, 2, 2, 3));
                assert_eq!(labeled.dim(), (2, 2, 2, 3));
                assert_eq!(labeled[[0, 0, 0, 0]], 1);
            }
            other => panic!("unexpected outputs: {other:?}"),
        }
    }

    #[test]
    fn test_labels_accessor_matches_summary() {
        let mut store = VolumeStore::new();
        store.handle(VolumeEvent::Loaded(project()));
        let summary = store.labels(0).unwrap();
        assert_eq!(summary.labels, vec![1, 2]);
        assert_eq!(summary.max_label, 2);
        assert!(store.labels(7).is_none());
    }
}
