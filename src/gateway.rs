//! Edit gateway: the only actor that talks to the backend.
//!
//! The gateway holds the working copy of the displayed label slice plus the
//! overlap table and lineage that version together with it. Released edits
//! are packed into a bundle and handed to the worker; at most one request is
//! in flight, and an edit released while another is loading is dropped with a
//! warning rather than queued. A successful response is published as one
//! `Edited` event; a failure surfaces exactly one error and leaves every
//! working copy untouched.
//!
//! History restores are applied locally first, then replayed to the backend
//! as a `restore` edit so the server converges on the same state. Replay
//! responses are discarded and never recorded.

use std::time::Instant;

use ndarray::{ArcArray2, Array4};

use crate::bundle;
use crate::history::{CaptureId, Snapshot};
use crate::http::{Job, JobOutcome};
use crate::message::{EditIntent, LabeledEvent, RawEvent, WriteMode};
use crate::project::{Dimensions, Lineage, Overlaps};

// ============================================================================
// States and events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Waiting for the volume store to hand over the full arrays
    GetArrays,
    /// Bundle submitted, waiting for the worker
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    /// No label slice received yet; every request is refused
    WaitForLabels,
    Idle,
    /// An edit (capture set) or a restore replay (no capture) is in flight
    Loading { capture: Option<CaptureId> },
    Uploading(TransferPhase),
    Downloading(TransferPhase),
}

impl GatewayState {
    fn name(self) -> &'static str {
        match self {
            GatewayState::WaitForLabels => "waiting for labels",
            GatewayState::Idle => "idle",
            GatewayState::Loading { .. } => "loading",
            GatewayState::Uploading(_) => "uploading",
            GatewayState::Downloading(_) => "downloading",
        }
    }
}

/// Input accepted by the gateway.
#[derive(Debug)]
pub enum GatewayEvent {
    /// Project metadata from the initial load
    Loaded {
        dimensions: Dimensions,
        lineage: Option<Lineage>,
    },
    /// Fresh working copy of the displayed slice
    Labeled(LabeledEvent),
    /// Fresh raw intensity slice for edits that need pixel values
    Raw(RawEvent),
    SetWriteMode(WriteMode),
    /// An edit released by the history barrier (capture set) or injected
    /// directly (no capture)
    Edit {
        capture: Option<CaptureId>,
        intent: EditIntent,
    },
    Upload,
    Download,
    /// Full volumes from the store, answering `GetArrays`
    Arrays {
        raw: Array4<u8>,
        labeled: Array4<i32>,
    },
    JobDone(JobOutcome),
    Save { capture: CaptureId },
    Restore(Snapshot),
}

/// What the gateway hands back to the session for routing.
#[derive(Debug)]
pub enum GatewayOutput {
    SubmitJob(Job),
    /// Committed or restored labels for one slice
    Edited(LabeledEvent),
    /// Ask the volume store for the full arrays
    GetArrays,
    Snapshot {
        capture: CaptureId,
        snapshot: Snapshot,
    },
    EditCompleted { capture: CaptureId },
    EditFailed { capture: CaptureId },
    Uploaded,
    Downloaded(Vec<u8>),
    Error(String),
}

// ============================================================================
// Gateway
// ============================================================================

#[derive(Debug)]
pub struct EditGateway {
    state: GatewayState,
    frame: usize,
    feature: usize,
    labeled: Option<ArcArray2<i32>>,
    raw: Option<ArcArray2<u8>>,
    overlaps: Overlaps,
    lineage: Option<Lineage>,
    dimensions: Option<Dimensions>,
    write_mode: WriteMode,
    project_id: String,
    bucket: String,
    /// Slice the in-flight edit applies to, which may no longer be displayed
    /// when the response lands
    edited_slice: Option<(usize, usize)>,
    /// Post-edit state held for the after-capture of this capture id
    pending_snapshot: Option<(CaptureId, Snapshot)>,
    /// Action name and start time of the in-flight request
    request: Option<(&'static str, Instant)>,
}

impl EditGateway {
    pub fn new(write_mode: WriteMode, project_id: String, bucket: String) -> Self {
        Self {
            state: GatewayState::WaitForLabels,
            frame: 0,
            feature: 0,
            labeled: None,
            raw: None,
            overlaps: Overlaps::new(),
            lineage: None,
            dimensions: None,
            write_mode,
            project_id,
            bucket,
            edited_slice: None,
            pending_snapshot: None,
            request: None,
        }
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    pub fn lineage(&self) -> Option<&Lineage> {
        self.lineage.as_ref()
    }

    pub fn handle(&mut self, event: GatewayEvent) -> Vec<GatewayOutput> {
        match event {
            GatewayEvent::Loaded {
                dimensions,
                lineage,
            } => {
                self.dimensions = Some(dimensions);
                self.lineage = lineage;
                Vec::new()
            }
            GatewayEvent::Labeled(event) => {
                self.frame = event.frame;
                self.feature = event.feature;
                self.labeled = Some(event.labeled);
                self.overlaps = event.overlaps;
                if self.state == GatewayState::WaitForLabels {
                    log::debug!("gateway: labels ready");
                    self.state = GatewayState::Idle;
                }
                Vec::new()
            }
            GatewayEvent::Raw(event) => {
                self.raw = Some(event.raw);
                Vec::new()
            }
            GatewayEvent::SetWriteMode(mode) => {
                self.write_mode = mode;
                log::debug!("gateway: write mode {:?}", mode);
                Vec::new()
            }
            GatewayEvent::Edit { capture, intent } => self.edit(capture, intent),
            GatewayEvent::Upload => self.start_transfer(true),
            GatewayEvent::Download => self.start_transfer(false),
            GatewayEvent::Arrays { raw, labeled } => self.arrays(raw, labeled),
            GatewayEvent::JobDone(outcome) => self.job_done(outcome),
            GatewayEvent::Save { capture } => self.save(capture),
            GatewayEvent::Restore(snapshot) => self.restore(snapshot),
        }
    }

    // ------------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------------

    fn edit(&mut self, capture: Option<CaptureId>, intent: EditIntent) -> Vec<GatewayOutput> {
        if self.state != GatewayState::Idle {
            log::warn!(
                "gateway: {} dropped while {}",
                intent.action_name(),
                self.state.name()
            );
            return Self::failure(capture);
        }
        let Some(labeled) = self.labeled.as_ref() else {
            log::warn!("gateway: {} dropped, no labels", intent.action_name());
            return Self::failure(capture);
        };
        match bundle::write_edit_bundle(
            &intent,
            self.write_mode,
            labeled,
            self.raw.as_ref(),
            &self.overlaps,
            self.lineage.as_ref(),
        ) {
            Ok(bundle) => {
                log::debug!(
                    "gateway: submitting {} for frame {} feature {}",
                    intent.action_name(),
                    self.frame,
                    self.feature
                );
                self.state = GatewayState::Loading { capture };
                self.edited_slice = Some((self.frame, self.feature));
                self.request = Some((intent.action_name(), Instant::now()));
                vec![GatewayOutput::SubmitJob(Job::Edit { bundle })]
            }
            Err(err) => {
                let mut outputs = vec![GatewayOutput::Error(format!(
                    "cannot submit {}: {}",
                    intent.action_name(),
                    err
                ))];
                outputs.extend(Self::failure(capture));
                outputs
            }
        }
    }

    fn failure(capture: Option<CaptureId>) -> Vec<GatewayOutput> {
        capture
            .map(|capture| GatewayOutput::EditFailed { capture })
            .into_iter()
            .collect()
    }

    fn job_done(&mut self, outcome: JobOutcome) -> Vec<GatewayOutput> {
        if let Some((action, started)) = self.request.take() {
            log::debug!("gateway: {} round trip in {:?}", action, started.elapsed());
        }
        match outcome {
            JobOutcome::Edit(result) => {
                let GatewayState::Loading { capture } = self.state else {
                    log::warn!("gateway: edit outcome while {}", self.state.name());
                    return Vec::new();
                };
                self.state = GatewayState::Idle;
                match (capture, result) {
                    (Some(capture), Ok(bytes)) => self.commit_edit(capture, &bytes),
                    (Some(capture), Err(err)) => vec![
                        GatewayOutput::Error(err.to_string()),
                        GatewayOutput::EditFailed { capture },
                    ],
                    (None, Ok(_)) => {
                        log::debug!("gateway: restore replay acknowledged");
                        Vec::new()
                    }
                    (None, Err(err)) => {
                        vec![GatewayOutput::Error(format!("restore replay failed: {err}"))]
                    }
                }
            }
            JobOutcome::Upload(result) => {
                if self.state != GatewayState::Uploading(TransferPhase::Transfer) {
                    log::warn!("gateway: upload outcome while {}", self.state.name());
                    return Vec::new();
                }
                self.state = GatewayState::Idle;
                match result {
                    Ok(()) => {
                        log::info!("gateway: upload complete");
                        vec![GatewayOutput::Uploaded]
                    }
                    Err(err) => vec![GatewayOutput::Error(err.to_string())],
                }
            }
            JobOutcome::Download(result) => {
                if self.state != GatewayState::Downloading(TransferPhase::Transfer) {
                    log::warn!("gateway: download outcome while {}", self.state.name());
                    return Vec::new();
                }
                self.state = GatewayState::Idle;
                match result {
                    Ok(bytes) => vec![GatewayOutput::Downloaded(bytes)],
                    Err(err) => vec![GatewayOutput::Error(err.to_string())],
                }
            }
            JobOutcome::LoadProject(_) => {
                log::warn!("gateway: unexpected project load outcome");
                Vec::new()
            }
        }
    }

    fn commit_edit(&mut self, capture: CaptureId, bytes: &[u8]) -> Vec<GatewayOutput> {
        let Some(dims) = self.dimensions.as_ref() else {
            return vec![
                GatewayOutput::Error("edit response with no project dimensions".to_string()),
                GatewayOutput::EditFailed { capture },
            ];
        };
        match bundle::read_edit_response(bytes, dims) {
            Ok(response) => {
                if let Some(lineage) = response.lineage {
                    self.lineage = Some(lineage);
                }
                let (frame, feature) = self.edited_slice.take().unwrap_or((self.frame, self.feature));
                let labeled = response.labeled.into_shared();
                // The after-capture must see the committed state even if the
                // displayed slice has moved on in the meantime
                self.pending_snapshot = Some((
                    capture,
                    Snapshot::Labels {
                        frame,
                        feature,
                        labeled: labeled.clone(),
                        overlaps: response.overlaps.clone(),
                        lineage: self.lineage.clone(),
                    },
                ));
                vec![
                    GatewayOutput::Edited(LabeledEvent {
                        frame,
                        feature,
                        labeled,
                        overlaps: response.overlaps,
                    }),
                    GatewayOutput::EditCompleted { capture },
                ]
            }
            Err(err) => vec![
                GatewayOutput::Error(format!("edit response rejected: {err}")),
                GatewayOutput::EditFailed { capture },
            ],
        }
    }

    // ------------------------------------------------------------------------
    // History participation
    // ------------------------------------------------------------------------

    fn save(&mut self, capture: CaptureId) -> Vec<GatewayOutput> {
        if let Some((pending_capture, snapshot)) = self.pending_snapshot.take() {
            if pending_capture == capture {
                return vec![GatewayOutput::Snapshot { capture, snapshot }];
            }
            log::debug!(
                "gateway: dropping unclaimed post-edit snapshot for capture {}",
                pending_capture
            );
        }
        let Some(labeled) = self.labeled.clone() else {
            // Leaving the barrier unanswered stalls the capture; the history
            // abandons it on the next record
            log::debug!("gateway: no labels, snapshot for capture {} unanswered", capture);
            return Vec::new();
        };
        vec![GatewayOutput::Snapshot {
            capture,
            snapshot: Snapshot::Labels {
                frame: self.frame,
                feature: self.feature,
                labeled,
                overlaps: self.overlaps.clone(),
                lineage: self.lineage.clone(),
            },
        }]
    }

    fn restore(&mut self, snapshot: Snapshot) -> Vec<GatewayOutput> {
        let Snapshot::Labels {
            frame,
            feature,
            labeled,
            overlaps,
            lineage,
        } = snapshot
        else {
            log::warn!("gateway: foreign snapshot ignored");
            return Vec::new();
        };
        self.lineage = lineage;
        let mut outputs = vec![GatewayOutput::Edited(LabeledEvent {
            frame,
            feature,
            labeled: labeled.clone(),
            overlaps: overlaps.clone(),
        })];
        if self.state != GatewayState::Idle {
            // The local state is already restored; only the backend sync is
            // skipped, and the next replay carries the full array anyway
            log::warn!("gateway: {} during restore, replay skipped", self.state.name());
            return outputs;
        }
        match bundle::write_edit_bundle(
            &EditIntent::Restore {},
            self.write_mode,
            &labeled,
            None,
            &overlaps,
            self.lineage.as_ref(),
        ) {
            Ok(bundle) => {
                log::debug!("gateway: replaying restore for frame {} feature {}", frame, feature);
                self.state = GatewayState::Loading { capture: None };
                self.request = Some(("restore", Instant::now()));
                outputs.push(GatewayOutput::SubmitJob(Job::Edit { bundle }));
            }
            Err(err) => outputs.push(GatewayOutput::Error(format!("restore replay failed: {err}"))),
        }
        outputs
    }

    // ------------------------------------------------------------------------
    // Bulk transfer
    // ------------------------------------------------------------------------

    fn start_transfer(&mut self, upload: bool) -> Vec<GatewayOutput> {
        let name = if upload { "upload" } else { "download" };
        if self.state != GatewayState::Idle {
            log::warn!("gateway: {} dropped while {}", name, self.state.name());
            return Vec::new();
        }
        self.state = if upload {
            GatewayState::Uploading(TransferPhase::GetArrays)
        } else {
            GatewayState::Downloading(TransferPhase::GetArrays)
        };
        vec![GatewayOutput::GetArrays]
    }

    fn arrays(&mut self, raw: Array4<u8>, labeled: Array4<i32>) -> Vec<GatewayOutput> {
        let uploading = match self.state {
            GatewayState::Uploading(TransferPhase::GetArrays) => true,
            GatewayState::Downloading(TransferPhase::GetArrays) => false,
            other => {
                log::warn!("gateway: arrays while {}", other.name());
                return Vec::new();
            }
        };
        let Some(dims) = self.dimensions.as_ref() else {
            self.state = GatewayState::Idle;
            return vec![GatewayOutput::Error(
                "bulk transfer with no project dimensions".to_string(),
            )];
        };
        match bundle::write_export_bundle(dims, &labeled, &raw, &self.overlaps, self.lineage.as_ref())
        {
            Ok(bundle) => {
                let job = if uploading {
                    self.state = GatewayState::Uploading(TransferPhase::Transfer);
                    self.request = Some(("upload", Instant::now()));
                    Job::Upload {
                        bundle,
                        project_id: self.project_id.clone(),
                        bucket: self.bucket.clone(),
                    }
                } else {
                    self.state = GatewayState::Downloading(TransferPhase::Transfer);
                    self.request = Some(("download", Instant::now()));
                    Job::Download {
                        bundle,
                        project_id: self.project_id.clone(),
                    }
                };
                vec![GatewayOutput::SubmitJob(job)]
            }
            Err(err) => {
                self.state = GatewayState::Idle;
                vec![GatewayOutput::Error(format!("cannot build export bundle: {err}"))]
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
