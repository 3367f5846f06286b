//! Shared message types for the editing session.
//!
//! Everything that crosses an actor boundary is a message: raw pointer input,
//! shared tool context updates, edit intents bound for the backend, and the
//! events the session surfaces to its host.

use ndarray::ArcArray2;
use serde::{Deserialize, Serialize};

use crate::project::Overlaps;

/// Editing tools selectable in the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Brush,
    #[default]
    Select,
    Threshold,
    Trim,
    Flood,
    Watershed,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::Brush,
        Tool::Select,
        Tool::Threshold,
        Tool::Trim,
        Tool::Flood,
        Tool::Watershed,
    ];

    /// Tools legal while the display is in color mode.
    pub fn usable_in_color(self) -> bool {
        matches!(self, Tool::Brush | Tool::Select | Tool::Trim | Tool::Flood)
    }

    /// Tools legal while the display is in grayscale mode (all of them).
    pub fn usable_in_grayscale(self) -> bool {
        true
    }

    /// Freehand tools claim drag gestures for themselves, so canvas panning
    /// must be disabled while they are active.
    pub fn disables_pan(self) -> bool {
        matches!(self, Tool::Brush | Tool::Threshold)
    }

    /// Display name, also used by keybinding serialization.
    pub fn name(self) -> &'static str {
        match self {
            Tool::Brush => "brush",
            Tool::Select => "select",
            Tool::Threshold => "threshold",
            Tool::Trim => "trim",
            Tool::Flood => "flood",
            Tool::Watershed => "watershed",
        }
    }
}

/// Display mode of the image area.
///
/// Grayscale shows a single channel, which is what the intensity-based tools
/// (threshold, watershed) operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Color,
    Grayscale,
}

impl DisplayMode {
    pub fn name(self) -> &'static str {
        match self {
            DisplayMode::Color => "color",
            DisplayMode::Grayscale => "grayscale",
        }
    }
}

/// How a drawn region combines with labels already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Overlap,
    Exclude,
    Overwrite,
}

/// Raw pointer input in image-space pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvent {
    Down { x: i32, y: i32 },
    Move { x: i32, y: i32 },
    Up { x: i32, y: i32 },
}

impl PointerEvent {
    /// The coordinate carried by the event.
    pub fn position(self) -> (i32, i32) {
        match self {
            PointerEvent::Down { x, y }
            | PointerEvent::Move { x, y }
            | PointerEvent::Up { x, y } => (x, y),
        }
    }
}

/// Shared context updates broadcast to every tool, active or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEvent {
    /// Pointer position in image space
    Coordinates { x: i32, y: i32 },
    /// Label under the cursor
    Label(i32),
    /// Current foreground label
    Foreground(i32),
    /// Current background label
    Background(i32),
    /// Current selected label
    Selected(i32),
}

/// Input delivered to a single tool automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolEvent {
    Pointer(PointerEvent),
    Context(ContextEvent),
    /// Sent to the outgoing tool on every tool switch so half-finished
    /// gestures cannot leak into the next activation.
    Exit,
}

/// A semantic edit, produced by a tool gesture and consumed exactly once by
/// the gateway.
///
/// Serializes to the backend's `{ "action": ..., "args": {...} }` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "snake_case")]
pub enum EditIntent {
    /// Paint a freehand trace with the brush
    Draw {
        trace: Vec<[i32; 2]>,
        brush_value: i32,
        target_value: i32,
        brush_size: u32,
        erase: bool,
    },
    /// Label everything above an intensity threshold inside a box
    Threshold {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        label: i32,
    },
    /// Flood the connected region at a seed point with a label
    Flood { label: i32, x: i32, y: i32 },
    /// Remove pixels of a label not connected to the clicked point
    TrimPixels { label: i32, x: i32, y: i32 },
    /// Split one label in two along an intensity watershed
    Watershed {
        label: i32,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
    },
    /// Swap two labels on the current frame
    SwapSingleFrame { label_1: i32, label_2: i32 },
    /// Replace one label with another on the current frame
    ReplaceSingle { label_1: i32, label_2: i32 },
    /// Replace one label with another on every frame
    Replace { label_1: i32, label_2: i32 },
    /// Shrink a label by one pixel along its boundary
    Erode { label: i32 },
    /// Grow a label by one pixel along its boundary
    Dilate { label: i32 },
    /// Refit a label boundary to the image with an active contour
    ActiveContour { label: i32 },
    /// Record a division: attach a daughter to a parent track
    AddDaughter { parent: i32, daughter: i32 },
    /// Detach a daughter from its division
    RemoveDaughter { daughter: i32 },
    /// Move a label into a fresh track
    NewTrack { label: i32 },
    /// Re-submit restored labels so the backend matches the history position
    Restore {},
}

impl EditIntent {
    /// Wire name of the action, as the backend sees it.
    pub fn action_name(&self) -> &'static str {
        match self {
            EditIntent::Draw { .. } => "draw",
            EditIntent::Threshold { .. } => "threshold",
            EditIntent::Flood { .. } => "flood",
            EditIntent::TrimPixels { .. } => "trim_pixels",
            EditIntent::Watershed { .. } => "watershed",
            EditIntent::SwapSingleFrame { .. } => "swap_single_frame",
            EditIntent::ReplaceSingle { .. } => "replace_single",
            EditIntent::Replace { .. } => "replace",
            EditIntent::Erode { .. } => "erode",
            EditIntent::Dilate { .. } => "dilate",
            EditIntent::ActiveContour { .. } => "active_contour",
            EditIntent::AddDaughter { .. } => "add_daughter",
            EditIntent::RemoveDaughter { .. } => "remove_daughter",
            EditIntent::NewTrack { .. } => "new_track",
            EditIntent::Restore {} => "restore",
        }
    }

    /// Whether this edit needs the raw intensity frame in its bundle.
    ///
    /// Only the intensity-driven actions read pixel values server-side.
    pub fn uses_raw(&self) -> bool {
        matches!(
            self,
            EditIntent::ActiveContour { .. }
                | EditIntent::Threshold { .. }
                | EditIntent::Watershed { .. }
        )
    }
}

// ============================================================================
// Bus payloads
// ============================================================================

/// New labeled state for one (frame, feature), published after every
/// committed edit and on restore.
#[derive(Debug, Clone)]
pub struct LabeledEvent {
    pub frame: usize,
    pub feature: usize,
    pub labeled: ArcArray2<i32>,
    pub overlaps: Overlaps,
}

/// The raw intensity slice currently on display.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub frame: usize,
    pub channel: usize,
    pub raw: ArcArray2<u8>,
}

/// Label inventory for one feature, derived from the labeled volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelsEvent {
    pub feature: usize,
    /// Labels present anywhere in the feature, ascending, without 0
    pub labels: Vec<i32>,
    /// Highest label in use (0 when the feature is empty)
    pub max_label: i32,
}

// ============================================================================
// Session surface
// ============================================================================

/// A user-level command, typically produced by a keybinding lookup and fed to
/// the session, which routes it to whichever actor implements it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCommand {
    SetTool(Tool),
    /// Swap foreground and background labels in the current frame
    Swap,
    /// Replace the background label with the foreground in the current frame
    Replace,
    /// Remove the selected label from the current frame
    Delete,
    Erode,
    Dilate,
    /// Fit the selected label's boundary to the image (grayscale only)
    Autofit,
    Undo,
    Redo,
    BrushSizeUp,
    BrushSizeDown,
    ToggleErase,
    /// Select a label one past the highest in use
    NewLabel,
    /// Clear the selection and abort any gesture in progress
    Reset,
}

impl SessionCommand {
    /// Display name, used in keybinding conflict messages.
    pub fn name(self) -> &'static str {
        match self {
            SessionCommand::SetTool(tool) => tool.name(),
            SessionCommand::Swap => "swap",
            SessionCommand::Replace => "replace",
            SessionCommand::Delete => "delete",
            SessionCommand::Erode => "erode",
            SessionCommand::Dilate => "dilate",
            SessionCommand::Autofit => "autofit",
            SessionCommand::Undo => "undo",
            SessionCommand::Redo => "redo",
            SessionCommand::BrushSizeUp => "brush size up",
            SessionCommand::BrushSizeDown => "brush size down",
            SessionCommand::ToggleErase => "toggle erase",
            SessionCommand::NewLabel => "new label",
            SessionCommand::Reset => "reset",
        }
    }
}

/// Events the session surfaces to its host while pumping.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A backend or consistency failure, surfaced exactly once
    Error(String),
    /// New labels were committed for a slice; consumers should re-render
    Edited { frame: usize, feature: usize },
    /// The active tool changed
    ToolChanged(Tool),
    /// Whether the canvas may pan on drag with the current tool
    PanOnDrag(bool),
    /// Undo/redo affordances changed
    HistoryChanged { can_undo: bool, can_redo: bool },
    /// A download bundle is ready for the host to persist
    Downloaded(Vec<u8>),
    /// The upload round trip finished
    Uploaded,
}
