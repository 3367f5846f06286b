//! Tool state machines.
//!
//! Every editing tool is a small automaton, generally `idle -> dragging ->
//! idle`, driven by pointer events plus the shared tool context. A tool never
//! touches the backend and never mutates the label array; on gesture
//! completion it emits at most one output describing what should change, then
//! returns to idle. Degenerate gestures (a drag that never leaves its starting
//! pixel, a box with zero width or height) are suppressed rather than sent as
//! no-op edits.

use ndarray::ArcArray2;

use crate::message::{ContextEvent, EditIntent, PointerEvent, ToolEvent};

// ============================================================================
// Shared context
// ============================================================================

/// Read-mostly state visible to every tool.
///
/// Owned and mutated by the dispatcher; tools only read it while handling an
/// event. `label` is the label under the cursor, kept current alongside the
/// coordinates.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub foreground: i32,
    pub background: i32,
    pub selected: i32,
    pub x: i32,
    pub y: i32,
    /// Label under the cursor, 0 outside every label
    pub label: i32,
    /// Working copy of the displayed label slice
    pub labeled: Option<ArcArray2<i32>>,
    pub brush_size: u32,
    pub erase: bool,
}

impl ToolContext {
    pub fn new(brush_size: u32) -> Self {
        Self {
            brush_size,
            ..Self::default()
        }
    }

    /// Label at an image coordinate, 0 when out of bounds or not loaded.
    pub fn label_at(&self, x: i32, y: i32) -> i32 {
        let Some(labeled) = &self.labeled else {
            return 0;
        };
        if x < 0 || y < 0 {
            return 0;
        }
        let (height, width) = labeled.dim();
        let (x, y) = (x as usize, y as usize);
        if y >= height || x >= width {
            return 0;
        }
        labeled[[y, x]]
    }
}

/// What a tool asks for when a gesture completes.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Submit an edit to the backend
    Edit(EditIntent),
    /// Make this label the foreground
    SelectForeground(i32),
    /// Make this label the background
    SelectBackground(i32),
}

// ============================================================================
// Select
// ============================================================================

/// Click selects the hovered label as foreground; clicking the label that is
/// already the foreground demotes it to background. Never emits edits.
#[derive(Debug, Default)]
pub struct SelectTool;

impl SelectTool {
    pub fn handle(&mut self, event: ToolEvent, ctx: &ToolContext) -> Option<ToolOutput> {
        match event {
            ToolEvent::Pointer(PointerEvent::Up { .. }) => {
                if ctx.label == ctx.foreground && ctx.label != 0 {
                    Some(ToolOutput::SelectBackground(ctx.label))
                } else {
                    Some(ToolOutput::SelectForeground(ctx.label))
                }
            }
            _ => None,
        }
    }
}

// ============================================================================
// Brush
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum BrushState {
    #[default]
    Idle,
    Dragging,
}

/// Freehand painting. Pointer-down starts a trace, coordinate updates extend
/// it, pointer-up emits one `draw` edit covering the whole trace.
#[derive(Debug, Default)]
pub struct BrushTool {
    state: BrushState,
    trace: Vec<[i32; 2]>,
}

impl BrushTool {
    pub fn handle(&mut self, event: ToolEvent, ctx: &ToolContext) -> Option<ToolOutput> {
        match event {
            ToolEvent::Pointer(PointerEvent::Down { x, y }) => {
                self.state = BrushState::Dragging;
                self.trace.clear();
                self.trace.push([x, y]);
                None
            }
            ToolEvent::Context(ContextEvent::Coordinates { x, y })
                if self.state == BrushState::Dragging =>
            {
                self.extend(x, y);
                None
            }
            ToolEvent::Pointer(PointerEvent::Up { x, y }) if self.state == BrushState::Dragging => {
                self.extend(x, y);
                self.state = BrushState::Idle;
                let trace = std::mem::take(&mut self.trace);
                // A trace that never left its starting pixel is not a stroke
                if trace.len() < 2 {
                    log::debug!("brush: single-pixel trace suppressed");
                    return None;
                }
                Some(ToolOutput::Edit(EditIntent::Draw {
                    trace,
                    brush_value: ctx.foreground,
                    target_value: ctx.background,
                    brush_size: ctx.brush_size,
                    erase: ctx.erase,
                }))
            }
            ToolEvent::Exit => {
                self.state = BrushState::Idle;
                self.trace.clear();
                None
            }
            _ => None,
        }
    }

    fn extend(&mut self, x: i32, y: i32) {
        if self.trace.last() != Some(&[x, y]) {
            self.trace.push([x, y]);
        }
    }
}

// ============================================================================
// Threshold
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ThresholdState {
    #[default]
    Idle,
    Dragging {
        x1: i32,
        y1: i32,
    },
}

/// Drag a box; everything above an intensity threshold inside it becomes the
/// foreground label. Boxes with zero width or height and a zero foreground
/// are suppressed.
#[derive(Debug, Default)]
pub struct ThresholdTool {
    state: ThresholdState,
}

impl ThresholdTool {
    pub fn handle(&mut self, event: ToolEvent, ctx: &ToolContext) -> Option<ToolOutput> {
        match (self.state, event) {
            (ThresholdState::Idle, ToolEvent::Pointer(PointerEvent::Down { x, y })) => {
                self.state = ThresholdState::Dragging { x1: x, y1: y };
                None
            }
            (ThresholdState::Dragging { x1, y1 }, ToolEvent::Pointer(PointerEvent::Up { x, y })) => {
                self.state = ThresholdState::Idle;
                if x == x1 || y == y1 {
                    log::debug!("threshold: degenerate box suppressed");
                    return None;
                }
                if ctx.foreground == 0 {
                    log::debug!("threshold: no foreground label, suppressed");
                    return None;
                }
                Some(ToolOutput::Edit(EditIntent::Threshold {
                    x1,
                    y1,
                    x2: x,
                    y2: y,
                    label: ctx.foreground,
                }))
            }
            (_, ToolEvent::Exit) => {
                self.state = ThresholdState::Idle;
                None
            }
            _ => None,
        }
    }
}

// ============================================================================
// Trim
// ============================================================================

/// Click a label to remove its pixels not connected to the clicked point.
#[derive(Debug, Default)]
pub struct TrimTool;

impl TrimTool {
    pub fn handle(&mut self, event: ToolEvent, ctx: &ToolContext) -> Option<ToolOutput> {
        match event {
            ToolEvent::Pointer(PointerEvent::Up { x, y }) if ctx.label != 0 => {
                Some(ToolOutput::Edit(EditIntent::TrimPixels {
                    label: ctx.label,
                    x,
                    y,
                }))
            }
            _ => None,
        }
    }
}

// ============================================================================
// Flood
// ============================================================================

/// Click to flood the connected region under the cursor with the foreground
/// label. Clicking a region that already has the foreground label would be a
/// no-op edit, so it is suppressed.
#[derive(Debug, Default)]
pub struct FloodTool;

impl FloodTool {
    pub fn handle(&mut self, event: ToolEvent, ctx: &ToolContext) -> Option<ToolOutput> {
        match event {
            ToolEvent::Pointer(PointerEvent::Up { x, y }) if ctx.label != ctx.foreground => {
                Some(ToolOutput::Edit(EditIntent::Flood {
                    label: ctx.foreground,
                    x,
                    y,
                }))
            }
            _ => None,
        }
    }
}

// ============================================================================
// Watershed
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum WatershedState {
    #[default]
    Idle,
    Armed {
        label: i32,
        x1: i32,
        y1: i32,
    },
}

/// Two clicks inside the same nonzero label split it along an intensity
/// watershed between the two seed points. A second click on a different
/// label, on no label, or on the first point resets the gesture.
#[derive(Debug, Default)]
pub struct WatershedTool {
    state: WatershedState,
}

impl WatershedTool {
    pub fn handle(&mut self, event: ToolEvent, ctx: &ToolContext) -> Option<ToolOutput> {
        match (self.state, event) {
            (WatershedState::Idle, ToolEvent::Pointer(PointerEvent::Up { x, y })) => {
                if ctx.label != 0 {
                    self.state = WatershedState::Armed {
                        label: ctx.label,
                        x1: x,
                        y1: y,
                    };
                }
                None
            }
            (
                WatershedState::Armed { label, x1, y1 },
                ToolEvent::Pointer(PointerEvent::Up { x, y }),
            ) => {
                self.state = WatershedState::Idle;
                if ctx.label != label || (x, y) == (x1, y1) {
                    log::debug!("watershed: second seed invalid, gesture reset");
                    return None;
                }
                Some(ToolOutput::Edit(EditIntent::Watershed {
                    label,
                    x1,
                    y1,
                    x2: x,
                    y2: y,
                }))
            }
            (_, ToolEvent::Exit) => {
                self.state = WatershedState::Idle;
                None
            }
            _ => None,
        }
    }
}

// ============================================================================
// Track
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    #[default]
    Idle,
    AddingDaughter {
        parent: i32,
    },
}

/// Input for the tracking tool. Unlike the segmentation tools it is driven by
/// explicit lineage commands as well as clicks, and it keeps its own copy of
/// the hovered label since it lives outside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackEvent {
    Pointer(PointerEvent),
    Context(ContextEvent),
    /// Arm the tool: the next click on a nonzero label becomes the daughter
    AddDaughter { parent: i32 },
    RemoveDaughter { daughter: i32 },
    /// Detach a daughter into a brand new track
    ReplaceWithNewCell { daughter: i32 },
    /// Collapse a daughter back into its parent across all frames
    ReplaceWithParent { parent: i32, daughter: i32 },
    Reset,
}

/// Lineage editing: records divisions by attaching daughter labels to a
/// parent track.
#[derive(Debug, Default)]
pub struct TrackTool {
    state: TrackState,
    label: i32,
}

impl TrackTool {
    pub fn handle(&mut self, event: TrackEvent) -> Option<ToolOutput> {
        match event {
            TrackEvent::Context(ContextEvent::Label(label)) => {
                self.label = label;
                None
            }
            TrackEvent::Pointer(PointerEvent::Up { .. }) => match self.state {
                TrackState::Idle => None,
                TrackState::AddingDaughter { parent } => {
                    // Clicks on no label keep the tool armed
                    if self.label == 0 {
                        return None;
                    }
                    self.state = TrackState::Idle;
                    Some(ToolOutput::Edit(EditIntent::AddDaughter {
                        parent,
                        daughter: self.label,
                    }))
                }
            },
            TrackEvent::AddDaughter { parent } => {
                self.state = TrackState::AddingDaughter { parent };
                None
            }
            TrackEvent::RemoveDaughter { daughter } => {
                Some(ToolOutput::Edit(EditIntent::RemoveDaughter { daughter }))
            }
            TrackEvent::ReplaceWithNewCell { daughter } => {
                Some(ToolOutput::Edit(EditIntent::NewTrack { label: daughter }))
            }
            TrackEvent::ReplaceWithParent { parent, daughter } => {
                Some(ToolOutput::Edit(EditIntent::Replace {
                    label_1: parent,
                    label_2: daughter,
                }))
            }
            TrackEvent::Reset => {
                self.state = TrackState::Idle;
                None
            }
            _ => None,
        }
    }

    /// Whether the tool is waiting for a daughter click.
    pub fn is_armed(&self) -> bool {
        matches!(self.state, TrackState::AddingDaughter { .. })
    }

    pub fn state(&self) -> TrackState {
        self.state
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn down(x: i32, y: i32) -> ToolEvent {
        ToolEvent::Pointer(PointerEvent::Down { x, y })
    }

    fn up(x: i32, y: i32) -> ToolEvent {
        ToolEvent::Pointer(PointerEvent::Up { x, y })
    }

    fn coords(x: i32, y: i32) -> ToolEvent {
        ToolEvent::Context(ContextEvent::Coordinates { x, y })
    }

    /// 4x4 grid: label 1 occupies the top-left 2x2, label 2 the bottom-right 2x2.
    fn test_context() -> ToolContext {
        let labeled = array![
            [1, 1, 0, 0],
            [1, 1, 0, 0],
            [0, 0, 2, 2],
            [0, 0, 2, 2],
        ]
        .into_shared();
        ToolContext {
            foreground: 5,
            background: 0,
            selected: 5,
            brush_size: 1,
            labeled: Some(labeled),
            ..ToolContext::default()
        }
    }

    fn hover(ctx: &mut ToolContext, x: i32, y: i32) {
        ctx.x = x;
        ctx.y = y;
        ctx.label = ctx.label_at(x, y);
    }

    #[test]
    fn test_label_at_bounds() {
        let ctx = test_context();
        assert_eq!(ctx.label_at(0, 0), 1);
        assert_eq!(ctx.label_at(3, 3), 2);
        assert_eq!(ctx.label_at(2, 0), 0);
        assert_eq!(ctx.label_at(-1, 0), 0);
        assert_eq!(ctx.label_at(4, 0), 0);
        assert_eq!(ctx.label_at(0, 99), 0);
    }

    #[test]
    fn test_threshold_emits_dragged_box() {
        let mut tool = ThresholdTool::default();
        let ctx = test_context();

        assert!(tool.handle(down(2, 3), &ctx).is_none());
        let out = tool.handle(up(8, 9), &ctx);
        assert_eq!(
            out,
            Some(ToolOutput::Edit(EditIntent::Threshold {
                x1: 2,
                y1: 3,
                x2: 8,
                y2: 9,
                label: 5,
            }))
        );
    }

    #[test]
    fn test_threshold_zero_area_suppressed() {
        let ctx = test_context();

        // Same point
        let mut tool = ThresholdTool::default();
        tool.handle(down(4, 4), &ctx);
        assert!(tool.handle(up(4, 4), &ctx).is_none());

        // Zero width
        let mut tool = ThresholdTool::default();
        tool.handle(down(4, 1), &ctx);
        assert!(tool.handle(up(4, 7), &ctx).is_none());

        // Zero height
        let mut tool = ThresholdTool::default();
        tool.handle(down(1, 4), &ctx);
        assert!(tool.handle(up(7, 4), &ctx).is_none());
    }

    #[test]
    fn test_threshold_without_foreground_suppressed() {
        let mut tool = ThresholdTool::default();
        let mut ctx = test_context();
        ctx.foreground = 0;

        tool.handle(down(1, 1), &ctx);
        assert!(tool.handle(up(5, 5), &ctx).is_none());
    }

    #[test]
    fn test_threshold_exit_aborts_drag() {
        let mut tool = ThresholdTool::default();
        let ctx = test_context();

        tool.handle(down(1, 1), &ctx);
        tool.handle(ToolEvent::Exit, &ctx);
        // The up after an exit is not the end of a drag
        assert!(tool.handle(up(5, 5), &ctx).is_none());
    }

    #[test]
    fn test_brush_emits_trace() {
        let mut tool = BrushTool::default();
        let mut ctx = test_context();
        ctx.brush_size = 3;

        tool.handle(down(1, 1), &ctx);
        tool.handle(coords(2, 1), &ctx);
        tool.handle(coords(2, 2), &ctx);
        // Repeated coordinate must not duplicate a trace point
        tool.handle(coords(2, 2), &ctx);
        let out = tool.handle(up(3, 2), &ctx);

        assert_eq!(
            out,
            Some(ToolOutput::Edit(EditIntent::Draw {
                trace: vec![[1, 1], [2, 1], [2, 2], [3, 2]],
                brush_value: 5,
                target_value: 0,
                brush_size: 3,
                erase: false,
            }))
        );
    }

    #[test]
    fn test_brush_single_pixel_suppressed() {
        let mut tool = BrushTool::default();
        let ctx = test_context();

        tool.handle(down(2, 2), &ctx);
        tool.handle(coords(2, 2), &ctx);
        assert!(tool.handle(up(2, 2), &ctx).is_none());
    }

    #[test]
    fn test_brush_exit_discards_trace() {
        let mut tool = BrushTool::default();
        let ctx = test_context();

        tool.handle(down(1, 1), &ctx);
        tool.handle(coords(2, 2), &ctx);
        tool.handle(ToolEvent::Exit, &ctx);
        assert!(tool.handle(up(3, 3), &ctx).is_none());

        // A fresh gesture still works after the abort
        tool.handle(down(0, 0), &ctx);
        tool.handle(coords(1, 0), &ctx);
        assert!(tool.handle(up(1, 0), &ctx).is_some());
    }

    #[test]
    fn test_brush_ignores_coordinates_while_idle() {
        let mut tool = BrushTool::default();
        let ctx = test_context();

        tool.handle(coords(1, 1), &ctx);
        tool.handle(down(2, 2), &ctx);
        tool.handle(coords(3, 3), &ctx);
        let out = tool.handle(up(3, 3), &ctx);
        // Trace starts at the pointer-down, not at earlier hover positions
        match out {
            Some(ToolOutput::Edit(EditIntent::Draw { trace, .. })) => {
                assert_eq!(trace, vec![[2, 2], [3, 3]]);
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn test_select_foreground_and_demote() {
        let mut tool = SelectTool;
        let mut ctx = test_context();
        ctx.foreground = 0;

        hover(&mut ctx, 0, 0);
        assert_eq!(
            tool.handle(up(0, 0), &ctx),
            Some(ToolOutput::SelectForeground(1))
        );

        // Clicking the label that is already foreground demotes it
        ctx.foreground = 1;
        assert_eq!(
            tool.handle(up(0, 0), &ctx),
            Some(ToolOutput::SelectBackground(1))
        );
    }

    #[test]
    fn test_select_empty_space_clears_foreground() {
        let mut tool = SelectTool;
        let mut ctx = test_context();
        ctx.foreground = 1;

        hover(&mut ctx, 3, 0);
        assert_eq!(
            tool.handle(up(3, 0), &ctx),
            Some(ToolOutput::SelectForeground(0))
        );
    }

    #[test]
    fn test_trim_requires_label() {
        let mut tool = TrimTool;
        let mut ctx = test_context();

        hover(&mut ctx, 3, 0);
        assert!(tool.handle(up(3, 0), &ctx).is_none());

        hover(&mut ctx, 2, 2);
        assert_eq!(
            tool.handle(up(2, 2), &ctx),
            Some(ToolOutput::Edit(EditIntent::TrimPixels { label: 2, x: 2, y: 2 }))
        );
    }

    #[test]
    fn test_flood_suppressed_on_foreground_region() {
        let mut tool = FloodTool;
        let mut ctx = test_context();
        ctx.foreground = 2;

        hover(&mut ctx, 2, 2);
        assert!(tool.handle(up(2, 2), &ctx).is_none());

        hover(&mut ctx, 0, 0);
        assert_eq!(
            tool.handle(up(0, 0), &ctx),
            Some(ToolOutput::Edit(EditIntent::Flood { label: 2, x: 0, y: 0 }))
        );
    }

    #[test]
    fn test_watershed_two_clicks_same_label() {
        let mut tool = WatershedTool::default();
        let mut ctx = test_context();

        hover(&mut ctx, 0, 0);
        assert!(tool.handle(up(0, 0), &ctx).is_none());
        hover(&mut ctx, 1, 1);
        assert_eq!(
            tool.handle(up(1, 1), &ctx),
            Some(ToolOutput::Edit(EditIntent::Watershed {
                label: 1,
                x1: 0,
                y1: 0,
                x2: 1,
                y2: 1,
            }))
        );
    }

    #[test]
    fn test_watershed_resets_on_label_change() {
        let mut tool = WatershedTool::default();
        let mut ctx = test_context();

        hover(&mut ctx, 0, 0);
        tool.handle(up(0, 0), &ctx);
        // Second click on a different label resets without emitting
        hover(&mut ctx, 3, 3);
        assert!(tool.handle(up(3, 3), &ctx).is_none());
        // And the gesture starts over
        assert!(tool.handle(up(3, 3), &ctx).is_none());
        hover(&mut ctx, 2, 2);
        assert!(tool.handle(up(2, 2), &ctx).is_some());
    }

    #[test]
    fn test_watershed_coincident_points_suppressed() {
        let mut tool = WatershedTool::default();
        let mut ctx = test_context();

        hover(&mut ctx, 1, 0);
        tool.handle(up(1, 0), &ctx);
        assert!(tool.handle(up(1, 0), &ctx).is_none());
    }

    #[test]
    fn test_watershed_ignores_empty_first_click() {
        let mut tool = WatershedTool::default();
        let mut ctx = test_context();

        hover(&mut ctx, 3, 0);
        tool.handle(up(3, 0), &ctx);
        assert_eq!(tool.state, WatershedState::Idle);
    }

    #[test]
    fn test_track_add_daughter_flow() {
        let mut tool = TrackTool::default();

        tool.handle(TrackEvent::AddDaughter { parent: 3 });
        assert!(tool.is_armed());

        // A click on no label keeps the tool armed
        tool.handle(TrackEvent::Context(ContextEvent::Label(0)));
        assert!(tool
            .handle(TrackEvent::Pointer(PointerEvent::Up { x: 0, y: 0 }))
            .is_none());
        assert!(tool.is_armed());

        tool.handle(TrackEvent::Context(ContextEvent::Label(7)));
        let out = tool.handle(TrackEvent::Pointer(PointerEvent::Up { x: 0, y: 0 }));
        assert_eq!(
            out,
            Some(ToolOutput::Edit(EditIntent::AddDaughter { parent: 3, daughter: 7 }))
        );
        assert!(!tool.is_armed());
    }

    #[test]
    fn test_track_reset_disarms() {
        let mut tool = TrackTool::default();
        tool.handle(TrackEvent::AddDaughter { parent: 3 });
        tool.handle(TrackEvent::Reset);
        assert!(!tool.is_armed());
    }

    #[test]
    fn test_track_lineage_commands() {
        let mut tool = TrackTool::default();

        assert_eq!(
            tool.handle(TrackEvent::RemoveDaughter { daughter: 4 }),
            Some(ToolOutput::Edit(EditIntent::RemoveDaughter { daughter: 4 }))
        );
        assert_eq!(
            tool.handle(TrackEvent::ReplaceWithNewCell { daughter: 4 }),
            Some(ToolOutput::Edit(EditIntent::NewTrack { label: 4 }))
        );
        assert_eq!(
            tool.handle(TrackEvent::ReplaceWithParent { parent: 2, daughter: 4 }),
            Some(ToolOutput::Edit(EditIntent::Replace { label_1: 2, label_2: 4 }))
        );
    }

}
