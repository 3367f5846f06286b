//! Tool dispatcher: tool selection, display/pan regions, input fan-out.
//!
//! The dispatcher runs three independent concerns side by side. The display
//! region (color or grayscale) gates which tools may become active, the pan
//! region tells the canvas whether drags should pan or draw, and the fan-out
//! forwards pointer events to the active tool only while context updates go
//! to every tool. Switching tools always sends `Exit` to the outgoing tool
//! first, so no gesture survives a switch.
//!
//! An illegal `SetTool` for the current display mode is dropped, not an
//! error. History restores bypass that guard: the recorded tool wins.

use crate::history::{CaptureId, Snapshot};
use crate::message::{
    ContextEvent, DisplayMode, EditIntent, LabeledEvent, PointerEvent, Tool, ToolEvent,
};
use crate::tools::{
    BrushTool, FloodTool, SelectTool, ThresholdTool, ToolContext, ToolOutput, TrimTool,
    WatershedTool,
};

// ============================================================================
// Events
// ============================================================================

/// Edits available from menus and keybindings without a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlineAction {
    /// Swap foreground and background labels in the current frame
    Swap,
    /// Replace background with foreground in the current frame
    Replace,
    /// Remove the selected label from the current frame
    Delete,
    Erode,
    Dilate,
    /// Refit the selected label's boundary; needs intensity data, so
    /// grayscale only
    Autofit,
}

/// Input accepted by the dispatcher.
#[derive(Debug, Clone)]
pub enum DispatcherEvent {
    SetTool(Tool),
    SetDisplayMode(DisplayMode),
    Pointer(PointerEvent),
    Context(ContextEvent),
    /// Fresh working copy of the displayed label slice
    Labeled(LabeledEvent),
    Headline(HeadlineAction),
    AdjustBrushSize(i32),
    ToggleErase,
    /// Send `Exit` to the active tool without switching
    AbortGesture,
    Save { capture: CaptureId },
    Restore(Snapshot),
}

/// What the dispatcher hands back to the session for routing.
#[derive(Debug, Clone)]
pub enum DispatcherOutput {
    Edit(EditIntent),
    SelectForeground(i32),
    SelectBackground(i32),
    ToolChanged(Tool),
    PanOnDrag(bool),
    /// Cursor position with the label under it, for actors outside the
    /// dispatcher that track hover state
    Hover { x: i32, y: i32, label: i32 },
    Snapshot {
        capture: CaptureId,
        snapshot: Snapshot,
    },
}

impl From<ToolOutput> for DispatcherOutput {
    fn from(output: ToolOutput) -> Self {
        match output {
            ToolOutput::Edit(intent) => DispatcherOutput::Edit(intent),
            ToolOutput::SelectForeground(label) => DispatcherOutput::SelectForeground(label),
            ToolOutput::SelectBackground(label) => DispatcherOutput::SelectBackground(label),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Owns the tool automata and the shared tool context.
#[derive(Debug)]
pub struct ToolDispatcher {
    tool: Tool,
    display: DisplayMode,
    pan: bool,
    ctx: ToolContext,
    brush: BrushTool,
    select: SelectTool,
    threshold: ThresholdTool,
    trim: TrimTool,
    flood: FloodTool,
    watershed: WatershedTool,
}

impl ToolDispatcher {
    pub fn new(brush_size: u32) -> Self {
        let tool = Tool::default();
        Self {
            tool,
            display: DisplayMode::default(),
            pan: !tool.disables_pan(),
            ctx: ToolContext::new(brush_size),
            brush: BrushTool::default(),
            select: SelectTool,
            threshold: ThresholdTool::default(),
            trim: TrimTool,
            flood: FloodTool,
            watershed: WatershedTool::default(),
        }
    }

    pub fn active_tool(&self) -> Tool {
        self.tool
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display
    }

    pub fn pan_on_drag(&self) -> bool {
        self.pan
    }

    pub fn brush_size(&self) -> u32 {
        self.ctx.brush_size
    }

    pub fn erase(&self) -> bool {
        self.ctx.erase
    }

    pub fn hovered_label(&self) -> i32 {
        self.ctx.label
    }

    pub fn handle(&mut self, event: DispatcherEvent) -> Vec<DispatcherOutput> {
        match event {
            DispatcherEvent::SetTool(tool) => self.set_tool(tool),
            DispatcherEvent::SetDisplayMode(mode) => self.set_display_mode(mode),
            DispatcherEvent::Pointer(pointer) => self.pointer(pointer),
            DispatcherEvent::Context(context) => self.context(context),
            DispatcherEvent::Labeled(event) => self.labeled(event),
            DispatcherEvent::Headline(action) => self.headline(action),
            DispatcherEvent::AdjustBrushSize(delta) => {
                let size = self.ctx.brush_size.saturating_add_signed(delta).max(1);
                if size != self.ctx.brush_size {
                    self.ctx.brush_size = size;
                    log::debug!("brush size {}", size);
                }
                Vec::new()
            }
            DispatcherEvent::ToggleErase => {
                self.ctx.erase = !self.ctx.erase;
                log::debug!("erase {}", self.ctx.erase);
                Vec::new()
            }
            DispatcherEvent::AbortGesture => self.forward_active(ToolEvent::Exit),
            DispatcherEvent::Save { capture } => vec![DispatcherOutput::Snapshot {
                capture,
                snapshot: Snapshot::Tool { tool: self.tool },
            }],
            DispatcherEvent::Restore(snapshot) => self.restore(snapshot),
        }
    }

    // ------------------------------------------------------------------------
    // Tool selection
    // ------------------------------------------------------------------------

    fn set_tool(&mut self, tool: Tool) -> Vec<DispatcherOutput> {
        let legal = match self.display {
            DisplayMode::Color => tool.usable_in_color(),
            DisplayMode::Grayscale => tool.usable_in_grayscale(),
        };
        if !legal {
            log::debug!(
                "tool {} not usable in {} display, ignored",
                tool.name(),
                self.display.name()
            );
            return Vec::new();
        }
        self.switch_to(tool)
    }

    fn set_display_mode(&mut self, mode: DisplayMode) -> Vec<DispatcherOutput> {
        if mode == self.display {
            return Vec::new();
        }
        self.display = mode;
        log::debug!("display {}", mode.name());
        // Leaving grayscale can strand an intensity-only tool
        if mode == DisplayMode::Color && !self.tool.usable_in_color() {
            return self.switch_to(Tool::Select);
        }
        Vec::new()
    }

    /// Unguarded switch: exit the outgoing tool, update the pan region.
    fn switch_to(&mut self, tool: Tool) -> Vec<DispatcherOutput> {
        let mut outputs = self.forward_active(ToolEvent::Exit);
        if tool != self.tool {
            self.tool = tool;
            log::debug!("tool {}", tool.name());
            outputs.push(DispatcherOutput::ToolChanged(tool));
        }
        let pan = !tool.disables_pan();
        if pan != self.pan {
            self.pan = pan;
            outputs.push(DispatcherOutput::PanOnDrag(pan));
        }
        outputs
    }

    fn restore(&mut self, snapshot: Snapshot) -> Vec<DispatcherOutput> {
        match snapshot {
            // The recorded tool wins even if the display mode since changed
            Snapshot::Tool { tool } => self.switch_to(tool),
            other => {
                log::warn!("dispatcher: foreign snapshot {:?} ignored", other);
                Vec::new()
            }
        }
    }

    // ------------------------------------------------------------------------
    // Input fan-out
    // ------------------------------------------------------------------------

    fn pointer(&mut self, pointer: PointerEvent) -> Vec<DispatcherOutput> {
        let (x, y) = pointer.position();
        let mut outputs = self.update_position(x, y);
        match pointer {
            PointerEvent::Move { .. } => {}
            PointerEvent::Down { .. } | PointerEvent::Up { .. } => {
                outputs.extend(self.forward_active(ToolEvent::Pointer(pointer)));
            }
        }
        outputs
    }

    fn context(&mut self, context: ContextEvent) -> Vec<DispatcherOutput> {
        match context {
            ContextEvent::Coordinates { x, y } => self.update_position(x, y),
            ContextEvent::Label(label) => {
                self.ctx.label = label;
                self.broadcast(ToolEvent::Context(context))
            }
            ContextEvent::Foreground(foreground) => {
                self.ctx.foreground = foreground;
                self.broadcast(ToolEvent::Context(context))
            }
            ContextEvent::Background(background) => {
                self.ctx.background = background;
                self.broadcast(ToolEvent::Context(context))
            }
            ContextEvent::Selected(selected) => {
                self.ctx.selected = selected;
                self.broadcast(ToolEvent::Context(context))
            }
        }
    }

    fn labeled(&mut self, event: LabeledEvent) -> Vec<DispatcherOutput> {
        self.ctx.labeled = Some(event.labeled);
        // The label under a stationary cursor can change with the array
        self.refresh_hover()
    }

    /// Move the shared cursor, rederive the hovered label, fan both out.
    fn update_position(&mut self, x: i32, y: i32) -> Vec<DispatcherOutput> {
        self.ctx.x = x;
        self.ctx.y = y;
        let mut outputs = self.broadcast(ToolEvent::Context(ContextEvent::Coordinates { x, y }));
        outputs.extend(self.refresh_hover());
        outputs
    }

    fn refresh_hover(&mut self) -> Vec<DispatcherOutput> {
        let label = self.ctx.label_at(self.ctx.x, self.ctx.y);
        let mut outputs = Vec::new();
        if label != self.ctx.label {
            self.ctx.label = label;
            outputs.extend(self.broadcast(ToolEvent::Context(ContextEvent::Label(label))));
        }
        outputs.push(DispatcherOutput::Hover {
            x: self.ctx.x,
            y: self.ctx.y,
            label,
        });
        outputs
    }

    fn forward_active(&mut self, event: ToolEvent) -> Vec<DispatcherOutput> {
        self.deliver(self.tool, event).map(Into::into).into_iter().collect()
    }

    fn broadcast(&mut self, event: ToolEvent) -> Vec<DispatcherOutput> {
        Tool::ALL
            .into_iter()
            .filter_map(|tool| self.deliver(tool, event))
            .map(Into::into)
            .collect()
    }

    fn deliver(&mut self, tool: Tool, event: ToolEvent) -> Option<ToolOutput> {
        match tool {
            Tool::Brush => self.brush.handle(event, &self.ctx),
            Tool::Select => self.select.handle(event, &self.ctx),
            Tool::Threshold => self.threshold.handle(event, &self.ctx),
            Tool::Trim => self.trim.handle(event, &self.ctx),
            Tool::Flood => self.flood.handle(event, &self.ctx),
            Tool::Watershed => self.watershed.handle(event, &self.ctx),
        }
    }

    // ------------------------------------------------------------------------
    // Headline actions
    // ------------------------------------------------------------------------

    fn headline(&mut self, action: HeadlineAction) -> Vec<DispatcherOutput> {
        let intent = match action {
            HeadlineAction::Swap => EditIntent::SwapSingleFrame {
                label_1: self.ctx.foreground,
                label_2: self.ctx.background,
            },
            HeadlineAction::Replace => EditIntent::ReplaceSingle {
                label_1: self.ctx.foreground,
                label_2: self.ctx.background,
            },
            HeadlineAction::Delete => EditIntent::ReplaceSingle {
                label_1: 0,
                label_2: self.ctx.selected,
            },
            HeadlineAction::Erode => EditIntent::Erode {
                label: self.ctx.selected,
            },
            HeadlineAction::Dilate => EditIntent::Dilate {
                label: self.ctx.selected,
            },
            HeadlineAction::Autofit => {
                if self.display != DisplayMode::Grayscale {
                    log::debug!("autofit needs grayscale display, ignored");
                    return Vec::new();
                }
                EditIntent::ActiveContour {
                    label: self.ctx.selected,
                }
            }
        };
        vec![DispatcherOutput::Edit(intent)]
    }
}

// ============================================================================
// Tests
// ============================================================================
