//! Root orchestrator for one editing session.
//!
//! The session owns every actor, the buses between them, and the FIFO queue
//! they communicate through. Public calls enqueue a message and pump the
//! queue until it drains; each pumped message is handled by exactly one actor
//! and whatever it produces joins the back of the queue. Within one actor
//! messages arrive in sending order; across actors there is no total order,
//! which is why edits run through the history capture barrier.
//!
//! The session also owns the backend worker handle. Outcomes never interrupt
//! the pump; the host collects them with `poll` from its own loop, or blocks
//! on `wait_idle` in batch flows and tests.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use crate::bundle;
use crate::bus::{ActorId, EventBus};
use crate::config::SessionConfig;
use crate::dispatcher::{DispatcherEvent, DispatcherOutput, HeadlineAction, ToolDispatcher};
use crate::error::SessionError;
use crate::gateway::{EditGateway, GatewayEvent, GatewayOutput};
use crate::history::{CaptureId, HistoryEvent, HistoryOutput, Snapshot, UndoRedoManager};
use crate::http::{Backend, HttpBackend, Job, JobOutcome, Worker};
use crate::keybindings::{KeyBindings, KeyChord};
use crate::message::{
    ContextEvent, DisplayMode, LabeledEvent, LabelsEvent, PointerEvent, RawEvent, SessionCommand,
    SessionEvent, Tool, WriteMode,
};
use crate::project::{Dimensions, Lineage};
use crate::tools::{ToolOutput, TrackEvent, TrackTool};
use crate::volume::{VolumeEvent, VolumeOutput, VolumeStore};

// ============================================================================
// Selection
// ============================================================================

/// Input accepted by the selection actor.
#[derive(Debug, Clone)]
enum SelectionEvent {
    /// Click-style selection; selecting the current background swaps the pair
    SelectForeground(i32),
    /// Click-style selection; selecting the current foreground swaps the pair
    SelectBackground(i32),
    /// Direct assignment without the swap rule
    SetForeground(i32),
    ResetForeground,
    /// Select one past the highest label in the current feature
    NewLabel,
    SetFeature(usize),
    /// Label inventory update from the volume store
    Labels(LabelsEvent),
    Save { capture: CaptureId },
    Restore(Snapshot),
}

/// Selection changes, broadcast onward as tool context.
#[derive(Debug, Clone)]
enum SelectionOutput {
    Foreground(i32),
    Background(i32),
    Selected(i32),
    Snapshot {
        capture: CaptureId,
        snapshot: Snapshot,
    },
}

/// Session-owned foreground/background selection.
///
/// `selected` is the label the headline actions apply to: the foreground when
/// one is set, otherwise the background.
#[derive(Debug, Default)]
struct Selection {
    foreground: i32,
    background: i32,
    selected: i32,
    feature: usize,
    max_labels: BTreeMap<usize, i32>,
}

impl Selection {
    fn handle(&mut self, event: SelectionEvent) -> Vec<SelectionOutput> {
        match event {
            SelectionEvent::SelectForeground(label) => {
                let background = if label == self.background {
                    self.foreground
                } else {
                    self.background
                };
                self.apply(label, background)
            }
            SelectionEvent::SelectBackground(label) => {
                let foreground = if label == self.foreground {
                    self.background
                } else {
                    self.foreground
                };
                self.apply(foreground, label)
            }
            SelectionEvent::SetForeground(label) => self.apply(label, self.background),
            SelectionEvent::ResetForeground => self.apply(0, self.background),
            SelectionEvent::NewLabel => {
                let next = self.max_labels.get(&self.feature).copied().unwrap_or(0) + 1;
                log::debug!("selection: new label {}", next);
                self.apply(next, self.background)
            }
            SelectionEvent::SetFeature(feature) => {
                self.feature = feature;
                Vec::new()
            }
            SelectionEvent::Labels(event) => {
                self.max_labels.insert(event.feature, event.max_label);
                Vec::new()
            }
            SelectionEvent::Save { capture } => vec![SelectionOutput::Snapshot {
                capture,
                snapshot: Snapshot::Selection {
                    foreground: self.foreground,
                    background: self.background,
                    selected: self.selected,
                },
            }],
            SelectionEvent::Restore(snapshot) => self.restore(snapshot),
        }
    }

    /// Set the pair, rederive `selected`, broadcast what changed.
    fn apply(&mut self, foreground: i32, background: i32) -> Vec<SelectionOutput> {
        let mut outputs = Vec::new();
        if foreground != self.foreground {
            self.foreground = foreground;
            log::debug!("selection: foreground {}", foreground);
            outputs.push(SelectionOutput::Foreground(foreground));
        }
        if background != self.background {
            self.background = background;
            outputs.push(SelectionOutput::Background(background));
        }
        let selected = if self.foreground != 0 {
            self.foreground
        } else {
            self.background
        };
        if selected != self.selected {
            self.selected = selected;
            outputs.push(SelectionOutput::Selected(selected));
        }
        outputs
    }

    fn restore(&mut self, snapshot: Snapshot) -> Vec<SelectionOutput> {
        let Snapshot::Selection {
            foreground,
            background,
            selected,
        } = snapshot
        else {
            log::warn!("selection: foreign snapshot ignored");
            return Vec::new();
        };
        self.foreground = foreground;
        self.background = background;
        self.selected = selected;
        // Rebroadcast everything so tool context cannot drift after a restore
        vec![
            SelectionOutput::Foreground(foreground),
            SelectionOutput::Background(background),
            SelectionOutput::Selected(selected),
        ]
    }
}

// ============================================================================
// View
// ============================================================================

/// Input accepted by the view actor.
#[derive(Debug, Clone)]
enum ViewEvent {
    Loaded(Dimensions),
    SetFrame(usize),
    SetFeature(usize),
    SetChannel(usize),
    Save { capture: CaptureId },
    Restore(Snapshot),
}

/// Position changes, forwarded to the volume store.
#[derive(Debug, Clone)]
enum ViewOutput {
    Frame(usize),
    Feature(usize),
    Channel(usize),
    Snapshot {
        capture: CaptureId,
        snapshot: Snapshot,
    },
}

/// Session-owned display position, clamped to the project dimensions.
#[derive(Debug, Default)]
struct View {
    frame: usize,
    feature: usize,
    channel: usize,
    dimensions: Option<Dimensions>,
}

impl View {
    fn handle(&mut self, event: ViewEvent) -> Vec<ViewOutput> {
        match event {
            ViewEvent::Loaded(dimensions) => {
                self.dimensions = Some(dimensions);
                self.frame = 0;
                self.feature = 0;
                self.channel = 0;
                Vec::new()
            }
            ViewEvent::SetFrame(frame) => self.move_to(Some(frame), None, None),
            ViewEvent::SetFeature(feature) => self.move_to(None, Some(feature), None),
            ViewEvent::SetChannel(channel) => self.move_to(None, None, Some(channel)),
            ViewEvent::Save { capture } => vec![ViewOutput::Snapshot {
                capture,
                snapshot: Snapshot::View {
                    frame: self.frame,
                    feature: self.feature,
                    channel: self.channel,
                },
            }],
            ViewEvent::Restore(snapshot) => self.restore(snapshot),
        }
    }

    fn move_to(
        &mut self,
        frame: Option<usize>,
        feature: Option<usize>,
        channel: Option<usize>,
    ) -> Vec<ViewOutput> {
        let Some(dims) = self.dimensions.as_ref() else {
            log::debug!("view: position change before load, ignored");
            return Vec::new();
        };
        let mut outputs = Vec::new();
        if let Some(requested) = frame {
            let frame = requested.min(dims.num_frames.saturating_sub(1));
            if frame != requested {
                log::debug!("view: frame {} clamped to {}", requested, frame);
            }
            if frame != self.frame {
                self.frame = frame;
                outputs.push(ViewOutput::Frame(frame));
            }
        }
        if let Some(requested) = feature {
            let feature = requested.min(dims.num_features.saturating_sub(1));
            if feature != requested {
                log::debug!("view: feature {} clamped to {}", requested, feature);
            }
            if feature != self.feature {
                self.feature = feature;
                outputs.push(ViewOutput::Feature(feature));
            }
        }
        if let Some(requested) = channel {
            let channel = requested.min(dims.num_channels.saturating_sub(1));
            if channel != requested {
                log::debug!("view: channel {} clamped to {}", requested, channel);
            }
            if channel != self.channel {
                self.channel = channel;
                outputs.push(ViewOutput::Channel(channel));
            }
        }
        outputs
    }

    fn restore(&mut self, snapshot: Snapshot) -> Vec<ViewOutput> {
        let Snapshot::View {
            frame,
            feature,
            channel,
        } = snapshot
        else {
            log::warn!("view: foreign snapshot ignored");
            return Vec::new();
        };
        let mut outputs = Vec::new();
        if frame != self.frame {
            self.frame = frame;
            outputs.push(ViewOutput::Frame(frame));
        }
        if feature != self.feature {
            self.feature = feature;
            outputs.push(ViewOutput::Feature(feature));
        }
        if channel != self.channel {
            self.channel = channel;
            outputs.push(ViewOutput::Channel(channel));
        }
        outputs
    }
}

// ============================================================================
// Session
// ============================================================================

/// One message in the session queue, addressed by actor.
#[derive(Debug)]
enum Msg {
    Dispatcher(DispatcherEvent),
    Track(TrackEvent),
    Selection(SelectionEvent),
    View(ViewEvent),
    Volume(VolumeEvent),
    Gateway(GatewayEvent),
    History(HistoryEvent),
}

/// An editing session over one project.
pub struct Session {
    config: SessionConfig,
    bindings: KeyBindings,
    queue: VecDeque<Msg>,
    events: Vec<SessionEvent>,
    dispatcher: ToolDispatcher,
    track: TrackTool,
    selection: Selection,
    view: View,
    volume: VolumeStore,
    gateway: EditGateway,
    history: UndoRedoManager,
    labeled_bus: EventBus<LabeledEvent>,
    raw_bus: EventBus<RawEvent>,
    labels_bus: EventBus<LabelsEvent>,
    edited_bus: EventBus<LabeledEvent>,
    worker: Worker,
    jobs_in_flight: usize,
}

impl Session {
    /// Create a session talking HTTP to the backend from the configuration.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let backend = HttpBackend::new(config.base_url.clone(), timeout);
        Self::with_backend(config, backend)
    }

    /// Create a session over any backend implementation.
    pub fn with_backend(
        config: SessionConfig,
        backend: impl Backend + 'static,
    ) -> Result<Self, SessionError> {
        let worker = Worker::spawn(backend)?;

        let mut history = UndoRedoManager::new();
        // Restores go out in actor id order, which puts the view back on the
        // edited slice before the gateway republishes it
        history.register(ActorId::View);
        history.register(ActorId::Selection);
        history.register(ActorId::Dispatcher);
        history.register(ActorId::Gateway);

        let mut labeled_bus = EventBus::new("labeled");
        labeled_bus.subscribe(ActorId::Gateway);
        labeled_bus.subscribe(ActorId::Dispatcher);
        let mut raw_bus = EventBus::new("raw");
        raw_bus.subscribe(ActorId::Gateway);
        let mut labels_bus = EventBus::new("labels");
        labels_bus.subscribe(ActorId::Selection);
        let mut edited_bus = EventBus::new("edited");
        edited_bus.subscribe(ActorId::Volume);

        let mut session = Self {
            bindings: KeyBindings::default(),
            queue: VecDeque::new(),
            events: Vec::new(),
            dispatcher: ToolDispatcher::new(config.brush_size),
            track: TrackTool::default(),
            selection: Selection::default(),
            view: View::default(),
            volume: VolumeStore::new(),
            gateway: EditGateway::new(
                config.write_mode,
                config.project_id.clone(),
                config.bucket.clone(),
            ),
            history,
            labeled_bus,
            raw_bus,
            labels_bus,
            edited_bus,
            worker,
            jobs_in_flight: 0,
            config,
        };
        // Label 1 starts selected so the brush has something to paint
        session.enqueue(Msg::Selection(SelectionEvent::SetForeground(1)));
        session.pump();
        Ok(session)
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    pub fn pointer_down(&mut self, x: i32, y: i32) {
        self.pointer(PointerEvent::Down { x, y });
    }

    pub fn pointer_move(&mut self, x: i32, y: i32) {
        self.pointer(PointerEvent::Move { x, y });
    }

    pub fn pointer_up(&mut self, x: i32, y: i32) {
        self.pointer(PointerEvent::Up { x, y });
    }

    fn pointer(&mut self, pointer: PointerEvent) {
        // An armed track tool owns clicks; moves keep flowing through the
        // dispatcher so the hovered label stays current for everyone
        let msg = match pointer {
            PointerEvent::Down { .. } | PointerEvent::Up { .. } if self.track.is_armed() => {
                Msg::Track(TrackEvent::Pointer(pointer))
            }
            _ => Msg::Dispatcher(DispatcherEvent::Pointer(pointer)),
        };
        self.enqueue(msg);
        self.pump();
    }

    /// Feed one key chord through the keybindings. Returns whether the chord
    /// was bound to anything.
    pub fn key(&mut self, chord: KeyChord) -> bool {
        match self.bindings.command_for(chord) {
            Some(command) => {
                self.command(command);
                true
            }
            None => false,
        }
    }

    /// Run one user-level command.
    pub fn command(&mut self, command: SessionCommand) {
        log::debug!("session: command {}", command.name());
        match command {
            SessionCommand::SetTool(tool) => {
                self.enqueue(Msg::Dispatcher(DispatcherEvent::SetTool(tool)));
            }
            SessionCommand::Swap => {
                self.enqueue(Msg::Dispatcher(DispatcherEvent::Headline(HeadlineAction::Swap)));
            }
            SessionCommand::Replace => {
                self.enqueue(Msg::Dispatcher(DispatcherEvent::Headline(HeadlineAction::Replace)));
            }
            SessionCommand::Delete => {
                self.enqueue(Msg::Dispatcher(DispatcherEvent::Headline(HeadlineAction::Delete)));
            }
            SessionCommand::Erode => {
                self.enqueue(Msg::Dispatcher(DispatcherEvent::Headline(HeadlineAction::Erode)));
            }
            SessionCommand::Dilate => {
                self.enqueue(Msg::Dispatcher(DispatcherEvent::Headline(HeadlineAction::Dilate)));
            }
            SessionCommand::Autofit => {
                self.enqueue(Msg::Dispatcher(DispatcherEvent::Headline(HeadlineAction::Autofit)));
            }
            SessionCommand::Undo => self.enqueue(Msg::History(HistoryEvent::Undo)),
            SessionCommand::Redo => self.enqueue(Msg::History(HistoryEvent::Redo)),
            SessionCommand::BrushSizeUp => {
                self.enqueue(Msg::Dispatcher(DispatcherEvent::AdjustBrushSize(1)));
            }
            SessionCommand::BrushSizeDown => {
                self.enqueue(Msg::Dispatcher(DispatcherEvent::AdjustBrushSize(-1)));
            }
            SessionCommand::ToggleErase => {
                self.enqueue(Msg::Dispatcher(DispatcherEvent::ToggleErase));
            }
            SessionCommand::NewLabel => self.enqueue(Msg::Selection(SelectionEvent::NewLabel)),
            SessionCommand::Reset => {
                self.enqueue(Msg::Track(TrackEvent::Reset));
                self.enqueue(Msg::Selection(SelectionEvent::ResetForeground));
                self.enqueue(Msg::Dispatcher(DispatcherEvent::AbortGesture));
            }
        }
        self.pump();
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.enqueue(Msg::Dispatcher(DispatcherEvent::SetTool(tool)));
        self.pump();
    }

    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        self.enqueue(Msg::Dispatcher(DispatcherEvent::SetDisplayMode(mode)));
        self.pump();
    }

    pub fn set_frame(&mut self, frame: usize) {
        self.enqueue(Msg::View(ViewEvent::SetFrame(frame)));
        self.pump();
    }

    pub fn set_feature(&mut self, feature: usize) {
        self.enqueue(Msg::View(ViewEvent::SetFeature(feature)));
        self.pump();
    }

    pub fn set_channel(&mut self, channel: usize) {
        self.enqueue(Msg::View(ViewEvent::SetChannel(channel)));
        self.pump();
    }

    pub fn set_write_mode(&mut self, mode: WriteMode) {
        self.enqueue(Msg::Gateway(GatewayEvent::SetWriteMode(mode)));
        self.pump();
    }

    pub fn select_foreground(&mut self, label: i32) {
        self.enqueue(Msg::Selection(SelectionEvent::SelectForeground(label)));
        self.pump();
    }

    pub fn select_background(&mut self, label: i32) {
        self.enqueue(Msg::Selection(SelectionEvent::SelectBackground(label)));
        self.pump();
    }

    pub fn adjust_brush_size(&mut self, delta: i32) {
        self.enqueue(Msg::Dispatcher(DispatcherEvent::AdjustBrushSize(delta)));
        self.pump();
    }

    pub fn undo(&mut self) {
        self.enqueue(Msg::History(HistoryEvent::Undo));
        self.pump();
    }

    pub fn redo(&mut self) {
        self.enqueue(Msg::History(HistoryEvent::Redo));
        self.pump();
    }

    /// Package the full label volume and send it to the output bucket.
    pub fn upload(&mut self) {
        self.enqueue(Msg::Gateway(GatewayEvent::Upload));
        self.pump();
    }

    /// Package the full label volume for the host to persist; the repackaged
    /// bundle arrives as `SessionEvent::Downloaded`.
    pub fn download(&mut self) {
        self.enqueue(Msg::Gateway(GatewayEvent::Download));
        self.pump();
    }

    // ------------------------------------------------------------------------
    // Lineage commands
    // ------------------------------------------------------------------------

    /// Arm the track tool: the next click on a nonzero label records that
    /// label as a daughter of `parent`.
    pub fn add_daughter(&mut self, parent: i32) {
        self.enqueue(Msg::Track(TrackEvent::AddDaughter { parent }));
        self.pump();
    }

    pub fn remove_daughter(&mut self, daughter: i32) {
        self.enqueue(Msg::Track(TrackEvent::RemoveDaughter { daughter }));
        self.pump();
    }

    pub fn replace_with_new_cell(&mut self, daughter: i32) {
        self.enqueue(Msg::Track(TrackEvent::ReplaceWithNewCell { daughter }));
        self.pump();
    }

    pub fn replace_with_parent(&mut self, parent: i32, daughter: i32) {
        self.enqueue(Msg::Track(TrackEvent::ReplaceWithParent { parent, daughter }));
        self.pump();
    }

    // ------------------------------------------------------------------------
    // Backend integration
    // ------------------------------------------------------------------------

    /// Ask the worker for the project bundle. The parsed project fans out to
    /// the actors once the outcome arrives through `poll` or `wait_idle`.
    pub fn load_project(&mut self) {
        log::info!("session: loading project {}", self.config.project_id);
        self.worker.submit(Job::LoadProject {
            project_id: self.config.project_id.clone(),
        });
        self.jobs_in_flight += 1;
    }

    /// Collect finished backend outcomes without blocking. Returns whether
    /// any arrived.
    pub fn poll(&mut self) -> bool {
        let mut any = false;
        while let Some(outcome) = self.worker.try_take_outcome() {
            self.jobs_in_flight = self.jobs_in_flight.saturating_sub(1);
            self.on_outcome(outcome);
            any = true;
        }
        self.pump();
        any
    }

    /// Block until every submitted job has resolved or the timeout passes.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.pump();
        while self.jobs_in_flight > 0 {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                log::warn!(
                    "session: {} jobs still in flight after {:?}",
                    self.jobs_in_flight,
                    timeout
                );
                return false;
            };
            let Some(outcome) = self.worker.wait_outcome(remaining) else {
                log::warn!("session: no outcome from the worker within {:?}", timeout);
                return false;
            };
            self.jobs_in_flight = self.jobs_in_flight.saturating_sub(1);
            self.on_outcome(outcome);
            self.pump();
        }
        true
    }

    fn on_outcome(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::LoadProject(Ok(bytes)) => match bundle::read_project_bundle(&bytes) {
                Ok(project) => {
                    log::info!("session: project bundle parsed ({} bytes)", bytes.len());
                    // The gateway and view need the metadata before the
                    // volume starts publishing slices
                    self.enqueue(Msg::Gateway(GatewayEvent::Loaded {
                        dimensions: project.dimensions,
                        lineage: project.lineage.clone(),
                    }));
                    self.enqueue(Msg::View(ViewEvent::Loaded(project.dimensions)));
                    self.enqueue(Msg::Volume(VolumeEvent::Loaded(project)));
                }
                Err(err) => {
                    self.emit(SessionEvent::Error(format!("project bundle rejected: {err}")));
                }
            },
            JobOutcome::LoadProject(Err(err)) => {
                self.emit(SessionEvent::Error(format!("project load failed: {err}")));
            }
            outcome => self.enqueue(Msg::Gateway(GatewayEvent::JobDone(outcome))),
        }
    }

    // ------------------------------------------------------------------------
    // Host surface
    // ------------------------------------------------------------------------

    /// Drain the events surfaced since the last call.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn active_tool(&self) -> Tool {
        self.dispatcher.active_tool()
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.dispatcher.display_mode()
    }

    pub fn pan_on_drag(&self) -> bool {
        self.dispatcher.pan_on_drag()
    }

    pub fn brush_size(&self) -> u32 {
        self.dispatcher.brush_size()
    }

    pub fn erase(&self) -> bool {
        self.dispatcher.erase()
    }

    pub fn hovered_label(&self) -> i32 {
        self.dispatcher.hovered_label()
    }

    pub fn foreground(&self) -> i32 {
        self.selection.foreground
    }

    pub fn background(&self) -> i32 {
        self.selection.background
    }

    pub fn selected(&self) -> i32 {
        self.selection.selected
    }

    pub fn frame(&self) -> usize {
        self.view.frame
    }

    pub fn feature(&self) -> usize {
        self.view.feature
    }

    pub fn channel(&self) -> usize {
        self.view.channel
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn write_mode(&self) -> WriteMode {
        self.gateway.write_mode()
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        self.volume.dimensions().copied()
    }

    /// Label inventory for one feature.
    pub fn labels(&self, feature: usize) -> Option<LabelsEvent> {
        self.volume.labels(feature)
    }

    pub fn lineage(&self) -> Option<&Lineage> {
        self.gateway.lineage()
    }

    /// The displayed label slice, as last published.
    pub fn labeled(&self) -> Option<&LabeledEvent> {
        self.labeled_bus.last()
    }

    /// The displayed raw slice, as last published.
    pub fn raw(&self) -> Option<&RawEvent> {
        self.raw_bus.last()
    }

    pub fn jobs_in_flight(&self) -> usize {
        self.jobs_in_flight
    }

    pub fn bindings(&self) -> &KeyBindings {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut KeyBindings {
        &mut self.bindings
    }

    // ------------------------------------------------------------------------
    // Message pump
    // ------------------------------------------------------------------------

    fn enqueue(&mut self, msg: Msg) {
        self.queue.push_back(msg);
    }

    fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    fn pump(&mut self) {
        while let Some(msg) = self.queue.pop_front() {
            match msg {
                Msg::Dispatcher(event) => {
                    let outputs = self.dispatcher.handle(event);
                    self.route_dispatcher(outputs);
                }
                Msg::Track(event) => {
                    let output = self.track.handle(event);
                    self.route_track(output);
                }
                Msg::Selection(event) => {
                    let outputs = self.selection.handle(event);
                    self.route_selection(outputs);
                }
                Msg::View(event) => {
                    let outputs = self.view.handle(event);
                    self.route_view(outputs);
                }
                Msg::Volume(event) => {
                    let outputs = self.volume.handle(event);
                    self.route_volume(outputs);
                }
                Msg::Gateway(event) => {
                    let outputs = self.gateway.handle(event);
                    self.route_gateway(outputs);
                }
                Msg::History(event) => {
                    let outputs = self.history.handle(event);
                    self.route_history(outputs);
                }
            }
        }
    }

    fn route_dispatcher(&mut self, outputs: Vec<DispatcherOutput>) {
        for output in outputs {
            match output {
                DispatcherOutput::Edit(intent) => {
                    self.enqueue(Msg::History(HistoryEvent::Record(intent)));
                }
                DispatcherOutput::SelectForeground(label) => {
                    self.enqueue(Msg::Selection(SelectionEvent::SelectForeground(label)));
                }
                DispatcherOutput::SelectBackground(label) => {
                    self.enqueue(Msg::Selection(SelectionEvent::SelectBackground(label)));
                }
                DispatcherOutput::ToolChanged(tool) => self.emit(SessionEvent::ToolChanged(tool)),
                DispatcherOutput::PanOnDrag(pan) => self.emit(SessionEvent::PanOnDrag(pan)),
                DispatcherOutput::Hover { label, .. } => {
                    self.enqueue(Msg::Track(TrackEvent::Context(ContextEvent::Label(label))));
                }
                DispatcherOutput::Snapshot { capture, snapshot } => {
                    self.enqueue(Msg::History(HistoryEvent::SnapshotReply {
                        capture,
                        actor: ActorId::Dispatcher,
                        snapshot,
                    }));
                }
            }
        }
    }

    fn route_track(&mut self, output: Option<ToolOutput>) {
        match output {
            Some(ToolOutput::Edit(intent)) => {
                self.enqueue(Msg::History(HistoryEvent::Record(intent)));
            }
            Some(ToolOutput::SelectForeground(label)) => {
                self.enqueue(Msg::Selection(SelectionEvent::SelectForeground(label)));
            }
            Some(ToolOutput::SelectBackground(label)) => {
                self.enqueue(Msg::Selection(SelectionEvent::SelectBackground(label)));
            }
            None => {}
        }
    }

    fn route_selection(&mut self, outputs: Vec<SelectionOutput>) {
        for output in outputs {
            match output {
                SelectionOutput::Foreground(label) => {
                    self.enqueue(Msg::Dispatcher(DispatcherEvent::Context(
                        ContextEvent::Foreground(label),
                    )));
                }
                SelectionOutput::Background(label) => {
                    self.enqueue(Msg::Dispatcher(DispatcherEvent::Context(
                        ContextEvent::Background(label),
                    )));
                }
                SelectionOutput::Selected(label) => {
                    self.enqueue(Msg::Dispatcher(DispatcherEvent::Context(
                        ContextEvent::Selected(label),
                    )));
                }
                SelectionOutput::Snapshot { capture, snapshot } => {
                    self.enqueue(Msg::History(HistoryEvent::SnapshotReply {
                        capture,
                        actor: ActorId::Selection,
                        snapshot,
                    }));
                }
            }
        }
    }

    fn route_view(&mut self, outputs: Vec<ViewOutput>) {
        for output in outputs {
            match output {
                ViewOutput::Frame(frame) => {
                    self.enqueue(Msg::Volume(VolumeEvent::SetFrame(frame)));
                }
                ViewOutput::Feature(feature) => {
                    self.enqueue(Msg::Volume(VolumeEvent::SetFeature(feature)));
                    // Selection numbers new labels within the current feature
                    self.enqueue(Msg::Selection(SelectionEvent::SetFeature(feature)));
                }
                ViewOutput::Channel(channel) => {
                    self.enqueue(Msg::Volume(VolumeEvent::SetChannel(channel)));
                }
                ViewOutput::Snapshot { capture, snapshot } => {
                    self.enqueue(Msg::History(HistoryEvent::SnapshotReply {
                        capture,
                        actor: ActorId::View,
                        snapshot,
                    }));
                }
            }
        }
    }

    fn route_volume(&mut self, outputs: Vec<VolumeOutput>) {
        for output in outputs {
            match output {
                VolumeOutput::Labeled(event) => {
                    for (actor, event) in self.labeled_bus.publish(event) {
                        match actor {
                            ActorId::Gateway => {
                                self.enqueue(Msg::Gateway(GatewayEvent::Labeled(event)));
                            }
                            ActorId::Dispatcher => {
                                self.enqueue(Msg::Dispatcher(DispatcherEvent::Labeled(event)));
                            }
                            other => log::warn!("session: no labeled route to {}", other.name()),
                        }
                    }
                }
                VolumeOutput::Raw(event) => {
                    for (actor, event) in self.raw_bus.publish(event) {
                        match actor {
                            ActorId::Gateway => {
                                self.enqueue(Msg::Gateway(GatewayEvent::Raw(event)));
                            }
                            other => log::warn!("session: no raw route to {}", other.name()),
                        }
                    }
                }
                VolumeOutput::Labels(event) => {
                    for (actor, event) in self.labels_bus.publish(event) {
                        match actor {
                            ActorId::Selection => {
                                self.enqueue(Msg::Selection(SelectionEvent::Labels(event)));
                            }
                            other => log::warn!("session: no labels route to {}", other.name()),
                        }
                    }
                }
                VolumeOutput::Arrays { raw, labeled } => {
                    self.enqueue(Msg::Gateway(GatewayEvent::Arrays { raw, labeled }));
                }
            }
        }
    }

    fn route_gateway(&mut self, outputs: Vec<GatewayOutput>) {
        for output in outputs {
            match output {
                GatewayOutput::SubmitJob(job) => {
                    self.worker.submit(job);
                    self.jobs_in_flight += 1;
                }
                GatewayOutput::Edited(event) => {
                    self.emit(SessionEvent::Edited {
                        frame: event.frame,
                        feature: event.feature,
                    });
                    for (actor, event) in self.edited_bus.publish(event) {
                        match actor {
                            ActorId::Volume => {
                                self.enqueue(Msg::Volume(VolumeEvent::Edited(event)));
                            }
                            other => log::warn!("session: no edited route to {}", other.name()),
                        }
                    }
                }
                GatewayOutput::GetArrays => self.enqueue(Msg::Volume(VolumeEvent::GetArrays)),
                GatewayOutput::Snapshot { capture, snapshot } => {
                    self.enqueue(Msg::History(HistoryEvent::SnapshotReply {
                        capture,
                        actor: ActorId::Gateway,
                        snapshot,
                    }));
                }
                GatewayOutput::EditCompleted { capture } => {
                    self.enqueue(Msg::History(HistoryEvent::EditCompleted { capture }));
                }
                GatewayOutput::EditFailed { capture } => {
                    self.enqueue(Msg::History(HistoryEvent::EditFailed { capture }));
                }
                GatewayOutput::Uploaded => self.emit(SessionEvent::Uploaded),
                GatewayOutput::Downloaded(bytes) => self.emit(SessionEvent::Downloaded(bytes)),
                GatewayOutput::Error(message) => {
                    log::error!("session: {}", message);
                    self.emit(SessionEvent::Error(message));
                }
            }
        }
    }

    fn route_history(&mut self, outputs: Vec<HistoryOutput>) {
        for output in outputs {
            match output {
                HistoryOutput::Save { actor, capture } => match actor {
                    ActorId::View => self.enqueue(Msg::View(ViewEvent::Save { capture })),
                    ActorId::Selection => {
                        self.enqueue(Msg::Selection(SelectionEvent::Save { capture }));
                    }
                    ActorId::Dispatcher => {
                        self.enqueue(Msg::Dispatcher(DispatcherEvent::Save { capture }));
                    }
                    ActorId::Gateway => self.enqueue(Msg::Gateway(GatewayEvent::Save { capture })),
                    other => {
                        log::warn!("session: {} cannot answer snapshot requests", other.name());
                    }
                },
                HistoryOutput::Release { capture, intent } => {
                    self.enqueue(Msg::Gateway(GatewayEvent::Edit {
                        capture: Some(capture),
                        intent,
                    }));
                }
                HistoryOutput::Restore { actor, snapshot } => match actor {
                    ActorId::View => self.enqueue(Msg::View(ViewEvent::Restore(snapshot))),
                    ActorId::Selection => {
                        self.enqueue(Msg::Selection(SelectionEvent::Restore(snapshot)));
                    }
                    ActorId::Dispatcher => {
                        self.enqueue(Msg::Dispatcher(DispatcherEvent::Restore(snapshot)));
                    }
                    ActorId::Gateway => self.enqueue(Msg::Gateway(GatewayEvent::Restore(snapshot))),
                    other => log::warn!("session: no restore route to {}", other.name()),
                },
                HistoryOutput::Affordances { can_undo, can_redo } => {
                    self.emit(SessionEvent::HistoryChanged { can_undo, can_redo });
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
