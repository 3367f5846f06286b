//! Linear undo/redo over actor snapshots.
//!
//! The manager does not know how to undo anything itself. Before an edit is
//! allowed to reach the backend it runs a capture barrier: every registered
//! actor is asked to save its state, and only when all replies are in is the
//! edit released to the gateway. Once the gateway reports completion the same
//! barrier runs again for the after-state, and the pair becomes one history
//! entry. Undo and redo hand each actor its own snapshot back; the manager
//! stores snapshots opaquely and only ever routes them by actor.

use std::collections::BTreeMap;

use ndarray::ArcArray2;

use crate::bus::ActorId;
use crate::message::{EditIntent, Tool};
use crate::project::{Lineage, Overlaps};

/// Correlates snapshot replies with the capture that requested them.
pub type CaptureId = u64;

/// Saved state of one actor at one point in time.
///
/// Each actor constructs and consumes only its own variant; the manager never
/// looks inside.
#[derive(Debug, Clone)]
pub enum Snapshot {
    /// Dispatcher: the active tool
    Tool { tool: Tool },
    /// Gateway: the label slice with its overlap table and division records,
    /// always co-versioned
    Labels {
        frame: usize,
        feature: usize,
        labeled: ArcArray2<i32>,
        overlaps: Overlaps,
        lineage: Option<Lineage>,
    },
    /// Selection: foreground/background pair and the derived selected label
    Selection {
        foreground: i32,
        background: i32,
        selected: i32,
    },
    /// View: which slice of the volume is on display
    View {
        frame: usize,
        feature: usize,
        channel: usize,
    },
}

type SnapshotSet = BTreeMap<ActorId, Snapshot>;

/// One undoable step: the edit plus full before/after snapshots.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub intent: EditIntent,
    pub before: SnapshotSet,
    pub after: SnapshotSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CapturePhase {
    /// Collecting before-snapshots; the edit has not left the manager yet
    Before,
    /// Edit released to the gateway, waiting for it to finish
    AwaitingEdit,
    /// Collecting after-snapshots
    After,
}

#[derive(Debug)]
struct PendingCapture {
    capture: CaptureId,
    intent: EditIntent,
    phase: CapturePhase,
    before: SnapshotSet,
    after: SnapshotSet,
}

/// Input accepted by the manager.
#[derive(Debug, Clone)]
pub enum HistoryEvent {
    /// An edit intent wants to run; start the before-capture barrier
    Record(EditIntent),
    /// One actor's answer to a save request
    SnapshotReply {
        capture: CaptureId,
        actor: ActorId,
        snapshot: Snapshot,
    },
    /// The released edit committed; start the after-capture barrier
    EditCompleted { capture: CaptureId },
    /// The released edit failed or was refused; forget the capture
    EditFailed { capture: CaptureId },
    Undo,
    Redo,
}

/// Requests the manager sends back through the session.
#[derive(Debug, Clone)]
pub enum HistoryOutput {
    /// Ask one actor to reply with its current snapshot
    Save { actor: ActorId, capture: CaptureId },
    /// All before-snapshots collected; the gateway may run the edit now
    Release { capture: CaptureId, intent: EditIntent },
    /// Hand an actor its snapshot back during undo/redo
    Restore { actor: ActorId, snapshot: Snapshot },
    /// Undo/redo availability changed
    Affordances { can_undo: bool, can_redo: bool },
}

/// Snapshot-based linear history.
///
/// `entries[..position]` are applied steps, `entries[position..]` undone ones.
/// Recording while undone steps exist truncates them first; there are no
/// branches.
#[derive(Debug, Default)]
pub struct UndoRedoManager {
    entries: Vec<HistoryEntry>,
    position: usize,
    actors: Vec<ActorId>,
    pending: Option<PendingCapture>,
    next_capture: CaptureId,
}

impl UndoRedoManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actor for capture barriers. Must happen before the first
    /// record; registration order fixes save/restore order.
    pub fn register(&mut self, actor: ActorId) {
        if self.actors.contains(&actor) {
            log::warn!("history: {} registered twice", actor.name());
            return;
        }
        self.actors.push(actor);
    }

    pub fn can_undo(&self) -> bool {
        self.position > 0
    }

    pub fn can_redo(&self) -> bool {
        self.position < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    #[cfg(test)]
    pub(crate) fn entry(&self, index: usize) -> &HistoryEntry {
        &self.entries[index]
    }

    pub fn handle(&mut self, event: HistoryEvent) -> Vec<HistoryOutput> {
        match event {
            HistoryEvent::Record(intent) => self.record(intent),
            HistoryEvent::SnapshotReply {
                capture,
                actor,
                snapshot,
            } => self.on_snapshot(capture, actor, snapshot),
            HistoryEvent::EditCompleted { capture } => self.on_edit_completed(capture),
            HistoryEvent::EditFailed { capture } => self.on_edit_failed(capture),
            HistoryEvent::Undo => self.undo(),
            HistoryEvent::Redo => self.redo(),
        }
    }

    fn record(&mut self, intent: EditIntent) -> Vec<HistoryOutput> {
        if let Some(stale) = self.pending.take() {
            // An actor never answered, or the edit outcome got lost. The
            // superseded edit is not undoable.
            log::warn!(
                "history: abandoning incomplete capture {} ({})",
                stale.capture,
                stale.intent.action_name()
            );
        }
        let capture = self.next_capture;
        self.next_capture += 1;
        log::debug!("history: capture {} for {}", capture, intent.action_name());
        self.pending = Some(PendingCapture {
            capture,
            intent,
            phase: CapturePhase::Before,
            before: SnapshotSet::new(),
            after: SnapshotSet::new(),
        });
        let mut outputs: Vec<HistoryOutput> = self
            .actors
            .iter()
            .map(|&actor| HistoryOutput::Save { actor, capture })
            .collect();
        // With nothing registered the barrier is trivially complete
        outputs.extend(self.try_advance());
        outputs
    }

    fn on_snapshot(
        &mut self,
        capture: CaptureId,
        actor: ActorId,
        snapshot: Snapshot,
    ) -> Vec<HistoryOutput> {
        let Some(pending) = self.pending.as_mut() else {
            log::debug!("history: snapshot from {} with no capture open", actor.name());
            return Vec::new();
        };
        if pending.capture != capture {
            log::debug!(
                "history: stale snapshot from {} for capture {} (current {})",
                actor.name(),
                capture,
                pending.capture
            );
            return Vec::new();
        }
        let set = match pending.phase {
            CapturePhase::Before => &mut pending.before,
            CapturePhase::After => &mut pending.after,
            CapturePhase::AwaitingEdit => {
                log::warn!(
                    "history: snapshot from {} while edit in flight, dropped",
                    actor.name()
                );
                return Vec::new();
            }
        };
        if set.insert(actor, snapshot).is_some() {
            log::warn!("history: duplicate snapshot from {}", actor.name());
        }
        self.try_advance()
    }

    /// Move a complete barrier to its next phase.
    fn try_advance(&mut self) -> Vec<HistoryOutput> {
        let Some(pending) = self.pending.as_mut() else {
            return Vec::new();
        };
        match pending.phase {
            CapturePhase::Before if pending.before.len() == self.actors.len() => {
                pending.phase = CapturePhase::AwaitingEdit;
                vec![HistoryOutput::Release {
                    capture: pending.capture,
                    intent: pending.intent.clone(),
                }]
            }
            CapturePhase::After if pending.after.len() == self.actors.len() => self.finish(),
            _ => Vec::new(),
        }
    }

    fn on_edit_completed(&mut self, capture: CaptureId) -> Vec<HistoryOutput> {
        let Some(pending) = self.pending.as_mut() else {
            log::debug!("history: completion for capture {} with none open", capture);
            return Vec::new();
        };
        if pending.capture != capture || pending.phase != CapturePhase::AwaitingEdit {
            log::debug!("history: stale completion for capture {}", capture);
            return Vec::new();
        }
        pending.phase = CapturePhase::After;
        let capture = pending.capture;
        self.actors
            .iter()
            .map(|&actor| HistoryOutput::Save { actor, capture })
            .collect()
    }

    fn on_edit_failed(&mut self, capture: CaptureId) -> Vec<HistoryOutput> {
        match self.pending.take() {
            Some(pending) if pending.capture == capture => {
                log::debug!(
                    "history: capture {} discarded, edit {} did not commit",
                    capture,
                    pending.intent.action_name()
                );
            }
            other => {
                log::debug!("history: stale failure for capture {}", capture);
                self.pending = other;
            }
        }
        Vec::new()
    }

    /// Append the finished pending capture as a history entry.
    fn finish(&mut self) -> Vec<HistoryOutput> {
        let Some(pending) = self.pending.take() else {
            return Vec::new();
        };
        // Recording after undos discards the undone tail
        self.entries.truncate(self.position);
        self.entries.push(HistoryEntry {
            intent: pending.intent,
            before: pending.before,
            after: pending.after,
        });
        self.position = self.entries.len();
        log::debug!(
            "history: entry {} recorded, position {}",
            self.entries.len() - 1,
            self.position
        );
        vec![self.affordances()]
    }

    fn undo(&mut self) -> Vec<HistoryOutput> {
        if self.pending.is_some() {
            log::warn!("history: undo ignored while an edit is in flight");
            return Vec::new();
        }
        if self.position == 0 {
            log::debug!("history: undo at oldest state, ignored");
            return Vec::new();
        }
        self.position -= 1;
        let entry = &self.entries[self.position];
        log::debug!(
            "history: undo {} to position {}",
            entry.intent.action_name(),
            self.position
        );
        let mut outputs: Vec<HistoryOutput> = entry
            .before
            .iter()
            .map(|(&actor, snapshot)| HistoryOutput::Restore {
                actor,
                snapshot: snapshot.clone(),
            })
            .collect();
        outputs.push(self.affordances());
        outputs
    }

    fn redo(&mut self) -> Vec<HistoryOutput> {
        if self.pending.is_some() {
            log::warn!("history: redo ignored while an edit is in flight");
            return Vec::new();
        }
        if self.position == self.entries.len() {
            log::debug!("history: redo at newest state, ignored");
            return Vec::new();
        }
        let entry = &self.entries[self.position];
        self.position += 1;
        log::debug!(
            "history: redo {} to position {}",
            entry.intent.action_name(),
            self.position
        );
        let mut outputs: Vec<HistoryOutput> = entry
            .after
            .iter()
            .map(|(&actor, snapshot)| HistoryOutput::Restore {
                actor,
                snapshot: snapshot.clone(),
            })
            .collect();
        outputs.push(self.affordances());
        outputs
    }

    fn affordances(&self) -> HistoryOutput {
        HistoryOutput::Affordances {
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(n: i32) -> EditIntent {
        EditIntent::Erode { label: n }
    }

    fn tool_snapshot(tool: Tool) -> Snapshot {
        Snapshot::Tool { tool }
    }

    fn selection_snapshot(foreground: i32) -> Snapshot {
        Snapshot::Selection {
            foreground,
            background: 0,
            selected: foreground,
        }
    }

    fn manager() -> UndoRedoManager {
        let mut manager = UndoRedoManager::new();
        manager.register(ActorId::Dispatcher);
        manager.register(ActorId::Selection);
        manager
    }

    fn saves_of(outputs: &[HistoryOutput]) -> Vec<ActorId> {
        outputs
            .iter()
            .filter_map(|out| match out {
                HistoryOutput::Save { actor, .. } => Some(*actor),
                _ => None,
            })
            .collect()
    }

    fn release_of(outputs: &[HistoryOutput]) -> Option<CaptureId> {
        outputs.iter().find_map(|out| match out {
            HistoryOutput::Release { capture, .. } => Some(*capture),
            _ => None,
        })
    }

    /// Drive one full record -> release -> complete -> append cycle.
    fn run_entry(manager: &mut UndoRedoManager, n: i32, foreground: i32) -> CaptureId {
        let outputs = manager.handle(HistoryEvent::Record(intent(n)));
        assert_eq!(saves_of(&outputs), vec![ActorId::Dispatcher, ActorId::Selection]);
        let capture = match &outputs[0] {
            HistoryOutput::Save { capture, .. } => *capture,
            other => panic!("unexpected output: {other:?}"),
        };

        let outputs = manager.handle(HistoryEvent::SnapshotReply {
            capture,
            actor: ActorId::Dispatcher,
            snapshot: tool_snapshot(Tool::Brush),
        });
        assert!(outputs.is_empty(), "release before all replies collected");
        let outputs = manager.handle(HistoryEvent::SnapshotReply {
            capture,
            actor: ActorId::Selection,
            snapshot: selection_snapshot(foreground),
        });
        assert_eq!(release_of(&outputs), Some(capture));

        let outputs = manager.handle(HistoryEvent::EditCompleted { capture });
        assert_eq!(saves_of(&outputs).len(), 2, "after-barrier saves");
        manager.handle(HistoryEvent::SnapshotReply {
            capture,
            actor: ActorId::Dispatcher,
            snapshot: tool_snapshot(Tool::Brush),
        });
        let outputs = manager.handle(HistoryEvent::SnapshotReply {
            capture,
            actor: ActorId::Selection,
            snapshot: selection_snapshot(foreground + 100),
        });
        assert!(matches!(
            outputs.as_slice(),
            [HistoryOutput::Affordances { can_undo: true, .. }]
        ));
        capture
    }

    #[test]
    fn test_release_waits_for_every_actor() {
        let mut manager = manager();
        run_entry(&mut manager, 1, 10);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.position(), 1);
        assert!(manager.can_undo());
        assert!(!manager.can_redo());
    }

    #[test]
    fn test_undo_restores_before_snapshots() {
        let mut manager = manager();
        run_entry(&mut manager, 1, 10);

        let outputs = manager.handle(HistoryEvent::Undo);
        let restores: Vec<_> = outputs
            .iter()
            .filter_map(|out| match out {
                HistoryOutput::Restore { actor, snapshot } => Some((*actor, snapshot.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(restores.len(), 2);
        let (_, selection) = restores
            .iter()
            .find(|(actor, _)| *actor == ActorId::Selection)
            .cloned()
            .unwrap();
        match selection {
            Snapshot::Selection { foreground, .. } => assert_eq!(foreground, 10),
            other => panic!("unexpected snapshot: {other:?}"),
        }
        assert!(!manager.can_undo());
        assert!(manager.can_redo());
    }

    #[test]
    fn test_redo_restores_after_snapshots() {
        let mut manager = manager();
        run_entry(&mut manager, 1, 10);
        manager.handle(HistoryEvent::Undo);

        let outputs = manager.handle(HistoryEvent::Redo);
        let selection = outputs.iter().find_map(|out| match out {
            HistoryOutput::Restore {
                actor: ActorId::Selection,
                snapshot: Snapshot::Selection { foreground, .. },
            } => Some(*foreground),
            _ => None,
        });
        assert_eq!(selection, Some(110));
        assert!(manager.can_undo());
        assert!(!manager.can_redo());
    }

    #[test]
    fn test_undo_at_oldest_is_a_no_op() {
        let mut manager = manager();
        assert!(manager.handle(HistoryEvent::Undo).is_empty());

        run_entry(&mut manager, 1, 10);
        manager.handle(HistoryEvent::Undo);
        assert!(manager.handle(HistoryEvent::Undo).is_empty());
        assert_eq!(manager.position(), 0);
    }

    #[test]
    fn test_redo_at_newest_is_a_no_op() {
        let mut manager = manager();
        run_entry(&mut manager, 1, 10);
        assert!(manager.handle(HistoryEvent::Redo).is_empty());
        assert_eq!(manager.position(), 1);
    }

    #[test]
    fn test_two_undos_walk_back_two_entries() {
        let mut manager = manager();
        run_entry(&mut manager, 1, 10);
        run_entry(&mut manager, 2, 20);
        run_entry(&mut manager, 3, 30);
        assert_eq!((manager.len(), manager.position()), (3, 3));

        manager.handle(HistoryEvent::Undo);
        manager.handle(HistoryEvent::Undo);
        assert_eq!(manager.position(), 1);
        assert!(manager.can_undo());
        assert!(manager.can_redo());
    }

    #[test]
    fn test_record_after_undo_truncates_redo_tail() {
        let mut manager = manager();
        run_entry(&mut manager, 1, 10);
        run_entry(&mut manager, 2, 20);
        manager.handle(HistoryEvent::Undo);
        assert!(manager.can_redo());

        run_entry(&mut manager, 3, 30);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.position(), 2);
        assert!(!manager.can_redo());
        assert_eq!(manager.entry(1).intent, intent(3));
    }

    #[test]
    fn test_failed_edit_leaves_no_entry() {
        let mut manager = manager();
        let outputs = manager.handle(HistoryEvent::Record(intent(1)));
        let capture = match outputs[0] {
            HistoryOutput::Save { capture, .. } => capture,
            _ => panic!("expected save"),
        };
        manager.handle(HistoryEvent::SnapshotReply {
            capture,
            actor: ActorId::Dispatcher,
            snapshot: tool_snapshot(Tool::Brush),
        });
        let outputs = manager.handle(HistoryEvent::SnapshotReply {
            capture,
            actor: ActorId::Selection,
            snapshot: selection_snapshot(1),
        });
        assert_eq!(release_of(&outputs), Some(capture));

        manager.handle(HistoryEvent::EditFailed { capture });
        assert_eq!(manager.len(), 0);
        assert!(!manager.can_undo());

        // The manager accepts a fresh record afterwards
        run_entry(&mut manager, 2, 20);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_new_record_abandons_stalled_capture() {
        let mut manager = manager();
        // First record never gets its second snapshot
        let outputs = manager.handle(HistoryEvent::Record(intent(1)));
        let stalled = match outputs[0] {
            HistoryOutput::Save { capture, .. } => capture,
            _ => panic!("expected save"),
        };
        manager.handle(HistoryEvent::SnapshotReply {
            capture: stalled,
            actor: ActorId::Dispatcher,
            snapshot: tool_snapshot(Tool::Brush),
        });

        run_entry(&mut manager, 2, 20);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.entry(0).intent, intent(2));

        // Late replies for the abandoned capture are dropped
        assert!(manager
            .handle(HistoryEvent::SnapshotReply {
                capture: stalled,
                actor: ActorId::Selection,
                snapshot: selection_snapshot(1),
            })
            .is_empty());
    }

    #[test]
    fn test_undo_ignored_during_capture() {
        let mut manager = manager();
        run_entry(&mut manager, 1, 10);
        manager.handle(HistoryEvent::Record(intent(2)));
        assert!(manager.handle(HistoryEvent::Undo).is_empty());
        assert_eq!(manager.position(), 1);
    }

    #[test]
    fn test_no_registered_actors_releases_immediately() {
        let mut manager = UndoRedoManager::new();
        let outputs = manager.handle(HistoryEvent::Record(intent(1)));
        assert!(release_of(&outputs).is_some());
    }
}
