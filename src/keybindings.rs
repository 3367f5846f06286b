//! Customizable keybindings for session commands.
//!
//! Bindings map key chords (a key plus optional modifiers) to the commands
//! the session understands. The host translates its native key events into
//! [`KeyChord`]s; "mod" is control on most platforms and command on macOS,
//! and the host is expected to fold both into the `ctrl` flag.

use serde::{Deserialize, Serialize};

use crate::message::{SessionCommand, Tool};

/// Physical key, independent of the host windowing stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyCode {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    Key0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    Minus,
    Equal,
    Space,
    Tab,
    Delete,
    Escape,
}

/// A key press with its modifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChord {
    pub code: KeyCode,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
}

impl KeyChord {
    pub fn plain(code: KeyCode) -> Self {
        Self {
            code,
            ctrl: false,
            shift: false,
        }
    }

    pub fn ctrl(code: KeyCode) -> Self {
        Self {
            code,
            ctrl: true,
            shift: false,
        }
    }

    pub fn ctrl_shift(code: KeyCode) -> Self {
        Self {
            code,
            ctrl: true,
            shift: true,
        }
    }
}

/// Keybinding configuration for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBindings {
    pub tool_brush: KeyChord,
    pub tool_select: KeyChord,
    pub tool_threshold: KeyChord,
    pub tool_trim: KeyChord,
    pub tool_flood: KeyChord,
    pub tool_watershed: KeyChord,

    pub swap: KeyChord,
    pub replace: KeyChord,
    pub delete: KeyChord,
    pub erode: KeyChord,
    pub dilate: KeyChord,
    pub autofit: KeyChord,

    pub undo: KeyChord,
    pub redo: KeyChord,
    /// The +/= key grows the brush, the - key shrinks it
    pub brush_size_up: KeyChord,
    pub brush_size_down: KeyChord,
    pub new_label: KeyChord,
    pub reset: KeyChord,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            tool_brush: KeyChord::plain(KeyCode::B),
            tool_select: KeyChord::plain(KeyCode::V),
            tool_threshold: KeyChord::plain(KeyCode::T),
            tool_trim: KeyChord::plain(KeyCode::K),
            tool_flood: KeyChord::plain(KeyCode::G),
            tool_watershed: KeyChord::plain(KeyCode::W),

            swap: KeyChord::plain(KeyCode::S),
            replace: KeyChord::plain(KeyCode::R),
            delete: KeyChord::plain(KeyCode::Delete),
            erode: KeyChord::plain(KeyCode::E),
            dilate: KeyChord::plain(KeyCode::D),
            autofit: KeyChord::plain(KeyCode::F),

            undo: KeyChord::ctrl(KeyCode::Z),
            redo: KeyChord::ctrl_shift(KeyCode::Z),
            brush_size_up: KeyChord::plain(KeyCode::Equal),
            brush_size_down: KeyChord::plain(KeyCode::Minus),
            new_label: KeyChord::plain(KeyCode::N),
            reset: KeyChord::plain(KeyCode::Escape),
        }
    }
}

impl KeyBindings {
    /// Create new keybindings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every binding with the command it triggers, in display order.
    fn bindings(&self) -> [(SessionCommand, KeyChord); 18] {
        [
            (SessionCommand::SetTool(Tool::Brush), self.tool_brush),
            (SessionCommand::SetTool(Tool::Select), self.tool_select),
            (SessionCommand::SetTool(Tool::Threshold), self.tool_threshold),
            (SessionCommand::SetTool(Tool::Trim), self.tool_trim),
            (SessionCommand::SetTool(Tool::Flood), self.tool_flood),
            (SessionCommand::SetTool(Tool::Watershed), self.tool_watershed),
            (SessionCommand::Swap, self.swap),
            (SessionCommand::Replace, self.replace),
            (SessionCommand::Delete, self.delete),
            (SessionCommand::Erode, self.erode),
            (SessionCommand::Dilate, self.dilate),
            (SessionCommand::Autofit, self.autofit),
            (SessionCommand::Undo, self.undo),
            (SessionCommand::Redo, self.redo),
            (SessionCommand::BrushSizeUp, self.brush_size_up),
            (SessionCommand::BrushSizeDown, self.brush_size_down),
            (SessionCommand::NewLabel, self.new_label),
            (SessionCommand::Reset, self.reset),
        ]
    }

    /// Get the command that corresponds to a key press, if any.
    ///
    /// Redo is checked before undo so `mod+shift+z` does not fall through to
    /// the undo binding on hosts that report shift separately.
    pub fn command_for(&self, chord: KeyChord) -> Option<SessionCommand> {
        if chord == self.redo {
            return Some(SessionCommand::Redo);
        }
        self.bindings()
            .into_iter()
            .find(|(_, bound)| *bound == chord)
            .map(|(command, _)| command)
    }

    /// Get the chord bound to a command, if it is bindable.
    pub fn key_for_command(&self, command: SessionCommand) -> Option<KeyChord> {
        self.bindings()
            .into_iter()
            .find(|(bound, _)| *bound == command)
            .map(|(_, chord)| chord)
    }

    /// Rebind a command. Commands without a binding slot are ignored.
    pub fn set_key(&mut self, command: SessionCommand, chord: KeyChord) {
        match command {
            SessionCommand::SetTool(Tool::Brush) => self.tool_brush = chord,
            SessionCommand::SetTool(Tool::Select) => self.tool_select = chord,
            SessionCommand::SetTool(Tool::Threshold) => self.tool_threshold = chord,
            SessionCommand::SetTool(Tool::Trim) => self.tool_trim = chord,
            SessionCommand::SetTool(Tool::Flood) => self.tool_flood = chord,
            SessionCommand::SetTool(Tool::Watershed) => self.tool_watershed = chord,
            SessionCommand::Swap => self.swap = chord,
            SessionCommand::Replace => self.replace = chord,
            SessionCommand::Delete => self.delete = chord,
            SessionCommand::Erode => self.erode = chord,
            SessionCommand::Dilate => self.dilate = chord,
            SessionCommand::Autofit => self.autofit = chord,
            SessionCommand::Undo => self.undo = chord,
            SessionCommand::Redo => self.redo = chord,
            SessionCommand::BrushSizeUp => self.brush_size_up = chord,
            SessionCommand::BrushSizeDown => self.brush_size_down = chord,
            SessionCommand::NewLabel => self.new_label = chord,
            SessionCommand::Reset => self.reset = chord,
            SessionCommand::ToggleErase => {
                log::debug!("toggle erase has no binding slot");
            }
        }
    }

    /// Check if a chord is already used by any binding.
    /// Returns a description of what it's used for, if anything.
    pub fn key_conflict(
        &self,
        chord: KeyChord,
        exclude: Option<SessionCommand>,
    ) -> Option<String> {
        self.bindings()
            .into_iter()
            .find(|(command, bound)| *bound == chord && Some(*command) != exclude)
            .map(|(command, _)| command.name().to_string())
    }
}

/// Convert a KeyCode to a display string.
pub fn key_to_string(key: KeyCode) -> &'static str {
    match key {
        KeyCode::A => "A",
        KeyCode::B => "B",
        KeyCode::C => "C",
        KeyCode::D => "D",
        KeyCode::E => "E",
        KeyCode::F => "F",
        KeyCode::G => "G",
        KeyCode::H => "H",
        KeyCode::I => "I",
        KeyCode::J => "J",
        KeyCode::K => "K",
        KeyCode::L => "L",
        KeyCode::M => "M",
        KeyCode::N => "N",
        KeyCode::O => "O",
        KeyCode::P => "P",
        KeyCode::Q => "Q",
        KeyCode::R => "R",
        KeyCode::S => "S",
        KeyCode::T => "T",
        KeyCode::U => "U",
        KeyCode::V => "V",
        KeyCode::W => "W",
        KeyCode::X => "X",
        KeyCode::Y => "Y",
        KeyCode::Z => "Z",
        KeyCode::Key0 => "0",
        KeyCode::Key1 => "1",
        KeyCode::Key2 => "2",
        KeyCode::Key3 => "3",
        KeyCode::Key4 => "4",
        KeyCode::Key5 => "5",
        KeyCode::Key6 => "6",
        KeyCode::Key7 => "7",
        KeyCode::Key8 => "8",
        KeyCode::Key9 => "9",
        KeyCode::Minus => "-",
        KeyCode::Equal => "=",
        KeyCode::Space => "Space",
        KeyCode::Tab => "Tab",
        KeyCode::Delete => "Delete",
        KeyCode::Escape => "Esc",
    }
}

/// Convert a chord to a display string like `mod+shift+Z`.
pub fn chord_to_string(chord: KeyChord) -> String {
    let mut parts = Vec::new();
    if chord.ctrl {
        parts.push("mod");
    }
    if chord.shift {
        parts.push("shift");
    }
    parts.push(key_to_string(chord.code));
    parts.join("+")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tool_bindings() {
        let bindings = KeyBindings::new();
        assert_eq!(
            bindings.command_for(KeyChord::plain(KeyCode::B)),
            Some(SessionCommand::SetTool(Tool::Brush))
        );
        assert_eq!(
            bindings.command_for(KeyChord::plain(KeyCode::V)),
            Some(SessionCommand::SetTool(Tool::Select))
        );
        assert_eq!(
            bindings.command_for(KeyChord::plain(KeyCode::W)),
            Some(SessionCommand::SetTool(Tool::Watershed))
        );
        assert_eq!(bindings.command_for(KeyChord::plain(KeyCode::Q)), None);
    }

    #[test]
    fn test_undo_redo_need_modifiers() {
        let bindings = KeyBindings::new();
        assert_eq!(
            bindings.command_for(KeyChord::ctrl(KeyCode::Z)),
            Some(SessionCommand::Undo)
        );
        assert_eq!(
            bindings.command_for(KeyChord::ctrl_shift(KeyCode::Z)),
            Some(SessionCommand::Redo)
        );
        // A bare z does nothing
        assert_eq!(bindings.command_for(KeyChord::plain(KeyCode::Z)), None);
    }

    #[test]
    fn test_edit_action_bindings() {
        let bindings = KeyBindings::new();
        assert_eq!(
            bindings.command_for(KeyChord::plain(KeyCode::Delete)),
            Some(SessionCommand::Delete)
        );
        assert_eq!(
            bindings.command_for(KeyChord::plain(KeyCode::Escape)),
            Some(SessionCommand::Reset)
        );
        assert_eq!(
            bindings.command_for(KeyChord::plain(KeyCode::Equal)),
            Some(SessionCommand::BrushSizeUp)
        );
    }

    #[test]
    fn test_rebind_and_lookup() {
        let mut bindings = KeyBindings::new();
        bindings.set_key(SessionCommand::Erode, KeyChord::plain(KeyCode::Y));
        assert_eq!(
            bindings.command_for(KeyChord::plain(KeyCode::Y)),
            Some(SessionCommand::Erode)
        );
        assert_eq!(bindings.command_for(KeyChord::plain(KeyCode::E)), None);
        assert_eq!(
            bindings.key_for_command(SessionCommand::Erode),
            Some(KeyChord::plain(KeyCode::Y))
        );
    }

    #[test]
    fn test_key_conflict() {
        let bindings = KeyBindings::new();
        assert_eq!(
            bindings.key_conflict(KeyChord::plain(KeyCode::S), None),
            Some("swap".to_string())
        );
        // Excluding the owner reports no conflict
        assert_eq!(
            bindings.key_conflict(KeyChord::plain(KeyCode::S), Some(SessionCommand::Swap)),
            None
        );
        assert_eq!(bindings.key_conflict(KeyChord::plain(KeyCode::Q), None), None);
        // Same code with different modifiers does not conflict
        assert_eq!(bindings.key_conflict(KeyChord::ctrl(KeyCode::S), None), None);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut bindings = KeyBindings::new();
        bindings.set_key(SessionCommand::Undo, KeyChord::ctrl(KeyCode::U));
        let json = serde_json::to_string(&bindings).unwrap();
        let back: KeyBindings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bindings);
    }

    #[test]
    fn test_chord_display() {
        assert_eq!(chord_to_string(KeyChord::plain(KeyCode::B)), "B");
        assert_eq!(chord_to_string(KeyChord::ctrl(KeyCode::Z)), "mod+Z");
        assert_eq!(chord_to_string(KeyChord::ctrl_shift(KeyCode::Z)), "mod+shift+Z");
        assert_eq!(chord_to_string(KeyChord::plain(KeyCode::Escape)), "Esc");
    }
}
