//! Keyboard and input events as delivered by the page.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Space,
    Enter,
    Tab,
    Escape,
    ArrowUp,
    ArrowDown,
    Backspace,
    Other,
}

impl Key {
    /// `1`..=`9` as a zero-based list index.
    pub fn digit_index(&self) -> Option<usize> {
        match self {
            Key::Char(c @ '1'..='9') => Some(*c as usize - '1' as usize),
            _ => None,
        }
    }

    /// Maps a DOM `KeyboardEvent.key` value.
    pub fn from_dom(key: &str) -> Self {
        match key {
            " " => Key::Space,
            "Enter" => Key::Enter,
            "Tab" => Key::Tab,
            "Escape" => Key::Escape,
            "ArrowUp" => Key::ArrowUp,
            "ArrowDown" => Key::ArrowDown,
            "Backspace" => Key::Backspace,
            other => {
                let mut chars = other.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Char(c),
                    _ => Key::Other,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyModifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditEventKind {
    KeyDown { key: Key, modifiers: KeyModifiers, repeat: bool },
    KeyUp { key: Key },
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditEvent {
    pub kind: EditEventKind,
    /// IME composition in progress.
    pub composing: bool,
}

impl EditEvent {
    pub fn key_down(key: Key) -> Self {
        Self::key_down_with(key, KeyModifiers::default())
    }

    pub fn key_down_with(key: Key, modifiers: KeyModifiers) -> Self {
        Self {
            kind: EditEventKind::KeyDown { key, modifiers, repeat: false },
            composing: false,
        }
    }

    pub fn key_up(key: Key) -> Self {
        Self { kind: EditEventKind::KeyUp { key }, composing: false }
    }

    pub fn input() -> Self {
        Self { kind: EditEventKind::Input, composing: false }
    }

    pub fn composing(mut self) -> Self {
        self.composing = true;
        self
    }

    pub fn repeated(mut self) -> Self {
        if let EditEventKind::KeyDown { repeat, .. } = &mut self.kind {
            *repeat = true;
        }
        self
    }

    pub fn key(&self) -> Option<Key> {
        match self.kind {
            EditEventKind::KeyDown { key, .. } | EditEventKind::KeyUp { key } => Some(key),
            EditEventKind::Input => None,
        }
    }

    /// Ctrl+Space, Space, Enter, Tab or any input event, outside IME
    /// composition and key repeat.
    pub fn should_trigger(&self) -> bool {
        if self.composing {
            return false;
        }
        match self.kind {
            EditEventKind::Input => true,
            EditEventKind::KeyDown { repeat: true, .. } => false,
            EditEventKind::KeyDown { key, .. } => {
                matches!(key, Key::Space | Key::Enter | Key::Tab)
            }
            EditEventKind::KeyUp { .. } => false,
        }
    }

    /// Keys whose default action is suppressed when they complete an
    /// expansion.
    pub fn is_completion_key(&self) -> bool {
        matches!(
            self.kind,
            EditEventKind::KeyDown { key: Key::Space | Key::Enter | Key::Tab, .. }
        )
    }
}
