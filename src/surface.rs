//! Editable surfaces the expander works against.
//!
//! A [`TextField`] is a flat value with a char-offset selection (textarea and
//! text-like inputs). A [`RichText`] is a node tree with a caret position
//! (contenteditable regions). Both carry a revision counter that advances on
//! every content mutation so captured caret contexts can be checked for
//! staleness before they are applied.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::errors::SurfaceError;
use crate::rich::{NodeId, RichText};

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub(crate) fn next() -> Self {
        SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Synthetic notifications fired after every mutation, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    BeforeInput,
    Input,
    Change,
}

pub const NOTIFICATION_SEQUENCE: [Notification; 3] = [
    Notification::BeforeInput,
    Notification::Input,
    Notification::Change,
];

/// Where a notification was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTarget {
    Field(SurfaceId),
    /// Nearest editable ancestor of the inserted node.
    Node(SurfaceId, NodeId),
}

/// Host frameworks listening for edits (form libraries, editors).
pub trait SurfaceObserver: Send + Sync {
    fn on_notification(
        &self,
        target: NotifyTarget,
        notification: Notification,
    ) -> Result<(), SurfaceError>;
}

#[derive(Clone, Default)]
pub(crate) struct Observers(Vec<Arc<dyn SurfaceObserver>>);

impl Observers {
    pub(crate) fn push(&mut self, observer: Arc<dyn SurfaceObserver>) {
        self.0.push(observer);
    }

    /// Fires the full sequence; observer failures never stop the rest.
    pub(crate) fn emit(&self, target: NotifyTarget) {
        for notification in NOTIFICATION_SEQUENCE {
            for observer in &self.0 {
                if let Err(e) = observer.on_notification(target, notification) {
                    debug!("Observer failed on {:?} for {:?}: {}", notification, target, e);
                }
            }
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observers({})", self.0.len())
    }
}

/// Viewport-relative box, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub width: f64,
}

impl Rect {
    pub fn new(top: f64, left: f64, bottom: f64, width: f64) -> Self {
        Self { top, left, bottom, width }
    }

    /// Box used when nothing measurable is available.
    pub fn fallback() -> Self {
        Self::new(20.0, 20.0, 40.0, 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Text,
    Search,
    Url,
    Email,
    Tel,
    Password,
    Other,
}

impl InputType {
    pub fn from_attr(attr: &str) -> Self {
        match attr.trim().to_ascii_lowercase().as_str() {
            "" | "text" => InputType::Text,
            "search" => InputType::Search,
            "url" => InputType::Url,
            "email" => InputType::Email,
            "tel" => InputType::Tel,
            "password" => InputType::Password,
            _ => InputType::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    TextArea,
    Input(InputType),
}

impl FieldKind {
    pub fn accepts_text(&self) -> bool {
        !matches!(self, FieldKind::Input(InputType::Other))
    }
}

#[derive(Debug)]
pub struct TextField {
    id: SurfaceId,
    kind: FieldKind,
    value: String,
    selection: (usize, usize),
    revision: u64,
    bounds: Rect,
    observers: Observers,
}

impl TextField {
    pub fn new(kind: FieldKind) -> Self {
        Self::with_value(kind, "")
    }

    /// Field holding `value` with the caret at its end.
    pub fn with_value(kind: FieldKind, value: &str) -> Self {
        let end = value.chars().count();
        Self {
            id: SurfaceId::next(),
            kind,
            value: value.to_string(),
            selection: (end, end),
            revision: 0,
            bounds: Rect::default(),
            observers: Observers::default(),
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn char_len(&self) -> usize {
        self.value.chars().count()
    }

    /// `(start, end)` in chars.
    pub fn selection(&self) -> (usize, usize) {
        self.selection
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Rect) {
        self.bounds = bounds;
    }

    pub fn set_selection(&mut self, start: usize, end: usize) -> Result<(), SurfaceError> {
        let len = self.char_len();
        if start > end || end > len {
            return Err(SurfaceError::InvalidPosition { node: 0, offset: end.max(start) });
        }
        self.selection = (start, end);
        Ok(())
    }

    pub fn set_caret(&mut self, at: usize) -> Result<(), SurfaceError> {
        self.set_selection(at, at)
    }

    /// Replaces the selection with `text` the way keyboard input would.
    pub fn type_text(&mut self, text: &str) {
        let (start, end) = self.selection;
        let mut value = char_slice(&self.value, 0, start).to_string();
        value.push_str(text);
        value.push_str(char_slice(&self.value, end, usize::MAX));
        let caret = start + text.chars().count();
        self.replace_value(value, caret);
    }

    pub fn subscribe(&mut self, observer: Arc<dyn SurfaceObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn replace_value(&mut self, value: String, caret: usize) {
        self.value = value;
        self.selection = (caret, caret);
        self.revision += 1;
    }

    pub(crate) fn notify(&self) {
        self.observers.emit(NotifyTarget::Field(self.id));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Flat,
    Rich,
}

/// Any surface the expander can edit.
#[derive(Debug)]
pub enum Surface {
    Flat(TextField),
    Rich(RichText),
}

impl Surface {
    pub fn id(&self) -> SurfaceId {
        match self {
            Surface::Flat(field) => field.id(),
            Surface::Rich(doc) => doc.id(),
        }
    }

    pub fn kind(&self) -> SurfaceKind {
        match self {
            Surface::Flat(_) => SurfaceKind::Flat,
            Surface::Rich(_) => SurfaceKind::Rich,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            Surface::Flat(field) => field.revision(),
            Surface::Rich(doc) => doc.revision(),
        }
    }

    /// Only text-like fields and editable regions take part in expansion.
    pub fn is_editable(&self) -> bool {
        match self {
            Surface::Flat(field) => field.kind().accepts_text(),
            Surface::Rich(doc) => doc.is_editable(),
        }
    }

    /// Box the typeahead list is positioned under.
    pub fn caret_rect(&self) -> Rect {
        let rect = match self {
            Surface::Flat(field) => field.bounds(),
            Surface::Rich(doc) => doc.caret_rect().unwrap_or_else(|| doc.bounds()),
        };
        if rect == Rect::default() {
            Rect::fallback()
        } else {
            rect
        }
    }

    /// All user-visible text.
    pub fn text(&self) -> String {
        match self {
            Surface::Flat(field) => field.value().to_string(),
            Surface::Rich(doc) => doc.text_content(),
        }
    }

    pub fn as_flat(&self) -> Option<&TextField> {
        match self {
            Surface::Flat(field) => Some(field),
            Surface::Rich(_) => None,
        }
    }

    pub fn as_rich(&self) -> Option<&RichText> {
        match self {
            Surface::Rich(doc) => Some(doc),
            Surface::Flat(_) => None,
        }
    }
}

impl From<TextField> for Surface {
    fn from(field: TextField) -> Self {
        Surface::Flat(field)
    }
}

impl From<RichText> for Surface {
    fn from(doc: RichText) -> Self {
        Surface::Rich(doc)
    }
}

/// Byte index of the `char_idx`-th char, clamped to the end.
pub(crate) fn byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Substring between two char offsets, clamped to the end.
pub(crate) fn char_slice(s: &str, from: usize, to: usize) -> &str {
    let start = byte_index(s, from);
    let end = byte_index(s, to).max(start);
    &s[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::RecordingObserver;

    #[test]
    fn test_type_text_replaces_selection() {
        let mut field = TextField::with_value(FieldKind::TextArea, "héllo world");
        field.set_selection(1, 5).unwrap();
        field.type_text("ey");
        assert_eq!(field.value(), "hey world");
        assert_eq!(field.selection(), (3, 3));
        assert_eq!(field.revision(), 1);
    }

    #[test]
    fn test_selection_bounds_are_checked() {
        let mut field = TextField::with_value(FieldKind::Input(InputType::Text), "abc");
        assert!(field.set_selection(2, 4).is_err());
        assert!(field.set_selection(3, 1).is_err());
        assert!(field.set_caret(3).is_ok());
    }

    #[test]
    fn test_only_text_like_inputs_are_editable() {
        let text: Surface = TextField::new(FieldKind::Input(InputType::from_attr("email"))).into();
        let number: Surface = TextField::new(FieldKind::Input(InputType::from_attr("number"))).into();
        assert!(text.is_editable());
        assert!(!number.is_editable());
    }

    #[test]
    fn test_observer_failures_do_not_stop_the_sequence() {
        let mut field = TextField::new(FieldKind::TextArea);
        let failing = RecordingObserver::failing();
        let recording = RecordingObserver::new();
        field.subscribe(Arc::new(failing.clone()));
        field.subscribe(Arc::new(recording.clone()));

        field.notify();

        assert_eq!(recording.notifications(), NOTIFICATION_SEQUENCE.to_vec());
        assert_eq!(failing.notifications(), NOTIFICATION_SEQUENCE.to_vec());
    }

    #[test]
    fn test_caret_rect_falls_back() {
        let surface: Surface = TextField::new(FieldKind::TextArea).into();
        assert_eq!(surface.caret_rect(), Rect::fallback());
    }

    #[test]
    fn test_char_slice_is_char_based() {
        assert_eq!(char_slice("añb", 1, 2), "ñ");
        assert_eq!(char_slice("abc", 2, 10), "c");
        assert_eq!(char_slice("abc", 5, 10), "");
    }
}
