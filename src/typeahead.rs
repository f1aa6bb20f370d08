//! Floating list of matching shortcuts shown while a `/prefix` is typed.

use tracing::{debug, trace};

use crate::caret::{CaretAnchorResolver, CaretContext};
use crate::config::TypeaheadConfig;
use crate::errors::SurfaceError;
use crate::index::ShortcutIndex;
use crate::insertion;
use crate::keyboard::Key;
use crate::listeners::{ListenerKind, ListenerRegistry, ListenerScope};
use crate::surface::{Rect, Surface, SurfaceId};

pub const MAX_CANDIDATES: usize = 7;
pub const MIN_PREFIX_LEN: usize = 2;

/// Keys starting with `prefix` first, then keys containing it, both
/// case-insensitive and in `keys` order.
pub fn filter_candidates(keys: &[String], prefix: &str, limit: usize) -> Vec<String> {
    let needle = prefix.to_lowercase();
    let mut starts = Vec::new();
    let mut contains = Vec::new();
    for key in keys {
        let lower = key.to_lowercase();
        if lower.starts_with(&needle) {
            starts.push(key.clone());
        } else if lower.contains(&needle) {
            contains.push(key.clone());
        }
    }
    starts.extend(contains);
    starts.truncate(limit);
    starts
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub scroll_x: f64,
    pub scroll_y: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub text: String,
    /// `1.`..`9.` for keyboard-selectable rows, a bullet otherwise.
    pub hint: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeaheadView {
    /// Page coordinates, whole pixels.
    pub top: i64,
    pub left: i64,
    pub items: Vec<Suggestion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    NoMatch,
    Escape,
    Blur,
    Navigation,
    DialogOpened,
    Expanded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    NotOpen,
    /// List open, key not ours.
    Passed,
    /// Key handled; suppress its default action.
    Consumed,
    Committed(String),
}

impl KeyOutcome {
    pub fn prevents_default(&self) -> bool {
        matches!(self, KeyOutcome::Consumed | KeyOutcome::Committed(_))
    }
}

#[derive(Debug)]
struct OpenList {
    candidates: Vec<String>,
    selected: usize,
    context: CaretContext,
    anchor: Rect,
    _listeners: ListenerScope,
}

#[derive(Debug)]
pub struct Typeahead {
    resolver: CaretAnchorResolver,
    max_candidates: usize,
    min_prefix_len: usize,
    registry: ListenerRegistry,
    open: Option<OpenList>,
}

impl Typeahead {
    pub fn new(registry: ListenerRegistry, config: &TypeaheadConfig) -> Self {
        Self {
            resolver: CaretAnchorResolver::shortcuts(),
            max_candidates: config.max_candidates,
            min_prefix_len: config.min_prefix_len,
            registry,
            open: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn candidates(&self) -> &[String] {
        self.open.as_ref().map(|o| o.candidates.as_slice()).unwrap_or_default()
    }

    pub fn selected(&self) -> Option<usize> {
        self.open.as_ref().map(|o| o.selected)
    }

    pub fn target(&self) -> Option<SurfaceId> {
        self.open.as_ref().map(|o| o.context.surface())
    }

    /// Re-evaluates the token left of the caret; opens, updates or closes
    /// the list. Returns whether the list is open afterwards.
    pub fn refresh(&mut self, surface: &Surface, index: &ShortcutIndex) -> bool {
        let Some(context) = self.resolver.resolve(surface) else {
            self.close(CloseReason::NoMatch);
            return false;
        };
        if context.token().chars().count() < self.min_prefix_len {
            self.close(CloseReason::NoMatch);
            return false;
        }

        let candidates = filter_candidates(index.keys(), context.token(), self.max_candidates);
        if candidates.is_empty() {
            self.close(CloseReason::NoMatch);
            return false;
        }

        let mut listeners = self.registry.scope();
        for _ in &candidates {
            listeners.add(ListenerKind::PointerDown);
        }
        trace!("Typeahead for {:?}: {:?}", context.token(), candidates);

        self.open = Some(OpenList {
            candidates,
            selected: 0,
            anchor: surface.caret_rect(),
            context,
            _listeners: listeners,
        });
        true
    }

    pub fn handle_key(&mut self, key: Key, surface: &mut Surface) -> Result<KeyOutcome, SurfaceError> {
        let Some(open) = self.open.as_mut() else {
            return Ok(KeyOutcome::NotOpen);
        };
        let last = open.candidates.len().saturating_sub(1);

        match key {
            Key::ArrowDown => {
                open.selected = (open.selected + 1).min(last);
                Ok(KeyOutcome::Consumed)
            }
            Key::ArrowUp => {
                open.selected = open.selected.saturating_sub(1);
                Ok(KeyOutcome::Consumed)
            }
            Key::Enter | Key::Tab => {
                let selected = open.selected;
                self.commit(selected, surface)
            }
            Key::Escape => {
                self.close(CloseReason::Escape);
                Ok(KeyOutcome::Consumed)
            }
            other => match other.digit_index() {
                Some(i) if i <= last => self.commit(i, surface),
                _ => Ok(KeyOutcome::Passed),
            },
        }
    }

    /// Pointer selection of a row.
    pub fn activate(&mut self, index: usize, surface: &mut Surface) -> Result<KeyOutcome, SurfaceError> {
        self.commit(index, surface)
    }

    fn commit(&mut self, index: usize, surface: &mut Surface) -> Result<KeyOutcome, SurfaceError> {
        let Some(open) = self.open.take() else {
            return Ok(KeyOutcome::NotOpen);
        };
        let Some(choice) = open.candidates.get(index).cloned() else {
            self.open = Some(open);
            return Ok(KeyOutcome::Passed);
        };

        let fresh = surface.id() == open.context.surface()
            && surface.revision() == open.context.revision();
        let context = if fresh {
            Some(open.context)
        } else {
            self.resolver.resolve(surface)
        };
        let Some(context) = context else {
            debug!("Typeahead target went away before commit");
            return Ok(KeyOutcome::Consumed);
        };

        insertion::commit(surface, &context, &choice)?;
        debug!("Typeahead committed {}", choice);
        Ok(KeyOutcome::Committed(choice))
    }

    pub fn close(&mut self, reason: CloseReason) {
        if self.open.take().is_some() {
            debug!("Typeahead closed: {:?}", reason);
        }
    }

    pub fn view(&self, viewport: Viewport) -> Option<TypeaheadView> {
        let open = self.open.as_ref()?;
        let rect = open.anchor;
        let bottom = if rect.bottom != 0.0 { rect.bottom } else { rect.top + 20.0 };
        let left = if rect.left != 0.0 { rect.left } else { 16.0 };

        let items = open
            .candidates
            .iter()
            .enumerate()
            .map(|(i, text)| Suggestion {
                text: text.clone(),
                hint: if i < 9 { format!("{}.", i + 1) } else { "•".to_string() },
                active: i == open.selected,
            })
            .collect();

        Some(TypeaheadView {
            top: (bottom + 6.0 + viewport.scroll_y).round() as i64,
            left: (left + viewport.scroll_x).round() as i64,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{FieldKind, TextField};
    use serde_json::json;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn index() -> ShortcutIndex {
        ShortcutIndex::from_value(&json!({
            "/ack": "Thanks",
            "/apology": "Sorry",
            "/zzz": "Zzz",
            "/back": "Back soon"
        }))
    }

    fn typed(text: &str) -> Surface {
        TextField::with_value(FieldKind::TextArea, text).into()
    }

    fn controller(registry: &ListenerRegistry) -> Typeahead {
        Typeahead::new(registry.clone(), &TypeaheadConfig::default())
    }

    #[test]
    fn test_prefix_matches_then_contains() {
        let all = keys(&["/ack", "/apology", "/zzz"]);
        assert_eq!(filter_candidates(&all, "/a", 7), keys(&["/ack", "/apology"]));

        let more = keys(&["/back", "ack", "/zack"]);
        assert_eq!(filter_candidates(&more, "ack", 7), keys(&["ack", "/back", "/zack"]));
        assert_eq!(filter_candidates(&more, "/BA", 7), keys(&["/back"]));
    }

    #[test]
    fn test_candidates_are_capped() {
        let many: Vec<String> = (0..20).map(|i| format!("/k{}", i)).collect();
        assert_eq!(filter_candidates(&many, "/k", MAX_CANDIDATES).len(), 7);
        assert_eq!(filter_candidates(&many, "", 3), keys(&["/k0", "/k1", "/k2"]));
    }

    #[test]
    fn test_refresh_opens_and_closes() {
        let registry = ListenerRegistry::new();
        let mut ta = controller(&registry);

        assert!(!ta.refresh(&typed("/"), &index()));
        assert!(ta.refresh(&typed("hello /a"), &index()));
        assert_eq!(ta.candidates(), keys(&["/ack", "/apology"]).as_slice());
        assert_eq!(ta.selected(), Some(0));
        assert_eq!(registry.active(), 2);

        assert!(!ta.refresh(&typed("hello /q"), &index()));
        assert!(!ta.is_open());
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn test_arrows_clamp_and_enter_commits() {
        let registry = ListenerRegistry::new();
        let mut ta = controller(&registry);
        let mut surface = typed("hi /a");
        ta.refresh(&surface, &index());

        assert_eq!(ta.handle_key(Key::ArrowUp, &mut surface).unwrap(), KeyOutcome::Consumed);
        assert_eq!(ta.selected(), Some(0));
        ta.handle_key(Key::ArrowDown, &mut surface).unwrap();
        ta.handle_key(Key::ArrowDown, &mut surface).unwrap();
        assert_eq!(ta.selected(), Some(1));

        let outcome = ta.handle_key(Key::Enter, &mut surface).unwrap();
        assert_eq!(outcome, KeyOutcome::Committed("/apology".into()));
        assert_eq!(surface.text(), "hi /apology");
        assert!(!ta.is_open());
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn test_digit_selects_and_out_of_range_passes() {
        let registry = ListenerRegistry::new();
        let mut ta = controller(&registry);
        let mut surface = typed("/a");
        ta.refresh(&surface, &index());

        assert_eq!(ta.handle_key(Key::Char('5'), &mut surface).unwrap(), KeyOutcome::Passed);
        assert!(ta.is_open());
        assert_eq!(
            ta.handle_key(Key::Char('1'), &mut surface).unwrap(),
            KeyOutcome::Committed("/ack".into())
        );
        assert_eq!(surface.text(), "/ack");
    }

    #[test]
    fn test_escape_closes_without_edit() {
        let registry = ListenerRegistry::new();
        let mut ta = controller(&registry);
        let mut surface = typed("/ap");
        ta.refresh(&surface, &index());
        assert_eq!(ta.handle_key(Key::Escape, &mut surface).unwrap(), KeyOutcome::Consumed);
        assert_eq!(surface.text(), "/ap");
        assert_eq!(ta.handle_key(Key::Escape, &mut surface).unwrap(), KeyOutcome::NotOpen);
    }

    #[test]
    fn test_stale_commit_reresolves() {
        let registry = ListenerRegistry::new();
        let mut ta = controller(&registry);
        let mut surface = typed("/a");
        ta.refresh(&surface, &index());
        if let Surface::Flat(field) = &mut surface {
            field.type_text("p");
        }
        ta.activate(1, &mut surface).unwrap();
        assert_eq!(surface.text(), "/apology");
    }

    #[test]
    fn test_view_positions_under_anchor() {
        let registry = ListenerRegistry::new();
        let mut ta = controller(&registry);
        let mut field = TextField::with_value(FieldKind::TextArea, "/a");
        field.set_bounds(Rect::new(100.0, 40.0, 130.0, 200.0));
        ta.refresh(&field.into(), &index());

        let view = ta.view(Viewport { scroll_x: 5.0, scroll_y: 300.0 }).unwrap();
        assert_eq!((view.top, view.left), (436, 45));
        assert_eq!(view.items[0].hint, "1.");
        assert!(view.items[0].active);
        assert!(!view.items[1].active);
    }

    #[test]
    fn test_listener_count_stable_across_cycles() {
        let registry = ListenerRegistry::new();
        let mut ta = controller(&registry);
        for _ in 0..100 {
            ta.refresh(&typed("/a"), &index());
            ta.refresh(&typed("/ap"), &index());
            ta.close(CloseReason::Blur);
        }
        assert_eq!(registry.active(), 0);
    }
}
