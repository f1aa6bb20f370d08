//! Locates the token left of the caret and captures everything needed to
//! replace it later.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use crate::rich::{Position, RichText};
use crate::surface::{char_slice, Surface, SurfaceId, SurfaceKind, TextField};

static SHORTCUT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/[A-Za-z0-9_-]+").expect("shortcut pattern"));

/// Byte span of a token inside the text left of the caret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMatch {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// What the resolver looks for.
#[derive(Debug, Clone)]
pub enum TokenPattern {
    /// `/word` not preceded by `:` or `/`, followed by whitespace or the end.
    Shortcut,
    /// A case-insensitive trigger word at a word boundary.
    Trigger { word: String, pattern: Regex },
}

impl TokenPattern {
    /// `None` for a blank word, which would match at every boundary.
    pub fn trigger(word: &str) -> Option<Self> {
        let word = word.trim();
        if word.is_empty() {
            return None;
        }
        let pattern = Regex::new(&format!(r"(?i)\b{}", regex::escape(word))).ok()?;
        Some(TokenPattern::Trigger { word: word.to_string(), pattern })
    }

    /// Rightmost acceptable match in `text`.
    pub fn find_last(&self, text: &str) -> Option<TokenMatch> {
        let (regex, guard_preceding) = match self {
            TokenPattern::Shortcut => (&*SHORTCUT_TOKEN, true),
            TokenPattern::Trigger { pattern, .. } => (pattern, false),
        };

        let mut last = None;
        for m in regex.find_iter(text) {
            if guard_preceding {
                let before = text[..m.start()].chars().next_back();
                if matches!(before, Some(':') | Some('/')) {
                    continue;
                }
            }
            let after = text[m.end()..].chars().next();
            if after.map_or(true, char::is_whitespace) {
                last = Some(TokenMatch {
                    start: m.start(),
                    end: m.end(),
                    text: m.as_str().to_string(),
                });
            }
        }
        last
    }
}

impl PartialEq for TokenPattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TokenPattern::Shortcut, TokenPattern::Shortcut) => true,
            (TokenPattern::Trigger { word: a, .. }, TokenPattern::Trigger { word: b, .. }) => {
                a.eq_ignore_ascii_case(b)
            }
            _ => false,
        }
    }
}

/// Where the token sits on its surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// Char offsets of the token plus the selection at capture time.
    Flat { from: usize, to: usize, selection: (usize, usize) },
    /// Text points bracketing the token.
    Rich { start: Position, end: Position },
}

/// Snapshot of a token left of the caret. Only valid for the surface
/// revision it was captured at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaretContext {
    pub(crate) surface: SurfaceId,
    pub(crate) revision: u64,
    pub(crate) anchor: Anchor,
    token: String,
    before_text: String,
}

impl CaretContext {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Trimmed text preceding the token.
    pub fn before_text(&self) -> &str {
        &self.before_text
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn kind(&self) -> SurfaceKind {
        match self.anchor {
            Anchor::Flat { .. } => SurfaceKind::Flat,
            Anchor::Rich { .. } => SurfaceKind::Rich,
        }
    }

    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaretAnchorResolver {
    pattern: TokenPattern,
}

impl CaretAnchorResolver {
    pub fn new(pattern: TokenPattern) -> Self {
        Self { pattern }
    }

    pub fn shortcuts() -> Self {
        Self::new(TokenPattern::Shortcut)
    }

    pub fn trigger(word: &str) -> Option<Self> {
        TokenPattern::trigger(word).map(Self::new)
    }

    pub fn pattern(&self) -> &TokenPattern {
        &self.pattern
    }

    /// Finds the last token left of the caret, or `None` when there is no
    /// caret, no match, or the surface cannot be edited.
    pub fn resolve(&self, surface: &Surface) -> Option<CaretContext> {
        if !surface.is_editable() {
            return None;
        }
        match surface {
            Surface::Flat(field) => self.resolve_flat(field),
            Surface::Rich(doc) => self.resolve_rich(doc),
        }
    }

    fn resolve_flat(&self, field: &TextField) -> Option<CaretContext> {
        let selection = field.selection();
        let left = char_slice(field.value(), 0, selection.0);
        let trimmed = left.trim_end();
        let found = self.pattern.find_last(trimmed)?;

        let from = trimmed[..found.start].chars().count();
        let to = from + found.text.chars().count();
        trace!("Flat token {:?} at {}..{}", found.text, from, to);

        Some(CaretContext {
            surface: field.id(),
            revision: field.revision(),
            anchor: Anchor::Flat { from, to, selection },
            before_text: trimmed[..found.start].trim().to_string(),
            token: found.text,
        })
    }

    fn resolve_rich(&self, doc: &RichText) -> Option<CaretContext> {
        let caret = doc.caret()?;
        let scan = doc.scan_before(caret);
        let trimmed = scan.text.trim_end();
        let found = self.pattern.find_last(trimmed)?;

        let gap = scan.text_chars_from(found.end);
        let length = found.text.chars().count();

        let Some(point) = doc.text_point_before(caret) else {
            debug!("No text point before caret {:?}", caret);
            return None;
        };
        let end = doc.retreat(point, gap)?;
        let start = doc.retreat(end, length)?;
        trace!("Rich token {:?} spans {:?}..{:?}", found.text, start, end);

        Some(CaretContext {
            surface: doc.id(),
            revision: doc.revision(),
            anchor: Anchor::Rich { start, end },
            before_text: trimmed[..found.start].trim().to_string(),
            token: found.text,
        })
    }
}
