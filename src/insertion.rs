//! Applies text to a surface at a captured caret context and fires the
//! synthetic notification sequence.
//!
//! Every operation validates the context against the live surface first and
//! leaves the surface untouched when the check fails.

use tracing::debug;

use crate::caret::{Anchor, CaretContext};
use crate::errors::SurfaceError;
use crate::rich::{NodeId, Position, RichText};
use crate::surface::{char_slice, Surface, SurfaceId, SurfaceKind, TextField};

/// Removal point left behind by [`remove_token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaretAnchor {
    surface: SurfaceId,
    revision: u64,
    point: AnchorPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorPoint {
    /// Char offset in a flat value.
    Flat(usize),
    Rich(Position),
}

impl CaretAnchor {
    pub fn point(&self) -> AnchorPoint {
        self.point
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }
}

fn check(
    surface: &Surface,
    id: SurfaceId,
    revision: u64,
    kind: SurfaceKind,
) -> Result<(), SurfaceError> {
    if surface.id() != id {
        return Err(SurfaceError::SurfaceMismatch { expected: id, found: surface.id() });
    }
    if surface.kind() != kind {
        return Err(SurfaceError::KindMismatch);
    }
    if surface.revision() != revision {
        return Err(SurfaceError::StaleContext { expected: revision, found: surface.revision() });
    }
    Ok(())
}

/// Replaces the token with `text`, keeping whatever sat between the token
/// and the caret, and leaves the caret right after `text`.
pub fn commit(surface: &mut Surface, ctx: &CaretContext, text: &str) -> Result<(), SurfaceError> {
    check(surface, ctx.surface, ctx.revision, ctx.kind())?;

    match (surface, &ctx.anchor) {
        (Surface::Flat(field), Anchor::Flat { from, to, selection }) => {
            commit_flat(field, *from, *to, *selection, text);
            field.notify();
        }
        (Surface::Rich(doc), Anchor::Rich { start, end }) => {
            let inserted = doc.replace_range(*start, *end, text)?;
            doc.touch();
            doc.notify(inserted);
        }
        _ => return Err(SurfaceError::KindMismatch),
    }

    debug!("Committed {} chars for {}", text.chars().count(), ctx.token());
    Ok(())
}

fn commit_flat(field: &mut TextField, from: usize, to: usize, selection: (usize, usize), text: &str) {
    let value = field.value();
    let mut updated = char_slice(value, 0, from).to_string();
    updated.push_str(text);
    updated.push_str(char_slice(value, to, selection.0));
    updated.push_str(char_slice(value, selection.1, usize::MAX));
    let caret = from + text.chars().count();
    field.replace_value(updated, caret);
}

/// Deletes the token and returns where it was, for a later
/// [`replace_before_caret`].
pub fn remove_token(surface: &mut Surface, ctx: &CaretContext) -> Result<CaretAnchor, SurfaceError> {
    check(surface, ctx.surface, ctx.revision, ctx.kind())?;

    let point = match (&mut *surface, &ctx.anchor) {
        (Surface::Flat(field), Anchor::Flat { from, to, selection }) => {
            commit_flat(field, *from, *to, *selection, "");
            field.notify();
            AnchorPoint::Flat(*from)
        }
        (Surface::Rich(doc), Anchor::Rich { start, end }) => {
            let emptied = doc.replace_range(*start, *end, "")?;
            doc.touch();
            doc.notify(emptied);
            AnchorPoint::Rich(Position::new(emptied, 0))
        }
        _ => return Err(SurfaceError::KindMismatch),
    };

    Ok(CaretAnchor {
        surface: surface.id(),
        revision: surface.revision(),
        point,
    })
}

/// Discards everything before the anchor and puts `text` there; content
/// after the anchor is kept.
pub fn replace_before_caret(
    surface: &mut Surface,
    anchor: &CaretAnchor,
    text: &str,
) -> Result<(), SurfaceError> {
    let kind = match anchor.point {
        AnchorPoint::Flat(_) => SurfaceKind::Flat,
        AnchorPoint::Rich(_) => SurfaceKind::Rich,
    };
    check(surface, anchor.surface, anchor.revision, kind)?;

    match (surface, anchor.point) {
        (Surface::Flat(field), AnchorPoint::Flat(at)) => {
            let mut updated = text.to_string();
            updated.push_str(char_slice(field.value(), at, usize::MAX));
            field.replace_value(updated, text.chars().count());
            field.notify();
        }
        (Surface::Rich(doc), AnchorPoint::Rich(at)) => {
            let fresh = splice_before(doc, at, text)?;
            doc.touch();
            doc.notify(fresh);
        }
        _ => return Err(SurfaceError::KindMismatch),
    }
    Ok(())
}

fn splice_before(doc: &mut RichText, at: Position, text: &str) -> Result<NodeId, SurfaceError> {
    let marker = doc.insert_marker(at)?;
    doc.clear_before(marker)?;
    doc.replace_marker(marker, text)
}
