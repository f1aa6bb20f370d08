//! Arena-backed model of a contenteditable region.
//!
//! Nodes live in a `Vec` and refer to each other by [`NodeId`]. Removing a
//! node only detaches it from its parent; ids stay valid so stale positions
//! can be detected instead of dangling.

use std::sync::Arc;

use crate::errors::SurfaceError;
use crate::surface::{char_slice, NotifyTarget, Observers, Rect, SurfaceId, SurfaceObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// `editable` marks an explicit contenteditable host.
    Element { tag: String, editable: bool },
    Text(String),
    /// Zero-width placeholder used while splicing.
    Marker,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A point in the tree: a char offset inside a text node, or a child index
/// inside an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub node: NodeId,
    pub offset: usize,
}

impl Position {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }
}

/// Tags that start a new line of text.
fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag.to_ascii_lowercase().as_str(),
        "p" | "div" | "li" | "ul" | "ol" | "blockquote" | "pre" | "section" | "article"
            | "header" | "footer" | "table" | "tr" | "td" | "th"
            | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
    )
}

/// Text read out of the tree. Block boundaries show up as `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextScan {
    pub text: String,
    /// Byte offsets of the `\n`s that are block boundaries.
    breaks: Vec<usize>,
}

impl TextScan {
    /// Chars of document text in `text[from..]`, not counting boundaries.
    pub fn text_chars_from(&self, from: usize) -> usize {
        let boundaries = self.breaks.iter().filter(|at| **at >= from).count();
        self.text[from..].chars().count() - boundaries
    }
}

#[derive(Debug)]
pub struct RichText {
    id: SurfaceId,
    nodes: Vec<Node>,
    root: NodeId,
    caret: Option<Position>,
    caret_rect: Option<Rect>,
    bounds: Rect,
    revision: u64,
    observers: Observers,
}

impl Default for RichText {
    fn default() -> Self {
        Self::new()
    }
}

impl RichText {
    /// An empty editable `div`.
    pub fn new() -> Self {
        let root = Node {
            kind: NodeKind::Element { tag: "div".to_string(), editable: true },
            parent: None,
            children: Vec::new(),
        };
        Self {
            id: SurfaceId::next(),
            nodes: vec![root],
            root: NodeId(0),
            caret: None,
            caret_rect: None,
            bounds: Rect::default(),
            revision: 0,
            observers: Observers::default(),
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_editable(&self) -> bool {
        matches!(self.nodes[self.root.0].kind, NodeKind::Element { editable: true, .. })
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Rect) {
        self.bounds = bounds;
    }

    /// Collapsed-range box reported by the host; zero-sized boxes are ignored.
    pub fn caret_rect(&self) -> Option<Rect> {
        self.caret_rect.filter(|r| r.width > 0.0 || r.bottom > r.top)
    }

    pub fn set_caret_rect(&mut self, rect: Rect) {
        self.caret_rect = Some(rect);
    }

    pub fn caret(&self) -> Option<Position> {
        self.caret
    }

    pub fn set_caret(&mut self, at: Position) -> Result<(), SurfaceError> {
        self.check_position(at)?;
        self.caret = Some(at);
        Ok(())
    }

    pub fn clear_caret(&mut self) {
        self.caret = None;
    }

    pub fn subscribe(&mut self, observer: Arc<dyn SurfaceObserver>) {
        self.observers.push(observer);
    }

    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node.0).map(|n| &n.kind)
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        match self.kind(node)? {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes.get(node.0).map(|n| n.children.as_slice()).unwrap_or_default()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    pub fn append_element(
        &mut self,
        parent: NodeId,
        tag: &str,
        editable: bool,
    ) -> Result<NodeId, SurfaceError> {
        self.append(parent, NodeKind::Element { tag: tag.to_string(), editable })
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Result<NodeId, SurfaceError> {
        self.append(parent, NodeKind::Text(text.to_string()))
    }

    fn append(&mut self, parent: NodeId, kind: NodeKind) -> Result<NodeId, SurfaceError> {
        self.check_attached(parent)?;
        if !matches!(self.nodes[parent.0].kind, NodeKind::Element { .. }) {
            return Err(SurfaceError::InvalidPosition { node: parent.0, offset: 0 });
        }
        let child = self.alloc(kind);
        let at = self.nodes[parent.0].children.len();
        self.insert_child(parent, at, child);
        self.revision += 1;
        Ok(child)
    }

    /// Inserts `text` at the caret the way keyboard input would.
    pub fn type_text(&mut self, text: &str) -> Result<(), SurfaceError> {
        let caret = self.caret.ok_or(SurfaceError::InvalidPosition {
            node: self.root.0,
            offset: 0,
        })?;
        self.check_position(caret)?;

        let added = text.chars().count();
        let node = caret.node;
        let caret = match &mut self.nodes[node.0].kind {
            NodeKind::Text(existing) => {
                let mut updated = char_slice(existing, 0, caret.offset).to_string();
                updated.push_str(text);
                updated.push_str(char_slice(existing, caret.offset, usize::MAX));
                *existing = updated;
                Position::new(node, caret.offset + added)
            }
            _ => {
                let fresh = self.alloc(NodeKind::Text(text.to_string()));
                let at = caret.offset.min(self.nodes[node.0].children.len());
                self.insert_child(node, at, fresh);
                Position::new(fresh, added)
            }
        };
        self.caret = Some(caret);
        self.revision += 1;
        Ok(())
    }

    /// All text in document order, with `\n` between blocks.
    pub fn text_content(&self) -> String {
        self.collect_text(None, None).text
    }

    /// Text from the start of the region up to `pos`, with `\n` between
    /// blocks.
    pub fn text_before(&self, pos: Position) -> String {
        self.scan_before(pos).text
    }

    /// Like [`RichText::text_before`], but also remembers which `\n`s
    /// stand for block boundaries rather than document text.
    pub fn scan_before(&self, pos: Position) -> TextScan {
        if self.text(pos.node).is_some() {
            return self.collect_text(None, Some(pos));
        }
        self.collect_text(self.boundary_after(pos), None)
    }

    /// Normalizes `pos` to a text-node point with the same text before it.
    pub fn text_point_before(&self, pos: Position) -> Option<Position> {
        if self.text(pos.node).is_some() {
            return Some(pos);
        }
        let stop = self.boundary_after(pos);
        let mut last = None;
        for id in self.preorder() {
            if Some(id) == stop {
                break;
            }
            if self.text(id).is_some() {
                last = Some(id);
            }
        }
        last.map(|id| Position::new(id, self.text_len(id)))
    }

    /// Walks `count` chars backwards across text nodes from a text point.
    pub fn retreat(&self, from: Position, count: usize) -> Option<Position> {
        let mut node = from.node;
        let mut offset = from.offset.min(self.text_len(node));
        let mut remaining = count;

        loop {
            let step = offset.min(remaining);
            offset -= step;
            remaining -= step;
            if remaining == 0 {
                return Some(Position::new(node, offset));
            }
            node = self.prev_text(node)?;
            offset = self.text_len(node);
        }
    }

    pub(crate) fn touch(&mut self) {
        self.revision += 1;
    }

    pub(crate) fn notify(&self, node: NodeId) {
        self.observers
            .emit(NotifyTarget::Node(self.id, self.nearest_editable(node)));
    }

    /// Closest explicit contenteditable host of `node`, or the root.
    pub fn nearest_editable(&self, node: NodeId) -> NodeId {
        let mut current = Some(node);
        while let Some(id) = current {
            if let NodeKind::Element { editable: true, .. } = self.nodes[id.0].kind {
                return id;
            }
            current = self.nodes[id.0].parent;
        }
        self.root
    }

    /// Deletes the text between two text points and puts `text` in its place.
    /// Nodes entirely inside the range are detached. The caret lands after
    /// the inserted text, whose node is returned.
    pub(crate) fn replace_range(
        &mut self,
        start: Position,
        end: Position,
        text: &str,
    ) -> Result<NodeId, SurfaceError> {
        self.check_text_point(start)?;
        self.check_text_point(end)?;

        let order = self.preorder();
        let index_of = |id: NodeId| order.iter().position(|n| *n == id).unwrap_or(usize::MAX);
        let (si, ei) = (index_of(start.node), index_of(end.node));
        if (si, start.offset) > (ei, end.offset) {
            return Err(SurfaceError::InvalidPosition { node: start.node.0, offset: start.offset });
        }

        if start.node == end.node {
            let current = self.text_of(start.node);
            let mut updated = char_slice(&current, 0, start.offset).to_string();
            updated.push_str(char_slice(&current, end.offset, usize::MAX));
            self.set_text(start.node, updated);
        } else {
            let inside: Vec<NodeId> = order[si + 1..ei]
                .iter()
                .copied()
                .filter(|n| !self.is_ancestor(*n, end.node))
                .collect();
            for node in inside {
                if self.is_attached(node) {
                    self.detach(node);
                }
            }
            let head = char_slice(&self.text_of(start.node), 0, start.offset).to_string();
            let tail = char_slice(&self.text_of(end.node), end.offset, usize::MAX).to_string();
            self.set_text(start.node, head);
            self.set_text(end.node, tail);
        }

        let inserted = self.insert_text_at(start, text);
        self.caret = Some(Position::new(inserted, text.chars().count()));
        Ok(inserted)
    }

    /// Drops a marker at a text point, splitting the text node if needed.
    pub(crate) fn insert_marker(&mut self, at: Position) -> Result<NodeId, SurfaceError> {
        self.check_text_point(at)?;
        let marker = self.alloc(NodeKind::Marker);
        self.place_at(at, marker);
        Ok(marker)
    }

    /// Detaches everything that precedes `marker` in document order, except
    /// its ancestors.
    pub(crate) fn clear_before(&mut self, marker: NodeId) -> Result<(), SurfaceError> {
        self.check_attached(marker)?;
        let order = self.preorder();
        let cut = order.iter().position(|n| *n == marker).unwrap_or(0);
        for node in order[..cut].iter().copied() {
            if !self.is_ancestor(node, marker) && self.is_attached(node) {
                self.detach(node);
            }
        }
        Ok(())
    }

    /// Swaps `marker` for a text node and parks the caret after it.
    pub(crate) fn replace_marker(&mut self, marker: NodeId, text: &str) -> Result<NodeId, SurfaceError> {
        self.check_attached(marker)?;
        let parent = self.nodes[marker.0]
            .parent
            .ok_or(SurfaceError::DetachedNode(marker.0))?;
        let fresh = self.alloc(NodeKind::Text(text.to_string()));
        if let Some(slot) = self.nodes[parent.0].children.iter_mut().find(|c| **c == marker) {
            *slot = fresh;
        }
        self.nodes[fresh.0].parent = Some(parent);
        self.nodes[marker.0].parent = None;
        self.caret = Some(Position::new(fresh, text.chars().count()));
        Ok(fresh)
    }

    pub(crate) fn check_text_point(&self, pos: Position) -> Result<(), SurfaceError> {
        self.check_attached(pos.node)?;
        match &self.nodes[pos.node.0].kind {
            NodeKind::Text(text) if pos.offset <= text.chars().count() => Ok(()),
            _ => Err(SurfaceError::InvalidPosition { node: pos.node.0, offset: pos.offset }),
        }
    }

    fn check_position(&self, pos: Position) -> Result<(), SurfaceError> {
        self.check_attached(pos.node)?;
        let node = &self.nodes[pos.node.0];
        let limit = match &node.kind {
            NodeKind::Text(text) => text.chars().count(),
            NodeKind::Element { .. } => node.children.len(),
            NodeKind::Marker => 0,
        };
        if pos.offset > limit {
            return Err(SurfaceError::InvalidPosition { node: pos.node.0, offset: pos.offset });
        }
        Ok(())
    }

    fn check_attached(&self, node: NodeId) -> Result<(), SurfaceError> {
        if node.0 >= self.nodes.len() || !self.is_attached(node) {
            return Err(SurfaceError::DetachedNode(node.0));
        }
        Ok(())
    }

    fn is_attached(&self, node: NodeId) -> bool {
        let mut current = node;
        loop {
            if current == self.root {
                return true;
            }
            match self.nodes[current.0].parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// True when `ancestor` is a strict ancestor of `node`.
    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.nodes[node.0].parent;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes[id.0].parent;
        }
        false
    }

    fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    /// Walks text in document order until `stop`, or through the text node
    /// of `until`, cut at its offset.
    fn collect_text(&self, stop: Option<NodeId>, until: Option<Position>) -> TextScan {
        let mut scan = TextScan::default();
        let mut last_block = None;
        let mut pending = false;

        for id in self.preorder() {
            if Some(id) == stop {
                break;
            }
            match &self.nodes[id.0].kind {
                NodeKind::Element { tag, .. } if tag.eq_ignore_ascii_case("br") => pending = true,
                NodeKind::Text(text) => {
                    let block = self.block_of(id);
                    if last_block.is_some_and(|b| b != block) {
                        pending = true;
                    }
                    last_block = Some(block);
                    if pending && !scan.text.is_empty() {
                        scan.breaks.push(scan.text.len());
                        scan.text.push('\n');
                    }
                    pending = false;

                    match until {
                        Some(pos) if pos.node == id => {
                            scan.text.push_str(char_slice(text, 0, pos.offset));
                            break;
                        }
                        _ => scan.text.push_str(text),
                    }
                }
                _ => {}
            }
        }
        scan
    }

    /// Closest block-level ancestor, or the root.
    fn block_of(&self, node: NodeId) -> NodeId {
        let mut current = self.nodes[node.0].parent;
        while let Some(id) = current {
            if id == self.root {
                break;
            }
            if let NodeKind::Element { tag, .. } = &self.nodes[id.0].kind {
                if is_block_tag(tag) {
                    return id;
                }
            }
            current = self.nodes[id.0].parent;
        }
        self.root
    }

    /// First node in document order that is not before `pos`.
    fn boundary_after(&self, pos: Position) -> Option<NodeId> {
        let children = &self.nodes[pos.node.0].children;
        if let Some(child) = children.get(pos.offset) {
            return Some(*child);
        }
        let mut current = pos.node;
        loop {
            if current == self.root {
                return None;
            }
            let parent = self.nodes[current.0].parent?;
            let siblings = &self.nodes[parent.0].children;
            let idx = siblings.iter().position(|c| *c == current)?;
            if let Some(next) = siblings.get(idx + 1) {
                return Some(*next);
            }
            current = parent;
        }
    }

    /// Previous node in reverse document order, skipping ancestors.
    fn prev_in_tree(&self, node: NodeId) -> Option<NodeId> {
        let mut current = node;
        loop {
            if current == self.root {
                return None;
            }
            let parent = self.nodes[current.0].parent?;
            let siblings = &self.nodes[parent.0].children;
            let idx = siblings.iter().position(|c| *c == current)?;
            if idx > 0 {
                let mut prev = siblings[idx - 1];
                while let Some(last) = self.nodes[prev.0].children.last() {
                    prev = *last;
                }
                return Some(prev);
            }
            current = parent;
        }
    }

    fn prev_text(&self, node: NodeId) -> Option<NodeId> {
        let mut current = self.prev_in_tree(node)?;
        while self.text(current).is_none() {
            current = self.prev_in_tree(current)?;
        }
        Some(current)
    }

    fn text_len(&self, node: NodeId) -> usize {
        self.text(node).map(|t| t.chars().count()).unwrap_or(0)
    }

    fn text_of(&self, node: NodeId) -> String {
        self.text(node).unwrap_or_default().to_string()
    }

    fn set_text(&mut self, node: NodeId, text: String) {
        if let NodeKind::Text(existing) = &mut self.nodes[node.0].kind {
            *existing = text;
        }
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node { kind, parent: None, children: Vec::new() });
        NodeId(self.nodes.len() - 1)
    }

    fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != node);
        }
    }

    fn child_index(&self, node: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.nodes[node.0].parent?;
        let idx = self.nodes[parent.0].children.iter().position(|c| *c == node)?;
        Some((parent, idx))
    }

    /// Places a detached node at a validated text point.
    fn place_at(&mut self, at: Position, node: NodeId) {
        let Some((parent, idx)) = self.child_index(at.node) else {
            return;
        };
        let len = self.text_len(at.node);
        if at.offset == 0 {
            self.insert_child(parent, idx, node);
        } else if at.offset >= len {
            self.insert_child(parent, idx + 1, node);
        } else {
            let current = self.text_of(at.node);
            let tail = self.alloc(NodeKind::Text(char_slice(&current, at.offset, usize::MAX).to_string()));
            self.set_text(at.node, char_slice(&current, 0, at.offset).to_string());
            self.insert_child(parent, idx + 1, tail);
            self.insert_child(parent, idx + 1, node);
        }
    }

    fn insert_text_at(&mut self, at: Position, text: &str) -> NodeId {
        let fresh = self.alloc(NodeKind::Text(text.to_string()));
        self.place_at(at, fresh);
        fresh
    }
}
