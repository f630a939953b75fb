//! Arena-backed document tree used as the render target of widget-sync views.
//!
//! The tree mirrors the small subset of the browser DOM the synchronization
//! layer needs: elements with ordered attributes, text nodes, invisible anchor
//! nodes that delimit dynamic blocks, and per-node event listeners. All
//! "pointers" are [`NodeId`] indices into a `Vec` arena owned by [`Dom`].
//!
//! Every change to attached state can be recorded in a mutation journal
//! ([`Dom::with_journal`], [`Dom::take_mutations`]) so callers can check that an
//! update touched exactly the nodes it should have.

mod html;
mod journal;
mod node;

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

pub use html::{escape_attr, escape_text, is_void_element};
pub use journal::Mutation;
pub use node::{NodeId, NodeKind};

use node::{NodeData, Slot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node {0:?} does not exist")]
    StaleNode(NodeId),
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
    #[error("node {0:?} is not a text node")]
    NotAText(NodeId),
    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("the document root cannot be moved or removed")]
    RootImmutable,
    #[error("inserting {0:?} would create a cycle")]
    Cycle(NodeId),
}

/// Identifier returned by [`Dom::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// What a listener resolves to when its event fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    /// Opaque owner token chosen by whoever registered the listener.
    pub owner: u64,
    pub handler: String,
}

#[derive(Debug, Clone)]
struct ListenerEntry {
    node: NodeId,
    event: String,
    listener: Listener,
}

#[derive(Debug)]
pub struct Dom {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    journal: Option<Vec<Mutation>>,
    next_listener_id: u64,
    listeners: BTreeMap<u64, ListenerEntry>,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    /// Creates an empty document whose root is a `body` element.
    pub fn new() -> Self {
        let mut dom = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            journal: None,
            next_listener_id: 1,
            listeners: BTreeMap::new(),
        };
        dom.root = dom.alloc(NodeKind::Element {
            tag: "body".to_string(),
            attrs: Vec::new(),
        });
        dom
    }

    /// Creates an empty document that records every mutation.
    pub fn with_journal() -> Self {
        let mut dom = Self::new();
        dom.journal = Some(Vec::new());
        dom
    }

    pub fn set_journal(&mut self, enabled: bool) {
        match (enabled, self.journal.is_some()) {
            (true, false) => self.journal = Some(Vec::new()),
            (false, true) => self.journal = None,
            _ => {}
        }
    }

    /// Drains the recorded mutations. Empty when journaling is off.
    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        self.journal.as_mut().map(std::mem::take).unwrap_or_default()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.data(id).is_some()
    }

    /// Whether `id` is reachable from the root.
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut cur = Some(id).filter(|n| self.contains(*n));
        while let Some(node) = cur {
            if node == self.root {
                return true;
            }
            cur = self.parent(node);
        }
        false
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.data.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.data(id).map(|d| &d.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).and_then(|d| d.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.data(id).map(|d| d.children.as_slice()).unwrap_or(&[])
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|c| *c == id)?;
        siblings.get(pos + 1).copied()
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeKind::Element {
            tag: tag.to_string(),
            attrs: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_string()))
    }

    pub fn create_anchor(&mut self, label: &str) -> NodeId {
        self.alloc(NodeKind::Anchor(label.to_string()))
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Inserts `child` into `parent` before `reference`, or last when
    /// `reference` is `None`. An attached `child` is moved.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        if child == self.root {
            return Err(DomError::RootImmutable);
        }
        match self.kind(parent) {
            None => return Err(DomError::StaleNode(parent)),
            Some(NodeKind::Element { .. }) => {}
            Some(_) => return Err(DomError::NotAnElement(parent)),
        }
        if !self.contains(child) {
            return Err(DomError::StaleNode(child));
        }
        if self.is_ancestor_or_self(child, parent) {
            return Err(DomError::Cycle(child));
        }
        if let Some(r) = reference {
            if r == child {
                return Ok(());
            }
            if !self.children(parent).contains(&r) {
                return Err(DomError::NotAChild { parent, child: r });
            }
        }
        self.detach(child);
        let position = match reference {
            None => self.children(parent).len(),
            Some(r) => self
                .children(parent)
                .iter()
                .position(|c| *c == r)
                .ok_or(DomError::NotAChild { parent, child: r })?,
        };
        if let Some(data) = self.data_mut(parent) {
            data.children.insert(position, child);
        }
        if let Some(data) = self.data_mut(child) {
            data.parent = Some(parent);
        }
        if self.is_connected(parent) {
            self.record(Mutation::Insert {
                parent,
                node: child,
            });
        }
        Ok(())
    }

    /// Detaches `id` and frees it with its whole subtree, dropping every
    /// listener registered inside it.
    pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
        if id == self.root {
            return Err(DomError::RootImmutable);
        }
        if !self.contains(id) {
            return Err(DomError::StaleNode(id));
        }
        let parent = self.parent(id);
        if self.is_connected(id) {
            self.record(Mutation::Remove { parent, node: id });
        }
        self.detach(id);
        let mut stack = vec![id];
        let mut freed = BTreeSet::new();
        while let Some(cur) = stack.pop() {
            stack.extend_from_slice(self.children(cur));
            freed.insert(cur);
        }
        self.listeners.retain(|_, entry| !freed.contains(&entry.node));
        for node in freed {
            self.free_slot(node);
        }
        Ok(())
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), DomError> {
        let data = self.data_mut(id).ok_or(DomError::StaleNode(id))?;
        match &mut data.kind {
            NodeKind::Text(current) => {
                current.clear();
                current.push_str(text);
            }
            _ => return Err(DomError::NotAText(id)),
        }
        if self.is_connected(id) {
            self.record(Mutation::SetText { node: id });
        }
        Ok(())
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let data = self.data_mut(id).ok_or(DomError::StaleNode(id))?;
        match &mut data.kind {
            NodeKind::Element { attrs, .. } => {
                match attrs.iter_mut().find(|(k, _)| k == name) {
                    Some((_, v)) => *v = value.to_string(),
                    None => attrs.push((name.to_string(), value.to_string())),
                }
            }
            _ => return Err(DomError::NotAnElement(id)),
        }
        if self.is_connected(id) {
            self.record(Mutation::SetAttribute {
                node: id,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Returns whether the attribute was present.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<bool, DomError> {
        let data = self.data_mut(id).ok_or(DomError::StaleNode(id))?;
        let removed = match &mut data.kind {
            NodeKind::Element { attrs, .. } => {
                let before = attrs.len();
                attrs.retain(|(k, _)| k != name);
                attrs.len() != before
            }
            _ => return Err(DomError::NotAnElement(id)),
        };
        if removed && self.is_connected(id) {
            self.record(Mutation::RemoveAttribute {
                node: id,
                name: name.to_string(),
            });
        }
        Ok(removed)
    }

    pub fn add_listener(
        &mut self,
        node: NodeId,
        event: &str,
        listener: Listener,
    ) -> Result<ListenerId, DomError> {
        if !self.contains(node) {
            return Err(DomError::StaleNode(node));
        }
        let id = self.next_listener_id;
        self.next_listener_id = self.next_listener_id.saturating_add(1);
        self.listeners.insert(
            id,
            ListenerEntry {
                node,
                event: event.to_string(),
                listener,
            },
        );
        Ok(ListenerId(id))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id.0).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Fires `event` at `target`, bubbling to the root. Returns the matching
    /// listeners, innermost first, each node's listeners in registration order.
    pub fn fire(&self, target: NodeId, event: &str) -> Vec<Listener> {
        let mut hits = Vec::new();
        let mut cur = Some(target).filter(|id| self.contains(*id));
        while let Some(node) = cur {
            hits.extend(
                self.listeners
                    .values()
                    .filter(|e| e.node == node && e.event == event)
                    .map(|e| e.listener.clone()),
            );
            cur = self.parent(node);
        }
        hits
    }

    /// Serializes `id` and its subtree.
    pub fn to_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        html::write_node(self, id, &mut out);
        out
    }

    /// Serializes the children of `id` only.
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            html::write_node(self, *child, &mut out);
        }
        out
    }

    // ── internals ─────────────────────────────────────────────────────────

    fn data(&self, id: NodeId) -> Option<&NodeData> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.data.as_ref()
    }

    fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.data.as_mut()
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let data = NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.data = Some(data);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            data: Some(data),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    fn free_slot(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.data.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }

    fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        if let Some(data) = self.data_mut(parent) {
            data.children.retain(|c| *c != id);
        }
        if let Some(data) = self.data_mut(id) {
            data.parent = None;
        }
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, of: NodeId) -> bool {
        let mut cur = Some(of);
        while let Some(node) = cur {
            if node == candidate {
                return true;
            }
            cur = self.parent(node);
        }
        false
    }

    fn record(&mut self, mutation: Mutation) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(mutation);
        }
    }
}
