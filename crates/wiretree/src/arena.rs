//! Storage of every element produced by a pipeline

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use uuid::Uuid;

use crate::buffer::ContentBuffer;
use crate::element::{Charset, Element, ElementId};
use crate::error::ArenaError;
use crate::facets::RootFacet;
use crate::metadata::MessageMetadata;

/// Owns elements and hands out [`ElementId`]s.
///
/// Elements are only ever added; [`clear()`](Self::clear) drops them all at
/// once. Ids keep counting across clears so a stale id never resolves to a
/// newer element.
pub struct ElementArena {
    elements: DashMap<ElementId, Arc<Element>>,
    next_id:  AtomicU64,
    /// Top-level messages in arrival order
    messages: RwLock<Vec<ElementId>>,
}

impl ElementArena {
    pub fn new() -> Self {
        Self {
            elements: DashMap::new(),
            next_id:  AtomicU64::new(1),
            messages: RwLock::new(Vec::new()),
        }
    }

    fn allocate_id(&self) -> ElementId {
        ElementId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a top-level message.
    ///
    /// A fresh uuid is generated unless one is supplied (restored captures
    /// keep theirs). The message gets a [`RootFacet`].
    pub fn create_message(
        &self,
        content: ContentBuffer,
        uuid: Option<Uuid>,
        metadata: MessageMetadata,
    ) -> Arc<Element> {
        let id = self.allocate_id();
        let element = Arc::new(Element::new_message(
            id,
            uuid.unwrap_or_else(Uuid::new_v4),
            content,
            metadata,
        ));
        element.add_facet(RootFacet);
        self.elements.insert(id, Arc::clone(&element));
        self.messages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(id);
        element
    }

    /// Create a child of `parent` that inherits its charset
    pub fn create_child(
        &self,
        parent: ElementId,
        content: ContentBuffer,
    ) -> Result<Arc<Element>, ArenaError> {
        self.insert_child(parent, content, None)
    }

    /// Create a child of `parent` with its own charset
    pub fn create_child_with_charset(
        &self,
        parent: ElementId,
        content: ContentBuffer,
        charset: Charset,
    ) -> Result<Arc<Element>, ArenaError> {
        self.insert_child(parent, content, Some(charset))
    }

    fn insert_child(
        &self,
        parent: ElementId,
        content: ContentBuffer,
        charset: Option<Charset>,
    ) -> Result<Arc<Element>, ArenaError> {
        if !self.elements.contains_key(&parent) {
            return Err(ArenaError::UnknownElement(parent));
        }
        let id = self.allocate_id();
        let element = Arc::new(Element::new_child(id, parent, content, charset));
        self.elements.insert(id, Arc::clone(&element));
        Ok(element)
    }

    pub fn get(&self, id: ElementId) -> Option<Arc<Element>> {
        self.elements.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Like [`get()`](Self::get), failing with [`ArenaError::UnknownElement`]
    pub fn require(&self, id: ElementId) -> Result<Arc<Element>, ArenaError> {
        self.get(id).ok_or(ArenaError::UnknownElement(id))
    }

    pub fn parent_of(&self, element: &Element) -> Option<Arc<Element>> {
        element.parent().and_then(|parent| self.get(parent))
    }

    /// Resolved children, in [`Element::child_nodes()`] order
    pub fn children_of(&self, element: &Element) -> Vec<Arc<Element>> {
        element
            .child_nodes()
            .into_iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Resolved child under `name`, if any
    pub fn child_named(&self, element: &Element, name: &str) -> Option<Arc<Element>> {
        element
            .child_nodes_with_key()
            .get(name)
            .and_then(|id| self.get(*id))
    }

    /// Top-level messages in arrival order
    pub fn messages(&self) -> Vec<Arc<Element>> {
        let ids = self.messages.read().unwrap_or_else(|e| e.into_inner());
        ids.iter().filter_map(|id| self.get(*id)).collect()
    }

    pub fn messages_most_recent_first(&self) -> Vec<Arc<Element>> {
        let mut messages = self.messages();
        messages.reverse();
        messages
    }

    pub fn find_message(&self, uuid: Uuid) -> Option<Arc<Element>> {
        self.messages_most_recent_first()
            .into_iter()
            .find(|message| message.uuid() == uuid)
    }

    /// Walk up to the top-level message holding `element`
    pub fn top_level_of(&self, element: &Arc<Element>) -> Arc<Element> {
        let mut current = Arc::clone(element);
        while let Some(parent) = self.parent_of(&current) {
            current = parent;
        }
        current
    }

    /// Nearest charset declared on `element` or an ancestor, UTF-8 otherwise
    pub fn effective_charset(&self, element: &Element) -> Charset {
        if let Some(charset) = element.charset() {
            return charset.clone();
        }
        let mut current = self.parent_of(element);
        while let Some(ancestor) = current {
            if let Some(charset) = ancestor.charset() {
                return charset.clone();
            }
            current = self.parent_of(&ancestor);
        }
        Charset::default()
    }

    /// Content decoded with the effective charset, computed once per element
    pub fn text_of<'a>(&self, element: &'a Element) -> &'a str {
        element
            .text_cell()
            .get_or_init(|| self.effective_charset(element).decode(element.content().as_bytes()))
    }

    /// Drop every element. Ids are not reused afterwards.
    pub fn clear(&self) {
        self.messages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.elements.clear();
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl Default for ElementArena {
    fn default() -> Self {
        Self::new()
    }
}
