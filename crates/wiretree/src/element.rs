//! Tree nodes: one decoded or raw region of captured traffic

use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use uuid::Uuid;

use crate::buffer::ContentBuffer;
use crate::error::MetadataError;
use crate::facet::{Capability, Facet, FacetRemovalListener, downcast_facet};
use crate::metadata::{MessageMetadata, MetadataKey, MetadataType};
use crate::multimap::OrderedMultimap;

/// Stable handle of an element inside its [`ElementArena`](crate::ElementArena).
///
/// Ids are handed out monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Character encoding used to render an element's bytes as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Iso8859_1,
    UsAscii,
    /// A label we do not decode natively; rendered as lossy UTF-8
    Other(String),
}

impl Charset {
    /// Map a charset label (as found in a `content-type` parameter)
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().trim_matches('"');
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Self::Utf8,
            "iso-8859-1" | "iso8859-1" | "latin1" | "l1" => Self::Iso8859_1,
            "us-ascii" | "ascii" => Self::UsAscii,
            _ => Self::Other(label.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Iso8859_1 => "iso-8859-1",
            Self::UsAscii => "us-ascii",
            Self::Other(label) => label,
        }
    }

    /// Decode `bytes`, replacing anything unrepresentable
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Iso8859_1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Self::UsAscii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        char::from(b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
            Self::Utf8 | Self::Other(_) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

type FacetList = Arc<Vec<Arc<dyn Facet>>>;

/// One node of a decoded message tree.
///
/// The parent link is fixed at construction; children are not stored here but
/// derived from the attached facets. Facets are kept in a copy-on-write list:
/// readers take a snapshot, so a facet added while another thread iterates is
/// simply not part of that iteration.
pub struct Element {
    id:        ElementId,
    uuid:      Uuid,
    parent:    Option<ElementId>,
    content:   ContentBuffer,
    charset:   Option<Charset>,
    facets:    RwLock<FacetList>,
    listeners: RwLock<Vec<Arc<dyn FacetRemovalListener>>>,
    /// Present only on top-level messages
    metadata:  Option<RwLock<MessageMetadata>>,
    text:      OnceLock<String>,
}

impl Element {
    pub(crate) fn new_message(
        id: ElementId,
        uuid: Uuid,
        content: ContentBuffer,
        metadata: MessageMetadata,
    ) -> Self {
        Self::build(id, uuid, None, content, None, Some(metadata))
    }

    pub(crate) fn new_child(
        id: ElementId,
        parent: ElementId,
        content: ContentBuffer,
        charset: Option<Charset>,
    ) -> Self {
        Self::build(id, Uuid::new_v4(), Some(parent), content, charset, None)
    }

    fn build(
        id: ElementId,
        uuid: Uuid,
        parent: Option<ElementId>,
        content: ContentBuffer,
        charset: Option<Charset>,
        metadata: Option<MessageMetadata>,
    ) -> Self {
        Self {
            id,
            uuid,
            parent,
            content,
            charset,
            facets: RwLock::new(Arc::new(Vec::new())),
            listeners: RwLock::new(Vec::new()),
            metadata: metadata.map(RwLock::new),
            text: OnceLock::new(),
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    /// Returns true for captured, restored or emitted messages
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// The bytes this element denotes
    pub fn content(&self) -> &ContentBuffer {
        &self.content
    }

    /// Charset declared on this element itself (not inherited)
    pub fn charset(&self) -> Option<&Charset> {
        self.charset.as_ref()
    }

    pub(crate) fn text_cell(&self) -> &OnceLock<String> {
        &self.text
    }

    // ---- facets ----------------------------------------------------------

    /// Snapshot of the attached facets in insertion order
    pub fn facets(&self) -> FacetList {
        Arc::clone(&self.facets.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Append a facet
    pub fn add_facet<F: Facet>(&self, facet: F) {
        self.add_facet_arc(Arc::new(facet));
    }

    /// Append an already shared facet
    pub fn add_facet_arc(&self, facet: Arc<dyn Facet>) {
        let mut facets = self.facets.write().unwrap_or_else(|e| e.into_inner());
        Arc::make_mut(&mut facets).push(facet);
    }

    /// First facet of type `T`
    pub fn facet<T: Facet>(&self) -> Option<Arc<T>> {
        self.facets().iter().find_map(downcast_facet::<T>)
    }

    /// First facet answering to `capability`
    pub fn facet_with(&self, capability: Capability) -> Option<Arc<dyn Facet>> {
        self.facets()
            .iter()
            .find(|facet| facet.has_capability(capability))
            .cloned()
    }

    pub fn has_facet<T: Facet>(&self) -> bool {
        self.facets().iter().any(|facet| facet.is::<T>())
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.facet_with(capability).is_some()
    }

    /// Remove every facet of type `T`, then append `facet`.
    ///
    /// Removal listeners are notified once per removed facet, after the new
    /// facet is in place.
    pub fn add_or_replace_facet<F: Facet>(&self, facet: F) {
        let removed = {
            let mut facets = self.facets.write().unwrap_or_else(|e| e.into_inner());
            let list = Arc::make_mut(&mut facets);
            let removed = take_facets_of_type::<F>(list);
            list.push(Arc::new(facet));
            removed
        };
        self.notify_removed(&removed);
    }

    /// Remove every facet of type `T`, returning how many were removed
    pub fn remove_facets_of_type<T: Facet>(&self) -> usize {
        let removed = {
            let mut facets = self.facets.write().unwrap_or_else(|e| e.into_inner());
            if !facets.iter().any(|facet| facet.is::<T>()) {
                return 0;
            }
            take_facets_of_type::<T>(Arc::make_mut(&mut facets))
        };
        self.notify_removed(&removed);
        removed.len()
    }

    /// Register a listener for facet removals on this element
    pub fn subscribe_facet_removals(&self, listener: Arc<dyn FacetRemovalListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    fn notify_removed(&self, removed: &[Arc<dyn Facet>]) {
        if removed.is_empty() {
            return;
        }
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for facet in removed {
            for listener in &listeners {
                listener.facet_removed(self.id, facet);
            }
        }
    }

    // ---- children --------------------------------------------------------

    /// Child elements by name: every facet's children, concatenated in facet
    /// insertion order
    pub fn child_nodes_with_key(&self) -> OrderedMultimap<String, ElementId> {
        let mut children = OrderedMultimap::new();
        for facet in self.facets().iter() {
            children.extend(facet.children());
        }
        children
    }

    /// Child elements in presentation order
    pub fn child_nodes(&self) -> Vec<ElementId> {
        self.child_nodes_with_key().into_iter().map(|(_, id)| id).collect()
    }

    // ---- metadata --------------------------------------------------------

    /// Read a typed metadata value, converting it when stored as another type
    pub fn get_metadata<T: MetadataType>(
        &self,
        key: MetadataKey<T>,
    ) -> Result<Option<T>, MetadataError> {
        let metadata = self.metadata_lock()?;
        let metadata = metadata.read().unwrap_or_else(|e| e.into_inner());
        metadata.get(key)
    }

    /// Store a typed metadata value, replacing any previous one
    pub fn set_metadata<T: MetadataType>(
        &self,
        key: MetadataKey<T>,
        value: T,
    ) -> Result<(), MetadataError> {
        let metadata = self.metadata_lock()?;
        metadata
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set(key, value);
        Ok(())
    }

    /// Copy of the whole metadata bag
    pub fn metadata(&self) -> Result<MessageMetadata, MetadataError> {
        let metadata = self.metadata_lock()?;
        let snapshot = metadata.read().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(snapshot)
    }

    fn metadata_lock(&self) -> Result<&RwLock<MessageMetadata>, MetadataError> {
        self.metadata
            .as_ref()
            .ok_or(MetadataError::NotTopLevel(self.id))
    }
}

fn take_facets_of_type<T: Facet>(list: &mut Vec<Arc<dyn Facet>>) -> Vec<Arc<dyn Facet>> {
    let (removed, kept) = std::mem::take(list)
        .into_iter()
        .partition(|facet| facet.is::<T>());
    *list = kept;
    removed
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&'static str> = self.facets().iter().map(|facet| facet.kind()).collect();
        f.debug_struct("Element")
            .field("id", &self.id)
            .field("uuid", &self.uuid)
            .field("parent", &self.parent)
            .field("content", &self.content)
            .field("facets", &kinds)
            .finish()
    }
}
