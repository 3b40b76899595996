//! Facet trait and capability lookup

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::element::ElementId;
use crate::multimap::OrderedMultimap;

/// What a facet can be asked for, independently of its concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Any HTTP request or response
    HttpMessage,
    HttpRequest,
    HttpResponse,
    /// Named header values in wire order
    HeaderMap,
    /// Index-keyed items
    List,
    /// Name-keyed entries
    Map,
    /// Produced by HTTP/2 reassembly
    Http2,
    /// Linked to a request or response
    Pairing,
    /// A converter failed on this element
    ConversionError,
    ContentType,
    /// Top-level captured or restored message
    RootMarker,
}

/// Upcasting helpers implemented for every facet type.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A typed decoration attached to an element.
///
/// Several facets may coexist on one element, each describing one
/// interpretation of its bytes. Facets never own elements; they name them by
/// [`ElementId`] through [`children()`](Self::children).
pub trait Facet: AsAny + fmt::Debug {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Capabilities this facet answers to
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Named child elements, in the order they should be presented
    fn children(&self) -> OrderedMultimap<String, ElementId> {
        OrderedMultimap::new()
    }
}

impl dyn Facet {
    /// Returns true if this facet is a `T`
    pub fn is<T: Facet>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Returns true if this facet answers to `capability`
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

/// Downcast a shared facet to its concrete type
pub fn downcast_facet<T: Facet>(facet: &Arc<dyn Facet>) -> Option<Arc<T>> {
    Arc::clone(facet).into_any_arc().downcast::<T>().ok()
}

/// Notified when facets are removed from an element.
pub trait FacetRemovalListener: Send + Sync {
    fn facet_removed(&self, element: ElementId, facet: &Arc<dyn Facet>);
}

impl<F> FacetRemovalListener for F
where
    F: Fn(ElementId, &Arc<dyn Facet>) + Send + Sync,
{
    fn facet_removed(&self, element: ElementId, facet: &Arc<dyn Facet>) {
        self(element, facet)
    }
}
