//! Decoding core for captured connection traffic.
//!
//! Raw chunks observed on a connection are handed to a [`Pipeline`], which
//! stores them as top-level [`Element`]s in an [`ElementArena`] and runs the
//! registered [`Converter`]s over them. Converters decorate elements with
//! [`Facet`]s and create child elements for every region they decode, so a
//! captured HTTP exchange becomes a tree whose every node still exposes its
//! exact raw bytes.
//!
//! Built in: HTTP/2 stream reassembly (via `wiretree-h2`), HTTP/1 parsing,
//! form decoding and request/response pairing.

mod arena;
mod buffer;
mod connection;
pub mod converters;
mod element;
mod error;
mod facet;
pub mod facets;
pub mod metadata;
mod multimap;
pub mod pairing;
mod persisted;
mod pipeline;

#[cfg(feature = "tracing")]
macro_rules! trace_warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn {
    ($($arg:tt)*) => {};
}
pub(crate) use trace_warn;

#[cfg(feature = "tracing")]
macro_rules! trace_debug {
    ($($arg:tt)*) => { ::tracing::debug!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug {
    ($($arg:tt)*) => {};
}
pub(crate) use trace_debug;

pub use arena::ElementArena;
pub use buffer::ContentBuffer;
pub use connection::{CapturedChunk, ConnectionId, FlowDirection};
pub use element::{Charset, Element, ElementId};
pub use error::{ArenaError, BufferError, ConversionError, MetadataError, MultimapError};
pub use facet::{AsAny, Capability, Facet, FacetRemovalListener, downcast_facet};
pub use metadata::{MessageMetadata, MetadataKey, MetadataType, MetadataValue};
pub use multimap::OrderedMultimap;
pub use persisted::PersistedMessage;
pub use pipeline::{Converter, Phase, Pipeline, PipelineConfig, PipelineHandle};
pub use wiretree_h2::H2Limits;
