//! Error types

use thiserror::Error;

use crate::element::ElementId;

/// Out-of-bounds access on a [`ContentBuffer`](crate::ContentBuffer)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("index {index} out of range for buffer of {size} bytes")]
    OutOfRange { index: usize, size: usize },

    #[error("invalid range {start}..{end} for buffer of {size} bytes")]
    InvalidRange {
        start: usize,
        end:   usize,
        size:  usize,
    },
}

/// Precondition violations on an [`OrderedMultimap`](crate::OrderedMultimap)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultimapError {
    #[error("cannot replace unique entry: key is present {count} times")]
    AmbiguousReplace { count: usize },
}

/// Typed metadata access failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata `{key}` holds {found}, which does not convert to {expected}")]
    TypeMismatch {
        key:      String,
        expected: &'static str,
        found:    &'static str,
    },

    #[error("element {0} is not a top-level message and carries no metadata")]
    NotTopLevel(ElementId),
}

/// Element lookup failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    #[error("unknown element {0}")]
    UnknownElement(ElementId),
}

/// Failure of one converter on one element.
///
/// Recorded on the element as a
/// [`ConversionErrorFacet`](crate::facets::ConversionErrorFacet); the
/// pipeline never propagates it.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Multimap(#[from] MultimapError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error("HTTP/2 reassembly failed: {0}")]
    Http2(#[from] wiretree_h2::ParseError),

    #[error("malformed HTTP/1 message head: {0}")]
    Http1(#[from] httparse::Error),

    #[error("invalid message uuid: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid persisted content: {0}")]
    InvalidContent(#[from] base64::DecodeError),

    #[error("malformed content: {0}")]
    Malformed(String),

    #[error("conversion depth {depth} exceeds the limit of {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("converter `{converter}` panicked: {message}")]
    Panicked { converter: String, message: String },
}
