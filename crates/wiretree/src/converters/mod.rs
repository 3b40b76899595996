//! Built-in converters

mod form;
mod http1;
mod http2;

use std::sync::Arc;

pub use form::{FormUrlEncodedConverter, percent_decode};
pub use http1::{Http1Converter, is_http1_request, is_http1_response};
pub use http2::Http2Converter;

use crate::buffer::ContentBuffer;
use crate::element::{Element, ElementId};
use crate::error::ConversionError;
use crate::facets::ContentTypeFacet;
use crate::pipeline::PipelineHandle;

/// Create the body child of `parent`.
///
/// When a content type is declared the body gets a [`ContentTypeFacet`] and
/// the declared charset.
pub(crate) fn create_body(
    handle: &PipelineHandle<'_>,
    parent: ElementId,
    content: ContentBuffer,
    content_type: Option<&str>,
) -> Result<Arc<Element>, ConversionError> {
    let content_type = content_type.map(ContentTypeFacet::parse);
    let body = match content_type.as_ref().and_then(|ct| ct.charset.clone()) {
        Some(charset) => handle.create_child_with_charset(parent, content, charset)?,
        None => handle.create_child(parent, content)?,
    };
    if let Some(content_type) = content_type {
        body.add_facet(content_type);
    }
    Ok(body)
}

/// Create a child whose content is a fresh copy of `text`
pub(crate) fn create_text_child(
    handle: &PipelineHandle<'_>,
    parent: ElementId,
    text: &str,
) -> Result<Arc<Element>, ConversionError> {
    handle.create_child(parent, ContentBuffer::copy_from_slice(text.as_bytes()))
}
