//! Built-in facet kinds

use http::{Method, StatusCode, Version};
use uuid::Uuid;

use crate::element::{Charset, ElementId};
use crate::error::ConversionError;
use crate::facet::{Capability, Facet};
use crate::multimap::OrderedMultimap;

/// Marks a top-level message (captured, restored or emitted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootFacet;

impl Facet for RootFacet {
    fn kind(&self) -> &'static str {
        "root"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::RootMarker]
    }
}

/// Parsed HTTP request, with each part available as a child element.
#[derive(Debug, Clone)]
pub struct HttpRequestFacet {
    pub method:           Method,
    pub path:             String,
    pub version:          Version,
    pub method_element:   ElementId,
    pub path_element:     ElementId,
    pub version_element:  ElementId,
    pub headers_element:  ElementId,
    pub body_element:     ElementId,
    pub trailers_element: Option<ElementId>,
}

impl Facet for HttpRequestFacet {
    fn kind(&self) -> &'static str {
        "httpRequest"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::HttpMessage, Capability::HttpRequest]
    }

    fn children(&self) -> OrderedMultimap<String, ElementId> {
        let mut children = OrderedMultimap::with_capacity(6);
        children.put("method".to_string(), self.method_element);
        children.put("path".to_string(), self.path_element);
        children.put("protocolVersion".to_string(), self.version_element);
        children.put("headers".to_string(), self.headers_element);
        children.put("body".to_string(), self.body_element);
        if let Some(trailers) = self.trailers_element {
            children.put("trailers".to_string(), trailers);
        }
        children
    }
}

/// Parsed HTTP response.
///
/// `reason_element` is absent for HTTP/2, which has no reason phrase.
#[derive(Debug, Clone)]
pub struct HttpResponseFacet {
    pub status:           StatusCode,
    pub version:          Version,
    pub version_element:  ElementId,
    pub status_element:   ElementId,
    pub reason_element:   Option<ElementId>,
    pub headers_element:  ElementId,
    pub body_element:     ElementId,
    pub trailers_element: Option<ElementId>,
}

impl Facet for HttpResponseFacet {
    fn kind(&self) -> &'static str {
        "httpResponse"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::HttpMessage, Capability::HttpResponse]
    }

    fn children(&self) -> OrderedMultimap<String, ElementId> {
        let mut children = OrderedMultimap::with_capacity(6);
        children.put("protocolVersion".to_string(), self.version_element);
        children.put("statusCode".to_string(), self.status_element);
        if let Some(reason) = self.reason_element {
            children.put("reasonPhrase".to_string(), reason);
        }
        children.put("headers".to_string(), self.headers_element);
        children.put("body".to_string(), self.body_element);
        if let Some(trailers) = self.trailers_element {
            children.put("trailers".to_string(), trailers);
        }
        children
    }
}

/// Header values keyed by name, in wire order.
#[derive(Debug, Clone, Default)]
pub struct HttpHeadersFacet {
    pub headers: OrderedMultimap<String, ElementId>,
}

impl Facet for HttpHeadersFacet {
    fn kind(&self) -> &'static str {
        "httpHeaders"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::HeaderMap, Capability::Map]
    }

    fn children(&self) -> OrderedMultimap<String, ElementId> {
        self.headers.clone()
    }
}

/// Attached to a captured chunk that was fed to HTTP/2 reassembly.
#[derive(Debug, Clone, Default)]
pub struct Http2FramesFacet {
    /// Stream messages the chunk completed
    pub messages: Vec<ElementId>,
}

impl Facet for Http2FramesFacet {
    fn kind(&self) -> &'static str {
        "http2Frames"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Http2]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Http2StreamParts {
    pub headers:  ElementId,
    pub body:     ElementId,
    pub trailers: Option<ElementId>,
}

/// A reassembled HTTP/2 stream.
///
/// When the stream is neither a request nor a response its headers, body and
/// trailers hang off this facet instead of an HTTP facet.
#[derive(Debug, Clone)]
pub struct Http2StreamFacet {
    pub stream_id:         u32,
    pub stream_id_element: ElementId,
    pub parts:             Option<Http2StreamParts>,
}

impl Facet for Http2StreamFacet {
    fn kind(&self) -> &'static str {
        "http2Stream"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Http2]
    }

    fn children(&self) -> OrderedMultimap<String, ElementId> {
        let mut children = OrderedMultimap::new();
        children.put("streamId".to_string(), self.stream_id_element);
        if let Some(parts) = self.parts {
            children.put("headers".to_string(), parts.headers);
            children.put("body".to_string(), parts.body);
            if let Some(trailers) = parts.trailers {
                children.put("trailers".to_string(), trailers);
            }
        }
        children
    }
}

/// Declared media type of a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeFacet {
    /// Lowercased `type/subtype`
    pub mime_type: String,
    pub charset:   Option<Charset>,
}

impl ContentTypeFacet {
    /// Parse a `content-type` header value
    pub fn parse(value: &str) -> Self {
        let mut params = value.split(';');
        let mime_type = params
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let charset = params.find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| Charset::from_label(value))
        });
        Self { mime_type, charset }
    }

    pub fn is(&self, mime_type: &str) -> bool {
        self.mime_type.eq_ignore_ascii_case(mime_type)
    }
}

impl Facet for ContentTypeFacet {
    fn kind(&self) -> &'static str {
        "contentType"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::ContentType]
    }
}

/// Name-keyed children, duplicates preserved.
#[derive(Debug, Clone, Default)]
pub struct MapFacet {
    pub entries: OrderedMultimap<String, ElementId>,
}

impl Facet for MapFacet {
    fn kind(&self) -> &'static str {
        "map"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Map]
    }

    fn children(&self) -> OrderedMultimap<String, ElementId> {
        self.entries.clone()
    }
}

/// Children keyed by their position.
#[derive(Debug, Clone, Default)]
pub struct ListFacet {
    pub items: Vec<ElementId>,
}

impl Facet for ListFacet {
    fn kind(&self) -> &'static str {
        "list"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::List]
    }

    fn children(&self) -> OrderedMultimap<String, ElementId> {
        self.items
            .iter()
            .enumerate()
            .map(|(index, id)| (index.to_string(), *id))
            .collect()
    }
}

/// Text obtained by decoding the element's bytes (e.g. percent-decoding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTextFacet {
    pub text: String,
}

impl Facet for DecodedTextFacet {
    fn kind(&self) -> &'static str {
        "decodedText"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingRole {
    Request,
    Response,
}

/// Link between a request and its response.
///
/// Both messages carry one, each naming the other. There is no child link so
/// the tree stays acyclic.
#[derive(Debug, Clone)]
pub struct PairingFacet {
    pub partner:      ElementId,
    pub partner_uuid: Uuid,
    /// Role of the element carrying this facet
    pub role:         PairingRole,
}

impl Facet for PairingFacet {
    fn kind(&self) -> &'static str {
        "pairing"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Pairing]
    }
}

/// A converter failed on this element; its raw content is untouched.
#[derive(Debug)]
pub struct ConversionErrorFacet {
    pub converter: &'static str,
    pub error:     ConversionError,
}

impl Facet for ConversionErrorFacet {
    fn kind(&self) -> &'static str {
        "conversionError"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::ConversionError]
    }
}
