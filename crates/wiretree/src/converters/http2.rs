//! Reassembles HTTP/2 streams from captured chunks

use std::borrow::Cow;
use std::sync::Arc;

use dashmap::DashMap;
use http::{Method, StatusCode, Version};
use wiretree_h2::{
    H2ConnectionState, H2Limits, H2SessionCache, ReconstructedStream, TimestampNs,
    is_http2_candidate, is_http2_preface, is_partial_preface,
};

use super::{create_body, create_text_child};
use crate::buffer::ContentBuffer;
use crate::connection::{ConnectionId, FlowDirection, connection_of};
use crate::element::{Element, ElementId};
use crate::error::ConversionError;
use crate::facet::Capability;
use crate::facets::{
    Http2FramesFacet, Http2StreamFacet, Http2StreamParts, HttpHeadersFacet, HttpRequestFacet,
    HttpResponseFacet,
};
use crate::metadata::{MessageMetadata, RECEIVER, SENDER, TIMESTAMP};
use crate::multimap::OrderedMultimap;
use crate::pipeline::{Converter, Phase, PipelineHandle};
use crate::trace_debug;

type SessionKey = (ConnectionId, FlowDirection);

/// Feeds top-level chunks to per-direction HTTP/2 reassembly and emits one
/// top-level message per completed stream.
///
/// A chunk is fed when it starts with the connection preface or a known frame
/// header, or when its connection is already being reassembled (a later chunk
/// may begin mid-frame). A chunk that is only the start of the preface is
/// held back and joined with the next chunk of the same direction. Chunks
/// without sender and receiver metadata are decoded on their own with a
/// fresh state.
pub struct Http2Converter {
    sessions:        H2SessionCache<SessionKey>,
    pending_preface: DashMap<SessionKey, Vec<u8>>,
    limits:          H2Limits,
}

impl Http2Converter {
    pub fn new() -> Self {
        Self::with_limits(H2Limits::default())
    }

    pub fn with_limits(limits: H2Limits) -> Self {
        Self {
            sessions: H2SessionCache::with_limits(limits.clone()),
            pending_preface: DashMap::new(),
            limits,
        }
    }

    /// Number of tracked connection directions
    pub fn tracked_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn is_tracked(&self, connection: ConnectionId) -> bool {
        self.sessions.contains(&(connection, FlowDirection::Forward))
            || self.sessions.contains(&(connection, FlowDirection::Reverse))
    }

    fn reassemble(&self, element: &Element) -> Result<Option<Vec<ReconstructedStream>>, ConversionError> {
        let bytes = element.content().as_bytes();
        let timestamp = timestamp_of(element);

        let completed = match connection_of(element) {
            Some((connection, direction)) => {
                let key = (connection, direction);
                let mut input = Cow::Borrowed(bytes);
                if let Some((_, mut held)) = self.pending_preface.remove(&key) {
                    held.extend_from_slice(bytes);
                    if is_partial_preface(&held) {
                        self.pending_preface.insert(key, held);
                        return Ok(Some(Vec::new()));
                    }
                    if is_http2_preface(&held) {
                        input = Cow::Owned(held);
                    } else {
                        trace_debug!("{connection}: held bytes are not an HTTP/2 preface, dropped");
                    }
                }
                if !self.is_tracked(connection) && !is_http2_candidate(&input) {
                    if is_partial_preface(&input) {
                        self.pending_preface.insert(key, input.into_owned());
                        return Ok(Some(Vec::new()));
                    }
                    return Ok(None);
                }
                self.sessions.feed(key, &input, timestamp)?
            },
            None => {
                if !is_http2_candidate(bytes) {
                    return Ok(None);
                }
                let mut state = H2ConnectionState::with_limits(self.limits.clone());
                state.feed(bytes, timestamp)?;
                std::iter::from_fn(|| state.try_pop()).collect()
            },
        };
        Ok(Some(completed.into_iter().map(|(_, stream)| stream).collect()))
    }
}

impl Default for Http2Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter for Http2Converter {
    fn name(&self) -> &'static str {
        "http2"
    }

    fn phase(&self) -> Phase {
        Phase::Framing
    }

    fn consume_element(
        &self,
        element: &Arc<Element>,
        handle: &PipelineHandle<'_>,
    ) -> Result<(), ConversionError> {
        if !element.is_top_level()
            || element.has_capability(Capability::Http2)
            || element.has_capability(Capability::HttpMessage)
        {
            return Ok(());
        }
        let Some(streams) = self.reassemble(element)? else {
            return Ok(());
        };

        let mut messages = Vec::with_capacity(streams.len());
        for stream in streams {
            let message = emit_stream(element, stream, handle)?;
            messages.push(message.id());
        }
        element.add_facet(Http2FramesFacet { messages });
        Ok(())
    }

    fn on_history_cleared(&self) {
        self.sessions.clear();
        self.pending_preface.clear();
    }

    fn on_connection_closed(&self, connection: ConnectionId) {
        for direction in [FlowDirection::Forward, FlowDirection::Reverse] {
            self.sessions.remove(&(connection, direction));
            self.pending_preface.remove(&(connection, direction));
        }
    }
}

fn timestamp_of(element: &Element) -> TimestampNs {
    let nanos = element
        .get_metadata(TIMESTAMP)
        .ok()
        .flatten()
        .and_then(|at| at.timestamp_nanos_opt())
        .and_then(|nanos| u64::try_from(nanos).ok());
    TimestampNs(nanos.unwrap_or_default())
}

/// A header list rendered as `name: value` lines, with the value range of
/// every field
struct HeaderBlock {
    element: Arc<Element>,
    ranges:  Vec<(String, usize, usize)>,
}

impl HeaderBlock {
    fn build(
        handle: &PipelineHandle<'_>,
        parent: ElementId,
        fields: &[(String, String)],
    ) -> Result<Self, ConversionError> {
        let mut text = Vec::new();
        let mut ranges = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            text.extend_from_slice(name.as_bytes());
            text.extend_from_slice(b": ");
            let start = text.len();
            text.extend_from_slice(value.as_bytes());
            ranges.push((name.clone(), start, text.len()));
            text.extend_from_slice(b"\r\n");
        }

        let element = handle.create_child(parent, ContentBuffer::from(text))?;
        let mut headers = OrderedMultimap::with_capacity(ranges.len());
        for (name, start, end) in &ranges {
            let value = handle.create_child(element.id(), element.content().sub_range(*start, *end)?)?;
            headers.put(name.clone(), value.id());
        }
        element.add_facet(HttpHeadersFacet { headers });
        Ok(Self { element, ranges })
    }

    /// Child of `parent` viewing the first value of `name`, empty if absent
    fn value_child(
        &self,
        handle: &PipelineHandle<'_>,
        parent: ElementId,
        name: &str,
    ) -> Result<Arc<Element>, ConversionError> {
        let content = match self.ranges.iter().find(|(n, _, _)| n == name) {
            Some((_, start, end)) => self.element.content().sub_range(*start, *end)?,
            None => ContentBuffer::empty(),
        };
        handle.create_child(parent, content)
    }
}

enum StreamKind {
    Request(Method),
    Response(StatusCode),
    Other,
}

fn emit_stream(
    chunk: &Element,
    mut stream: ReconstructedStream,
    handle: &PipelineHandle<'_>,
) -> Result<Arc<Element>, ConversionError> {
    let mut metadata = MessageMetadata::new();
    if let Some(sender) = chunk.get_metadata(SENDER)? {
        metadata.set(SENDER, sender);
    }
    if let Some(receiver) = chunk.get_metadata(RECEIVER)? {
        metadata.set(RECEIVER, receiver);
    }
    if let Some(timestamp) = chunk.get_metadata(TIMESTAMP)? {
        metadata.set(TIMESTAMP, timestamp);
    }

    let raw_frames = std::mem::take(&mut stream.raw_frames);
    let message = handle.emit_message(ContentBuffer::from(raw_frames), metadata);
    let id = message.id();

    let kind = match (stream.http_method(), stream.http_status()) {
        (Some(method), _) if stream.is_request() => StreamKind::Request(method),
        (_, Some(status)) => StreamKind::Response(status),
        _ => StreamKind::Other,
    };

    let headers = HeaderBlock::build(handle, id, &stream.headers)?;
    let content_type = stream.header("content-type").map(str::to_string);
    let body = create_body(
        handle,
        id,
        ContentBuffer::from(std::mem::take(&mut stream.body)),
        content_type.as_deref(),
    )?;
    let trailers = match &stream.trailers {
        Some(fields) => Some(HeaderBlock::build(handle, id, fields)?.element.id()),
        None => None,
    };
    let stream_id_element = create_text_child(handle, id, &stream.stream_id.0.to_string())?;

    let parts = matches!(kind, StreamKind::Other).then_some(Http2StreamParts {
        headers: headers.element.id(),
        body: body.id(),
        trailers,
    });
    message.add_facet(Http2StreamFacet {
        stream_id: stream.stream_id.0,
        stream_id_element: stream_id_element.id(),
        parts,
    });

    match kind {
        StreamKind::Request(method) => {
            let method_element = headers.value_child(handle, id, ":method")?;
            let path_element = headers.value_child(handle, id, ":path")?;
            let version_element = create_text_child(handle, id, "HTTP/2")?;
            message.add_facet(HttpRequestFacet {
                method,
                path: stream.path().unwrap_or_default().to_string(),
                version: Version::HTTP_2,
                method_element: method_element.id(),
                path_element: path_element.id(),
                version_element: version_element.id(),
                headers_element: headers.element.id(),
                body_element: body.id(),
                trailers_element: trailers,
            });
        },
        StreamKind::Response(status) => {
            let version_element = create_text_child(handle, id, "HTTP/2")?;
            let status_element = headers.value_child(handle, id, ":status")?;
            message.add_facet(HttpResponseFacet {
                status,
                version: Version::HTTP_2,
                version_element: version_element.id(),
                status_element: status_element.id(),
                reason_element: None,
                headers_element: headers.element.id(),
                body_element: body.id(),
                trailers_element: trailers,
            });
        },
        StreamKind::Other => {},
    }

    trace_debug!(
        "HTTP/2 stream {} emitted as element {}",
        stream.stream_id.0,
        message.id()
    );
    handle.submit(&body);
    handle.submit(&message);
    Ok(message)
}
