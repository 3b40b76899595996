//! HTTP/1.x message parsing

use std::sync::Arc;

use http::{Method, StatusCode, Version};

use super::create_body;
use crate::buffer::ContentBuffer;
use crate::element::{Element, ElementId};
use crate::error::ConversionError;
use crate::facet::Capability;
use crate::facets::{HttpHeadersFacet, HttpRequestFacet, HttpResponseFacet, ListFacet};
use crate::multimap::OrderedMultimap;
use crate::pipeline::{Converter, Phase, PipelineHandle};
use crate::trace_debug;

const MAX_HEADERS: usize = 128;

/// Check if data starts with an HTTP/1.x request
pub fn is_http1_request(data: &[u8]) -> bool {
    const METHODS: [&[u8]; 9] = [
        b"GET ",
        b"POST ",
        b"PUT ",
        b"DELETE ",
        b"HEAD ",
        b"OPTIONS ",
        b"PATCH ",
        b"CONNECT ",
        b"TRACE ",
    ];
    METHODS.iter().any(|method| data.starts_with(method))
}

/// Check if data starts with an HTTP/1.x response
pub fn is_http1_response(data: &[u8]) -> bool {
    data.starts_with(b"HTTP/1.")
}

/// Parses top-level HTTP/1.x requests and responses.
///
/// Every part of the head is a view into the message buffer. A head that is
/// not complete yet is left alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct Http1Converter;

impl Converter for Http1Converter {
    fn name(&self) -> &'static str {
        "http1"
    }

    fn phase(&self) -> Phase {
        Phase::ProtocolParsing
    }

    fn consume_element(
        &self,
        element: &Arc<Element>,
        handle: &PipelineHandle<'_>,
    ) -> Result<(), ConversionError> {
        if !element.is_top_level()
            || element.has_capability(Capability::HttpMessage)
            || element.has_capability(Capability::Http2)
        {
            return Ok(());
        }
        let data = element.content().as_bytes();
        let body = if is_http1_request(data) {
            parse_request(element, handle)?
        } else if is_http1_response(data) {
            parse_response(element, handle)?
        } else {
            None
        };
        if let Some(body) = body {
            handle.submit(&body);
        }
        Ok(())
    }
}

/// Result of body determination for an HTTP/1.x message.
enum Body {
    /// `start..end` of the message buffer
    Range(usize, usize),
    /// Decoded chunked body and the range of every chunk's data
    Chunked {
        decoded: Vec<u8>,
        chunks:  Vec<(usize, usize)>,
    },
}

/// Parsed head shared by requests and responses
struct Head {
    /// Ranges of the three start-line tokens
    start_line:   [(usize, usize); 3],
    headers:      Vec<(String, (usize, usize))>,
    header_block: (usize, usize),
    body:         Body,
    content_type: Option<String>,
}

fn parse_request(
    element: &Arc<Element>,
    handle: &PipelineHandle<'_>,
) -> Result<Option<Arc<Element>>, ConversionError> {
    let content = element.content();
    let data = content.as_bytes();
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    let httparse::Status::Complete(head_len) = request.parse(data)? else {
        trace_debug!("HTTP/1 request head in element {} is incomplete", element.id());
        return Ok(None);
    };
    let (Some(method), Some(path), Some(minor)) = (request.method, request.path, request.version)
    else {
        return Err(ConversionError::Malformed("request line is incomplete".to_string()));
    };
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| ConversionError::Malformed(format!("invalid method: {e}")))?;
    let path = path.to_string();

    let start_line = split_request_line(data)
        .ok_or_else(|| ConversionError::Malformed("request line is not three tokens".to_string()))?;
    let head = Head::parse(data, request.headers, head_len, start_line, None)?;

    let id = element.id();
    let [method_range, path_range, version_range] = head.start_line;
    let method_element = handle.create_child(id, view(content, method_range)?)?;
    let path_element = handle.create_child(id, view(content, path_range)?)?;
    let version_element = handle.create_child(id, view(content, version_range)?)?;
    let headers_element = create_headers(handle, content, id, &head)?;
    let body = create_message_body(handle, content, id, head.body, head.content_type.as_deref())?;

    element.add_facet(HttpRequestFacet {
        method,
        path,
        version: http_version(minor),
        method_element: method_element.id(),
        path_element: path_element.id(),
        version_element: version_element.id(),
        headers_element: headers_element.id(),
        body_element: body.id(),
        trailers_element: None,
    });
    Ok(Some(body))
}

fn parse_response(
    element: &Arc<Element>,
    handle: &PipelineHandle<'_>,
) -> Result<Option<Arc<Element>>, ConversionError> {
    let content = element.content();
    let data = content.as_bytes();
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let httparse::Status::Complete(head_len) = response.parse(data)? else {
        trace_debug!("HTTP/1 response head in element {} is incomplete", element.id());
        return Ok(None);
    };
    let (Some(code), Some(minor)) = (response.code, response.version) else {
        return Err(ConversionError::Malformed("status line is incomplete".to_string()));
    };
    let status = StatusCode::from_u16(code)
        .map_err(|e| ConversionError::Malformed(format!("invalid status code: {e}")))?;

    let start_line = split_status_line(data)
        .ok_or_else(|| ConversionError::Malformed("status line has no status code".to_string()))?;
    let head = Head::parse(data, response.headers, head_len, start_line, Some(code))?;

    let id = element.id();
    let [version_range, status_range, reason_range] = head.start_line;
    let version_element = handle.create_child(id, view(content, version_range)?)?;
    let status_element = handle.create_child(id, view(content, status_range)?)?;
    let reason_element = handle.create_child(id, view(content, reason_range)?)?;
    let headers_element = create_headers(handle, content, id, &head)?;
    let body = create_message_body(handle, content, id, head.body, head.content_type.as_deref())?;

    element.add_facet(HttpResponseFacet {
        status,
        version: http_version(minor),
        version_element: version_element.id(),
        status_element: status_element.id(),
        reason_element: Some(reason_element.id()),
        headers_element: headers_element.id(),
        body_element: body.id(),
        trailers_element: None,
    });
    Ok(Some(body))
}

impl Head {
    fn parse(
        data: &[u8],
        headers: &[httparse::Header<'_>],
        head_len: usize,
        start_line: [(usize, usize); 3],
        response_status: Option<u16>,
    ) -> Result<Self, ConversionError> {
        let mut fields = Vec::with_capacity(headers.len());
        for header in headers {
            let value = offset_in(data, header.value).unwrap_or((head_len, head_len));
            fields.push((header.name.to_string(), value));
        }
        let content_type = headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-type"))
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .map(str::to_string);

        let block_start = line_end(data, 0).map_or(head_len, |end| end + 1);
        // Last header line terminator plus the blank line
        let terminator = if data[..head_len].ends_with(b"\r\n\r\n") { 4 } else { 2 };
        let block_end = head_len.saturating_sub(terminator).max(block_start);

        Ok(Self {
            start_line,
            headers: fields,
            header_block: (block_start, block_end),
            body: determine_body(headers, data, head_len, response_status)?,
            content_type,
        })
    }
}

fn http_version(minor: u8) -> Version {
    match minor {
        0 => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

fn create_headers(
    handle: &PipelineHandle<'_>,
    content: &ContentBuffer,
    parent: ElementId,
    head: &Head,
) -> Result<Arc<Element>, ConversionError> {
    let element = handle.create_child(parent, view(content, head.header_block)?)?;
    let mut headers = OrderedMultimap::with_capacity(head.headers.len());
    for (name, range) in &head.headers {
        let value = handle.create_child(element.id(), view(content, *range)?)?;
        headers.put(name.clone(), value.id());
    }
    element.add_facet(HttpHeadersFacet { headers });
    Ok(element)
}

fn create_message_body(
    handle: &PipelineHandle<'_>,
    content: &ContentBuffer,
    parent: ElementId,
    body: Body,
    content_type: Option<&str>,
) -> Result<Arc<Element>, ConversionError> {
    match body {
        Body::Range(start, end) => create_body(handle, parent, view(content, (start, end))?, content_type),
        Body::Chunked { decoded, chunks } => {
            let element = create_body(handle, parent, ContentBuffer::from(decoded), content_type)?;
            let mut items = Vec::with_capacity(chunks.len());
            for range in chunks {
                items.push(handle.create_child(element.id(), view(content, range)?)?.id());
            }
            element.add_facet(ListFacet { items });
            Ok(element)
        },
    }
}

fn view(content: &ContentBuffer, (start, end): (usize, usize)) -> Result<ContentBuffer, ConversionError> {
    Ok(content.sub_range(start, end)?)
}

/// Range of `part` inside `data`, if it borrows from it
fn offset_in(data: &[u8], part: &[u8]) -> Option<(usize, usize)> {
    let start = (part.as_ptr() as usize).checked_sub(data.as_ptr() as usize)?;
    let end = start.checked_add(part.len())?;
    (end <= data.len()).then_some((start, end))
}

/// Index of the `\n` ending the line that starts at `from`
fn line_end(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| from + p)
}

/// First line without its line terminator
fn first_line(data: &[u8]) -> Option<&[u8]> {
    let line = &data[..line_end(data, 0)?];
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

/// Method, target and version of `METHOD SP target SP version`
fn split_request_line(data: &[u8]) -> Option<[(usize, usize); 3]> {
    let line = first_line(data)?;
    let first = line.iter().position(|&b| b == b' ')?;
    let last = line.iter().rposition(|&b| b == b' ')?;
    (first < last).then_some([(0, first), (first + 1, last), (last + 1, line.len())])
}

/// Version, status code and reason of `version SP code [SP reason]`
fn split_status_line(data: &[u8]) -> Option<[(usize, usize); 3]> {
    let line = first_line(data)?;
    let first = line.iter().position(|&b| b == b' ')?;
    let code_start = first + 1;
    Some(
        match line[code_start..].iter().position(|&b| b == b' ') {
            Some(p) => {
                let code_end = code_start + p;
                [(0, first), (code_start, code_end), (code_end + 1, line.len())]
            },
            None => [(0, first), (code_start, line.len()), (line.len(), line.len())],
        },
    )
}

/// Determine the body of an HTTP/1.x message based on headers and available
/// data.
///
/// - Content-Length: the declared length, cut short if the buffer ends first
/// - Transfer-Encoding: chunked: walks chunk boundaries to decode the body
/// - Neither (request, or 1xx/204/304 response): empty
/// - Neither (other responses): the rest of the buffer
///
/// `response_status`: `None` for requests, `Some(code)` for responses.
fn determine_body(
    headers: &[httparse::Header<'_>],
    data: &[u8],
    body_start: usize,
    response_status: Option<u16>,
) -> Result<Body, ConversionError> {
    let available = data.len() - body_start;

    if let Some(h) = headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("Content-Length"))
    {
        let content_length = std::str::from_utf8(h.value)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or_else(|| ConversionError::Malformed("invalid Content-Length".to_string()))?;
        return Ok(Body::Range(body_start, body_start + content_length.min(available)));
    }

    let chunked = headers.iter().any(|h| {
        h.name.eq_ignore_ascii_case("Transfer-Encoding")
            && std::str::from_utf8(h.value).is_ok_and(|v| v.to_ascii_lowercase().contains("chunked"))
    });
    if chunked {
        return Ok(decode_chunked_body(data, body_start));
    }

    Ok(match response_status {
        None => Body::Range(body_start, body_start),
        Some(code) if (100..200).contains(&code) || code == 204 || code == 304 => {
            Body::Range(body_start, body_start)
        },
        Some(_) => Body::Range(body_start, data.len()),
    })
}

/// Walk chunk boundaries to decode a chunked transfer-encoded body.
///
/// Chunk format: `[hex-size][;ext=val]\r\n[data]\r\n` terminated by a zero
/// size chunk. Decoding stops at the terminator or where the data runs out or
/// stops making sense; whatever was decoded up to there is the body.
fn decode_chunked_body(data: &[u8], start: usize) -> Body {
    let mut decoded = Vec::new();
    let mut chunks = Vec::new();
    let mut pos = start;

    while let Some(line_end) = find_crlf(data, pos) {
        let size_bytes = &data[pos..line_end];
        let size_part = match size_bytes.iter().position(|&b| b == b';') {
            Some(semi_pos) => &size_bytes[..semi_pos],
            None => size_bytes,
        };
        let Some(chunk_size) = std::str::from_utf8(size_part)
            .ok()
            .and_then(|s| usize::from_str_radix(s.trim(), 16).ok())
        else {
            break;
        };
        pos = line_end + 2;
        if chunk_size == 0 {
            break;
        }

        let wanted = pos.saturating_add(chunk_size);
        let end = wanted.min(data.len());
        decoded.extend_from_slice(&data[pos..end]);
        chunks.push((pos, end));
        if end < wanted || data.get(end..end + 2) != Some(b"\r\n".as_slice()) {
            break;
        }
        pos = end + 2;
    }
    Body::Chunked { decoded, chunks }
}

/// Find the position of `\r\n` starting at `from` in `data`.
fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}
