// Shared by the reassembly tests and the pipeline tests, which each use a
// different subset.
#![allow(dead_code)]
//! Byte builders for captured HTTP/2 traffic

pub const FRAME_TYPE_DATA: u8 = 0x00;
pub const FRAME_TYPE_HEADERS: u8 = 0x01;
pub const FRAME_TYPE_PRIORITY: u8 = 0x02;
pub const FRAME_TYPE_RST_STREAM: u8 = 0x03;
pub const FRAME_TYPE_SETTINGS: u8 = 0x04;
pub const FRAME_TYPE_PING: u8 = 0x06;
pub const FRAME_TYPE_WINDOW_UPDATE: u8 = 0x08;
pub const FRAME_TYPE_CONTINUATION: u8 = 0x09;

pub const FLAG_END_STREAM: u8 = 0x01;
pub const FLAG_END_HEADERS: u8 = 0x04;
pub const FLAG_PADDED: u8 = 0x08;
pub const FLAG_PRIORITY: u8 = 0x20;
/// SETTINGS and PING acknowledgement
pub const FLAG_ACK: u8 = 0x01;

/// Frame header followed by `payload`
pub fn build_frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let length = payload.len() as u32;
    let mut frame = length.to_be_bytes()[1..].to_vec();
    frame.push(frame_type);
    frame.push(flags);
    frame.extend_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub fn build_data_frame(stream_id: u32, data: &[u8], end_stream: bool) -> Vec<u8> {
    let flags = if end_stream { FLAG_END_STREAM } else { 0 };
    build_frame(FRAME_TYPE_DATA, flags, stream_id, data)
}

/// DATA carrying `padding_len` zero bytes of padding
pub fn build_data_frame_padded(
    stream_id: u32,
    data: &[u8],
    padding_len: u8,
    end_stream: bool,
) -> Vec<u8> {
    let mut flags = FLAG_PADDED;
    if end_stream {
        flags |= FLAG_END_STREAM;
    }
    let mut payload = vec![padding_len];
    payload.extend_from_slice(data);
    payload.extend(std::iter::repeat_n(0u8, padding_len as usize));
    build_frame(FRAME_TYPE_DATA, flags, stream_id, &payload)
}

pub fn build_headers_frame(stream_id: u32, hpack_block: &[u8], flags: u8) -> Vec<u8> {
    build_frame(FRAME_TYPE_HEADERS, flags, stream_id, hpack_block)
}

/// HEADERS with END_HEADERS and END_STREAM
pub fn build_complete_headers_frame(stream_id: u32, hpack_block: &[u8]) -> Vec<u8> {
    build_headers_frame(stream_id, hpack_block, FLAG_END_HEADERS | FLAG_END_STREAM)
}

/// HEADERS with both PADDED and PRIORITY, the exclusive bit set on the
/// dependency
pub fn build_headers_frame_padded_priority(
    stream_id: u32,
    hpack_block: &[u8],
    padding_len: u8,
    stream_dependency: u32,
    weight: u8,
    end_stream: bool,
) -> Vec<u8> {
    let mut flags = FLAG_PADDED | FLAG_PRIORITY | FLAG_END_HEADERS;
    if end_stream {
        flags |= FLAG_END_STREAM;
    }
    let mut payload = vec![padding_len];
    payload.extend_from_slice(&(stream_dependency | 0x8000_0000).to_be_bytes());
    payload.push(weight);
    payload.extend_from_slice(hpack_block);
    payload.extend(std::iter::repeat_n(0u8, padding_len as usize));
    build_frame(FRAME_TYPE_HEADERS, flags, stream_id, &payload)
}

pub fn build_continuation_frame(stream_id: u32, hpack_block: &[u8], end_headers: bool) -> Vec<u8> {
    let flags = if end_headers { FLAG_END_HEADERS } else { 0 };
    build_frame(FRAME_TYPE_CONTINUATION, flags, stream_id, hpack_block)
}

pub fn build_settings_frame(settings: &[(u16, u32)]) -> Vec<u8> {
    let payload: Vec<u8> = settings
        .iter()
        .flat_map(|(id, value)| id.to_be_bytes().into_iter().chain(value.to_be_bytes()))
        .collect();
    build_frame(FRAME_TYPE_SETTINGS, 0, 0, &payload)
}

pub fn build_empty_settings_frame() -> Vec<u8> {
    build_frame(FRAME_TYPE_SETTINGS, 0, 0, &[])
}

pub fn build_window_update_frame(stream_id: u32, increment: u32) -> Vec<u8> {
    build_frame(
        FRAME_TYPE_WINDOW_UPDATE,
        0,
        stream_id,
        &(increment & 0x7FFF_FFFF).to_be_bytes(),
    )
}

pub fn build_rst_stream_frame(stream_id: u32, error_code: u32) -> Vec<u8> {
    build_frame(FRAME_TYPE_RST_STREAM, 0, stream_id, &error_code.to_be_bytes())
}

pub fn build_ping_frame(data: &[u8; 8], ack: bool) -> Vec<u8> {
    let flags = if ack { FLAG_ACK } else { 0 };
    build_frame(FRAME_TYPE_PING, flags, 0, data)
}

/// Literal field with a new name, no Huffman coding. Name and value must be
/// shorter than 127 bytes.
fn hpack_literal(prefix: u8, name: &str, value: &str) -> Vec<u8> {
    let mut encoded = vec![prefix, name.len() as u8];
    encoded.extend_from_slice(name.as_bytes());
    encoded.push(value.len() as u8);
    encoded.extend_from_slice(value.as_bytes());
    encoded
}

/// Literal that the decoder adds to its dynamic table
pub fn hpack_literal_with_indexing(name: &str, value: &str) -> Vec<u8> {
    hpack_literal(0x40, name, value)
}

pub fn hpack_literal_without_indexing(name: &str, value: &str) -> Vec<u8> {
    hpack_literal(0x00, name, value)
}

/// Indexed field, `index` below 128
pub fn hpack_indexed(index: u8) -> Vec<u8> {
    vec![0x80 | index]
}

/// Static table entries used by the request and response builders
pub mod hpack_static {
    /// :method: GET (index 2)
    pub fn method_get() -> Vec<u8> {
        vec![0x82]
    }
    /// :method: POST (index 3)
    pub fn method_post() -> Vec<u8> {
        vec![0x83]
    }
    /// :path: / (index 4)
    pub fn path_root() -> Vec<u8> {
        vec![0x84]
    }
    /// :scheme: https (index 7)
    pub fn scheme_https() -> Vec<u8> {
        vec![0x87]
    }
    /// :status: 200 (index 8)
    pub fn status_200() -> Vec<u8> {
        vec![0x88]
    }
    /// :status: 404 (index 13)
    pub fn status_404() -> Vec<u8> {
        vec![0x8d]
    }
}

fn hpack_request(method: Vec<u8>, path: &str, authority: &str) -> Vec<u8> {
    let mut block = method;
    block.extend(hpack_static::scheme_https());
    if path == "/" {
        block.extend(hpack_static::path_root());
    } else {
        block.extend(hpack_literal_without_indexing(":path", path));
    }
    block.extend(hpack_literal_without_indexing(":authority", authority));
    block
}

/// `GET https://{authority}{path}`
pub fn hpack_get_request(path: &str, authority: &str) -> Vec<u8> {
    hpack_request(hpack_static::method_get(), path, authority)
}

/// `POST https://{authority}{path}`
pub fn hpack_post_request(path: &str, authority: &str) -> Vec<u8> {
    hpack_request(hpack_static::method_post(), path, authority)
}

/// HPACK block for a `:status` response with a content-type
pub fn hpack_response(status: u16, content_type: &str) -> Vec<u8> {
    let mut block = match status {
        200 => hpack_static::status_200(),
        404 => hpack_static::status_404(),
        other => hpack_literal_without_indexing(":status", &other.to_string()),
    };
    block.extend(hpack_literal_without_indexing("content-type", content_type));
    block
}

/// What a client sends first: the preface and an empty SETTINGS frame
pub fn connection_start() -> Vec<u8> {
    let mut data = wiretree_h2::CONNECTION_PREFACE.to_vec();
    data.extend(build_empty_settings_frame());
    data
}

