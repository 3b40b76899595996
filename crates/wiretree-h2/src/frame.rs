use crate::state::{ParseError, ParseErrorKind, StreamId};

/// HTTP/2 connection preface: "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame types
pub(crate) const FRAME_TYPE_DATA: u8 = 0x00;
pub(crate) const FRAME_TYPE_HEADERS: u8 = 0x01;
pub(crate) const FRAME_TYPE_SETTINGS: u8 = 0x04;
pub(crate) const FRAME_TYPE_CONTINUATION: u8 = 0x09;

/// Highest frame type defined by RFC 7540 (CONTINUATION). PRIORITY,
/// RST_STREAM, PUSH_PROMISE, PING, GOAWAY and WINDOW_UPDATE sit between DATA
/// and CONTINUATION and only matter for detection.
const LAST_KNOWN_FRAME_TYPE: u8 = FRAME_TYPE_CONTINUATION;

/// Frame flags
pub(crate) const FLAG_END_STREAM: u8 = 0x01;
pub(crate) const FLAG_END_HEADERS: u8 = 0x04;
pub(crate) const FLAG_PADDED: u8 = 0x08;
pub(crate) const FLAG_PRIORITY: u8 = 0x20;

/// Frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Length of the priority fields carried by a HEADERS frame with PRIORITY set
pub(crate) const PRIORITY_FIELDS_SIZE: usize = 5;

/// Parsed HTTP/2 frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length (24-bit)
    pub length:     u32,
    /// Raw frame type
    pub frame_type: u8,
    /// Raw flags byte
    pub flags:      u8,
    /// Stream identifier with the reserved bit masked off
    pub stream_id:  StreamId,
}

impl FrameHeader {
    /// Total size of the frame on the wire (header + payload).
    pub fn frame_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.length as usize
    }

    pub(crate) fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Check if buffer starts with HTTP/2 connection preface
pub fn is_http2_preface(buffer: &[u8]) -> bool {
    buffer.starts_with(CONNECTION_PREFACE)
}

/// Whether `buffer` is a strict, non-empty prefix of the connection preface,
/// i.e. the preface was cut short by a chunk boundary.
pub fn is_partial_preface(buffer: &[u8]) -> bool {
    !buffer.is_empty() && buffer.len() < CONNECTION_PREFACE.len() && CONNECTION_PREFACE.starts_with(buffer)
}

/// Heuristic check if the leading 9 bytes look like an HTTP/2 frame header.
///
/// Accepts any frame header whose type is one of the ten types defined by
/// RFC 7540. Binary traffic that happens to match is a known false positive.
pub fn looks_like_http2_frame(buffer: &[u8]) -> bool {
    match parse_frame_header(buffer) {
        Ok(header) => header.frame_type <= LAST_KNOWN_FRAME_TYPE,
        Err(_) => false,
    }
}

/// Returns true if `buffer` is worth handing to the reassembler: it is at
/// least one frame header long and starts either with the connection preface
/// or with a known frame header.
pub fn is_http2_candidate(buffer: &[u8]) -> bool {
    buffer.len() >= FRAME_HEADER_SIZE && (is_http2_preface(buffer) || looks_like_http2_frame(buffer))
}

/// Parse the 9-byte frame header.
///
/// Zero-length frames are valid per RFC 7540 (e.g., SETTINGS ACK, empty
/// DATA with END_STREAM, PING). This function does not reject length == 0.
pub fn parse_frame_header(buffer: &[u8]) -> Result<FrameHeader, ParseError> {
    if buffer.len() < FRAME_HEADER_SIZE {
        return Err(ParseError::new(ParseErrorKind::Http2BufferTooSmall));
    }

    let length = u32::from_be_bytes([0, buffer[0], buffer[1], buffer[2]]);
    let frame_type = buffer[3];
    let flags = buffer[4];
    let stream_id = StreamId(u32::from_be_bytes([
        buffer[5] & 0x7F,
        buffer[6],
        buffer[7],
        buffer[8],
    ]));

    Ok(FrameHeader {
        length,
        frame_type,
        flags,
        stream_id,
    })
}

/// Strip the PADDED prefix/suffix from a DATA or HEADERS payload.
///
/// Padded frame format: [Pad Length (1 byte)] [Content] [Padding]
pub(crate) fn strip_padding<'a>(
    header: &FrameHeader,
    payload: &'a [u8],
) -> Result<&'a [u8], ParseError> {
    if !header.has_flag(FLAG_PADDED) {
        return Ok(payload);
    }
    let Some((&pad_len, rest)) = payload.split_first() else {
        return Err(ParseError::with_stream(
            ParseErrorKind::Http2PaddingError,
            header.stream_id,
        ));
    };
    let pad_len = pad_len as usize;
    if pad_len > rest.len() {
        return Err(ParseError::with_stream(
            ParseErrorKind::Http2PaddingError,
            header.stream_id,
        ));
    }
    Ok(&rest[..rest.len() - pad_len])
}
