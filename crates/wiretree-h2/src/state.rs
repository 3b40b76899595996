use std::collections::{HashMap, VecDeque};

/// Newtype for HTTP/2 stream identifiers (RFC 7540 §5.1.1: 31-bit unsigned
/// integer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StreamId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<StreamId> for u32 {
    fn from(v: StreamId) -> Self {
        v.0
    }
}

/// Newtype for nanosecond-precision capture timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampNs(pub u64);

impl TimestampNs {
    /// Returns `self - other`, clamped to zero on underflow.
    pub fn saturating_sub(self, other: TimestampNs) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl std::fmt::Display for TimestampNs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

impl From<u64> for TimestampNs {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<TimestampNs> for u64 {
    fn from(v: TimestampNs) -> Self {
        v.0
    }
}

/// Bounds on what one direction of a captured connection may make the
/// reassembler hold.
///
/// Captured traffic is untrusted: a header block can expand far beyond its
/// encoded size and a peer can open streams it never finishes. Hitting a
/// limit drops the offending stream (or, for `max_buffer_size`, the
/// buffered bytes), never the whole direction.
#[derive(Debug, Clone)]
pub struct H2Limits {
    /// Decoded header list size, counted as in SETTINGS_MAX_HEADER_LIST_SIZE
    pub max_header_list_size:   usize,
    /// Fields per header block
    pub max_header_count:       usize,
    /// Bytes in a single decoded header value
    pub max_header_value_size:  usize,
    /// Ceiling on the HPACK dynamic table, whatever the encoder asks for
    pub max_table_size:         usize,
    /// In-flight streams kept before the oldest are evicted
    pub max_concurrent_streams: usize,
    /// Age after which an unfinished stream is evicted
    pub stream_timeout_ns:      u64,
    /// Body bytes accumulated per stream
    pub max_body_size:          usize,
    /// Bytes held back waiting for the rest of a frame. A frame header
    /// declaring more than this is taken as lost framing.
    pub max_buffer_size:        usize,
}

impl Default for H2Limits {
    fn default() -> Self {
        Self {
            max_header_list_size:   65536,
            max_header_count:       128,
            max_header_value_size:  8192,
            max_table_size:         65536,
            max_concurrent_streams: 100,
            stream_timeout_ns:      30_000_000_000,
            max_body_size:          10 * 1024 * 1024, // 10 MiB
            max_buffer_size:        1024 * 1024,      // 1 MiB
        }
    }
}

/// HTTP/2 connection settings as announced by the sending peer (RFC 7540
/// §6.5.2 defaults until a SETTINGS frame is seen)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Settings {
    pub header_table_size:      u32,
    pub enable_push:            bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size:    u32,
    pub max_frame_size:         u32,
    pub max_header_list_size:   u32,
}

impl Default for H2Settings {
    fn default() -> Self {
        Self {
            header_table_size:      4096,
            enable_push:            true,
            max_concurrent_streams: u32::MAX,
            initial_window_size:    65535,
            max_frame_size:         16384,
            max_header_list_size:   u32::MAX,
        }
    }
}

/// Reassembly state for one direction of one HTTP/2 connection.
///
/// Holds the HPACK decoder with its dynamic table, the in-flight streams and
/// any trailing partial frame. Feed bytes with [`feed()`](Self::feed) in the
/// order they were captured, then drain completed streams with
/// [`try_pop()`](Self::try_pop).
pub struct H2ConnectionState {
    /// Persistent HPACK decoder with dynamic table
    pub(crate) decoder: loona_hpack::Decoder<'static>,

    /// In-flight streams, removed as soon as they complete
    pub(crate) active_streams: HashMap<StreamId, StreamState>,

    /// Settings announced by this direction's sender
    pub(crate) settings: H2Settings,

    /// Resource limits for header decoding and stream management
    pub(crate) limits: H2Limits,

    /// Whether the connection preface has been consumed on this direction
    pub preface_received: bool,

    /// Unconsumed bytes (a partial frame waiting for the rest of its payload)
    pub(crate) buffer: Vec<u8>,

    /// Frame boundaries were lost; bytes are discarded until a chunk starts
    /// with a frame header again
    pub(crate) resyncing: bool,

    /// Completed streams ready to be popped, in completion order
    pub(crate) completed: VecDeque<(StreamId, ReconstructedStream)>,

    /// Timestamp of the chunk currently being processed (set by feed())
    pub(crate) current_timestamp_ns: TimestampNs,
}

/// Per-stream reassembly state (internal to crate)
#[derive(Debug)]
pub(crate) struct StreamState {
    /// Initial header block, once decoded
    pub(crate) headers: Option<Vec<(String, String)>>,

    /// Trailing header block, once decoded
    pub(crate) trailers: Option<Vec<(String, String)>>,

    /// Accumulated body from DATA frames
    pub(crate) body: Vec<u8>,

    /// Accumulated header-block fragment (HEADERS + CONTINUATION)
    pub(crate) header_fragment: Vec<u8>,

    /// A HEADERS frame arrived without END_HEADERS and the block is still
    /// open
    pub(crate) header_block_in_progress: bool,

    /// END_STREAM was observed
    pub(crate) end_stream: bool,

    /// Every frame of this stream exactly as captured (header + payload)
    pub(crate) raw_frames: Vec<u8>,

    /// Timestamp when first frame for this stream was received
    pub(crate) first_frame_timestamp_ns: TimestampNs,

    /// Timestamp when END_STREAM was received
    pub(crate) end_stream_timestamp_ns: TimestampNs,
}

impl StreamState {
    pub(crate) fn new(timestamp_ns: TimestampNs) -> Self {
        Self {
            headers: None,
            trailers: None,
            body: Vec::new(),
            header_fragment: Vec::new(),
            header_block_in_progress: false,
            end_stream: false,
            raw_frames: Vec::new(),
            first_frame_timestamp_ns: timestamp_ns,
            end_stream_timestamp_ns: TimestampNs(0),
        }
    }

    /// Headers decoded and END_STREAM seen.
    pub(crate) fn is_complete(&self) -> bool {
        self.headers.is_some() && self.end_stream && !self.header_block_in_progress
    }

    pub(crate) fn into_reconstructed(self, stream_id: StreamId) -> ReconstructedStream {
        ReconstructedStream {
            stream_id,
            headers: self.headers.unwrap_or_default(),
            trailers: self.trailers,
            body: self.body,
            raw_frames: self.raw_frames,
            first_frame_timestamp_ns: self.first_frame_timestamp_ns,
            end_stream_timestamp_ns: self.end_stream_timestamp_ns,
        }
    }
}

impl Default for H2ConnectionState {
    fn default() -> Self {
        Self::with_limits(H2Limits::default())
    }
}

impl H2ConnectionState {
    /// Create a connection state with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connection state with custom limits.
    pub fn with_limits(limits: H2Limits) -> Self {
        let mut decoder = loona_hpack::Decoder::new();
        decoder.set_max_allowed_table_size(limits.max_table_size);
        Self {
            decoder,
            active_streams: HashMap::new(),
            settings: H2Settings::default(),
            limits,
            preface_received: false,
            buffer: Vec::new(),
            resyncing: false,
            completed: VecDeque::new(),
            current_timestamp_ns: TimestampNs(0),
        }
    }

    /// Append captured bytes and parse every complete frame.
    ///
    /// Bytes may be split at any offset: a trailing partial frame stays
    /// buffered until the next call supplies the rest. Frame-level problems
    /// (bad padding, undecodable header blocks, limits) drop the affected
    /// stream and parsing continues.
    ///
    /// A frame header declaring more than `max_buffer_size` bytes means the
    /// frame boundaries are lost: the rest of the buffer is discarded and
    /// parsing resumes with the first later chunk that starts with a frame
    /// header. Returns Err only when the bytes left over after parsing
    /// exceed `max_buffer_size`; they are discarded the same way.
    pub fn feed(&mut self, data: &[u8], timestamp_ns: TimestampNs) -> Result<(), ParseError> {
        self.buffer.extend_from_slice(data);
        self.current_timestamp_ns = timestamp_ns;
        crate::parse::parse_buffer_incremental(self);
        if self.buffer.len() > self.limits.max_buffer_size {
            self.buffer.clear();
            self.resyncing = true;
            return Err(ParseError::new(ParseErrorKind::Http2BufferTooLarge));
        }
        Ok(())
    }

    /// Whether bytes are being discarded until framing is found again.
    pub fn is_resyncing(&self) -> bool {
        self.resyncing
    }

    /// Pop a completed stream if available, in completion order.
    pub fn try_pop(&mut self) -> Option<(StreamId, ReconstructedStream)> {
        self.completed.pop_front()
    }

    /// Check if any completed streams are ready to be popped.
    pub fn has_completed(&self) -> bool {
        !self.completed.is_empty()
    }

    /// Drop any buffered partial frame. HPACK state is kept.
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Settings announced by this direction's sender.
    pub fn settings(&self) -> &H2Settings {
        &self.settings
    }

    /// Number of bytes waiting for the rest of a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the number of in-flight (incomplete) streams.
    pub fn active_stream_count(&self) -> usize {
        self.active_streams.len()
    }

    /// Evict in-flight streams that have exceeded the configured timeout,
    /// then the oldest ones while above `max_concurrent_streams`.
    ///
    /// Only incomplete streams live in `active_streams`; completed streams
    /// have already moved to the completed queue and are unaffected.
    pub fn evict_stale_streams(&mut self, current_time_ns: TimestampNs) {
        let timeout = self.limits.stream_timeout_ns;
        let max_streams = self.limits.max_concurrent_streams;

        self.active_streams.retain(|_id, stream| {
            let stale = current_time_ns.saturating_sub(stream.first_frame_timestamp_ns) >= timeout;
            if stale {
                crate::trace_warn!("evicting stale stream {_id} (timeout)");
            }
            !stale
        });

        while self.active_streams.len() > max_streams {
            let oldest_id = self
                .active_streams
                .iter()
                .min_by_key(|(_, s)| s.first_frame_timestamp_ns)
                .map(|(&id, _)| id);
            let Some(id) = oldest_id else { break };
            crate::trace_warn!("evicting stream {id} (over max_concurrent_streams)");
            self.active_streams.remove(&id);
        }
    }
}

/// One HTTP/2 stream rebuilt from its frames.
///
/// Headers keep wire order and include pseudo-headers. `raw_frames` holds the
/// stream's frames exactly as captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedStream {
    /// HTTP/2 stream identifier
    pub stream_id: StreamId,
    /// Initial header block, pseudo-headers included, in wire order
    pub headers: Vec<(String, String)>,
    /// Trailing header block, when one followed body data
    pub trailers: Option<Vec<(String, String)>>,
    /// Accumulated body from DATA frames, padding removed
    pub body: Vec<u8>,
    /// All frames of this stream as captured
    pub raw_frames: Vec<u8>,
    /// Timestamp when first frame for this stream was received
    pub first_frame_timestamp_ns: TimestampNs,
    /// Timestamp when the stream completed (END_STREAM received)
    pub end_stream_timestamp_ns: TimestampNs,
}

impl ReconstructedStream {
    /// First value of a pseudo-header (`":method"`, `":status"`, ...).
    pub fn pseudo_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .take_while(|(n, _)| n.starts_with(':'))
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// First value of a regular header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `:method` pseudo-header
    pub fn method(&self) -> Option<&str> {
        self.pseudo_header(":method")
    }

    /// `:path` pseudo-header
    pub fn path(&self) -> Option<&str> {
        self.pseudo_header(":path")
    }

    /// `:authority` pseudo-header
    pub fn authority(&self) -> Option<&str> {
        self.pseudo_header(":authority")
    }

    /// `:status` pseudo-header as a number
    pub fn status(&self) -> Option<u16> {
        self.pseudo_header(":status").and_then(|s| s.parse().ok())
    }

    /// Returns true if the stream carries `:method` or `:path`
    pub fn is_request(&self) -> bool {
        self.method().is_some() || self.path().is_some()
    }

    /// Returns true if the stream carries `:status`
    pub fn is_response(&self) -> bool {
        self.pseudo_header(":status").is_some()
    }

    /// Convert :method pseudo-header to http::Method
    pub fn http_method(&self) -> Option<http::Method> {
        self.method()
            .and_then(|m| http::Method::from_bytes(m.as_bytes()).ok())
    }

    /// Convert :status pseudo-header to http::StatusCode
    pub fn http_status(&self) -> Option<http::StatusCode> {
        self.status().and_then(|s| http::StatusCode::from_u16(s).ok())
    }
}

/// Classification of parse errors (public API)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Frame header requires 9 bytes but the buffer is shorter
    Http2BufferTooSmall,
    /// HPACK decompression failed (detail in the `String`)
    Http2HpackError(String),
    /// CONTINUATION arrived while no header block was open on its stream
    Http2ContinuationWithoutHeaders,
    /// Decoded header list exceeds the configured size limits
    Http2HeaderListTooLarge,
    /// Rejected because max concurrent streams limit was reached
    Http2MaxConcurrentStreams,
    /// Padded frame has missing or invalid padding
    Http2PaddingError,
    /// PRIORITY flag present but header block too short for priority fields
    Http2PriorityError,
    /// DATA frame references a stream with no headers
    Http2StreamNotFound,
    /// Header contains invalid UTF-8 encoding
    Http2InvalidHeaderEncoding,
    /// Stream body would exceed the configured max_body_size
    Http2BodyTooLarge,
    /// Buffered data would exceed the configured max_buffer_size
    Http2BufferTooLarge,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http2BufferTooSmall => write!(f, "HTTP/2 buffer too small to parse frame header"),
            Self::Http2HpackError(msg) => write!(f, "HTTP/2 HPACK decoding error: {msg}"),
            Self::Http2ContinuationWithoutHeaders => {
                write!(f, "HTTP/2 CONTINUATION frame without an open header block")
            },
            Self::Http2HeaderListTooLarge => write!(f, "HTTP/2 header list exceeds size limits"),
            Self::Http2MaxConcurrentStreams => {
                write!(f, "HTTP/2 max concurrent streams limit reached")
            },
            Self::Http2PaddingError => write!(f, "HTTP/2 frame has missing or invalid padding"),
            Self::Http2PriorityError => {
                write!(f, "HTTP/2 PRIORITY flag present but header block too short")
            },
            Self::Http2StreamNotFound => write!(f, "HTTP/2 frame references unknown stream"),
            Self::Http2InvalidHeaderEncoding => {
                write!(f, "HTTP/2 header contains invalid UTF-8 encoding")
            },
            Self::Http2BodyTooLarge => write!(f, "HTTP/2 stream body exceeds max_body_size"),
            Self::Http2BufferTooLarge => {
                write!(f, "HTTP/2 internal buffer exceeds max_buffer_size")
            },
        }
    }
}

/// Parse error with optional stream context (public API)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// What went wrong
    pub kind:      ParseErrorKind,
    /// The stream that caused the error, if applicable
    pub stream_id: Option<StreamId>,
}

impl ParseError {
    /// Create a connection-level parse error (no specific stream).
    pub fn new(kind: ParseErrorKind) -> Self {
        Self {
            kind,
            stream_id: None,
        }
    }

    /// Create a stream-level parse error with the offending stream ID.
    pub fn with_stream(kind: ParseErrorKind, stream_id: StreamId) -> Self {
        Self {
            kind,
            stream_id: Some(stream_id),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(sid) = self.stream_id {
            write!(f, "[stream {sid}] {}", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl std::error::Error for ParseError {}
