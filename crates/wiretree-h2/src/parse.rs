use crate::frame::*;
use crate::state::{H2ConnectionState, H2Limits, ParseError, ParseErrorKind, StreamId, StreamState};

/// Parse every complete frame in the connection buffer, called by
/// `H2ConnectionState::feed()`.
///
/// A trailing partial frame (or a partial connection preface) stays in the
/// buffer for the next call. Errors are scoped to one stream: the offending
/// stream is dropped, the frame is consumed, and parsing continues with the
/// next frame.
///
/// A frame header declaring more than `max_buffer_size` bytes means framing
/// was lost (a capture gap, or non-HTTP/2 bytes). The rest of the buffer is
/// dropped and later chunks are discarded until one starts with the preface
/// or a plausible frame header.
pub(crate) fn parse_buffer_incremental(state: &mut H2ConnectionState) {
    let buffer = std::mem::take(&mut state.buffer);
    let mut pos = 0;

    if !state.preface_received {
        if buffer.starts_with(CONNECTION_PREFACE) {
            pos += CONNECTION_PREFACE.len();
            state.preface_received = true;
        } else if is_partial_preface(&buffer) {
            // The preface itself was split; wait for the rest of it
            state.buffer = buffer;
            return;
        }
    }

    if state.resyncing {
        let rest = &buffer[pos..];
        if rest.len() < FRAME_HEADER_SIZE {
            state.buffer = buffer;
            return;
        }
        if !is_http2_preface(rest) && !looks_like_http2_frame(rest) {
            crate::trace_warn!("discarding {} bytes while resynchronizing HTTP/2 framing", rest.len());
            return;
        }
        state.resyncing = false;
        if is_http2_preface(rest) {
            pos += CONNECTION_PREFACE.len();
            state.preface_received = true;
        }
    }

    while buffer.len() - pos >= FRAME_HEADER_SIZE {
        let Ok(header) = parse_frame_header(&buffer[pos..]) else {
            break;
        };
        if header.frame_size() > state.limits.max_buffer_size {
            crate::trace_warn!(
                "HTTP/2 frame declares {} bytes, dropping {} buffered bytes and resynchronizing",
                header.length,
                buffer.len() - pos
            );
            pos = buffer.len();
            state.resyncing = true;
            break;
        }
        let frame_end = pos + header.frame_size();
        if frame_end > buffer.len() {
            break; // Incomplete frame - wait for more data
        }

        let frame = &buffer[pos..frame_end];
        // Always advance past the frame so it won't be re-processed
        pos = frame_end;
        // A direction that starts with frames never sends the preface later
        state.preface_received = true;

        let stream_id = header.stream_id;
        if let Err(_e) = handle_frame(state, &header, frame) {
            crate::trace_warn!("dropping HTTP/2 stream {stream_id}: {_e}");
            if stream_id.0 != 0 {
                state.active_streams.remove(&stream_id);
            }
            continue;
        }

        // Check only the stream that was just modified (stream 0 = connection-level)
        if stream_id.0 != 0 {
            check_stream_completion(state, stream_id);
        }
    }

    state.buffer = buffer;
    if pos > 0 {
        state.buffer.drain(..pos);
    }

    let now = state.current_timestamp_ns;
    state.evict_stale_streams(now);
}

fn handle_frame(
    state: &mut H2ConnectionState,
    header: &FrameHeader,
    frame: &[u8],
) -> Result<(), ParseError> {
    let payload = &frame[FRAME_HEADER_SIZE..];
    match header.frame_type {
        FRAME_TYPE_DATA => handle_data_frame(state, header, frame, payload),
        FRAME_TYPE_HEADERS => handle_headers_frame(state, header, frame, payload),
        FRAME_TYPE_CONTINUATION => handle_continuation_frame(state, header, frame, payload),
        FRAME_TYPE_SETTINGS => {
            handle_settings_frame(state, header, payload);
            Ok(())
        },
        // PRIORITY, RST_STREAM, PUSH_PROMISE, PING, GOAWAY, WINDOW_UPDATE and
        // unknown extension frames carry nothing we reassemble
        _ => Ok(()),
    }
}

fn handle_headers_frame(
    state: &mut H2ConnectionState,
    header: &FrameHeader,
    frame: &[u8],
    payload: &[u8],
) -> Result<(), ParseError> {
    let stream_id = header.stream_id;

    // Reject new streams when at capacity
    if !state.active_streams.contains_key(&stream_id)
        && state.active_streams.len() >= state.limits.max_concurrent_streams
    {
        return Err(ParseError::with_stream(
            ParseErrorKind::Http2MaxConcurrentStreams,
            stream_id,
        ));
    }

    let header_block = strip_padding(header, payload)?;

    // Handle PRIORITY flag (skip stream dependency + weight)
    let header_block = if header.has_flag(FLAG_PRIORITY) {
        if header_block.len() < PRIORITY_FIELDS_SIZE {
            return Err(ParseError::with_stream(
                ParseErrorKind::Http2PriorityError,
                stream_id,
            ));
        }
        &header_block[PRIORITY_FIELDS_SIZE..]
    } else {
        header_block
    };

    let timestamp_ns = state.current_timestamp_ns;
    let H2ConnectionState {
        decoder,
        active_streams,
        limits,
        ..
    } = state;
    let stream = active_streams
        .entry(stream_id)
        .or_insert_with(|| StreamState::new(timestamp_ns));

    stream.raw_frames.extend_from_slice(frame);
    stream.header_fragment.extend_from_slice(header_block);
    stream.header_block_in_progress = true;

    if header.has_flag(FLAG_END_STREAM) {
        stream.end_stream = true;
        stream.end_stream_timestamp_ns = timestamp_ns;
    }

    if header.has_flag(FLAG_END_HEADERS) {
        finish_header_block(decoder, limits, stream, stream_id)?;
    }

    Ok(())
}

fn handle_continuation_frame(
    state: &mut H2ConnectionState,
    header: &FrameHeader,
    frame: &[u8],
    payload: &[u8],
) -> Result<(), ParseError> {
    let H2ConnectionState {
        decoder,
        active_streams,
        limits,
        ..
    } = state;
    let stream = active_streams
        .get_mut(&header.stream_id)
        .filter(|s| s.header_block_in_progress)
        .ok_or(ParseError::with_stream(
            ParseErrorKind::Http2ContinuationWithoutHeaders,
            header.stream_id,
        ))?;

    stream.raw_frames.extend_from_slice(frame);
    stream.header_fragment.extend_from_slice(payload);

    if header.has_flag(FLAG_END_HEADERS) {
        finish_header_block(decoder, limits, stream, header.stream_id)?;
    }

    Ok(())
}

fn handle_data_frame(
    state: &mut H2ConnectionState,
    header: &FrameHeader,
    frame: &[u8],
    payload: &[u8],
) -> Result<(), ParseError> {
    let data = strip_padding(header, payload)?;
    let timestamp_ns = state.current_timestamp_ns;
    let max_body_size = state.limits.max_body_size;

    let stream = state
        .active_streams
        .get_mut(&header.stream_id)
        .ok_or(ParseError::with_stream(
            ParseErrorKind::Http2StreamNotFound,
            header.stream_id,
        ))?;

    if stream.body.len() + data.len() > max_body_size {
        return Err(ParseError::with_stream(
            ParseErrorKind::Http2BodyTooLarge,
            header.stream_id,
        ));
    }

    stream.raw_frames.extend_from_slice(frame);
    stream.body.extend_from_slice(data);

    if header.has_flag(FLAG_END_STREAM) {
        stream.end_stream = true;
        stream.end_stream_timestamp_ns = timestamp_ns;
    }

    Ok(())
}

/// Record the sender's SETTINGS. A HEADER_TABLE_SIZE announced here governs
/// the opposite direction's encoder, so the decoder for this direction is
/// left alone; table resizes reach it through the header blocks themselves.
fn handle_settings_frame(state: &mut H2ConnectionState, header: &FrameHeader, payload: &[u8]) {
    const FLAG_ACK: u8 = 0x01;
    if header.has_flag(FLAG_ACK) {
        return;
    }

    // 6 bytes per setting (2-byte id, 4-byte value)
    for setting in payload.chunks_exact(6) {
        let setting_id = u16::from_be_bytes([setting[0], setting[1]]);
        let value = u32::from_be_bytes([setting[2], setting[3], setting[4], setting[5]]);

        match setting_id {
            0x01 => state.settings.header_table_size = value,
            0x02 => state.settings.enable_push = value != 0,
            0x03 => state.settings.max_concurrent_streams = value,
            0x04 => state.settings.initial_window_size = value,
            0x05 => state.settings.max_frame_size = value,
            0x06 => state.settings.max_header_list_size = value,
            _ => {}, // Unknown setting
        }
    }
}

/// Decode the accumulated header block. The result becomes the stream's
/// initial headers, or its trailers when body bytes already arrived.
fn finish_header_block(
    decoder: &mut loona_hpack::Decoder<'static>,
    limits: &H2Limits,
    stream: &mut StreamState,
    stream_id: StreamId,
) -> Result<(), ParseError> {
    let block = std::mem::take(&mut stream.header_fragment);
    stream.header_block_in_progress = false;

    let decoded = decode_header_block(decoder, &block, limits, stream_id)?;
    if stream.headers.is_some() && !stream.body.is_empty() {
        stream.trailers = Some(decoded);
    } else {
        stream.headers = Some(decoded);
    }
    Ok(())
}

fn decode_header_block(
    decoder: &mut loona_hpack::Decoder<'static>,
    header_block: &[u8],
    limits: &H2Limits,
    stream_id: StreamId,
) -> Result<Vec<(String, String)>, ParseError> {
    let mut headers = Vec::new();
    let mut total_size: usize = 0;
    let mut limit_exceeded = false;
    let mut encoding_error = false;

    decoder
        .decode_with_cb(header_block, |name, value| {
            if limit_exceeded || encoding_error {
                return;
            }

            if headers.len() >= limits.max_header_count
                || value.len() > limits.max_header_value_size
            {
                limit_exceeded = true;
                return;
            }

            // RFC 7540 §6.5.2: header list size = sum of (name.len + value.len + 32) per entry
            total_size += name.len() + value.len() + 32;
            if total_size > limits.max_header_list_size {
                limit_exceeded = true;
                return;
            }

            let (Ok(name_str), Ok(value_str)) =
                (std::str::from_utf8(&name), std::str::from_utf8(&value))
            else {
                encoding_error = true;
                return;
            };
            headers.push((name_str.to_string(), value_str.to_string()));
        })
        .map_err(|e| {
            ParseError::with_stream(ParseErrorKind::Http2HpackError(format!("{e:?}")), stream_id)
        })?;

    if encoding_error {
        return Err(ParseError::with_stream(
            ParseErrorKind::Http2InvalidHeaderEncoding,
            stream_id,
        ));
    }

    if limit_exceeded {
        return Err(ParseError::with_stream(
            ParseErrorKind::Http2HeaderListTooLarge,
            stream_id,
        ));
    }

    Ok(headers)
}

/// Move the stream to the completed queue once its headers are decoded and
/// END_STREAM was seen. Only checks the stream that was just modified.
fn check_stream_completion(state: &mut H2ConnectionState, stream_id: StreamId) {
    if !state
        .active_streams
        .get(&stream_id)
        .is_some_and(StreamState::is_complete)
    {
        return;
    }
    if let Some(stream) = state.active_streams.remove(&stream_id) {
        state
            .completed
            .push_back((stream_id, stream.into_reconstructed(stream_id)));
    }
}
