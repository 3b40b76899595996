#![allow(clippy::vec_init_then_push)]
//! End-to-end tests: captured chunks and persisted messages through the
//! default pipeline.

#[path = "../../wiretree-h2/tests/fixtures/mod.rs"]
mod fixtures;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fixtures::*;
use http::{Method, StatusCode};
use rstest::rstest;
use wiretree::facets::{
    ContentTypeFacet, ConversionErrorFacet, DecodedTextFacet, Http2FramesFacet, Http2StreamFacet,
    HttpHeadersFacet, HttpRequestFacet, HttpResponseFacet, ListFacet, MapFacet, PairingFacet,
};
use wiretree::metadata::{
    PAIRED_MESSAGE_ID, PREVIOUS_MESSAGE_ID, RECEIVER, SENDER, SEQUENCE_NUMBER, TIMESTAMP,
};
use wiretree::pairing::pair_of;
use wiretree::{
    CapturedChunk, Capability, ConnectionId, ContentBuffer, ConversionError, Converter, Element,
    MessageMetadata, PersistedMessage, Phase, Pipeline, PipelineConfig, PipelineHandle,
};

const CLIENT: &str = "192.168.1.10:51000";
const SERVER: &str = "10.0.0.1:443";
const OTHER_CLIENT: &str = "192.168.1.11:52000";

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn at() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
}

fn chunk(bytes: impl Into<bytes::Bytes>, from: &str, to: &str) -> CapturedChunk {
    CapturedChunk::new(bytes, addr(from), addr(to), at())
}

fn child(pipeline: &Pipeline, element: &Element, name: &str) -> Arc<Element> {
    pipeline
        .arena()
        .child_named(element, name)
        .unwrap_or_else(|| panic!("no child named {name}"))
}

fn text(pipeline: &Pipeline, element: &Element, name: &str) -> String {
    let child = child(pipeline, element, name);
    pipeline.arena().text_of(&child).to_string()
}

fn client_h2_bytes() -> Vec<u8> {
    let mut data = connection_start();
    data.extend(build_complete_headers_frame(
        1,
        &hpack_get_request("/index.html", "example.com"),
    ));
    data
}

fn server_h2_bytes() -> Vec<u8> {
    let mut data = build_empty_settings_frame();
    data.extend(build_headers_frame(
        1,
        &hpack_response(200, "text/plain; charset=utf-8"),
        FLAG_END_HEADERS,
    ));
    data.extend(build_data_frame(1, b"hello", true));
    data
}

fn emitted(pipeline: &Pipeline, chunk: &Element) -> Vec<Arc<Element>> {
    chunk
        .facet::<Http2FramesFacet>()
        .map(|frames| {
            frames
                .messages
                .iter()
                .map(|id| pipeline.arena().get(*id).unwrap())
                .collect()
        })
        .unwrap_or_default()
}

// =========================================================================
// Detection
// =========================================================================

#[rstest]
#[case::unknown_frame_type(b"\x00\x00\x04\xff\x00\x00\x00\x00\x01abcd".as_slice())]
#[case::too_short(b"\x00\x00\x00\x04".as_slice())]
#[case::text(b"hello world, this is not http".as_slice())]
fn test_unrecognized_bytes_rejected_without_error(#[case] bytes: &'static [u8]) {
    let pipeline = Pipeline::default();
    let message = pipeline.ingest(chunk(bytes, CLIENT, SERVER));

    assert!(!message.has_capability(Capability::Http2));
    assert!(!message.has_capability(Capability::HttpMessage));
    assert!(!message.has_capability(Capability::ConversionError));
    assert!(message.child_nodes().is_empty());
    assert_eq!(message.content().as_bytes(), bytes);
}

// =========================================================================
// HTTP/2
// =========================================================================

#[test]
fn test_h2_exchange_reconstructed_and_paired() {
    let pipeline = Pipeline::default();
    let client_chunk = pipeline.ingest(chunk(client_h2_bytes(), CLIENT, SERVER));
    let server_chunk = pipeline.ingest(chunk(server_h2_bytes(), SERVER, CLIENT));

    let requests = emitted(&pipeline, &client_chunk);
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let facet = request.facet::<HttpRequestFacet>().unwrap();
    assert_eq!(facet.method, Method::GET);
    assert_eq!(facet.path, "/index.html");
    assert_eq!(text(&pipeline, request, "method"), "GET");
    assert_eq!(text(&pipeline, request, "path"), "/index.html");
    assert_eq!(text(&pipeline, request, "protocolVersion"), "HTTP/2");
    assert_eq!(text(&pipeline, request, "streamId"), "1");
    assert_eq!(request.get_metadata(SENDER), Ok(Some(addr(CLIENT))));
    assert_eq!(request.get_metadata(TIMESTAMP), Ok(Some(at())));

    let headers = child(&pipeline, request, "headers");
    let header_names: Vec<String> = headers
        .facet::<HttpHeadersFacet>()
        .unwrap()
        .headers
        .keys()
        .cloned()
        .collect();
    assert_eq!(header_names, [":method", ":scheme", ":path", ":authority"]);

    let responses = emitted(&pipeline, &server_chunk);
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(
        response.facet::<HttpResponseFacet>().unwrap().status,
        StatusCode::OK
    );
    assert_eq!(text(&pipeline, response, "statusCode"), "200");
    let body = child(&pipeline, response, "body");
    assert_eq!(body.content().as_bytes(), b"hello");
    assert!(body.facet::<ContentTypeFacet>().unwrap().is("text/plain"));
    let keys: Vec<String> = response.child_nodes_with_key().keys().cloned().collect();
    assert_eq!(keys, ["streamId", "protocolVersion", "statusCode", "headers", "body"]);

    // Raw content is the stream's own frames, SETTINGS excluded
    assert_eq!(response.content().as_bytes(), &server_h2_bytes()[9..]);

    assert_eq!(pair_of(pipeline.arena(), response).unwrap().id(), request.id());
    assert_eq!(pair_of(pipeline.arena(), request).unwrap().id(), response.id());
    assert_eq!(response.get_metadata(PAIRED_MESSAGE_ID), Ok(Some(request.uuid())));
}

#[test]
fn test_h2_split_at_every_offset() {
    let bytes = client_h2_bytes();
    for split in 1..bytes.len() {
        let pipeline = Pipeline::default();
        let first = pipeline.ingest(chunk(bytes[..split].to_vec(), CLIENT, SERVER));
        let second = pipeline.ingest(chunk(bytes[split..].to_vec(), CLIENT, SERVER));

        assert!(first.has_capability(Capability::Http2), "split at {split}");
        assert!(!second.has_capability(Capability::ConversionError), "split at {split}");
        let mut streams = emitted(&pipeline, &first);
        streams.extend(emitted(&pipeline, &second));
        assert_eq!(streams.len(), 1, "split at {split}");
        assert_eq!(
            streams[0].facet::<HttpRequestFacet>().unwrap().path,
            "/index.html",
            "split at {split}"
        );
    }
}

#[test]
fn test_h2_preface_split_into_three_chunks() {
    let bytes = client_h2_bytes();
    let pipeline = Pipeline::default();
    let chunks: Vec<_> = [&bytes[..3], &bytes[3..17], &bytes[17..]]
        .into_iter()
        .map(|part| pipeline.ingest(chunk(part.to_vec(), CLIENT, SERVER)))
        .collect();

    assert!(emitted(&pipeline, &chunks[0]).is_empty());
    assert!(emitted(&pipeline, &chunks[1]).is_empty());
    let streams = emitted(&pipeline, &chunks[2]);
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].facet::<HttpRequestFacet>().unwrap().path, "/index.html");
}

#[test]
fn test_preface_lookalike_start_does_not_claim_http1_connection() {
    let pipeline = Pipeline::default();
    pipeline.ingest(chunk(&b"PR"[..], CLIENT, SERVER));
    let request = pipeline.ingest(chunk(
        &b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n"[..],
        CLIENT,
        SERVER,
    ));

    assert!(!request.has_capability(Capability::Http2));
    assert_eq!(request.facet::<HttpRequestFacet>().unwrap().method, Method::GET);
}

#[test]
fn test_h2_large_chunk_of_complete_frames() {
    let mut bytes = connection_start();
    bytes.extend(build_headers_frame(
        1,
        &hpack_post_request("/upload", "example.com"),
        FLAG_END_HEADERS,
    ));
    for i in 0..80 {
        bytes.extend(build_data_frame(1, &[0x42; 16_000], i == 79));
    }

    let pipeline = Pipeline::default();
    let message = pipeline.ingest(chunk(bytes, CLIENT, SERVER));

    assert!(!message.has_capability(Capability::ConversionError));
    let streams = emitted(&pipeline, &message);
    assert_eq!(streams.len(), 1);
    let request = streams[0].facet::<HttpRequestFacet>().unwrap();
    let body = pipeline.arena().get(request.body_element).unwrap();
    assert_eq!(body.content().as_bytes().len(), 80 * 16_000);
}

#[test]
fn test_h2_recovers_after_implausible_frame_length() {
    let pipeline = Pipeline::default();
    pipeline.ingest(chunk(connection_start(), CLIENT, SERVER));

    // DATA header declaring 2 MiB, then bytes that are not frames
    let bogus = pipeline.ingest(chunk(
        &b"\x20\x00\x00\x00\x00\x00\x00\x00\x01"[..],
        CLIENT,
        SERVER,
    ));
    let noise = pipeline.ingest(chunk(vec![0xAB; 400_000], CLIENT, SERVER));
    let next = pipeline.ingest(chunk(
        build_complete_headers_frame(3, &hpack_get_request("/after", "example.com")),
        CLIENT,
        SERVER,
    ));

    for message in [&bogus, &noise, &next] {
        assert!(!message.has_capability(Capability::ConversionError));
    }
    let streams = emitted(&pipeline, &next);
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].facet::<HttpRequestFacet>().unwrap().path, "/after");
}

#[test]
fn test_h2_continuation_chunk_fed_once_connection_tracked() {
    let pipeline = Pipeline::default();
    let mut start = connection_start();
    let frame = build_complete_headers_frame(3, &hpack_get_request("/", "example.com"));
    start.extend_from_slice(&frame[..4]);
    pipeline.ingest(chunk(start, CLIENT, SERVER));

    // Starts mid-frame, but the connection is known
    let rest = pipeline.ingest(chunk(frame[4..].to_vec(), CLIENT, SERVER));
    let streams = emitted(&pipeline, &rest);
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].facet::<Http2StreamFacet>().unwrap().stream_id, 3);
}

#[test]
fn test_h2_malformed_stream_does_not_affect_others() {
    let pipeline = Pipeline::default();
    let mut data = connection_start();
    // Index 0 is never valid in HPACK
    data.extend(build_complete_headers_frame(1, &[0x80]));
    data.extend(build_complete_headers_frame(3, &hpack_get_request("/ok", "example.com")));
    let message = pipeline.ingest(chunk(data, CLIENT, SERVER));

    let streams = emitted(&pipeline, &message);
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].facet::<HttpRequestFacet>().unwrap().path, "/ok");
    assert!(!message.has_capability(Capability::ConversionError));
}

#[test]
fn test_h2_stream_without_pseudo_headers_keeps_parts_on_stream_facet() {
    let pipeline = Pipeline::default();
    let mut data = connection_start();
    data.extend(build_complete_headers_frame(
        5,
        &hpack_literal_without_indexing("x-kind", "push"),
    ));
    let message = pipeline.ingest(chunk(data, CLIENT, SERVER));

    let streams = emitted(&pipeline, &message);
    assert_eq!(streams.len(), 1);
    let stream = &streams[0];
    assert!(!stream.has_capability(Capability::HttpMessage));
    assert!(stream.facet::<Http2StreamFacet>().unwrap().parts.is_some());
    let keys: Vec<String> = stream.child_nodes_with_key().keys().cloned().collect();
    assert_eq!(keys, ["streamId", "headers", "body"]);
}

#[test]
fn test_clear_history_forgets_connections() {
    let pipeline = Pipeline::default();
    pipeline.ingest(chunk(connection_start(), CLIENT, SERVER));
    let tracked = pipeline.ingest(chunk(&b"abc"[..], CLIENT, SERVER));
    assert!(tracked.has_capability(Capability::Http2));

    pipeline.clear_history();
    assert!(pipeline.arena().is_empty());

    let fresh = pipeline.ingest(chunk(&b"abc"[..], CLIENT, SERVER));
    assert!(!fresh.has_capability(Capability::Http2));
    assert_eq!(fresh.get_metadata(PREVIOUS_MESSAGE_ID), Ok(None));
}

#[test]
fn test_evict_connection_only_forgets_that_connection() {
    let pipeline = Pipeline::default();
    pipeline.ingest(chunk(connection_start(), CLIENT, SERVER));
    pipeline.ingest(chunk(connection_start(), OTHER_CLIENT, SERVER));

    pipeline.evict_connection(ConnectionId::new(addr(SERVER), addr(CLIENT)));

    let evicted = pipeline.ingest(chunk(&b"abc"[..], CLIENT, SERVER));
    let kept = pipeline.ingest(chunk(&b"abc"[..], OTHER_CLIENT, SERVER));
    assert!(!evicted.has_capability(Capability::Http2));
    assert!(kept.has_capability(Capability::Http2));
    // Decoded history stays
    assert_eq!(pipeline.arena().messages().len(), 4);
}

// =========================================================================
// HTTP/1
// =========================================================================

#[test]
fn test_http1_exchange_with_metadata_and_pairing() {
    let pipeline = Pipeline::default();
    let request = pipeline.ingest(chunk(
        &b"GET /status HTTP/1.1\r\nHost: example.com\r\n\r\n"[..],
        CLIENT,
        SERVER,
    ));
    let unrelated = pipeline.ingest(chunk(
        &b"GET /other HTTP/1.1\r\n\r\n"[..],
        OTHER_CLIENT,
        SERVER,
    ));
    let response = pipeline.ingest(chunk(
        &b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"[..],
        SERVER,
        CLIENT,
    ));

    assert_eq!(request.get_metadata(SEQUENCE_NUMBER), Ok(Some(0)));
    assert_eq!(unrelated.get_metadata(SEQUENCE_NUMBER), Ok(Some(1)));
    assert_eq!(response.get_metadata(SEQUENCE_NUMBER), Ok(Some(2)));
    assert_eq!(response.get_metadata(PREVIOUS_MESSAGE_ID), Ok(Some(request.uuid())));
    assert_eq!(unrelated.get_metadata(PREVIOUS_MESSAGE_ID), Ok(None));
    assert_eq!(response.get_metadata(RECEIVER), Ok(Some(addr(CLIENT))));

    assert_eq!(pair_of(pipeline.arena(), &response).unwrap().id(), request.id());
    assert!(!unrelated.has_capability(Capability::Pairing));
    assert_eq!(text(&pipeline, &response, "reasonPhrase"), "OK");
}

#[test]
fn test_http1_form_post_keeps_duplicate_fields() {
    let pipeline = Pipeline::default();
    let form = "role=admin&user=bob+smith&role=ops";
    let request = format!(
        "POST /login HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{form}",
        form.len()
    );
    let message = pipeline.ingest(chunk(request.into_bytes(), CLIENT, SERVER));

    let body = child(&pipeline, &message, "body");
    let map = body.facet::<MapFacet>().unwrap();
    let roles: Vec<String> = map
        .entries
        .get_all("role")
        .into_iter()
        .map(|id| {
            let value = pipeline.arena().get(*id).unwrap();
            assert!(value.content().is_view_of(message.content()));
            value.facet::<DecodedTextFacet>().unwrap().text.clone()
        })
        .collect();
    assert_eq!(roles, ["admin", "ops"]);

    let user = pipeline.arena().get(*map.entries.get("user").unwrap()).unwrap();
    assert_eq!(user.content().as_bytes(), b"bob+smith");
    assert_eq!(user.facet::<DecodedTextFacet>().unwrap().text, "bob smith");
}

// =========================================================================
// Persisted captures
// =========================================================================

const REQUEST_UUID: &str = "3f0c5a55-1c7e-4d8e-9a51-7d8e2f6a0b01";
const DECOY_UUID: &str = "3f0c5a55-1c7e-4d8e-9a51-7d8e2f6a0b02";
const RESPONSE_UUID: &str = "3f0c5a55-1c7e-4d8e-9a51-7d8e2f6a0b03";

fn persisted(json: serde_json::Value) -> PersistedMessage {
    serde_json::from_value(json).unwrap()
}

#[test]
fn test_restore_uses_persisted_pairing() {
    use base64::Engine;
    let encode = |raw: &[u8]| base64::engine::general_purpose::STANDARD.encode(raw);

    let captures = [
        persisted(serde_json::json!({
            "uuid": REQUEST_UUID,
            "content": encode(b"GET /first HTTP/1.1\r\n\r\n"),
            "sender": CLIENT,
            "receiver": SERVER,
            "sequenceNumber": 10,
            "pairedMessageUuid": RESPONSE_UUID,
        })),
        persisted(serde_json::json!({
            "uuid": DECOY_UUID,
            "content": encode(b"GET /second HTTP/1.1\r\n\r\n"),
            "sender": CLIENT,
            "receiver": SERVER,
            "sequenceNumber": 11,
        })),
        persisted(serde_json::json!({
            "uuid": RESPONSE_UUID,
            "content": encode(b"HTTP/1.1 204 No Content\r\n\r\n"),
            "sender": SERVER,
            "receiver": CLIENT,
            "timestamp": "2024-05-01T12:00:00Z",
            "sequenceNumber": 12,
            "pairedMessageUuid": REQUEST_UUID,
        })),
    ];

    let pipeline = Pipeline::default();
    let restored: Vec<Arc<Element>> = captures
        .iter()
        .map(|message| pipeline.restore(message).unwrap())
        .collect();
    let [request, decoy, response] = [&restored[0], &restored[1], &restored[2]];

    assert_eq!(request.uuid().to_string(), REQUEST_UUID);
    assert_eq!(pair_of(pipeline.arena(), response).unwrap().id(), request.id());
    assert!(!decoy.has_capability(Capability::Pairing));
    assert_eq!(response.get_metadata(SEQUENCE_NUMBER), Ok(Some(12)));

    // New captures continue after the restored sequence numbers
    let live = pipeline.ingest(chunk(&b"x"[..], CLIENT, SERVER));
    assert_eq!(live.get_metadata(SEQUENCE_NUMBER), Ok(Some(13)));
}

#[test]
fn test_restore_response_before_request() {
    use base64::Engine;
    let encode = |raw: &[u8]| base64::engine::general_purpose::STANDARD.encode(raw);

    let pipeline = Pipeline::default();
    let response = pipeline
        .restore(&persisted(serde_json::json!({
            "uuid": RESPONSE_UUID,
            "content": encode(b"HTTP/1.1 204 No Content\r\n\r\n"),
            "pairedMessageUuid": REQUEST_UUID,
        })))
        .unwrap();
    assert!(!response.has_capability(Capability::Pairing));

    let request = pipeline
        .restore(&persisted(serde_json::json!({
            "uuid": REQUEST_UUID,
            "content": encode(b"GET / HTTP/1.1\r\n\r\n"),
            "pairedMessageUuid": RESPONSE_UUID,
        })))
        .unwrap();
    assert_eq!(pair_of(pipeline.arena(), &request).unwrap().id(), response.id());
    assert_eq!(
        response.facet::<PairingFacet>().unwrap().partner,
        request.id()
    );
}

#[test]
fn test_restore_legacy_capture_falls_back() {
    use base64::Engine;
    let encode = |raw: &[u8]| base64::engine::general_purpose::STANDARD.encode(raw);

    let pipeline = Pipeline::default();
    let request = pipeline
        .restore(&persisted(serde_json::json!({
            "uuid": REQUEST_UUID,
            "content": encode(b"GET / HTTP/1.1\r\n\r\n"),
            "sender": CLIENT,
            "receiver": SERVER,
        })))
        .unwrap();
    let response = pipeline
        .restore(&persisted(serde_json::json!({
            "uuid": RESPONSE_UUID,
            "content": encode(b"HTTP/1.1 204 No Content\r\n\r\n"),
            "sender": SERVER,
            "receiver": CLIENT,
        })))
        .unwrap();

    assert_eq!(pair_of(pipeline.arena(), &response).unwrap().id(), request.id());
    let round_trip = PersistedMessage::from_element(&response).unwrap();
    assert_eq!(round_trip.paired_message_uuid.as_deref(), Some(REQUEST_UUID));
}

#[test]
fn test_restore_rejects_bad_uuid() {
    let pipeline = Pipeline::default();
    let result = pipeline.restore(&persisted(serde_json::json!({
        "uuid": "not-a-uuid",
        "content": "",
    })));
    assert!(matches!(result, Err(ConversionError::InvalidUuid(_))));
    assert!(pipeline.arena().is_empty());
}

// =========================================================================
// Pipeline mechanics
// =========================================================================

struct Recorder {
    name:  &'static str,
    phase: Phase,
    log:   Arc<Mutex<Vec<&'static str>>>,
}

impl Converter for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn consume_element(
        &self,
        _element: &Arc<Element>,
        _handle: &PipelineHandle<'_>,
    ) -> Result<(), ConversionError> {
        self.log.lock().unwrap().push(self.name);
        Ok(())
    }
}

fn bare_pipeline() -> Pipeline {
    Pipeline::new(PipelineConfig {
        builtin_converters: false,
        ..PipelineConfig::default()
    })
}

#[test]
fn test_converters_run_in_phase_then_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = bare_pipeline();
    for (name, phase) in [
        ("late", Phase::Enrichment),
        ("early", Phase::Framing),
        ("middle", Phase::ContentTypeDecoding),
        ("early2", Phase::Framing),
    ] {
        pipeline.register(Recorder {
            name,
            phase,
            log: Arc::clone(&log),
        });
    }

    assert_eq!(pipeline.converter_names(), ["early", "early2", "middle", "late"]);
    let message = pipeline
        .arena()
        .create_message(ContentBuffer::empty(), None, MessageMetadata::new());
    pipeline.convert(&message);
    assert_eq!(*log.lock().unwrap(), ["early", "early2", "middle", "late"]);
}

#[test]
fn test_default_converters() {
    assert_eq!(Pipeline::default().converter_names(), [
        "http2",
        "http1",
        "formUrlEncoded",
        "pairing"
    ]);
}

struct Exploding;

impl Converter for Exploding {
    fn name(&self) -> &'static str {
        "exploding"
    }

    fn phase(&self) -> Phase {
        Phase::ContentTypeDecoding
    }

    fn consume_element(
        &self,
        _element: &Arc<Element>,
        _handle: &PipelineHandle<'_>,
    ) -> Result<(), ConversionError> {
        panic!("boom")
    }
}

#[test]
fn test_panicking_converter_is_isolated() {
    let mut pipeline = Pipeline::default();
    pipeline.register(Exploding);

    let data = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let message = pipeline.ingest(chunk(&data[..], CLIENT, SERVER));

    // Earlier and later converters still ran
    assert!(message.has_capability(Capability::HttpRequest));
    let error = message.facet::<ConversionErrorFacet>().unwrap();
    assert_eq!(error.converter, "exploding");
    assert!(matches!(
        &error.error,
        ConversionError::Panicked { message, .. } if message == "boom"
    ));
    assert_eq!(message.content().as_bytes(), data);

    // Not retried when converted again
    pipeline.convert(&message);
    let errors = message
        .facets()
        .iter()
        .filter(|facet| facet.has_capability(Capability::ConversionError))
        .count();
    assert_eq!(errors, 1);
}

/// Nests a copy of every element under it, forever
struct Nesting;

impl Converter for Nesting {
    fn name(&self) -> &'static str {
        "nesting"
    }

    fn phase(&self) -> Phase {
        Phase::ProtocolParsing
    }

    fn consume_element(
        &self,
        element: &Arc<Element>,
        handle: &PipelineHandle<'_>,
    ) -> Result<(), ConversionError> {
        if element.has_facet::<ListFacet>() {
            return Ok(());
        }
        let child = handle.create_child(element.id(), element.content().clone())?;
        element.add_facet(ListFacet {
            items: vec![child.id()],
        });
        handle.submit(&child);
        Ok(())
    }
}

#[test]
fn test_recursion_bounded_by_max_depth() {
    let mut pipeline = Pipeline::new(PipelineConfig {
        max_depth: 3,
        builtin_converters: false,
        ..PipelineConfig::default()
    });
    pipeline.register(Nesting);

    let message = pipeline.arena().create_message(
        ContentBuffer::from(&b"data"[..]),
        None,
        MessageMetadata::new(),
    );
    pipeline.convert(&message);

    let mut deepest = Arc::clone(&message);
    let mut levels = 0;
    while let Some(next) = pipeline.arena().children_of(&deepest).into_iter().next() {
        deepest = next;
        levels += 1;
    }
    assert_eq!(levels, 4);
    assert_eq!(pipeline.arena().len(), 5);
    let error = deepest.facet::<ConversionErrorFacet>().unwrap();
    assert!(matches!(
        error.error,
        ConversionError::DepthExceeded { depth: 4, max: 3 }
    ));
}
