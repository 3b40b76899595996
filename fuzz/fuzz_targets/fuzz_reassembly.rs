//! Fuzz target: structured frame sequences
//!
//! Builds frame sequences with valid headers and arbitrary payloads, feeds
//! them whole and in small slices, and checks both produce the same streams.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wiretree_h2::{CONNECTION_PREFACE, H2SessionCache, TimestampNs};

const FRAME_TYPE_DATA: u8 = 0x00;
const FRAME_TYPE_HEADERS: u8 = 0x01;
const FRAME_TYPE_SETTINGS: u8 = 0x04;

const FLAG_PADDED: u8 = 0x08;
const FLAG_PRIORITY: u8 = 0x20;

const MAX_PAYLOAD: usize = 16384;

#[derive(Debug, Arbitrary)]
struct FuzzFrame {
    frame_type:   u8,
    flags:        u8,
    stream_id:    u8,
    payload:      Vec<u8>,
    add_padding:  bool,
    add_priority: bool,
    padding_len:  u8,
}

impl FuzzFrame {
    fn to_bytes(&self) -> Vec<u8> {
        let frame_type = self.frame_type % 10;
        // Few distinct streams so frames actually interleave
        let stream_id = u32::from(self.stream_id % 8);
        let mut flags = self.flags;
        let mut payload = self.payload.clone();
        payload.truncate(MAX_PAYLOAD - 256);

        if self.add_priority && frame_type == FRAME_TYPE_HEADERS {
            flags |= FLAG_PRIORITY;
            let mut prioritized = vec![0, 0, 0, 0, 16];
            prioritized.extend(&payload);
            payload = prioritized;
        }
        if self.add_padding && (frame_type == FRAME_TYPE_DATA || frame_type == FRAME_TYPE_HEADERS) {
            flags |= FLAG_PADDED;
            let mut padded = vec![self.padding_len];
            padded.extend(&payload);
            padded.extend(std::iter::repeat_n(0u8, usize::from(self.padding_len)));
            payload = padded;
        }

        let length = payload.len() as u32;
        let mut frame = Vec::with_capacity(9 + payload.len());
        frame.extend_from_slice(&length.to_be_bytes()[1..]);
        frame.push(frame_type);
        frame.push(flags);
        frame.extend_from_slice(&stream_id.to_be_bytes());
        frame.extend(payload);
        frame
    }
}

#[derive(Debug, Arbitrary)]
struct FuzzConnection {
    include_preface:  bool,
    include_settings: bool,
    slice_len:        u8,
    frames:           Vec<FuzzFrame>,
}

impl FuzzConnection {
    fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        if self.include_preface {
            data.extend_from_slice(CONNECTION_PREFACE);
        }
        if self.include_settings {
            data.extend(&[0, 0, 0, FRAME_TYPE_SETTINGS, 0, 0, 0, 0, 0]);
        }
        for frame in &self.frames {
            data.extend(frame.to_bytes());
        }
        data
    }
}

fuzz_target!(|conn: FuzzConnection| {
    let data = conn.to_bytes();
    let cache: H2SessionCache<u8> = H2SessionCache::new();

    let Ok(whole) = cache.feed(0, &data, TimestampNs(0)) else {
        return;
    };

    let slice_len = usize::from(conn.slice_len.max(1));
    let mut sliced = Vec::new();
    for slice in data.chunks(slice_len) {
        match cache.feed(1, slice, TimestampNs(0)) {
            Ok(streams) => sliced.extend(streams),
            Err(_) => return,
        }
    }

    let summary = |streams: &[(wiretree_h2::StreamId, wiretree_h2::ReconstructedStream)]| {
        streams
            .iter()
            .map(|(id, stream)| (id.0, stream.headers.clone(), stream.body.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(summary(&whole), summary(&sliced));
});
