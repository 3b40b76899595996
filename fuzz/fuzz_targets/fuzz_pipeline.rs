//! Fuzz target: arbitrary captured chunks through the default pipeline
//!
//! Chunks alternate direction on one connection, so HTTP/1 parsing, HTTP/2
//! reassembly and pairing all see the input. No converter may take the
//! pipeline down, and every element must keep its bytes.

#![no_main]

use std::net::SocketAddr;

use chrono::Utc;
use libfuzzer_sys::fuzz_target;
use wiretree::{CapturedChunk, Pipeline};

fuzz_target!(|chunks: Vec<Vec<u8>>| {
    let client: SocketAddr = ([10, 0, 0, 2], 40000).into();
    let server: SocketAddr = ([10, 0, 0, 1], 443).into();
    let pipeline = Pipeline::default();

    for (index, bytes) in chunks.into_iter().enumerate() {
        let (sender, receiver) = if index % 2 == 0 {
            (client, server)
        } else {
            (server, client)
        };
        let expected = bytes.clone();
        let message = pipeline.ingest(CapturedChunk::new(bytes, sender, receiver, Utc::now()));
        assert_eq!(message.content().as_bytes(), expected.as_slice());

        for id in message.child_nodes() {
            assert!(pipeline.arena().get(id).is_some());
        }
    }
});
