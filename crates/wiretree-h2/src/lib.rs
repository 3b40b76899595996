//! Incremental HTTP/2 stream reassembly for captured traffic.
//!
//! Bytes observed on one direction of a connection are fed in capture order,
//! split at arbitrary offsets. Frames are reassembled per stream, header
//! blocks are HPACK-decoded with a per-direction dynamic table, and each
//! stream is handed back as a [`ReconstructedStream`] once its headers are
//! decoded and END_STREAM was seen.

mod frame;
mod parse;
mod state;

#[cfg(feature = "tracing")]
macro_rules! trace_warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn {
    ($($arg:tt)*) => {};
}
pub(crate) use trace_warn;

use dashmap::DashMap;
pub use frame::{
    CONNECTION_PREFACE, FRAME_HEADER_SIZE, FrameHeader, is_http2_candidate, is_http2_preface,
    is_partial_preface, looks_like_http2_frame, parse_frame_header,
};
pub use state::{
    H2ConnectionState, H2Limits, H2Settings, ParseError, ParseErrorKind, ReconstructedStream,
    StreamId, TimestampNs,
};
use std::hash::Hash;
use std::sync::Mutex;

/// HTTP/2 session cache with generic connection keys.
///
/// Uses `DashMap<K, Mutex<H2ConnectionState>>`: the shard lock is held only
/// to look up or insert the entry, while the per-key Mutex serializes
/// same-key calls to [`feed()`](Self::feed). State is created lazily on the
/// first bytes seen for a key and lives until [`remove()`](Self::remove),
/// [`retain()`](Self::retain) or [`clear()`](Self::clear).
pub struct H2SessionCache<K> {
    connections: DashMap<K, Mutex<H2ConnectionState>>,
    limits:      H2Limits,
}

impl<K: Hash + Eq + Clone> H2SessionCache<K> {
    /// Create a new cache with default limits
    pub fn new() -> Self {
        Self::with_limits(H2Limits::default())
    }

    /// Create a new cache whose connection states use `limits`
    pub fn with_limits(limits: H2Limits) -> Self {
        Self {
            connections: DashMap::new(),
            limits,
        }
    }

    /// Feed captured bytes for `key` and collect the streams they completed.
    ///
    /// Returns completed streams in completion order. The list is empty when
    /// the bytes only advanced in-flight streams or ended mid-frame; call
    /// again once more bytes arrive.
    pub fn feed(
        &self,
        key: K,
        data: &[u8],
        timestamp_ns: TimestampNs,
    ) -> Result<Vec<(StreamId, ReconstructedStream)>, ParseError> {
        let entry = self
            .connections
            .entry(key)
            .or_insert_with(|| Mutex::new(H2ConnectionState::with_limits(self.limits.clone())))
            .downgrade();
        let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
        state.feed(data, timestamp_ns)?;

        let mut completed = Vec::new();
        while let Some(pair) = state.try_pop() {
            completed.push(pair);
        }
        Ok(completed)
    }

    /// Remove connection state (call when connection closes)
    pub fn remove(&self, key: &K) -> Option<H2ConnectionState> {
        self.connections
            .remove(key)
            .map(|(_, mutex)| mutex.into_inner().unwrap_or_else(|e| e.into_inner()))
    }

    /// Keep only the connections for which `keep` returns true
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        self.connections.retain(|key, _| keep(key));
    }

    /// Drop every connection state
    pub fn clear(&self) {
        self.connections.clear();
    }

    /// Check if connection state exists
    pub fn contains(&self, key: &K) -> bool {
        self.connections.contains_key(key)
    }

    /// Number of in-flight streams for `key`, if the connection is tracked
    pub fn active_stream_count(&self, key: &K) -> Option<usize> {
        self.connections.get(key).map(|entry| {
            entry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .active_stream_count()
        })
    }

    /// Get number of tracked connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<K: Hash + Eq + Clone> Default for H2SessionCache<K> {
    fn default() -> Self {
        Self::new()
    }
}
