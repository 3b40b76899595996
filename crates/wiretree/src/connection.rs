//! Transport input and connection identity

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::element::Element;
use crate::metadata::{RECEIVER, SENDER};

/// Which way bytes flow relative to a [`ConnectionId`]'s ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowDirection {
    /// From the lower endpoint to the higher one
    Forward,
    /// From the higher endpoint to the lower one
    Reverse,
}

/// Direction-normalized pair of endpoints.
///
/// `ConnectionId::new(a, b) == ConnectionId::new(b, a)`, so both directions of
/// a connection share one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    low:  SocketAddr,
    high: SocketAddr,
}

impl ConnectionId {
    pub fn new(a: SocketAddr, b: SocketAddr) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn endpoints(&self) -> (SocketAddr, SocketAddr) {
        (self.low, self.high)
    }

    /// Direction of traffic sent by `sender`, or None if it is not an endpoint
    pub fn direction_of(&self, sender: SocketAddr) -> Option<FlowDirection> {
        if sender == self.low {
            Some(FlowDirection::Forward)
        } else if sender == self.high {
            Some(FlowDirection::Reverse)
        } else {
            None
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.low, self.high)
    }
}

/// Bytes observed on one direction of a connection, as handed over by the
/// transport layer.
#[derive(Debug, Clone)]
pub struct CapturedChunk {
    pub bytes:     Bytes,
    pub sender:    SocketAddr,
    pub receiver:  SocketAddr,
    pub timestamp: DateTime<Utc>,
}

impl CapturedChunk {
    pub fn new(
        bytes: impl Into<Bytes>,
        sender: SocketAddr,
        receiver: SocketAddr,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            sender,
            receiver,
            timestamp,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.sender, self.receiver)
    }
}

/// Connection and direction of a top-level message, from its sender and
/// receiver metadata
pub(crate) fn connection_of(element: &Element) -> Option<(ConnectionId, FlowDirection)> {
    let sender = element.get_metadata(SENDER).ok().flatten()?;
    let receiver = element.get_metadata(RECEIVER).ok().flatten()?;
    let connection = ConnectionId::new(sender, receiver);
    let direction = connection.direction_of(sender)?;
    Some((connection, direction))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_connection_id_normalized() {
        let client = addr("192.168.1.10:51000");
        let server = addr("10.0.0.1:443");
        let forward = ConnectionId::new(client, server);
        let reverse = ConnectionId::new(server, client);

        assert_eq!(forward, reverse);
        assert_eq!(forward.endpoints(), (server, client));
        assert_eq!(forward.direction_of(server), Some(FlowDirection::Forward));
        assert_eq!(forward.direction_of(client), Some(FlowDirection::Reverse));
        assert_eq!(forward.direction_of(addr("127.0.0.1:1")), None);
        assert_eq!(forward.to_string(), "10.0.0.1:443 <-> 192.168.1.10:51000");
    }

    #[test]
    fn test_chunk_connection_id() {
        let chunk = CapturedChunk::new(
            &b"x"[..],
            addr("[::1]:8080"),
            addr("[::1]:60000"),
            DateTime::UNIX_EPOCH,
        );
        assert_eq!(
            chunk.connection_id(),
            ConnectionId::new(addr("[::1]:60000"), addr("[::1]:8080"))
        );
    }
}
