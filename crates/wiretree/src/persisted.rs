//! Messages saved by an earlier capture session

use std::net::SocketAddr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::buffer::ContentBuffer;
use crate::element::Element;
use crate::error::{ConversionError, MetadataError};
use crate::metadata::{
    MessageMetadata, PAIRED_MESSAGE_ID, RECEIVER, SENDER, SEQUENCE_NUMBER, TIMESTAMP,
};
use crate::trace_debug;

/// A top-level message as stored on disk.
///
/// `content` is the standard base64 encoding of the raw bytes. Endpoints are
/// `ip:port` strings and the timestamp is RFC 3339. Captures written before
/// pairing existed simply have no `pairedMessageUuid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMessage {
    pub uuid:                String,
    pub content:             String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender:              Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver:            Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp:           Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number:     Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_message_uuid: Option<String>,
}

impl PersistedMessage {
    /// Snapshot a top-level message
    pub fn from_element(element: &Element) -> Result<Self, MetadataError> {
        Ok(Self {
            uuid:                element.uuid().to_string(),
            content:             STANDARD.encode(element.content().as_bytes()),
            sender:              element.get_metadata(SENDER)?.map(|a| a.to_string()),
            receiver:            element.get_metadata(RECEIVER)?.map(|a| a.to_string()),
            timestamp:           element
                .get_metadata(TIMESTAMP)?
                .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            sequence_number:     element.get_metadata(SEQUENCE_NUMBER)?,
            paired_message_uuid: element.get_metadata(PAIRED_MESSAGE_ID)?.map(|u| u.to_string()),
        })
    }

    /// Decoded raw bytes
    pub fn content_bytes(&self) -> Result<Vec<u8>, ConversionError> {
        Ok(STANDARD.decode(self.content.trim())?)
    }

    /// Uuid, content and metadata of the message to rebuild.
    ///
    /// A bad uuid or content fails; optional fields that do not parse are
    /// left out.
    pub fn to_parts(&self) -> Result<(Uuid, ContentBuffer, MessageMetadata), ConversionError> {
        let uuid = Uuid::parse_str(self.uuid.trim())?;
        let content = ContentBuffer::from(self.content_bytes()?);

        let mut metadata = MessageMetadata::new();
        if let Some(sender) = parse_field::<SocketAddr>("sender", self.sender.as_deref()) {
            metadata.set(SENDER, sender);
        }
        if let Some(receiver) = parse_field::<SocketAddr>("receiver", self.receiver.as_deref()) {
            metadata.set(RECEIVER, receiver);
        }
        if let Some(timestamp) = self.timestamp.as_deref().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw.trim())
                .inspect_err(|_e| {
                    trace_debug!("ignoring persisted timestamp {raw:?}: {_e}");
                })
                .ok()
        }) {
            metadata.set(TIMESTAMP, timestamp.with_timezone(&Utc));
        }
        if let Some(sequence) = self.sequence_number {
            metadata.set(SEQUENCE_NUMBER, sequence);
        }
        if let Some(paired) =
            parse_field::<Uuid>("pairedMessageUuid", self.paired_message_uuid.as_deref())
        {
            metadata.set(PAIRED_MESSAGE_ID, paired);
        }
        Ok((uuid, content, metadata))
    }
}

fn parse_field<T>(_name: &str, raw: Option<&str>) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = raw?;
    raw.trim()
        .parse()
        .inspect_err(|_e| {
            trace_debug!("ignoring persisted {_name} {raw:?}: {_e}");
        })
        .ok()
}
