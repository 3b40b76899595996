//! Typed metadata carried by top-level messages

use std::fmt;
use std::marker::PhantomData;
use std::net::SocketAddr;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::error::MetadataError;
use crate::multimap::OrderedMultimap;

/// A stored metadata value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Text(String),
    Integer(i64),
    Unsigned(u64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Address(SocketAddr),
}

impl MetadataValue {
    /// Name of the stored type, as used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Unsigned(_) => "unsigned",
            Self::Bool(_) => "bool",
            Self::Timestamp(_) => "timestamp",
            Self::Uuid(_) => "uuid",
            Self::Address(_) => "address",
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(v) => f.write_str(v),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Timestamp(v) => f.write_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Address(v) => write!(f, "{v}"),
        }
    }
}

/// A Rust type that metadata values can be read as and written from.
///
/// `from_value` implements the conversion table: the exact variant always
/// converts, and a few structural conversions are attempted for the others.
/// Returning `None` makes the read fail with
/// [`MetadataError::TypeMismatch`].
pub trait MetadataType: Sized {
    const TYPE_NAME: &'static str;

    fn into_value(self) -> MetadataValue;

    fn from_value(value: &MetadataValue) -> Option<Self>;
}

impl MetadataType for String {
    const TYPE_NAME: &'static str = "text";

    fn into_value(self) -> MetadataValue {
        MetadataValue::Text(self)
    }

    /// Every stored type has a text form.
    fn from_value(value: &MetadataValue) -> Option<Self> {
        Some(value.to_string())
    }
}

impl MetadataType for i64 {
    const TYPE_NAME: &'static str = "integer";

    fn into_value(self) -> MetadataValue {
        MetadataValue::Integer(self)
    }

    fn from_value(value: &MetadataValue) -> Option<Self> {
        match value {
            MetadataValue::Integer(v) => Some(*v),
            MetadataValue::Unsigned(v) => i64::try_from(*v).ok(),
            MetadataValue::Text(v) => v.trim().parse().ok(),
            MetadataValue::Timestamp(v) => Some(v.timestamp_millis()),
            _ => None,
        }
    }
}

impl MetadataType for u64 {
    const TYPE_NAME: &'static str = "unsigned";

    fn into_value(self) -> MetadataValue {
        MetadataValue::Unsigned(self)
    }

    fn from_value(value: &MetadataValue) -> Option<Self> {
        match value {
            MetadataValue::Unsigned(v) => Some(*v),
            MetadataValue::Integer(v) => u64::try_from(*v).ok(),
            MetadataValue::Text(v) => v.trim().parse().ok(),
            MetadataValue::Timestamp(v) => u64::try_from(v.timestamp_millis()).ok(),
            _ => None,
        }
    }
}

impl MetadataType for bool {
    const TYPE_NAME: &'static str = "bool";

    fn into_value(self) -> MetadataValue {
        MetadataValue::Bool(self)
    }

    fn from_value(value: &MetadataValue) -> Option<Self> {
        match value {
            MetadataValue::Bool(v) => Some(*v),
            MetadataValue::Text(v) if v.trim().eq_ignore_ascii_case("true") => Some(true),
            MetadataValue::Text(v) if v.trim().eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }
}

impl MetadataType for DateTime<Utc> {
    const TYPE_NAME: &'static str = "timestamp";

    fn into_value(self) -> MetadataValue {
        MetadataValue::Timestamp(self)
    }

    /// Integers are epoch milliseconds, text is RFC 3339.
    fn from_value(value: &MetadataValue) -> Option<Self> {
        match value {
            MetadataValue::Timestamp(v) => Some(*v),
            MetadataValue::Integer(v) => DateTime::from_timestamp_millis(*v),
            MetadataValue::Unsigned(v) => DateTime::from_timestamp_millis(i64::try_from(*v).ok()?),
            MetadataValue::Text(v) => DateTime::parse_from_rfc3339(v.trim())
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }
}

impl MetadataType for Uuid {
    const TYPE_NAME: &'static str = "uuid";

    fn into_value(self) -> MetadataValue {
        MetadataValue::Uuid(self)
    }

    fn from_value(value: &MetadataValue) -> Option<Self> {
        match value {
            MetadataValue::Uuid(v) => Some(*v),
            MetadataValue::Text(v) => Uuid::parse_str(v.trim()).ok(),
            _ => None,
        }
    }
}

impl MetadataType for SocketAddr {
    const TYPE_NAME: &'static str = "address";

    fn into_value(self) -> MetadataValue {
        MetadataValue::Address(self)
    }

    fn from_value(value: &MetadataValue) -> Option<Self> {
        match value {
            MetadataValue::Address(v) => Some(*v),
            MetadataValue::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Fixed key name plus the type it is read as.
pub struct MetadataKey<T> {
    name:  &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> MetadataKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for MetadataKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for MetadataKey<T> {}

impl<T> fmt::Debug for MetadataKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetadataKey({})", self.name)
    }
}

/// Endpoint that sent the message
pub const SENDER: MetadataKey<SocketAddr> = MetadataKey::new("sender");
/// Endpoint that received the message
pub const RECEIVER: MetadataKey<SocketAddr> = MetadataKey::new("receiver");
/// When the message was transmitted
pub const TIMESTAMP: MetadataKey<DateTime<Utc>> = MetadataKey::new("timestamp");
/// Position of the message in the capture
pub const SEQUENCE_NUMBER: MetadataKey<u64> = MetadataKey::new("sequenceNumber");
/// Message seen just before this one on the same connection
pub const PREVIOUS_MESSAGE_ID: MetadataKey<Uuid> = MetadataKey::new("previousMessageUuid");
/// Request or response this message is paired with
pub const PAIRED_MESSAGE_ID: MetadataKey<Uuid> = MetadataKey::new("pairedMessageUuid");

/// Key/value bag of a top-level message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    values: OrderedMultimap<String, MetadataValue>,
}

impl MessageMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set()`](Self::set)
    pub fn with<T: MetadataType>(mut self, key: MetadataKey<T>, value: T) -> Self {
        self.set(key, value);
        self
    }

    /// Read `key` as `T`, converting from the stored type when possible
    pub fn get<T: MetadataType>(&self, key: MetadataKey<T>) -> Result<Option<T>, MetadataError> {
        let Some(value) = self.values.get(key.name()) else {
            return Ok(None);
        };
        T::from_value(value)
            .map(Some)
            .ok_or_else(|| MetadataError::TypeMismatch {
                key:      key.name().to_string(),
                expected: T::TYPE_NAME,
                found:    value.type_name(),
            })
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn set<T: MetadataType>(&mut self, key: MetadataKey<T>, value: T) {
        self.set_raw(key.name(), value.into_value());
    }

    pub fn get_raw(&self, name: &str) -> Option<&MetadataValue> {
        self.values.get(name)
    }

    /// Store an untyped value, replacing any previous value in place
    pub fn set_raw(&mut self, name: &str, value: MetadataValue) {
        match self.values.get_mut(name) {
            Some(slot) => *slot = value,
            None => self.values.put(name.to_string(), value),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<MetadataValue> {
        self.values.remove_all(name).into_iter().next()
    }

    /// Entries in the order they were first set
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
