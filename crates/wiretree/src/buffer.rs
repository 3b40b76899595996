//! Immutable byte content shared by elements

use std::fmt;

use bytes::Bytes;

use crate::error::BufferError;

/// Raw bytes of a decoded region.
///
/// Never mutated once built. [`sub_range()`](Self::sub_range) returns a view
/// over the same backing storage, so every element of a message tree can hold
/// its own byte-exact region without copying.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ContentBuffer {
    bytes: Bytes,
}

impl ContentBuffer {
    /// Wrap bytes without copying them
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Copy `data` into a new buffer
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(data),
        }
    }

    /// An empty buffer
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of bytes
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte at `index`, failing when `index >= size()`
    pub fn byte_at(&self, index: usize) -> Result<u8, BufferError> {
        self.bytes
            .get(index)
            .copied()
            .ok_or(BufferError::OutOfRange {
                index,
                size: self.size(),
            })
    }

    /// View of `start..end` sharing this buffer's storage.
    ///
    /// Fails when `start > end` or `end > size()`. An empty range is valid
    /// anywhere inside the buffer, including at its end.
    pub fn sub_range(&self, start: usize, end: usize) -> Result<ContentBuffer, BufferError> {
        if start > end || end > self.size() {
            return Err(BufferError::InvalidRange {
                start,
                end,
                size: self.size(),
            });
        }
        Ok(Self {
            bytes: self.bytes.slice(start..end),
        })
    }

    /// Offset of the first occurrence of `needle`
    pub fn index_of(&self, needle: &[u8]) -> Option<usize> {
        self.index_of_from(needle, 0)
    }

    /// Offset of the first occurrence of `needle` at or after `from`.
    ///
    /// An empty needle matches at `from` as long as `from <= size()`.
    pub fn index_of_from(&self, needle: &[u8], from: usize) -> Option<usize> {
        let haystack = self.bytes.get(from..)?;
        if needle.is_empty() {
            return Some(from);
        }
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
            .map(|pos| from + pos)
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The underlying shared handle
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Copy every byte out
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Copy `start..end` out, with the same bounds rules as
    /// [`sub_range()`](Self::sub_range)
    pub fn to_vec_range(&self, start: usize, end: usize) -> Result<Vec<u8>, BufferError> {
        self.sub_range(start, end).map(|range| range.to_vec())
    }

    /// Returns true if this buffer's bytes lie inside `other`'s storage
    pub fn is_view_of(&self, other: &ContentBuffer) -> bool {
        let outer = other.bytes.as_ptr_range();
        let inner = self.bytes.as_ptr_range();
        !other.is_empty() && inner.start >= outer.start && inner.end <= outer.end
    }
}

impl AsRef<[u8]> for ContentBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Bytes> for ContentBuffer {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl From<Vec<u8>> for ContentBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&'static [u8]> for ContentBuffer {
    fn from(bytes: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(bytes))
    }
}

impl From<String> for ContentBuffer {
    fn from(text: String) -> Self {
        Self::new(text.into_bytes())
    }
}

impl fmt::Debug for ContentBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 32;
        let preview = &self.bytes[..self.size().min(PREVIEW)];
        write!(f, "ContentBuffer({} bytes, {:?}", self.size(), String::from_utf8_lossy(preview))?;
        if self.size() > PREVIEW {
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}
