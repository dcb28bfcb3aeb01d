//! Stored representation of timeline entries.
//!
//! Every value written to a backend list is either an encoded
//! [`TimelineEntry`] (one tag byte followed by the opaque payload) or the
//! [`SENTINEL`]. The sentinel is the single byte `0xFF`, which is not a valid
//! tag, so it can never be mistaken for a real entry.

use bytes::{BufMut, Bytes, BytesMut};

const TAG_LIVE: u8 = 0x00;
const TAG_TOMBSTONE: u8 = 0x01;
const TAG_SENTINEL: u8 = 0xFF;

/// Marks a timeline that is known to exist and is legitimately empty.
pub const SENTINEL: &[u8] = &[TAG_SENTINEL];

/// The sentinel as a [`Bytes`] value, ready to push.
pub fn sentinel() -> Bytes {
    Bytes::from_static(SENTINEL)
}

/// Errors decoding a raw list value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    /// Zero-length value; every stored value carries at least a tag byte.
    #[error("empty stored value")]
    Empty,

    /// The leading tag byte is not one this version writes.
    #[error("unknown entry tag {0:#04x}")]
    UnknownTag(u8),
}

/// One element of a timeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimelineEntry {
    /// Caller-defined payload, opaque to the storage tier.
    pub payload: Bytes,
    /// Tombstones mark a logical deletion and are hidden from reads by default.
    pub deleted: bool,
}

impl TimelineEntry {
    /// A live entry.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            deleted: false,
        }
    }

    /// A tombstone for `payload`.
    pub fn tombstone(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            deleted: true,
        }
    }

    /// Encode into the stored form: tag byte, then payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 1);
        buf.put_u8(if self.deleted { TAG_TOMBSTONE } else { TAG_LIVE });
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// A decoded list value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// The explicitly-empty marker.
    Sentinel,
    /// A real entry.
    Entry(TimelineEntry),
}

impl StoredValue {
    /// Decode a raw value read from a backend list.
    pub fn decode(raw: &Bytes) -> Result<Self, EntryError> {
        let (&tag, _) = raw.split_first().ok_or(EntryError::Empty)?;
        match tag {
            TAG_SENTINEL if raw.len() == 1 => Ok(Self::Sentinel),
            TAG_LIVE => Ok(Self::Entry(TimelineEntry::new(raw.slice(1..)))),
            TAG_TOMBSTONE => Ok(Self::Entry(TimelineEntry::tombstone(raw.slice(1..)))),
            other => Err(EntryError::UnknownTag(other)),
        }
    }

    /// Whether `raw` is exactly the sentinel.
    pub fn is_sentinel(raw: &[u8]) -> bool {
        raw == SENTINEL
    }
}
