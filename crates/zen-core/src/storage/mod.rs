//! Key-addressed persistence.
//!
//! The core never sees byte offsets or flash pages. It stores four logical
//! records through a [`PersistencePort`]; each record is a `postcard` payload
//! behind a two-byte header:
//!
//! ```text
//! +--------+-----+---------------------+
//! | 0xAA   | tag | postcard payload... |
//! +--------+-----+---------------------+
//! ```
//!
//! A missing header, a tag belonging to another record, or a payload that
//! fails to decode all read as *absent*, and the caller falls back to
//! defaults.

pub mod manager;
pub mod memory;

pub use manager::*;
pub use memory::*;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror_no_std::Error;

/// First byte of every valid record.
pub const VALIDITY_MARKER: u8 = 0xAA;

/// Header length in bytes.
pub const RECORD_HEADER_LEN: usize = 2;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("failed to encode record")]
    Encode,
    #[error("failed to decode record")]
    Decode,
    #[error("persistence port failure")]
    Port,
    #[error("record does not fit in the buffer")]
    BufferTooSmall,
}

/// Logical record names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Settings,
    TodayStats,
    History,
    Calibration,
}

impl RecordKey {
    pub const ALL: [RecordKey; 4] = [
        Self::Settings,
        Self::TodayStats,
        Self::History,
        Self::Calibration,
    ];

    pub const fn tag(self) -> u8 {
        match self {
            Self::Settings => 0x01,
            Self::TodayStats => 0x02,
            Self::History => 0x03,
            Self::Calibration => 0x04,
        }
    }

    pub const fn index(self) -> usize {
        self.tag() as usize - 1
    }

    /// Stable file-system friendly name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::TodayStats => "today",
            Self::History => "history",
            Self::Calibration => "calibration",
        }
    }
}

/// Platform storage backend.
///
/// `read` copies the stored bytes of `key` into `buf` and returns their
/// length, or `None` when nothing was ever written.
pub trait PersistencePort {
    fn read(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<Option<usize>, StorageError>;
    fn write(&mut self, key: RecordKey, bytes: &[u8]) -> Result<(), StorageError>;
}

impl<P: PersistencePort + ?Sized> PersistencePort for &mut P {
    fn read(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
        (**self).read(key, buf)
    }

    fn write(&mut self, key: RecordKey, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).write(key, bytes)
    }
}

/// Encode `value` as a record for `key` into `buf`, returning the used part.
pub fn encode_record<'a, T: Serialize>(
    key: RecordKey,
    value: &T,
    buf: &'a mut [u8],
) -> Result<&'a [u8], StorageError> {
    if buf.len() < RECORD_HEADER_LEN {
        return Err(StorageError::BufferTooSmall);
    }
    buf[0] = VALIDITY_MARKER;
    buf[1] = key.tag();

    let payload_len = postcard::to_slice(value, &mut buf[RECORD_HEADER_LEN..])
        .map_err(|e| match e {
            postcard::Error::SerializeBufferFull => StorageError::BufferTooSmall,
            _ => StorageError::Encode,
        })?
        .len();

    Ok(&buf[..RECORD_HEADER_LEN + payload_len])
}

/// Decode a record for `key`. Any header or payload mismatch is `None`.
pub fn decode_record<T: DeserializeOwned>(key: RecordKey, bytes: &[u8]) -> Option<T> {
    match bytes {
        [VALIDITY_MARKER, tag, payload @ ..] if *tag == key.tag() => {
            postcard::from_bytes(payload).ok()
        }
        _ => None,
    }
}
