//! Get-or-default and put helpers on top of a [`PersistencePort`].

use log::{debug, error, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{PersistencePort, RecordKey, StorageError, decode_record, encode_record};
use crate::config::RECORD_BUFFER_SIZE;

/// A record obtained through [`load_or_default`].
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub value: T,
    /// `true` when the stored record was absent or unreadable and `value` is
    /// the default. Callers must persist it.
    pub fresh: bool,
}

/// Read and decode the record for `key`.
///
/// `Ok(None)` covers both "never written" and "present but invalid"; only a
/// failing port is an error.
pub fn load_record<P, T>(port: &mut P, key: RecordKey) -> Result<Option<T>, StorageError>
where
    P: PersistencePort,
    T: DeserializeOwned,
{
    let mut buf = [0u8; RECORD_BUFFER_SIZE];
    let Some(len) = port.read(key, &mut buf)? else {
        debug!("Record {} absent", key.name());
        return Ok(None);
    };

    let bytes = buf.get(..len).ok_or(StorageError::BufferTooSmall)?;
    let value = decode_record(key, bytes);
    if value.is_none() {
        warn!("Record {} failed validation, treating as absent", key.name());
    }
    Ok(value)
}

/// Load `key`, falling back to `default()` when absent, corrupt, or when the
/// port itself fails.
pub fn load_or_default<P, T, F>(port: &mut P, key: RecordKey, default: F) -> Loaded<T>
where
    P: PersistencePort,
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    match load_record(port, key) {
        Ok(Some(value)) => Loaded {
            value,
            fresh: false,
        },
        Ok(None) => Loaded {
            value: default(),
            fresh: true,
        },
        Err(e) => {
            error!("Failed to read record {}: {:?}", key.name(), e);
            Loaded {
                value: default(),
                fresh: true,
            }
        }
    }
}

/// Encode and write `value` as the record for `key`.
pub fn save_record<P, T>(port: &mut P, key: RecordKey, value: &T) -> Result<(), StorageError>
where
    P: PersistencePort,
    T: Serialize,
{
    let mut buf = [0u8; RECORD_BUFFER_SIZE];
    let bytes = encode_record(key, value, &mut buf)?;
    port.write(key, bytes).inspect_err(|e| {
        error!("Failed to write record {}: {:?}", key.name(), e);
    })?;
    debug!("Record {} saved ({} bytes)", key.name(), bytes.len());
    Ok(())
}
