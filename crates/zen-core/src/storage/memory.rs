use heapless::Vec;

use super::{PersistencePort, RecordKey, StorageError};
use crate::config::RECORD_BUFFER_SIZE;

type Slot = Option<Vec<u8, RECORD_BUFFER_SIZE>>;

/// RAM-backed [`PersistencePort`], one slot per record key.
///
/// Used by the tests; writes can be forced to fail to exercise error paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: [Slot; RecordKey::ALL.len()],
    fail_writes: bool,
    writes: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: RecordKey) -> bool {
        self.slots[key.index()].is_some()
    }

    /// Raw stored bytes, header included.
    pub fn raw(&self, key: RecordKey) -> Option<&[u8]> {
        self.slots[key.index()].as_deref()
    }

    /// Overwrite a slot with arbitrary bytes.
    pub fn put_raw(&mut self, key: RecordKey, bytes: &[u8]) -> Result<(), StorageError> {
        let stored = Vec::from_slice(bytes).map_err(|_| StorageError::BufferTooSmall)?;
        self.slots[key.index()] = Some(stored);
        Ok(())
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u32 {
        self.writes
    }
}

impl PersistencePort for MemoryStore {
    fn read(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
        let Some(stored) = &self.slots[key.index()] else {
            return Ok(None);
        };
        let dst = buf
            .get_mut(..stored.len())
            .ok_or(StorageError::BufferTooSmall)?;
        dst.copy_from_slice(stored);
        Ok(Some(stored.len()))
    }

    fn write(&mut self, key: RecordKey, bytes: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Port);
        }
        self.put_raw(key, bytes)?;
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_missing_is_none() {
        let mut store = MemoryStore::new();
        let mut buf = [0u8; 8];
        assert_eq!(store.read(RecordKey::Settings, &mut buf), Ok(None));
    }

    #[test]
    fn test_write_then_read() {
        let mut store = MemoryStore::new();
        store.write(RecordKey::Calibration, &[1, 2, 3]).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(store.read(RecordKey::Calibration, &mut buf), Ok(Some(3)));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert!(!store.contains(RecordKey::Settings));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_failing_writes() {
        let mut store = MemoryStore::new();
        store.set_fail_writes(true);
        assert_eq!(
            store.write(RecordKey::History, &[0xAA]),
            Err(StorageError::Port)
        );
        assert!(!store.contains(RecordKey::History));
    }

    #[test]
    fn test_short_read_buffer() {
        let mut store = MemoryStore::new();
        store.write(RecordKey::History, &[0; 16]).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            store.read(RecordKey::History, &mut buf),
            Err(StorageError::BufferTooSmall)
        );
    }
}
