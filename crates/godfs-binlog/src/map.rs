//! `binlog.map`: per-segment record counts.
//!
//! Slot `i` lives at byte offset `i * 3` and holds the record count of segment
//! `i` as a 24-bit big-endian integer. The map speeds up resume; segment file
//! lengths stay authoritative and the map is reconciled against them on open.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use godfs_constants::binlog::BINLOG_MAP_SLOT_WIDTH;
use godfs_constants::binlog::MAX_MAP_SLOT_VALUE;
use snafu::ResultExt;

use crate::error::BinlogError;
use crate::error::IoSnafu;

pub(crate) struct SegmentMap {
    file: File,
    path: PathBuf,
}

impl SegmentMap {
    pub(crate) fn open(path: &Path) -> Result<Self, BinlogError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .context(IoSnafu { path })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Record count stored for `index`; 0 when the slot was never written.
    pub(crate) fn get(&mut self, index: u32) -> Result<u32, BinlogError> {
        let pos = u64::from(index) * BINLOG_MAP_SLOT_WIDTH;
        let len = self.file.metadata().context(IoSnafu { path: &self.path })?.len();
        if pos + BINLOG_MAP_SLOT_WIDTH > len {
            return Ok(0);
        }
        let mut slot = [0u8; 3];
        self.file.seek(SeekFrom::Start(pos)).context(IoSnafu { path: &self.path })?;
        self.file.read_exact(&mut slot).context(IoSnafu { path: &self.path })?;
        Ok(u32::from_be_bytes([0, slot[0], slot[1], slot[2]]))
    }

    pub(crate) fn set(&mut self, index: u32, count: u32) -> Result<(), BinlogError> {
        let count = count.min(MAX_MAP_SLOT_VALUE);
        let bytes = count.to_be_bytes();
        let pos = u64::from(index) * BINLOG_MAP_SLOT_WIDTH;
        self.file.seek(SeekFrom::Start(pos)).context(IoSnafu { path: &self.path })?;
        self.file.write_all(&bytes[1..]).context(IoSnafu { path: &self.path })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_unwritten_slots_read_zero() {
        let dir = TempDir::new().unwrap();
        let mut map = SegmentMap::open(&dir.path().join("binlog.map")).unwrap();
        assert_eq!(map.get(0).unwrap(), 0);
        assert_eq!(map.get(9).unwrap(), 0);
    }

    #[test]
    fn test_slots_are_three_bytes_apart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("binlog.map");
        {
            let mut map = SegmentMap::open(&path).unwrap();
            map.set(0, 2_000_000).unwrap();
            map.set(2, 5).unwrap();
        }
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw.len(), 9);
        assert_eq!(&raw[..3], &2_000_000u32.to_be_bytes()[1..]);
        assert_eq!(&raw[6..], &[0, 0, 5]);

        let mut map = SegmentMap::open(&path).unwrap();
        assert_eq!(map.get(0).unwrap(), 2_000_000);
        assert_eq!(map.get(1).unwrap(), 0);
        assert_eq!(map.get(2).unwrap(), 5);
    }
}
