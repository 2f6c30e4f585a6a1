//! The binlog writer and reader.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use godfs_constants::BINLOG_RECORD_SIZE;
use godfs_constants::MAX_BINLOG_RECORDS_PER_SEGMENT;
use godfs_constants::binlog::BINLOG_DIR_NAME;
use godfs_constants::binlog::BINLOG_MAP_FILE_NAME;
use godfs_constants::binlog::MAX_BINLOG_READ_BATCH;
use godfs_constants::binlog::MAX_MAP_SLOT_VALUE;
use godfs_types::BinlogBatch;
use godfs_types::BinlogQuery;
use godfs_types::BinlogRecord;
use godfs_types::CURRENT_SEGMENT;
use godfs_types::Cursor;
use parking_lot::Mutex;
use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::BinlogError;
use crate::error::IoSnafu;
use crate::map::SegmentMap;
use crate::verified;
use crate::verified::ReadPlan;

const RECORD_SIZE: u64 = BINLOG_RECORD_SIZE as u64;

/// Binlog tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinlogConfig {
    /// Records per segment before rotating to the next one.
    pub max_records_per_segment: u32,
}

impl Default for BinlogConfig {
    fn default() -> Self {
        Self {
            max_records_per_segment: MAX_BINLOG_RECORDS_PER_SEGMENT,
        }
    }
}

/// State owned by the single writer.
struct WriterState {
    /// Index of the segment receiving appends.
    index: u32,
    /// Open handle to that segment; opened lazily on first append.
    file: Option<File>,
    /// Records already in that segment.
    records: u32,
    map: SegmentMap,
}

/// Append-only, multi-segment log of file arrival events.
///
/// There is exactly one writer per node: appends serialize on an internal
/// lock. Readers open their own file handles and never take that lock, so a
/// slow peer read cannot stall local writes.
pub struct Binlog {
    dir: PathBuf,
    config: BinlogConfig,
    writer: Mutex<WriterState>,
    /// Mirrors `WriterState::index` for lock-free readers.
    current_index: AtomicU32,
    total_records: AtomicU64,
}

impl Binlog {
    /// Open the binlog under `<data_dir>/binlog`, creating it if needed.
    ///
    /// Fails with [`BinlogError::SegmentMissing`] if the existing segments are
    /// not contiguous from `bin.000`. A torn trailing record in the newest
    /// segment (a write that never returned) is truncated away.
    pub fn open(data_dir: &Path, config: BinlogConfig) -> Result<Self, BinlogError> {
        let config = BinlogConfig {
            max_records_per_segment: config.max_records_per_segment.clamp(1, MAX_MAP_SLOT_VALUE),
        };
        let dir = data_dir.join(BINLOG_DIR_NAME);
        std::fs::create_dir_all(&dir).context(IoSnafu { path: &dir })?;

        let indices = list_segments(&dir)?;
        if let Some(missing) = verified::first_missing_segment(&indices) {
            tracing::error!(dir = %dir.display(), missing, "binlog has a gap");
            return Err(BinlogError::SegmentMissing { index: missing });
        }

        let mut map = SegmentMap::open(&dir.join(BINLOG_MAP_FILE_NAME))?;
        let current = indices.last().copied().unwrap_or(0);
        let mut total: u64 = 0;

        for &index in &indices {
            let path = dir.join(verified::segment_file_name(index));
            let len = file_len(&path)?;
            let whole = verified::whole_records_len(len);
            if whole != len {
                if index == current {
                    warn!(segment = index, len, kept = whole, "truncating torn binlog tail");
                    let file = OpenOptions::new().write(true).open(&path).context(IoSnafu { path: &path })?;
                    file.set_len(whole).context(IoSnafu { path: &path })?;
                    file.sync_all().context(IoSnafu { path: &path })?;
                } else {
                    return Err(BinlogError::CorruptRecord {
                        index,
                        offset: whole,
                        reason: format!("closed segment length {len} is not a whole number of records"),
                    });
                }
            }
            let count = (whole / RECORD_SIZE) as u32;
            if map.get(index)? != count {
                debug!(segment = index, count, "reconciling binlog map");
                map.set(index, count)?;
            }
            total += u64::from(count);
        }

        let records = map.get(current)?;
        let current_path = dir.join(verified::segment_file_name(current));
        let file = if current_path.exists() {
            Some(open_for_append(&current_path)?)
        } else {
            None
        };

        info!(
            dir = %dir.display(),
            segments = indices.len(),
            current_index = current,
            records = total,
            "binlog opened"
        );

        Ok(Self {
            dir,
            config,
            writer: Mutex::new(WriterState {
                index: current,
                file,
                records,
                map,
            }),
            current_index: AtomicU32::new(current),
            total_records: AtomicU64::new(total),
        })
    }

    /// Append a record and flush it to disk.
    ///
    /// Returns the position the record was written at. When the current
    /// segment is full, a new one is started at index + 1 first.
    pub fn write(&self, record: &BinlogRecord) -> Result<Cursor, BinlogError> {
        let encoded = record.encode();
        let mut state = self.writer.lock();

        if verified::needs_rotation(state.records, self.config.max_records_per_segment) {
            let finished = state.index;
            state.file = None;
            state.index = finished.saturating_add(1);
            state.records = 0;
            self.current_index.store(state.index, Ordering::Release);
            info!(finished, next = state.index, "binlog segment rotated");
        }

        let index = state.index;
        let path = self.segment_path(index);
        let mut file = match state.file.take() {
            Some(file) => file,
            None => {
                let created = !path.exists();
                let file = open_for_append(&path)?;
                if created {
                    sync_dir(&self.dir);
                }
                file
            }
        };

        let offset = u64::from(state.records) * RECORD_SIZE;
        let appended = file.write_all(&encoded).and_then(|()| file.sync_data());
        if let Err(source) = appended {
            // Drop any partial record so the segment stays whole.
            if let Err(e) = file.set_len(offset) {
                warn!(segment = index, error = %e, "failed to roll back partial binlog write");
            }
            return Err(BinlogError::Io { path, source });
        }
        state.file = Some(file);

        state.records += 1;
        let records = state.records;
        state.map.set(index, records)?;
        self.total_records.fetch_add(1, Ordering::Relaxed);

        debug!(file_id = %record.file_id, segment = index, offset, "binlog record appended");
        Ok(Cursor::new(index, offset))
    }

    /// Read up to `query.max_count` records starting at the query position.
    ///
    /// - `file_index == CURRENT_SEGMENT` reads the segment being written.
    /// - Reading past the end of a closed segment returns no records, sets
    ///   `segment_exhausted` and points `next` at the following segment.
    /// - Reading past the end of the current segment returns no records and
    ///   leaves the cursor unchanged.
    pub fn read(&self, query: BinlogQuery) -> Result<BinlogBatch, BinlogError> {
        let current = self.current_index();
        let index = if query.file_index == CURRENT_SEGMENT {
            current
        } else {
            query.file_index
        };
        let cursor = Cursor::new(index, query.offset);
        if !cursor.is_aligned() {
            return Err(BinlogError::MisalignedOffset { offset: query.offset });
        }

        let empty = |next: Cursor, segment_exhausted: bool| BinlogBatch {
            records: Vec::new(),
            next,
            current_index: current,
            segment_exhausted,
        };

        if index > current {
            return Ok(empty(cursor, false));
        }

        let path = self.segment_path(index);
        if !path.exists() {
            if index < current {
                tracing::error!(segment = index, current, "binlog segment missing during read");
                return Err(BinlogError::SegmentMissing { index });
            }
            return Ok(empty(cursor, false));
        }

        let readable = verified::whole_records_len(file_len(&path)?);
        let max_count = query.max_count.min(MAX_BINLOG_READ_BATCH);
        match verified::plan_read(query.offset, readable, index < current, max_count) {
            ReadPlan::NoData => Ok(empty(cursor, false)),
            ReadPlan::Exhausted => Ok(empty(cursor.next_segment(), true)),
            ReadPlan::Records { count } => {
                let records = self.read_records(&path, index, query.offset, count)?;
                let next = Cursor::new(index, query.offset + u64::from(count) * RECORD_SIZE);
                Ok(BinlogBatch {
                    records,
                    next,
                    current_index: current,
                    segment_exhausted: false,
                })
            }
        }
    }

    /// Index of the segment currently being written.
    pub fn current_index(&self) -> u32 {
        self.current_index.load(Ordering::Acquire)
    }

    /// Records appended over the life of this log.
    pub fn total_records(&self) -> u64 {
        self.total_records.load(Ordering::Relaxed)
    }

    /// Number of whole records in segment `index`.
    pub fn segment_record_count(&self, index: u32) -> Result<u32, BinlogError> {
        let path = self.segment_path(index);
        if !path.exists() {
            return Ok(0);
        }
        Ok((verified::whole_records_len(file_len(&path)?) / RECORD_SIZE) as u32)
    }

    /// Directory holding the segment files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn segment_path(&self, index: u32) -> PathBuf {
        self.dir.join(verified::segment_file_name(index))
    }

    fn read_records(&self, path: &Path, index: u32, offset: u64, count: u32) -> Result<Vec<BinlogRecord>, BinlogError> {
        let mut file = File::open(path).context(IoSnafu { path })?;
        file.seek(SeekFrom::Start(offset)).context(IoSnafu { path })?;
        let mut buf = vec![0u8; count as usize * BINLOG_RECORD_SIZE];
        file.read_exact(&mut buf).context(IoSnafu { path })?;

        buf.chunks_exact(BINLOG_RECORD_SIZE)
            .enumerate()
            .map(|(i, chunk)| {
                BinlogRecord::decode(chunk).map_err(|e| BinlogError::CorruptRecord {
                    index,
                    offset: offset + i as u64 * RECORD_SIZE,
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

fn list_segments(dir: &Path) -> Result<Vec<u32>, BinlogError> {
    let mut indices = Vec::new();
    for entry in std::fs::read_dir(dir).context(IoSnafu { path: dir })? {
        let entry = entry.context(IoSnafu { path: dir })?;
        if let Some(index) = entry.file_name().to_str().and_then(verified::parse_segment_file_name) {
            indices.push(index);
        }
    }
    indices.sort_unstable();
    Ok(indices)
}

fn file_len(path: &Path) -> Result<u64, BinlogError> {
    Ok(std::fs::metadata(path).context(IoSnafu { path })?.len())
}

fn open_for_append(path: &Path) -> Result<File, BinlogError> {
    OpenOptions::new().create(true).append(true).open(path).context(IoSnafu { path })
}

/// Persist a directory entry change. Best effort: not every platform allows
/// opening directories.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir)
        && let Err(e) = handle.sync_all()
    {
        debug!(dir = %dir.display(), error = %e, "directory sync failed");
    }
}

#[cfg(test)]
mod tests {
    use godfs_types::FileId;
    use godfs_types::InstanceId;
    use tempfile::TempDir;

    use super::*;

    fn record(n: u32) -> BinlogRecord {
        BinlogRecord::new(
            FileId::from_digests(n, [n as u8; 16]),
            InstanceId::parse("srcnode1").unwrap(),
            u64::from(n) * 10,
            1_000 + u64::from(n),
        )
    }

    fn small_log(dir: &TempDir, max: u32) -> Binlog {
        Binlog::open(dir.path(), BinlogConfig {
            max_records_per_segment: max,
        })
        .unwrap()
    }

    fn query(file_index: u32, offset: u64, max_count: u32) -> BinlogQuery {
        BinlogQuery {
            file_index,
            offset,
            max_count,
        }
    }

    #[test]
    fn test_empty_log_reads_nothing() {
        let dir = TempDir::new().unwrap();
        let log = small_log(&dir, 4);
        let batch = log.read(query(0, 0, 10)).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.next, Cursor::new(0, 0));
        assert!(!batch.segment_exhausted);
        assert_eq!(log.current_index(), 0);
    }

    #[test]
    fn test_write_returns_position() {
        let dir = TempDir::new().unwrap();
        let log = small_log(&dir, 4);
        assert_eq!(log.write(&record(1)).unwrap(), Cursor::new(0, 0));
        assert_eq!(log.write(&record(2)).unwrap(), Cursor::new(0, 64));
        assert!(dir.path().join("binlog/bin.000").exists());
        assert_eq!(log.total_records(), 2);
    }

    #[test]
    fn test_read_in_batches_advances_cursor() {
        let dir = TempDir::new().unwrap();
        let log = small_log(&dir, 100);
        for n in 0..3 {
            log.write(&record(n)).unwrap();
        }

        let first = log.read(query(0, 0, 2)).unwrap();
        assert_eq!(first.records, vec![record(0), record(1)]);
        assert_eq!(first.next, Cursor::new(0, 128));

        let second = log.read(query(first.next.file_index, first.next.offset, 2)).unwrap();
        assert_eq!(second.records, vec![record(2)]);
        assert_eq!(second.next, Cursor::new(0, 192));

        let idle = log.read(query(0, 192, 2)).unwrap();
        assert!(idle.records.is_empty());
        assert_eq!(idle.next, Cursor::new(0, 192));
    }

    #[test]
    fn test_rotation_at_max_records() {
        let dir = TempDir::new().unwrap();
        let log = small_log(&dir, 3);
        for n in 0..4 {
            log.write(&record(n)).unwrap();
        }
        assert_eq!(log.current_index(), 1);
        assert_eq!(log.segment_record_count(0).unwrap(), 3);
        assert_eq!(log.segment_record_count(1).unwrap(), 1);
        assert!(dir.path().join("binlog/bin.001").exists());
        assert!(!dir.path().join("binlog/bin.002").exists());
    }

    #[test]
    fn test_closed_segment_reports_exhausted() {
        let dir = TempDir::new().unwrap();
        let log = small_log(&dir, 2);
        for n in 0..3 {
            log.write(&record(n)).unwrap();
        }
        let batch = log.read(query(0, 128, 10)).unwrap();
        assert!(batch.records.is_empty());
        assert!(batch.segment_exhausted);
        assert_eq!(batch.next, Cursor::new(1, 0));
        assert_eq!(batch.current_index, 1);

        let next = log.read(query(1, 0, 10)).unwrap();
        assert_eq!(next.records, vec![record(2)]);
    }

    #[test]
    fn test_current_sentinel_reads_latest_segment() {
        let dir = TempDir::new().unwrap();
        let log = small_log(&dir, 2);
        for n in 0..3 {
            log.write(&record(n)).unwrap();
        }
        let batch = log.read(query(CURRENT_SEGMENT, 0, 10)).unwrap();
        assert_eq!(batch.records, vec![record(2)]);
        assert_eq!(batch.next, Cursor::new(1, 64));
    }

    #[test]
    fn test_misaligned_offset_is_rejected() {
        let dir = TempDir::new().unwrap();
        let log = small_log(&dir, 10);
        log.write(&record(0)).unwrap();
        let err = log.read(query(0, 10, 1)).unwrap_err();
        assert!(matches!(err, BinlogError::MisalignedOffset { offset: 10 }));
        assert!(err.is_integrity_fault());
    }

    #[test]
    fn test_reopen_resumes_position() {
        let dir = TempDir::new().unwrap();
        {
            let log = small_log(&dir, 2);
            for n in 0..3 {
                log.write(&record(n)).unwrap();
            }
        }
        let log = small_log(&dir, 2);
        assert_eq!(log.current_index(), 1);
        assert_eq!(log.total_records(), 3);
        assert_eq!(log.write(&record(3)).unwrap(), Cursor::new(1, 64));
        assert_eq!(log.write(&record(4)).unwrap(), Cursor::new(2, 0));
    }

    #[test]
    fn test_gap_is_fatal_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let log = small_log(&dir, 1);
            for n in 0..3 {
                log.write(&record(n)).unwrap();
            }
        }
        std::fs::remove_file(dir.path().join("binlog/bin.001")).unwrap();
        let err = Binlog::open(dir.path(), BinlogConfig {
            max_records_per_segment: 1,
        })
        .err()
        .unwrap();
        assert!(matches!(err, BinlogError::SegmentMissing { index: 1 }));
        assert!(err.is_integrity_fault());
    }

    #[test]
    fn test_gap_is_fatal_on_read() {
        let dir = TempDir::new().unwrap();
        let log = small_log(&dir, 1);
        for n in 0..3 {
            log.write(&record(n)).unwrap();
        }
        std::fs::remove_file(dir.path().join("binlog/bin.000")).unwrap();
        let err = log.read(query(0, 0, 1)).unwrap_err();
        assert!(matches!(err, BinlogError::SegmentMissing { index: 0 }));
    }

    #[test]
    fn test_torn_tail_is_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let log = small_log(&dir, 10);
            log.write(&record(0)).unwrap();
            log.write(&record(1)).unwrap();
        }
        let segment = dir.path().join("binlog/bin.000");
        let mut file = OpenOptions::new().append(true).open(&segment).unwrap();
        file.write_all(&[0xAB; 20]).unwrap();
        drop(file);

        let log = small_log(&dir, 10);
        assert_eq!(std::fs::metadata(&segment).unwrap().len(), 128);
        assert_eq!(log.write(&record(2)).unwrap(), Cursor::new(0, 128));
        let batch = log.read(query(0, 0, 10)).unwrap();
        assert_eq!(batch.records, vec![record(0), record(1), record(2)]);
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let dir = TempDir::new().unwrap();
        let log = small_log(&dir, 10);
        log.write(&record(0)).unwrap();
        log.write(&record(1)).unwrap();

        let segment = dir.path().join("binlog/bin.000");
        let mut bytes = std::fs::read(&segment).unwrap();
        bytes[64 + 62] = 9;
        std::fs::write(&segment, bytes).unwrap();

        let err = log.read(query(0, 0, 10)).unwrap_err();
        assert!(matches!(err, BinlogError::CorruptRecord { index: 0, offset: 64, .. }));
    }

    #[test]
    fn test_map_tracks_counts() {
        let dir = TempDir::new().unwrap();
        {
            let log = small_log(&dir, 2);
            for n in 0..5 {
                log.write(&record(n)).unwrap();
            }
        }
        let raw = std::fs::read(dir.path().join("binlog/binlog.map")).unwrap();
        assert_eq!(raw, vec![0, 0, 2, 0, 0, 2, 0, 0, 1]);
    }
}
