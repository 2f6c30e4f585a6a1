//! Content-addressed entries with a trailing reference count.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use godfs_constants::store::MAX_FILE_SIZE;
use godfs_constants::store::OBJECTS_DIR_NAME;
use godfs_constants::store::REF_COUNT_TAIL_SIZE;
use godfs_constants::store::TMP_DIR_NAME;
use godfs_types::FileId;
use rand::Rng;
use rand::distributions::Alphanumeric;
use snafu::ResultExt;
use snafu::ensure;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::ContentMismatchSnafu;
use crate::error::CorruptEntrySnafu;
use crate::error::IoSnafu;
use crate::error::NotFoundSnafu;
use crate::error::StoreError;
use crate::error::TooLargeSnafu;
use crate::locks::KeyedLocks;
use crate::verified;

/// Result of storing content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Address of the content.
    pub file_id: FileId,
    /// Reference count after this put.
    pub ref_count: u64,
    /// True if the entry already existed and only its count was bumped.
    pub deduplicated: bool,
}

/// Deduplicating file store addressed by content.
///
/// Every entry lives at `objects/<cc>/<dd>/<md5>` and ends with an 8-byte
/// big-endian reference count. Count updates are read-modify-write on that
/// tail and are serialized per address, so different files never contend.
pub struct ContentStore {
    objects: PathBuf,
    tmp: PathBuf,
    locks: KeyedLocks<FileId>,
}

impl ContentStore {
    /// Open the store under `data_dir`, creating its directories.
    ///
    /// Leftover staging files from an interrupted put are discarded.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let objects = data_dir.join(OBJECTS_DIR_NAME);
        let tmp = data_dir.join(TMP_DIR_NAME);
        std::fs::create_dir_all(&objects).context(IoSnafu { path: &objects })?;
        std::fs::create_dir_all(&tmp).context(IoSnafu { path: &tmp })?;

        let mut discarded = 0u32;
        for entry in std::fs::read_dir(&tmp).context(IoSnafu { path: &tmp })? {
            let entry = entry.context(IoSnafu { path: &tmp })?;
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => discarded += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to discard staging file"),
            }
        }
        if discarded > 0 {
            info!(discarded, "discarded interrupted staging files");
        }

        Ok(Self {
            objects,
            tmp,
            locks: KeyedLocks::new(),
        })
    }

    /// Store `data`, or bump the count of the existing entry with the same
    /// content. Safe to call any number of times for the same bytes.
    pub fn put_bytes(&self, data: &[u8]) -> Result<PutOutcome, StoreError> {
        let len = data.len() as u64;
        ensure!(len <= MAX_FILE_SIZE, TooLargeSnafu { len, max: MAX_FILE_SIZE });
        let file_id = verified::file_id_for(data);
        let staged = self.stage(data)?;
        self.commit(file_id, staged)
    }

    /// Like [`put_bytes`](Self::put_bytes), but rejects bytes that do not
    /// address to `expected`. Used for content fetched from peers.
    pub fn put_verified(&self, expected: &FileId, data: &[u8]) -> Result<PutOutcome, StoreError> {
        let actual = verified::file_id_for(data);
        ensure!(&actual == expected, ContentMismatchSnafu {
            expected: expected.clone(),
            actual,
        });
        self.put_bytes(data)
    }

    /// Content bytes of an entry, checked against its address.
    pub fn read(&self, file_id: &FileId) -> Result<Vec<u8>, StoreError> {
        let path = self.entry_path(file_id);
        let mut bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return NotFoundSnafu { file_id: file_id.clone() }.fail();
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let content_len = content_len_of(file_id, bytes.len() as u64)?;
        bytes.truncate(content_len as usize);
        ensure!(&verified::file_id_for(&bytes) == file_id, CorruptEntrySnafu {
            file_id: file_id.clone(),
            reason: "content does not match its address",
        });
        Ok(bytes)
    }

    /// Whether an entry exists for `file_id`.
    pub fn exists(&self, file_id: &FileId) -> bool {
        self.entry_path(file_id).is_file()
    }

    /// Current reference count of an entry.
    pub fn ref_count(&self, file_id: &FileId) -> Result<u64, StoreError> {
        let path = self.entry_path(file_id);
        self.locks.with_lock(file_id, || {
            let mut file = open_entry(file_id, &path)?;
            read_ref_count(file_id, &path, &mut file)
        })
    }

    /// Length of the stored content, excluding the count tail.
    pub fn content_len(&self, file_id: &FileId) -> Result<u64, StoreError> {
        let path = self.entry_path(file_id);
        let len = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return NotFoundSnafu { file_id: file_id.clone() }.fail();
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        content_len_of(file_id, len)
    }

    /// Drop one reference. The entry is deleted when the last one goes.
    ///
    /// Returns the remaining count.
    pub fn release(&self, file_id: &FileId) -> Result<u64, StoreError> {
        let path = self.entry_path(file_id);
        self.locks.with_lock(file_id, || {
            let mut file = open_entry(file_id, &path)?;
            let current = read_ref_count(file_id, &path, &mut file)?;
            match verified::released_ref_count(current) {
                Some(remaining) => {
                    write_ref_count(&path, &mut file, remaining)?;
                    debug!(%file_id, remaining, "entry reference released");
                    Ok(remaining)
                }
                None => {
                    drop(file);
                    std::fs::remove_file(&path).context(IoSnafu { path: &path })?;
                    info!(%file_id, "entry deleted");
                    Ok(0)
                }
            }
        })
    }

    /// Absolute path of an entry.
    pub fn entry_path(&self, file_id: &FileId) -> PathBuf {
        self.objects.join(file_id.shard_outer()).join(file_id.shard_inner()).join(file_id.md5_hex())
    }

    /// Write content plus an initial count of 1 to a staging file.
    fn stage(&self, data: &[u8]) -> Result<PathBuf, StoreError> {
        let name: String = rand::thread_rng().sample_iter(&Alphanumeric).take(16).map(char::from).collect();
        let path = self.tmp.join(format!("{name}.part"));
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&path)?;
            file.write_all(data)?;
            file.write_all(&1u64.to_be_bytes())?;
            file.sync_all()
        };
        if let Err(source) = write() {
            if let Err(e) = std::fs::remove_file(&path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "failed to remove staging file");
            }
            return Err(StoreError::Io { path, source });
        }
        Ok(path)
    }

    /// Move a staged file into place, or fold it into an existing entry.
    fn commit(&self, file_id: FileId, staged: PathBuf) -> Result<PutOutcome, StoreError> {
        let path = self.entry_path(&file_id);
        let result = self.locks.with_lock(&file_id, || {
            if path.is_file() {
                let mut file = open_entry(&file_id, &path)?;
                let count = verified::incremented_ref_count(read_ref_count(&file_id, &path, &mut file)?);
                write_ref_count(&path, &mut file, count)?;
                debug!(%file_id, ref_count = count, "content deduplicated");
                return Ok(PutOutcome {
                    file_id: file_id.clone(),
                    ref_count: count,
                    deduplicated: true,
                });
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).context(IoSnafu { path: parent })?;
            }
            std::fs::rename(&staged, &path).context(IoSnafu { path: &path })?;
            // Entry is in place; a failed directory sync is logged, not returned.
            if let Some(parent) = path.parent()
                && let Err(e) = File::open(parent).and_then(|dir| dir.sync_all())
            {
                warn!(%file_id, dir = %parent.display(), error = %e, "failed to sync entry directory");
            }
            debug!(%file_id, "content stored");
            Ok(PutOutcome {
                file_id: file_id.clone(),
                ref_count: 1,
                deduplicated: false,
            })
        });

        // Only present when the entry existed already or the rename failed.
        if staged.exists()
            && let Err(e) = std::fs::remove_file(&staged)
        {
            warn!(path = %staged.display(), error = %e, "failed to remove staging file");
        }
        result
    }
}

fn content_len_of(file_id: &FileId, entry_len: u64) -> Result<u64, StoreError> {
    entry_len.checked_sub(REF_COUNT_TAIL_SIZE).ok_or_else(|| StoreError::CorruptEntry {
        file_id: file_id.clone(),
        reason: "entry shorter than its reference count".to_string(),
    })
}

fn open_entry(file_id: &FileId, path: &Path) -> Result<File, StoreError> {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => NotFoundSnafu { file_id: file_id.clone() }.fail(),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn read_ref_count(file_id: &FileId, path: &Path, file: &mut File) -> Result<u64, StoreError> {
    let len = file.metadata().context(IoSnafu { path })?.len();
    content_len_of(file_id, len)?;
    let mut tail = [0u8; REF_COUNT_TAIL_SIZE as usize];
    file.seek(SeekFrom::End(-(REF_COUNT_TAIL_SIZE as i64))).context(IoSnafu { path })?;
    file.read_exact(&mut tail).context(IoSnafu { path })?;
    Ok(u64::from_be_bytes(tail))
}

fn write_ref_count(path: &Path, file: &mut File, count: u64) -> Result<(), StoreError> {
    file.seek(SeekFrom::End(-(REF_COUNT_TAIL_SIZE as i64))).context(IoSnafu { path })?;
    file.write_all(&count.to_be_bytes()).context(IoSnafu { path })?;
    file.sync_data().context(IoSnafu { path })
}
