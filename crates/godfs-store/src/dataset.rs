//! Persistent set of file ids already held locally.
//!
//! Backed by a fixed-slot hash index (`dataset.idx`, one 38-byte slot per
//! entry, linear probing) and an append-only overflow log (`dataset.log`) for
//! ids whose probe window is full. Each overflow entry is one op byte (`+` or
//! `-`) followed by the id. The full membership is also held in memory.

use std::collections::HashMap;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::path::PathBuf;

use godfs_constants::FILE_ID_LEN;
use godfs_constants::store::DATASET_DIR_NAME;
use godfs_constants::store::DATASET_INDEX_FILE_NAME;
use godfs_constants::store::DATASET_MAX_PROBES;
use godfs_constants::store::DATASET_OVERFLOW_FILE_NAME;
use godfs_constants::store::MAX_DATASET_SLOTS;
use godfs_types::FileId;
use parking_lot::Mutex;
use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::IoSnafu;
use crate::error::StoreError;
use crate::verified;

const SLOT_WIDTH: u64 = FILE_ID_LEN as u64;
const OVERFLOW_ENTRY_WIDTH: u64 = SLOT_WIDTH + 1;
const EMPTY_SLOT: [u8; FILE_ID_LEN] = [0u8; FILE_ID_LEN];
const TOMBSTONE: [u8; FILE_ID_LEN] = [0xFF; FILE_ID_LEN];
const OP_ADD: u8 = b'+';
const OP_REMOVE: u8 = b'-';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Slot(u32),
    Overflow,
}

struct DatasetInner {
    index: File,
    overflow: File,
    index_path: PathBuf,
    overflow_path: PathBuf,
    slots: u32,
    /// Occupancy of every index slot; tombstoned slots count as free.
    occupied: Vec<bool>,
    members: HashMap<FileId, Location>,
}

/// Persistent, lock-protected file id set.
pub struct Dataset {
    inner: Mutex<DatasetInner>,
}

impl Dataset {
    /// Open or create the dataset under `<data_dir>/dataset`.
    ///
    /// `slots` sizes a new index. An existing index keeps the slot count it was
    /// created with.
    pub fn open(data_dir: &Path, slots: u32) -> Result<Self, StoreError> {
        if slots == 0 || slots > MAX_DATASET_SLOTS {
            return Err(StoreError::DatasetCorrupt {
                reason: format!("slot count {slots} outside 1..={MAX_DATASET_SLOTS}"),
            });
        }

        let dir = data_dir.join(DATASET_DIR_NAME);
        std::fs::create_dir_all(&dir).context(IoSnafu { path: &dir })?;
        let index_path = dir.join(DATASET_INDEX_FILE_NAME);
        let overflow_path = dir.join(DATASET_OVERFLOW_FILE_NAME);

        let mut index = open_rw(&index_path)?;
        let existing_len = index.metadata().context(IoSnafu { path: &index_path })?.len();
        let slots = if existing_len == 0 {
            index.set_len(u64::from(slots) * SLOT_WIDTH).context(IoSnafu { path: &index_path })?;
            index.sync_all().context(IoSnafu { path: &index_path })?;
            slots
        } else if existing_len % SLOT_WIDTH == 0 && existing_len / SLOT_WIDTH <= u64::from(MAX_DATASET_SLOTS) {
            let on_disk = (existing_len / SLOT_WIDTH) as u32;
            if on_disk != slots {
                info!(configured = slots, on_disk, "dataset keeps its existing slot count");
            }
            on_disk
        } else {
            return Err(StoreError::DatasetCorrupt {
                reason: format!("index length {existing_len} is not a whole number of slots"),
            });
        };

        let mut occupied = vec![false; slots as usize];
        let mut members = HashMap::new();
        load_index(&mut index, &index_path, &mut occupied, &mut members)?;

        let mut overflow = open_rw(&overflow_path)?;
        replay_overflow(&mut overflow, &overflow_path, &mut members)?;

        info!(dir = %dir.display(), slots, members = members.len(), "dataset opened");
        Ok(Self {
            inner: Mutex::new(DatasetInner {
                index,
                overflow,
                index_path,
                overflow_path,
                slots,
                occupied,
                members,
            }),
        })
    }

    /// Add an id. Returns false if it was already present.
    pub fn add(&self, file_id: &FileId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.members.contains_key(file_id) {
            return Ok(false);
        }

        let home = verified::home_slot(file_id, inner.slots);
        let free = verified::probe_sequence(home, inner.slots, DATASET_MAX_PROBES).find(|s| !inner.occupied[*s as usize]);

        let location = match free {
            Some(slot) => {
                write_slot(&inner.index, &inner.index_path, slot, file_id.as_bytes())?;
                inner.occupied[slot as usize] = true;
                Location::Slot(slot)
            }
            None => {
                let DatasetInner {
                    overflow,
                    overflow_path,
                    ..
                } = &mut *inner;
                append_overflow(overflow, overflow_path, OP_ADD, file_id)?;
                debug!(%file_id, "dataset probe window full, id spilled to overflow log");
                Location::Overflow
            }
        };
        inner.members.insert(file_id.clone(), location);
        Ok(true)
    }

    /// Whether the id is present.
    pub fn contains(&self, file_id: &FileId) -> bool {
        self.inner.lock().members.contains_key(file_id)
    }

    /// Remove an id. Returns false if it was absent.
    pub fn remove(&self, file_id: &FileId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let Some(location) = inner.members.get(file_id).copied() else {
            return Ok(false);
        };
        match location {
            Location::Slot(slot) => {
                write_slot(&inner.index, &inner.index_path, slot, &TOMBSTONE)?;
                inner.occupied[slot as usize] = false;
            }
            Location::Overflow => {
                let DatasetInner {
                    overflow,
                    overflow_path,
                    ..
                } = &mut *inner;
                append_overflow(overflow, overflow_path, OP_REMOVE, file_id)?;
            }
        }
        inner.members.remove(file_id);
        debug!(%file_id, "dataset entry removed");
        Ok(true)
    }

    /// Number of ids present.
    pub fn len(&self) -> usize {
        self.inner.lock().members.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count of the hash index.
    pub fn slots(&self) -> u32 {
        self.inner.lock().slots
    }
}

fn open_rw(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .context(IoSnafu { path })
}

fn parse_id(bytes: &[u8]) -> Result<FileId, StoreError> {
    std::str::from_utf8(bytes).ok().and_then(|s| FileId::parse(s).ok()).ok_or_else(|| StoreError::DatasetCorrupt {
        reason: "unreadable file id".to_string(),
    })
}

fn load_index(
    index: &mut File,
    path: &Path,
    occupied: &mut [bool],
    members: &mut HashMap<FileId, Location>,
) -> Result<(), StoreError> {
    index.seek(SeekFrom::Start(0)).context(IoSnafu { path })?;
    let mut raw = Vec::with_capacity(occupied.len() * FILE_ID_LEN);
    index.read_to_end(&mut raw).context(IoSnafu { path })?;

    for (slot, bytes) in raw.chunks_exact(FILE_ID_LEN).enumerate() {
        if bytes == EMPTY_SLOT || bytes == TOMBSTONE {
            continue;
        }
        members.insert(parse_id(bytes)?, Location::Slot(slot as u32));
        occupied[slot] = true;
    }
    Ok(())
}

fn replay_overflow(
    overflow: &mut File,
    path: &Path,
    members: &mut HashMap<FileId, Location>,
) -> Result<(), StoreError> {
    let mut raw = Vec::new();
    overflow.read_to_end(&mut raw).context(IoSnafu { path })?;

    let whole = raw.len() as u64 - raw.len() as u64 % OVERFLOW_ENTRY_WIDTH;
    if whole != raw.len() as u64 {
        warn!(len = raw.len(), kept = whole, "truncating torn dataset overflow entry");
        overflow.set_len(whole).context(IoSnafu { path })?;
        overflow.sync_all().context(IoSnafu { path })?;
    }

    for entry in raw[..whole as usize].chunks_exact(OVERFLOW_ENTRY_WIDTH as usize) {
        let file_id = parse_id(&entry[1..])?;
        match entry[0] {
            OP_ADD => {
                members.entry(file_id).or_insert(Location::Overflow);
            }
            OP_REMOVE => {
                if members.get(&file_id) == Some(&Location::Overflow) {
                    members.remove(&file_id);
                }
            }
            op => {
                return Err(StoreError::DatasetCorrupt {
                    reason: format!("unknown overflow op {op:#04x}"),
                });
            }
        }
    }
    overflow.seek(SeekFrom::End(0)).context(IoSnafu { path })?;
    Ok(())
}

fn write_slot(index: &File, path: &Path, slot: u32, bytes: &[u8]) -> Result<(), StoreError> {
    index.write_all_at(bytes, u64::from(slot) * SLOT_WIDTH).context(IoSnafu { path })?;
    index.sync_data().context(IoSnafu { path })
}

fn append_overflow(overflow: &mut File, path: &Path, op: u8, file_id: &FileId) -> Result<(), StoreError> {
    let mut entry = Vec::with_capacity(OVERFLOW_ENTRY_WIDTH as usize);
    entry.push(op);
    entry.extend_from_slice(file_id.as_bytes());
    overflow.seek(SeekFrom::End(0)).context(IoSnafu { path })?;
    overflow.write_all(&entry).context(IoSnafu { path })?;
    overflow.sync_data().context(IoSnafu { path })
}
