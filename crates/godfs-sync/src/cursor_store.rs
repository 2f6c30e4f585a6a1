//! Persisted per-peer replication cursors.

use std::path::Path;
use std::path::PathBuf;

use godfs_types::Cursor;
use godfs_types::InstanceId;
use redb::Database;
use redb::ReadableTable;
use redb::TableDefinition;
use snafu::ResultExt;
use snafu::Snafu;

/// Key: peer instance id, value: bincode-encoded [`Cursor`].
const CURSOR_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_cursors");

/// Replication cursors, one per remote peer, backed by redb.
///
/// Cursors are monotonic: [`advance`](Self::advance) refuses to move one
/// backwards.
pub struct CursorStore {
    db: Database,
    path: PathBuf,
}

impl CursorStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CursorStoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirectorySnafu { path: parent })?;
        }

        let db = Database::create(&path).context(OpenDatabaseSnafu { path: &path })?;
        let write_txn = db.begin_write().context(BeginWriteSnafu)?;
        {
            write_txn.open_table(CURSOR_TABLE).context(OpenTableSnafu)?;
        }
        write_txn.commit().context(CommitSnafu)?;

        Ok(Self { db, path })
    }

    /// Cursor for `peer`; `(0, 0)` if none was saved.
    pub fn get(&self, peer: &InstanceId) -> Result<Cursor, CursorStoreError> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(CURSOR_TABLE).context(OpenTableSnafu)?;
        match table.get(peer.as_str()).context(GetSnafu)? {
            Some(value) => bincode::deserialize(value.value()).context(DeserializeSnafu),
            None => Ok(Cursor::default()),
        }
    }

    /// Move `peer`'s cursor to `next`.
    ///
    /// Moving to the current position is a no-op; moving backwards fails with
    /// [`CursorStoreError::Regression`].
    pub fn advance(&self, peer: &InstanceId, next: Cursor) -> Result<(), CursorStoreError> {
        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        {
            let mut table = write_txn.open_table(CURSOR_TABLE).context(OpenTableSnafu)?;
            let current = match table.get(peer.as_str()).context(GetSnafu)? {
                Some(value) => bincode::deserialize(value.value()).context(DeserializeSnafu)?,
                None => Cursor::default(),
            };
            if next < current {
                return Err(CursorStoreError::Regression {
                    peer: *peer,
                    current,
                    proposed: next,
                });
            }
            if next == current {
                return Ok(());
            }
            let serialized = bincode::serialize(&next).context(SerializeSnafu)?;
            table.insert(peer.as_str(), serialized.as_slice()).context(InsertSnafu)?;
        }
        write_txn.commit().context(CommitSnafu)?;
        Ok(())
    }

    /// Every saved cursor.
    pub fn list(&self) -> Result<Vec<(InstanceId, Cursor)>, CursorStoreError> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(CURSOR_TABLE).context(OpenTableSnafu)?;

        let mut cursors = Vec::new();
        for item in table.iter().context(RangeSnafu)? {
            let (key, value) = item.context(IteratorSnafu)?;
            // Keys are only ever written from valid ids.
            let Ok(peer) = InstanceId::parse(key.value()) else {
                continue;
            };
            let cursor: Cursor = bincode::deserialize(value.value()).context(DeserializeSnafu)?;
            cursors.push((peer, cursor));
        }
        Ok(cursors)
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Cursor store errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CursorStoreError {
    #[snafu(display("failed to create directory {}: {source}", path.display()))]
    CreateDirectory { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to open cursor database at {}: {source}", path.display()))]
    OpenDatabase {
        path: PathBuf,
        #[snafu(source(from(redb::DatabaseError, Box::new)))]
        source: Box<redb::DatabaseError>,
    },

    #[snafu(display("failed to begin write transaction: {source}"))]
    BeginWrite {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
    },

    #[snafu(display("failed to begin read transaction: {source}"))]
    BeginRead {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
    },

    #[snafu(display("failed to open table: {source}"))]
    OpenTable {
        #[snafu(source(from(redb::TableError, Box::new)))]
        source: Box<redb::TableError>,
    },

    #[snafu(display("failed to commit transaction: {source}"))]
    Commit {
        #[snafu(source(from(redb::CommitError, Box::new)))]
        source: Box<redb::CommitError>,
    },

    #[snafu(display("failed to insert into table: {source}"))]
    Insert {
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    #[snafu(display("failed to get from table: {source}"))]
    Get {
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    #[snafu(display("failed to iterate table range: {source}"))]
    Range {
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    #[snafu(display("failed to iterate table: {source}"))]
    Iterator {
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    #[snafu(display("failed to serialize cursor: {source}"))]
    Serialize {
        #[snafu(source(from(bincode::Error, Box::new)))]
        source: Box<bincode::Error>,
    },

    #[snafu(display("failed to deserialize cursor: {source}"))]
    Deserialize {
        #[snafu(source(from(bincode::Error, Box::new)))]
        source: Box<bincode::Error>,
    },

    #[snafu(display("cursor for {peer} would move back from {current:?} to {proposed:?}"))]
    Regression {
        peer: InstanceId,
        current: Cursor,
        proposed: Cursor,
    },
}
