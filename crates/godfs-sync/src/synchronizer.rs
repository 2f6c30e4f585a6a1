//! Per-peer pull loops and the watch set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use godfs_constants::sync::DEFAULT_RETRY_BASE_DELAY_MS;
use godfs_constants::sync::DEFAULT_RETRY_MAX_DELAY_MS;
use godfs_constants::sync::DEFAULT_SYNC_BATCH_SIZE;
use godfs_constants::sync::DEFAULT_SYNC_TICK_INTERVAL_MS;
use godfs_constants::sync::DEFAULT_WATCH_REFRESH_INTERVAL_MS;
use godfs_constants::sync::MAX_WATCHED_PEERS;
use godfs_types::BinlogQuery;
use godfs_types::BinlogRecord;
use godfs_types::Cursor;
use godfs_types::FileId;
use godfs_types::Instance;
use godfs_types::InstanceId;
use godfs_types::RetryPolicy;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::cursor_store::CursorStore;
use crate::error::SyncError;
use crate::replica::LocalReplica;
use crate::traits::MembershipView;
use crate::traits::PeerTransport;
use crate::verified;
use crate::verified::BatchSummary;

/// Synchronizer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Records requested per binlog read.
    pub batch_size: u32,
    /// Pause between ticks when a peer has nothing new.
    pub tick_interval: Duration,
    /// How often the watch set is recomputed from the membership view.
    pub watch_refresh_interval: Duration,
    /// Backoff after failed ticks. With `max_attempts`, a peer watch halts
    /// after that many consecutive failures.
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
            tick_interval: Duration::from_millis(DEFAULT_SYNC_TICK_INTERVAL_MS),
            watch_refresh_interval: Duration::from_millis(DEFAULT_WATCH_REFRESH_INTERVAL_MS),
            retry: RetryPolicy::capped(
                Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
                Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            ),
        }
    }
}

/// What one tick against a peer did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Records the peer returned.
    pub fetched: usize,
    /// Records applied locally.
    pub applied: usize,
    /// Records skipped: self-originated, incomplete, or already held.
    pub skipped: usize,
    /// Records that failed to apply.
    pub failed: usize,
    /// Persisted cursor after the tick.
    pub cursor: Cursor,
    /// Whether the cursor moved.
    pub advanced: bool,
}

/// Replication counters for one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSyncStats {
    /// Completed ticks.
    pub ticks: u64,
    /// Records applied.
    pub applied: u64,
    /// Records skipped.
    pub skipped: u64,
    /// Record applications and ticks that failed.
    pub failed: u64,
    /// Last persisted cursor.
    pub cursor: Cursor,
    /// Most recent error.
    pub last_error: Option<String>,
    /// The watch stopped on an integrity fault or exhausted its retries.
    pub halted: bool,
}

enum Applied {
    Stored,
    Skipped(&'static str),
}

/// Per-file async locks held across check, fetch and ingest, so two peer
/// watches carrying the same file apply it once.
#[derive(Default)]
struct ApplyLocks {
    locks: Mutex<HashMap<FileId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ApplyLocks {
    async fn lock(&self, file_id: &FileId) -> ApplyGuard<'_> {
        let entry = self.locks.lock().entry(file_id.clone()).or_default().clone();
        let guard = entry.clone().lock_owned().await;
        ApplyGuard {
            locks: self,
            file_id: file_id.clone(),
            entry,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

struct ApplyGuard<'a> {
    locks: &'a ApplyLocks,
    file_id: FileId,
    entry: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ApplyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock();
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&self.entry) == 2 {
            locks.remove(&self.file_id);
        }
    }
}

struct PeerWatch {
    announcement: watch::Sender<Instance>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Pulls and applies the binlogs of group peers.
pub struct BinlogSynchronizer {
    local: LocalReplica,
    cursors: Arc<CursorStore>,
    transport: Arc<dyn PeerTransport>,
    membership: Arc<dyn MembershipView>,
    config: SyncConfig,
    watches: Mutex<HashMap<InstanceId, PeerWatch>>,
    stats: Mutex<HashMap<InstanceId, PeerSyncStats>>,
    applying: ApplyLocks,
    cancel: CancellationToken,
}

impl BinlogSynchronizer {
    /// Create a synchronizer. Nothing runs until [`spawn`](Self::spawn) or
    /// [`watch`](Self::watch).
    pub fn new(
        local: LocalReplica,
        cursors: Arc<CursorStore>,
        transport: Arc<dyn PeerTransport>,
        membership: Arc<dyn MembershipView>,
        config: SyncConfig,
    ) -> Self {
        Self {
            local,
            cursors,
            transport,
            membership,
            config: SyncConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            watches: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            applying: ApplyLocks::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Run one fetch-apply-advance round against `peer`.
    ///
    /// The cursor moves past the batch only if every record in it applied. An
    /// empty read at the end of a segment the peer has moved past rolls the
    /// cursor to the next segment.
    pub async fn sync_once(&self, peer: &Instance) -> Result<TickOutcome, SyncError> {
        let result = self.tick(peer).await;
        let mut stats = self.stats.lock();
        let entry = stats.entry(peer.id).or_default();
        entry.ticks += 1;
        match &result {
            Ok(outcome) => {
                entry.applied += outcome.applied as u64;
                entry.skipped += outcome.skipped as u64;
                entry.failed += outcome.failed as u64;
                entry.cursor = outcome.cursor;
            }
            Err(e) => {
                entry.failed += 1;
                entry.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn tick(&self, peer: &Instance) -> Result<TickOutcome, SyncError> {
        let cursor = self.cursors.get(&peer.id)?;
        let query = BinlogQuery::from_cursor(cursor, self.config.batch_size);
        let batch = self.transport.read_binlog(peer, query).await?;
        let summary = BatchSummary::from(&batch);

        let mut outcome = TickOutcome {
            fetched: batch.records.len(),
            cursor,
            ..TickOutcome::default()
        };

        if batch.records.is_empty() {
            if let Some(next) = verified::rollover_cursor(cursor, &summary) {
                self.cursors.advance(&peer.id, next)?;
                info!(peer = %peer.id, from = ?cursor, to = ?next, "peer binlog segment rolled over");
                outcome.cursor = next;
                outcome.advanced = true;
            }
            return Ok(outcome);
        }

        let next =
            verified::check_batch_continuity(cursor, &summary).map_err(|reason| SyncError::InconsistentBatch {
                peer: peer.id,
                records: summary.records,
                reason,
            })?;

        for record in &batch.records {
            match self.apply(peer, record).await {
                Ok(Applied::Stored) => outcome.applied += 1,
                Ok(Applied::Skipped(reason)) => {
                    debug!(peer = %peer.id, file_id = %record.file_id, reason, "record skipped");
                    outcome.skipped += 1;
                }
                Err(e) if e.is_integrity_fault() => return Err(e),
                Err(e) => {
                    warn!(peer = %peer.id, file_id = %record.file_id, error = %e, "record apply failed");
                    outcome.failed += 1;
                    self.stats.lock().entry(peer.id).or_default().last_error = Some(e.to_string());
                }
            }
        }

        if outcome.failed == 0 {
            self.cursors.advance(&peer.id, next)?;
            outcome.cursor = next;
            outcome.advanced = true;
        } else {
            warn!(
                peer = %peer.id,
                failed = outcome.failed,
                cursor = ?cursor,
                "batch incomplete, cursor held for retry"
            );
        }

        debug!(
            peer = %peer.id,
            fetched = outcome.fetched,
            applied = outcome.applied,
            skipped = outcome.skipped,
            cursor = ?outcome.cursor,
            "sync tick"
        );
        Ok(outcome)
    }

    async fn apply(&self, peer: &Instance, record: &BinlogRecord) -> Result<Applied, SyncError> {
        if record.source == self.local.instance_id {
            return Ok(Applied::Skipped("self-originated"));
        }
        if !record.complete {
            return Ok(Applied::Skipped("incomplete"));
        }
        if self.local.dataset.contains(&record.file_id) {
            return Ok(Applied::Skipped("already held"));
        }

        // Another watch may have applied the file while we waited.
        let _guard = self.applying.lock(&record.file_id).await;
        if self.local.dataset.contains(&record.file_id) {
            return Ok(Applied::Skipped("already held"));
        }

        let data = self.fetch(peer, record).await?;
        let local = self.local.clone();
        let source = record.source;
        let file_id = record.file_id.clone();
        tokio::task::spawn_blocking(move || local.ingest(&data, source, Some(&file_id)))
            .await
            .map_err(|source| SyncError::Task { source })??;
        Ok(Applied::Stored)
    }

    async fn fetch(&self, peer: &Instance, record: &BinlogRecord) -> Result<Vec<u8>, SyncError> {
        let members = match self.membership.group_members().await {
            Ok(members) => members,
            Err(e) => {
                debug!(error = %e, "membership unavailable, fetching from serving peer only");
                Vec::new()
            }
        };
        let candidates = verified::fetch_candidates(record.source, peer, &members, self.local.instance_id);

        for candidate in &candidates {
            match self.transport.fetch_file(candidate, &record.file_id).await {
                Ok(Some(data)) if verified::content_matches(&record.file_id, &data) => return Ok(data),
                Ok(Some(data)) => warn!(
                    server = %candidate.id,
                    file_id = %record.file_id,
                    len = data.len(),
                    "candidate served content that does not match its address"
                ),
                Ok(None) => debug!(server = %candidate.id, file_id = %record.file_id, "file not held by candidate"),
                Err(e) => warn!(server = %candidate.id, file_id = %record.file_id, error = %e, "fetch failed"),
            }
        }
        Err(SyncError::ContentUnavailable {
            file_id: record.file_id.clone(),
            attempts: candidates.len(),
        })
    }

    /// Start watching `peer`. Returns false if it is already watched, is this
    /// node, or the watch limit is reached.
    pub fn watch(self: &Arc<Self>, peer: Instance) -> bool {
        if peer.id == self.local.instance_id || self.cancel.is_cancelled() {
            return false;
        }
        let mut watches = self.watches.lock();
        if watches.contains_key(&peer.id) {
            return false;
        }
        if watches.len() >= MAX_WATCHED_PEERS as usize {
            warn!(peer = %peer.id, max = MAX_WATCHED_PEERS, "watch limit reached, peer not watched");
            return false;
        }

        let id = peer.id;
        let (announcement, receiver) = watch::channel(peer);
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(Arc::clone(self).run_peer(receiver, cancel.clone()));
        watches.insert(id, PeerWatch {
            announcement,
            cancel,
            handle,
        });
        info!(peer = %id, "watching peer");
        true
    }

    /// Stop watching a peer. An in-flight tick finishes; no new one starts.
    pub fn unwatch(&self, id: &InstanceId) -> bool {
        match self.watches.lock().remove(id) {
            Some(watch) => {
                watch.cancel.cancel();
                info!(peer = %id, "stopped watching peer");
                true
            }
            None => false,
        }
    }

    /// Recompute the watch set from the membership view.
    pub async fn refresh_watches(self: &Arc<Self>) -> Result<verified::WatchDiff, SyncError> {
        let members = self.membership.group_members().await?;
        let watched: Vec<_> = self
            .watches
            .lock()
            .iter()
            .map(|(id, watch)| (*id, watch.announcement.borrow().server.clone()))
            .collect();
        let diff = verified::diff_watch_set(&watched, &members, self.local.instance_id);

        for peer in &diff.start {
            self.watch(peer.clone());
        }
        for id in &diff.stop {
            self.unwatch(id);
        }
        for peer in &diff.update {
            if let Some(watch) = self.watches.lock().get(&peer.id) {
                info!(peer = %peer.id, server = %peer.server, "peer address changed");
                watch.announcement.send_replace(peer.clone());
            }
        }
        Ok(diff)
    }

    /// Drive the watch set from the membership view until shutdown.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.watch_refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = this.refresh_watches().await {
                            warn!(error = %e, "watch refresh failed");
                        }
                    }
                }
            }
            debug!("watch refresh loop stopped");
        })
    }

    /// Stop every loop and wait for peer watches to finish their current tick.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let watches: Vec<PeerWatch> = self.watches.lock().drain().map(|(_, watch)| watch).collect();
        for watch in watches {
            watch.cancel.cancel();
            if let Err(e) = watch.handle.await {
                warn!(error = %e, "peer watch task failed");
            }
        }
        info!("synchronizer stopped");
    }

    /// Ids of watched peers.
    pub fn watched_peers(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.watches.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Counters for one peer.
    pub fn peer_stats(&self, id: &InstanceId) -> Option<PeerSyncStats> {
        self.stats.lock().get(id).cloned()
    }

    /// Counters for every peer ever synced.
    pub fn stats(&self) -> Vec<(InstanceId, PeerSyncStats)> {
        let mut all: Vec<_> = self.stats.lock().iter().map(|(id, s)| (*id, s.clone())).collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    async fn run_peer(self: Arc<Self>, announcement: watch::Receiver<Instance>, cancel: CancellationToken) {
        let mut failures: u32 = 0;
        loop {
            let peer = announcement.borrow().clone();
            let fetched = match self.sync_once(&peer).await {
                Ok(outcome) if outcome.failed == 0 => {
                    failures = 0;
                    outcome.fetched
                }
                Ok(outcome) => {
                    failures = failures.saturating_add(1);
                    outcome.fetched
                }
                Err(e) if e.is_integrity_fault() => {
                    error!(peer = %peer.id, error = %e, "integrity fault, replication from peer halted");
                    self.mark_halted(&peer.id);
                    break;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(peer = %peer.id, error = %e, failures, "sync tick failed");
                    0
                }
            };

            if failures > 0 && !self.config.retry.allows_attempt(failures) {
                error!(peer = %peer.id, failures, "retries exhausted, replication from peer halted");
                self.mark_halted(&peer.id);
                break;
            }

            let delay = verified::next_tick_delay(
                failures,
                fetched,
                self.config.batch_size,
                self.config.tick_interval,
                &self.config.retry,
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!(peer = %announcement.borrow().id, "peer watch stopped");
    }

    fn mark_halted(&self, id: &InstanceId) {
        self.stats.lock().entry(*id).or_default().halted = true;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_apply_locks_serialize_one_file() {
        let locks = Arc::new(ApplyLocks::default());
        let file_id = godfs_store::verified::file_id_for(b"contended");
        let inside = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let file_id = file_id.clone();
                tokio::spawn(async move {
                    for _ in 0..20 {
                        let _guard = locks.lock(&file_id).await;
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        tokio::task::yield_now().await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_apply_locks_different_files_do_not_block() {
        let locks = ApplyLocks::default();
        let a = godfs_store::verified::file_id_for(b"a");
        let b = godfs_store::verified::file_id_for(b"b");
        let _first = locks.lock(&a).await;
        let second = tokio::time::timeout(Duration::from_secs(1), locks.lock(&b)).await;
        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
