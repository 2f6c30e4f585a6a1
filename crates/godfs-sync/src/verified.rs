//! Pure replication decisions.
//!
//! Cursor arithmetic, fetch candidate ordering, watch-set diffs and tick
//! pacing. Deterministic; callers pass in every input.

use std::collections::HashSet;
use std::time::Duration;

use godfs_constants::BINLOG_RECORD_SIZE;
use godfs_types::BinlogBatch;
use godfs_types::Cursor;
use godfs_types::FileId;
use godfs_types::Instance;
use godfs_types::InstanceId;
use godfs_types::RetryPolicy;
use godfs_types::ServerAddr;

const RECORD_SIZE: u64 = BINLOG_RECORD_SIZE as u64;

/// Cursor after consuming `records` records starting at `cursor`.
#[inline]
pub fn cursor_after(cursor: Cursor, records: usize) -> Cursor {
    Cursor::new(cursor.file_index, cursor.offset.saturating_add(records as u64 * RECORD_SIZE))
}

/// Where to move after a read at `cursor` returned no records.
///
/// Rolls to the next segment only when the peer is writing a later segment and
/// says ours is exhausted. `None` means stay put.
pub fn rollover_cursor(cursor: Cursor, batch: &BatchSummary) -> Option<Cursor> {
    if batch.segment_exhausted && batch.current_index > cursor.file_index {
        let next = cursor.next_segment();
        return (next > cursor).then_some(next);
    }
    None
}

/// Whether `data` addresses to `file_id`.
pub fn content_matches(file_id: &FileId, data: &[u8]) -> bool {
    &godfs_store::verified::file_id_for(data) == file_id
}

/// The parts of a [`BinlogBatch`] the cursor logic needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Records returned.
    pub records: usize,
    /// Cursor the peer says follows the batch.
    pub next: Cursor,
    /// Segment the peer is writing.
    pub current_index: u32,
    /// Peer reports the requested segment is closed and fully read.
    pub segment_exhausted: bool,
}

impl From<&BinlogBatch> for BatchSummary {
    fn from(batch: &BinlogBatch) -> Self {
        Self {
            records: batch.records.len(),
            next: batch.next,
            current_index: batch.current_index,
            segment_exhausted: batch.segment_exhausted,
        }
    }
}

/// Check that a non-empty batch continues exactly from `cursor`.
pub fn check_batch_continuity(cursor: Cursor, batch: &BatchSummary) -> Result<Cursor, String> {
    let expected = cursor_after(cursor, batch.records);
    if batch.next != expected {
        return Err(format!("expected next cursor {expected:?}, peer sent {:?}", batch.next));
    }
    Ok(expected)
}

/// Servers to try, in order, when fetching a record's content.
///
/// The originating instance first, then the peer that served the record, then
/// every other member. This node and duplicates are skipped.
pub fn fetch_candidates(
    source: InstanceId,
    serving_peer: &Instance,
    members: &[Instance],
    self_id: InstanceId,
) -> Vec<Instance> {
    let mut seen = HashSet::new();
    seen.insert(self_id);
    let mut out = Vec::with_capacity(members.len() + 1);

    let origin = members.iter().find(|m| m.id == source);
    for candidate in origin.into_iter().chain(std::iter::once(serving_peer)).chain(members.iter()) {
        if seen.insert(candidate.id) {
            out.push(candidate.clone());
        }
    }
    out
}

/// Changes needed to turn the watched set into the desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchDiff {
    /// Peers to start watching.
    pub start: Vec<Instance>,
    /// Peers to stop watching.
    pub stop: Vec<InstanceId>,
    /// Watched peers whose announcement changed.
    pub update: Vec<Instance>,
}

/// Diff the watched peers against the current membership, excluding self.
pub fn diff_watch_set(watched: &[(InstanceId, ServerAddr)], members: &[Instance], self_id: InstanceId) -> WatchDiff {
    let mut diff = WatchDiff::default();
    let mut desired = HashSet::new();

    for member in members.iter().filter(|m| m.id != self_id) {
        if !desired.insert(member.id) {
            continue;
        }
        match watched.iter().find(|(id, _)| *id == member.id) {
            None => diff.start.push(member.clone()),
            Some((_, addr)) if *addr != member.server => diff.update.push(member.clone()),
            Some(_) => {}
        }
    }
    diff.stop = watched.iter().map(|(id, _)| *id).filter(|id| !desired.contains(id)).collect();
    diff
}

/// Delay before the next tick against a peer.
///
/// - Failure: back off on the consecutive failure count.
/// - A full batch: go again immediately, the peer likely has more.
/// - Otherwise: wait one tick interval.
pub fn next_tick_delay(
    consecutive_failures: u32,
    fetched: usize,
    batch_size: u32,
    tick_interval: Duration,
    retry: &RetryPolicy,
) -> Duration {
    if consecutive_failures > 0 {
        return retry.delay_for(consecutive_failures);
    }
    if fetched > 0 && fetched >= batch_size as usize {
        return Duration::ZERO;
    }
    tick_interval
}

#[cfg(test)]
mod tests {
    use godfs_types::Role;

    use super::*;

    fn member(id: &str, port: u16) -> Instance {
        Instance::new(InstanceId::parse(id).unwrap(), Role::Storage, ServerAddr::new("10.0.0.1", port)).with_group("g1")
    }

    fn summary(records: usize, next: Cursor, current_index: u32, segment_exhausted: bool) -> BatchSummary {
        BatchSummary {
            records,
            next,
            current_index,
            segment_exhausted,
        }
    }

    #[test]
    fn test_cursor_after() {
        assert_eq!(cursor_after(Cursor::new(0, 0), 2), Cursor::new(0, 128));
        assert_eq!(cursor_after(Cursor::new(3, 64), 0), Cursor::new(3, 64));
    }

    #[test]
    fn test_rollover_on_exhausted_segment() {
        let cursor = Cursor::new(0, 640);
        assert_eq!(rollover_cursor(cursor, &summary(0, Cursor::new(1, 0), 1, true)), Some(Cursor::new(1, 0)));
    }

    #[test]
    fn test_no_rollover_without_exhaustion() {
        let cursor = Cursor::new(0, 640);
        assert_eq!(rollover_cursor(cursor, &summary(0, cursor, 2, false)), None);
        // Exhausted but not behind the peer's current segment.
        assert_eq!(rollover_cursor(cursor, &summary(0, Cursor::new(1, 0), 0, true)), None);
    }

    #[test]
    fn test_no_rollover_on_current_segment() {
        let cursor = Cursor::new(1, 64);
        assert_eq!(rollover_cursor(cursor, &summary(0, cursor, 1, false)), None);
    }

    #[test]
    fn test_content_matches_its_address() {
        let file_id = godfs_store::verified::file_id_for(b"payload");
        assert!(content_matches(&file_id, b"payload"));
        assert!(!content_matches(&file_id, b"pay1oad"));
    }

    #[test]
    fn test_batch_continuity() {
        let cursor = Cursor::new(0, 64);
        assert_eq!(check_batch_continuity(cursor, &summary(2, Cursor::new(0, 192), 0, false)), Ok(Cursor::new(0, 192)));
        assert!(check_batch_continuity(cursor, &summary(2, Cursor::new(0, 128), 0, false)).is_err());
    }

    #[test]
    fn test_fetch_candidates_prefer_origin() {
        let me = member("selfnode", 1);
        let a = member("storageA", 2);
        let b = member("storageB", 3);
        let c = member("storageC", 4);
        let members = vec![me.clone(), a.clone(), b.clone(), c.clone()];

        let order: Vec<InstanceId> = fetch_candidates(c.id, &b, &members, me.id).iter().map(|i| i.id).collect();
        assert_eq!(order, vec![c.id, b.id, a.id]);
    }

    #[test]
    fn test_fetch_candidates_unknown_origin() {
        let me = member("selfnode", 1);
        let a = member("storageA", 2);
        let members = vec![me.clone(), a.clone()];
        let gone = InstanceId::parse("departed").unwrap();

        let order: Vec<InstanceId> = fetch_candidates(gone, &a, &members, me.id).iter().map(|i| i.id).collect();
        assert_eq!(order, vec![a.id]);
    }

    #[test]
    fn test_diff_watch_set() {
        let me = member("selfnode", 1);
        let a = member("storageA", 2);
        let b = member("storageB", 3);
        let moved_b = member("storageB", 30);
        let c = member("storageC", 4);

        let watched = vec![(a.id, a.server.clone()), (b.id, b.server.clone())];
        let diff = diff_watch_set(&watched, &[me.clone(), moved_b.clone(), c.clone()], me.id);
        assert_eq!(diff.start, vec![c]);
        assert_eq!(diff.stop, vec![a.id]);
        assert_eq!(diff.update, vec![moved_b]);
    }

    #[test]
    fn test_tick_pacing() {
        let retry = RetryPolicy::capped(Duration::from_millis(500), Duration::from_secs(4));
        let tick = Duration::from_secs(1);
        assert_eq!(next_tick_delay(0, 10, 10, tick, &retry), Duration::ZERO);
        assert_eq!(next_tick_delay(0, 3, 10, tick, &retry), tick);
        assert_eq!(next_tick_delay(0, 0, 10, tick, &retry), tick);
        assert_eq!(next_tick_delay(1, 0, 10, tick, &retry), Duration::from_millis(500));
        assert_eq!(next_tick_delay(5, 0, 10, tick, &retry), Duration::from_secs(4));
    }
}
