//! Pure content-addressing and index arithmetic.

use godfs_types::FileId;

/// Content address of `data`: CRC32 shard plus MD5 identity.
pub fn file_id_for(data: &[u8]) -> FileId {
    FileId::from_digests(crc32fast::hash(data), md5::compute(data).0)
}

/// Home slot of a file id in an index of `slots` slots. `slots` is non-zero.
#[inline]
pub fn home_slot(file_id: &FileId, slots: u32) -> u32 {
    crc32fast::hash(file_id.as_bytes()) % slots
}

/// Slots probed for a file id, home slot first, wrapping at the end.
pub fn probe_sequence(home: u32, slots: u32, max_probes: u32) -> impl Iterator<Item = u32> {
    let probes = max_probes.min(slots);
    (0..probes).map(move |i| ((u64::from(home) + u64::from(i)) % u64::from(slots)) as u32)
}

/// Reference count after one more holder; saturates instead of wrapping.
#[inline]
pub fn incremented_ref_count(current: u64) -> u64 {
    current.saturating_add(1)
}

/// Reference count after one holder lets go. `None` means delete the entry.
#[inline]
pub fn released_ref_count(current: u64) -> Option<u64> {
    match current {
        0 | 1 => None,
        n => Some(n - 1),
    }
}
