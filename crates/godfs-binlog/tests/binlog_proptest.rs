//! Property tests for binlog ordering across segment rotation.

use godfs_binlog::Binlog;
use godfs_binlog::BinlogConfig;
use godfs_types::BinlogQuery;
use godfs_types::BinlogRecord;
use godfs_types::Cursor;
use godfs_types::FileId;
use godfs_types::InstanceId;
use proptest::prelude::*;
use tempfile::TempDir;

fn arb_record() -> impl Strategy<Value = BinlogRecord> {
    (any::<u32>(), any::<[u8; 16]>(), any::<u64>(), any::<u64>(), any::<bool>()).prop_map(
        |(crc, md5, len, ts, complete)| BinlogRecord {
            file_id: FileId::from_digests(crc, md5),
            source: InstanceId::parse("abcd1234").unwrap(),
            file_length: len,
            timestamp_ms: ts,
            complete,
        },
    )
}

/// Pull everything from segment 0 onward, following rotation the way a peer does.
fn drain(log: &Binlog, batch_size: u32) -> Vec<BinlogRecord> {
    let mut cursor = Cursor::default();
    let mut out = Vec::new();
    loop {
        let batch = log
            .read(BinlogQuery {
                file_index: cursor.file_index,
                offset: cursor.offset,
                max_count: batch_size,
            })
            .unwrap();
        let progressed = batch.next != cursor;
        out.extend(batch.records);
        cursor = batch.next;
        if !progressed {
            return out;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reads_preserve_append_order(
        records in proptest::collection::vec(arb_record(), 0..40),
        max_per_segment in 1u32..8,
        batch_size in 1u32..6,
    ) {
        let dir = TempDir::new().unwrap();
        let log = Binlog::open(dir.path(), BinlogConfig { max_records_per_segment: max_per_segment }).unwrap();

        let mut positions = Vec::new();
        for record in &records {
            positions.push(log.write(record).unwrap());
        }

        // Positions strictly increase.
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(drain(&log, batch_size), records.clone());
        prop_assert_eq!(log.total_records(), records.len() as u64);

        drop(log);
        let reopened = Binlog::open(dir.path(), BinlogConfig { max_records_per_segment: max_per_segment }).unwrap();
        prop_assert_eq!(drain(&reopened, batch_size), records);
    }
}
