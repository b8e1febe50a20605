#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::memtable::Memtable;
    use crate::sstable::{SstError, SstReader, SstWriter};
    use std::fs;
    use tempfile::TempDir;

    fn build_run_from(
        path: &std::path::Path,
        config: &Config,
        pairs: &[(Vec<u8>, Vec<u8>)],
    ) {
        let mut memtable = Memtable::new();
        for (k, v) in pairs {
            memtable.put(k, v);
        }
        let mut writer = SstWriter::create(path, config).unwrap();
        writer.write(memtable.iter()).unwrap();
    }

    #[test]
    fn test_every_written_pair_reads_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0_0.sst");
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..100u32)
            .map(|i| {
                (
                    format!("key-{i:03}").into_bytes(),
                    format!("value-{i:03}").into_bytes(),
                )
            })
            .collect();
        build_run_from(
            &path,
            &Config {
                block_size: 128,
                ..Config::default()
            },
            &pairs,
        );

        let reader = SstReader::open(&path).unwrap();
        for (k, v) in &pairs {
            assert_eq!(reader.get(k).unwrap(), Some(v.clone()));
        }
    }

    #[test]
    fn test_key_outside_every_range_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0_0.sst");
        build_run_from(
            &path,
            &Config::default(),
            &[(b"b".to_vec(), b"1".to_vec()), (b"d".to_vec(), b"2".to_vec())],
        );

        let reader = SstReader::open(&path).unwrap();
        assert_eq!(reader.get(b"a").unwrap(), None);
        assert_eq!(reader.get(b"e").unwrap(), None);
        // Inside the range but never written.
        assert_eq!(reader.get(b"c").unwrap(), None);
    }

    #[test]
    fn test_filter_rejected_lookup_never_touches_the_block() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0_0.sst");
        // Every second letter, so in-range absent keys exist.
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = (b'a'..=b'y')
            .step_by(2)
            .map(|c| (vec![c], vec![c]))
            .collect();
        build_run_from(&path, &Config::default(), &pairs);

        let reader = SstReader::open(&path).unwrap();

        // "zzz" sorts above "y" under length-first order, outside every
        // block range — no block touched.
        assert_eq!(reader.get(b"zzz").unwrap(), None);
        assert_eq!(reader.blocks_scanned(), 0);

        // "m" is in range and present: one block scan.
        assert_eq!(reader.get(b"m").unwrap(), Some(b"m".to_vec()));
        let after_hit = reader.blocks_scanned();
        assert_eq!(after_hit, 1);

        // In-range absent keys are rejected by the filter without a scan
        // (13 keys in a 1024-bit filter leaves no realistic collisions).
        for probe in [b"b", b"d", b"f"] {
            assert_eq!(reader.get(probe).unwrap(), None);
        }
        assert_eq!(
            reader.blocks_scanned(),
            after_hit,
            "filter admitted an absent probe"
        );
    }

    #[test]
    fn test_mixed_length_keys_are_found() {
        // Length-first order interleaves differently from lexicographic
        // order; index search must use the engine comparator or "aa"
        // becomes unreachable.
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0_0.sst");
        build_run_from(
            &path,
            &Config::default(),
            &[
                (b"b".to_vec(), b"1".to_vec()),
                (b"z".to_vec(), b"2".to_vec()),
                (b"aa".to_vec(), b"3".to_vec()),
                (b"zz".to_vec(), b"4".to_vec()),
            ],
        );

        let reader = SstReader::open(&path).unwrap();
        assert_eq!(reader.get(b"b").unwrap(), Some(b"1".to_vec()));
        assert_eq!(reader.get(b"z").unwrap(), Some(b"2".to_vec()));
        assert_eq!(reader.get(b"aa").unwrap(), Some(b"3".to_vec()));
        assert_eq!(reader.get(b"zz").unwrap(), Some(b"4".to_vec()));
    }

    #[test]
    fn test_empty_values_survive_the_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0_0.sst");
        build_run_from(
            &path,
            &Config::default(),
            &[(b"deleted".to_vec(), Vec::new()), (b"live".to_vec(), b"v".to_vec())],
        );

        let reader = SstReader::open(&path).unwrap();
        // A deletion flushed as an empty value is a real binding, distinct
        // from not-found.
        assert_eq!(reader.get(b"deleted").unwrap(), Some(Vec::new()));
        assert_eq!(reader.get(b"live").unwrap(), Some(b"v".to_vec()));
        assert_eq!(reader.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_open_rejects_file_without_footer() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0_0.sst");
        fs::write(&path, [0u8; 10]).unwrap();

        assert!(matches!(
            SstReader::open(&path),
            Err(SstError::Corruption(_))
        ));
    }

    #[test]
    fn test_open_rejects_lying_footer() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0_0.sst");
        build_run_from(&path, &Config::default(), &[(b"k".to_vec(), b"v".to_vec())]);

        // Inflate the declared data length.
        let mut bytes = fs::read(&path).unwrap();
        let footer_at = bytes.len() - 24;
        bytes[footer_at..footer_at + 8].copy_from_slice(&u64::MAX.to_be_bytes());
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            SstReader::open(&path),
            Err(SstError::Corruption(_))
        ));
    }

    #[test]
    fn test_open_rejects_truncated_index_stream() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0_0.sst");
        build_run_from(&path, &Config::default(), &[(b"key".to_vec(), b"v".to_vec())]);

        let bytes = fs::read(&path).unwrap();
        let footer_at = bytes.len() - 24;
        let data_len =
            u64::from_be_bytes(bytes[footer_at..footer_at + 8].try_into().unwrap());
        let index_len =
            u64::from_be_bytes(bytes[footer_at + 8..footer_at + 16].try_into().unwrap());

        // Shrink the index stream by one byte but keep the footer's sum
        // consistent with the shortened file.
        let mut damaged = Vec::new();
        damaged.extend_from_slice(&bytes[..(data_len + index_len) as usize - 1]);
        damaged.extend_from_slice(&bytes[(data_len + index_len) as usize..footer_at]);
        let mut footer = bytes[footer_at..].to_vec();
        footer[8..16].copy_from_slice(&(index_len - 1).to_be_bytes());
        damaged.extend_from_slice(&footer);
        fs::write(&path, &damaged).unwrap();

        assert!(matches!(
            SstReader::open(&path),
            Err(SstError::Corruption(_))
        ));
    }
}
