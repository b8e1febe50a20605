#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::memtable::Memtable;
    use crate::wal::Wal;
    use std::fs;
    use tempfile::TempDir;

    fn test_config() -> Config {
        Config::default()
    }

    fn write_wal(path: &std::path::Path, records: &[(&[u8], Option<&[u8]>)]) {
        let mut wal = Wal::open(path, &test_config()).unwrap();
        for (key, value) in records {
            wal.append(key, *value).unwrap();
        }
    }

    #[test]
    fn test_replay_rebuilds_memtable() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0.wal");
        write_wal(
            &path,
            &[
                (b"a", Some(b"1")),
                (b"b", Some(b"2")),
                (b"a", Some(b"updated")),
            ],
        );

        let mut wal = Wal::open(&path, &test_config()).unwrap();
        let mut memtable = Memtable::new();
        wal.replay_into(&mut memtable).unwrap();

        assert_eq!(memtable.get(b"a"), Some(b"updated".to_vec()));
        assert_eq!(memtable.get(b"b"), Some(b"2".to_vec()));
        assert_eq!(memtable.len(), 2);
    }

    #[test]
    fn test_replayed_delete_removes_key() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0.wal");
        write_wal(&path, &[(b"k", Some(b"v")), (b"k", None)]);

        let mut wal = Wal::open(&path, &test_config()).unwrap();
        let mut memtable = Memtable::new();
        wal.replay_into(&mut memtable).unwrap();

        assert_eq!(memtable.get(b"k"), None);
    }

    #[test]
    fn test_delete_of_unseen_key_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0.wal");
        write_wal(&path, &[(b"ghost", None), (b"live", Some(b"v"))]);

        let mut wal = Wal::open(&path, &test_config()).unwrap();
        let mut memtable = Memtable::new();
        wal.replay_into(&mut memtable).unwrap();

        assert_eq!(memtable.get(b"live"), Some(b"v".to_vec()));
        assert_eq!(memtable.len(), 1);
    }

    #[test]
    fn test_torn_tail_truncates_cleanly() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0.wal");
        write_wal(&path, &[(b"a", Some(b"1")), (b"b", Some(b"2"))]);

        // Chop into the middle of the second record.
        let full = fs::read(&path).unwrap();
        let record_len = full.len() / 2;
        fs::write(&path, &full[..record_len + 3]).unwrap();

        let mut wal = Wal::open(&path, &test_config()).unwrap();
        let mut memtable = Memtable::new();
        wal.replay_into(&mut memtable).unwrap();

        assert_eq!(memtable.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(memtable.get(b"b"), None);
        // Logical size snaps back to the last complete record.
        assert_eq!(wal.size() as usize, record_len);
    }

    #[test]
    fn test_tail_shorter_than_header_is_tolerated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0.wal");
        write_wal(&path, &[(b"a", Some(b"1"))]);

        let mut full = fs::read(&path).unwrap();
        let complete = full.len();
        full.extend_from_slice(&[0x01, 0x02, 0x03]); // 3 stray bytes
        fs::write(&path, &full).unwrap();

        let mut wal = Wal::open(&path, &test_config()).unwrap();
        let mut memtable = Memtable::new();
        wal.replay_into(&mut memtable).unwrap();

        assert_eq!(memtable.len(), 1);
        assert_eq!(wal.size() as usize, complete);
    }

    #[test]
    fn test_implausible_lengths_stop_replay() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0.wal");
        write_wal(&path, &[(b"good", Some(b"record"))]);

        // Append a header declaring an 11 MiB key.
        let mut full = fs::read(&path).unwrap();
        full.push(0);
        full.extend_from_slice(&(11u32 * 1024 * 1024).to_be_bytes());
        full.extend_from_slice(&4u32.to_be_bytes());
        fs::write(&path, &full).unwrap();

        let mut wal = Wal::open(&path, &test_config()).unwrap();
        let mut memtable = Memtable::new();
        wal.replay_into(&mut memtable).unwrap();

        assert_eq!(memtable.get(b"good"), Some(b"record".to_vec()));
        assert_eq!(memtable.len(), 1);
    }

    #[test]
    fn test_crc_mismatch_warns_but_replay_continues() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0.wal");
        write_wal(&path, &[(b"aa", Some(b"11")), (b"bb", Some(b"22"))]);

        // Corrupt one value byte of the first record; lengths stay valid.
        let mut full = fs::read(&path).unwrap();
        full[11] ^= 0xFF;
        fs::write(&path, &full).unwrap();

        let mut wal = Wal::open(&path, &test_config()).unwrap();
        let mut memtable = Memtable::new();
        wal.replay_into(&mut memtable).unwrap();

        // Both records applied; the damaged one carries the damaged bytes.
        assert_eq!(memtable.len(), 2);
        assert_eq!(memtable.get(b"bb"), Some(b"22".to_vec()));
    }

    #[test]
    fn test_empty_file_replays_to_empty_memtable() {
        let tmp = TempDir::new().unwrap();
        let mut wal = Wal::open(tmp.path().join("0.wal"), &test_config()).unwrap();
        let mut memtable = Memtable::new();
        wal.replay_into(&mut memtable).unwrap();

        assert!(memtable.is_empty());
        assert_eq!(wal.size(), 0);
    }
}
