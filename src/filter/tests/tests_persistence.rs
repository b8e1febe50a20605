#[cfg(test)]
mod tests {
    use crate::filter::{BloomFilter, FilterError};

    #[test]
    fn test_save_load_round_trip_agrees_on_all_keys() {
        let mut filter = BloomFilter::new(2048, 4);
        for i in 0..200u32 {
            filter.add(format!("entry-{i}").as_bytes());
        }

        let loaded = BloomFilter::load(&filter.save()).unwrap();

        for i in 0..200u32 {
            let key = format!("entry-{i}");
            assert_eq!(filter.contains(key.as_bytes()), loaded.contains(key.as_bytes()));
        }
        for i in 0..200u32 {
            let key = format!("other-{i}");
            assert_eq!(filter.contains(key.as_bytes()), loaded.contains(key.as_bytes()));
        }
        assert_eq!(loaded.len(), 200);
    }

    #[test]
    fn test_load_preserves_large_seed_tables() {
        // k > 8 exercises the derived-seed extension rule.
        let mut filter = BloomFilter::new(4096, 11);
        filter.add(b"needle");

        let loaded = BloomFilter::load(&filter.save()).unwrap();
        assert!(loaded.contains(b"needle"));
    }

    #[test]
    fn test_load_rejects_truncated_header() {
        let err = BloomFilter::load(&[0u8; 23]).unwrap_err();
        assert!(matches!(err, FilterError::Truncated(_)));
    }

    #[test]
    fn test_load_rejects_truncated_bit_array() {
        let filter = BloomFilter::new(1024, 3);
        let mut data = filter.save();
        data.truncate(data.len() - 1);

        let err = BloomFilter::load(&data).unwrap_err();
        assert!(matches!(err, FilterError::Truncated(_)));
    }

    #[test]
    fn test_serialized_layout_is_stable() {
        let mut filter = BloomFilter::new(128, 2);
        filter.add(b"k");
        let data = filter.save();

        // m(8) | k(8) | n(8) | seeds(2*4) | bits(2*8)
        assert_eq!(data.len(), 24 + 8 + 16);
        assert_eq!(u64::from_be_bytes(data[0..8].try_into().unwrap()), 128);
        assert_eq!(u64::from_be_bytes(data[8..16].try_into().unwrap()), 2);
        assert_eq!(u64::from_be_bytes(data[16..24].try_into().unwrap()), 1);
    }
}
