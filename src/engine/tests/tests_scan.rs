//! Whole-store scans and predicate ranges across memory and disk.

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use tempfile::TempDir;

    fn key_num(key: &[u8]) -> i32 {
        std::str::from_utf8(&key[3..])
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    #[test]
    fn test_iter_matches_reference_order() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path()).unwrap();
        let mut reference = std::collections::BTreeMap::new();

        for i in 0..100 {
            let key = format!("key{i:03}").into_bytes();
            let value = format!("value{i:03}").into_bytes();
            engine.put(key.clone(), value.clone()).unwrap();
            reference.insert(key, value);
        }

        let scanned: Vec<_> = engine.iter().unwrap().collect();
        let expected: Vec<_> = reference.into_iter().collect();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn test_iter_merges_memtable_and_ssts() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path()).unwrap();

        // Older versions on disk.
        engine.put(b"a".to_vec(), b"a-disk".to_vec()).unwrap();
        engine.put(b"b".to_vec(), b"b-disk".to_vec()).unwrap();
        engine.put(b"c".to_vec(), b"c-disk".to_vec()).unwrap();
        engine.flush().unwrap();

        // Newer versions and keys in memory.
        engine.put(b"b".to_vec(), b"b-mem".to_vec()).unwrap();
        engine.put(b"d".to_vec(), b"d-mem".to_vec()).unwrap();

        let scanned: Vec<_> = engine.iter().unwrap().collect();
        assert_eq!(
            scanned,
            vec![
                (b"a".to_vec(), b"a-disk".to_vec()),
                (b"b".to_vec(), b"b-mem".to_vec()),
                (b"c".to_vec(), b"c-disk".to_vec()),
                (b"d".to_vec(), b"d-mem".to_vec()),
            ]
        );
    }

    #[test]
    fn test_iter_across_multiple_ssts_newest_wins() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path()).unwrap();

        engine.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
        engine.flush().unwrap();
        engine.put(b"k".to_vec(), b"v2".to_vec()).unwrap();
        engine.flush().unwrap();
        engine.put(b"other".to_vec(), b"x".to_vec()).unwrap();
        engine.flush().unwrap();

        let scanned: Vec<_> = engine.iter().unwrap().collect();
        assert_eq!(
            scanned,
            vec![
                (b"k".to_vec(), b"v2".to_vec()),
                (b"other".to_vec(), b"x".to_vec()),
            ]
        );
    }

    #[test]
    fn test_tombstone_flushed_to_disk_hides_older_sst_value() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path()).unwrap();

        engine.put(b"doomed".to_vec(), b"v".to_vec()).unwrap();
        engine.put(b"kept".to_vec(), b"v".to_vec()).unwrap();
        engine.flush().unwrap();

        engine.remove(b"doomed".to_vec()).unwrap();
        engine.flush().unwrap();

        let keys: Vec<_> = engine.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"kept".to_vec()]);
        assert_eq!(engine.get(b"doomed").unwrap(), None);
    }

    #[test]
    fn test_predicate_range_with_mid_stream_flush() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path()).unwrap();

        for i in 0..100 {
            engine
                .put(
                    format!("key{i:02}").into_bytes(),
                    format!("value{i:02}").into_bytes(),
                )
                .unwrap();
            if i == 50 {
                engine.flush().unwrap();
            }
        }

        let iter = engine
            .predicate_range(|key| {
                let num = key_num(key);
                if num < 20 {
                    1
                } else if num > 60 {
                    -1
                } else {
                    0
                }
            })
            .unwrap()
            .expect("run spans disk and memory");

        let keys: Vec<_> = iter.map(|(k, _)| String::from_utf8(k).unwrap()).collect();
        let expected: Vec<_> = (20..=60).map(|i| format!("key{i:02}")).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_predicate_range_no_match() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path()).unwrap();

        engine.put(b"key10".to_vec(), b"v".to_vec()).unwrap();
        engine.flush().unwrap();
        engine.put(b"key20".to_vec(), b"v".to_vec()).unwrap();

        let result = engine
            .predicate_range(|key: &[u8]| {
                if key < b"key15".as_slice() {
                    1
                } else if key > b"key15".as_slice() {
                    -1
                } else {
                    0
                }
            })
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_scan_empty_store() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path()).unwrap();

        assert_eq!(engine.iter().unwrap().count(), 0);
        assert!(engine.predicate_range(|_| 0).unwrap().is_none());
    }
}
