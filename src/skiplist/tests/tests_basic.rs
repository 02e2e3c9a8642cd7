#[cfg(test)]
mod tests {
    use crate::skiplist::SkipList;

    #[test]
    fn test_put_and_get() {
        let mut list = SkipList::new();

        list.put(b"key1".to_vec(), b"value1".to_vec());
        assert_eq!(list.get(b"key1"), Some(b"value1".as_slice()));

        // Update in place.
        list.put(b"key1".to_vec(), b"new_value".to_vec());
        assert_eq!(list.get(b"key1"), Some(b"new_value".as_slice()));

        assert_eq!(list.get(b"nonexistent"), None);
    }

    #[test]
    fn test_empty_value_is_stored() {
        let mut list = SkipList::new();

        list.put(b"tomb".to_vec(), Vec::new());
        assert_eq!(list.get(b"tomb"), Some(b"".as_slice()));
    }

    #[test]
    fn test_remove() {
        let mut list = SkipList::new();

        list.put(b"key1".to_vec(), b"value1".to_vec());
        list.put(b"key2".to_vec(), b"value2".to_vec());

        assert!(list.remove(b"key1"));
        assert_eq!(list.get(b"key1"), None);
        assert_eq!(list.get(b"key2"), Some(b"value2".as_slice()));

        // Removing again is a no-op.
        assert!(!list.remove(b"key1"));
        assert!(!list.remove(b"nonexistent"));
    }

    #[test]
    fn test_used_bytes_tracking() {
        let mut list = SkipList::new();
        assert_eq!(list.used_bytes(), 0);

        list.put(b"key1".to_vec(), b"value1".to_vec());
        assert_eq!(list.used_bytes(), 4 + 6);

        // Overwrite adjusts by the value-length delta.
        list.put(b"key1".to_vec(), b"v".to_vec());
        assert_eq!(list.used_bytes(), 4 + 1);

        list.put(b"key1".to_vec(), b"longer_value".to_vec());
        assert_eq!(list.used_bytes(), 4 + 12);

        list.put(b"key2".to_vec(), b"x".to_vec());
        assert_eq!(list.used_bytes(), 4 + 12 + 4 + 1);

        assert!(list.remove(b"key1"));
        assert_eq!(list.used_bytes(), 4 + 1);

        list.clear();
        assert_eq!(list.used_bytes(), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_clear_then_reuse() {
        let mut list = SkipList::new();

        list.put(b"a".to_vec(), b"1".to_vec());
        list.put(b"b".to_vec(), b"2".to_vec());
        list.clear();

        assert_eq!(list.get(b"a"), None);
        assert!(list.is_empty());

        list.put(b"c".to_vec(), b"3".to_vec());
        assert_eq!(list.get(b"c"), Some(b"3".as_slice()));
        assert_eq!(list.dump().len(), 1);
    }

    #[test]
    fn test_large_scale_inserts_stay_sorted() {
        let mut list = SkipList::new();
        let n = 1000;

        // Insert in a scrambled order.
        for i in 0..n {
            let shuffled = (i * 7919) % n;
            let key = format!("key{shuffled:04}");
            let value = format!("value{shuffled:04}");
            list.put(key.into_bytes(), value.into_bytes());
        }

        for i in 0..n {
            let key = format!("key{i:04}");
            let expected = format!("value{i:04}");
            assert_eq!(list.get(key.as_bytes()), Some(expected.as_bytes()));
        }

        let dump = list.dump();
        assert_eq!(dump.len(), n);
        for window in dump.windows(2) {
            assert!(window[0].0 < window[1].0, "dump must be strictly ascending");
        }
    }

    #[test]
    fn test_remove_then_reinsert() {
        let mut list = SkipList::new();

        for i in 0..100 {
            list.put(format!("k{i:03}").into_bytes(), b"v".to_vec());
        }
        for i in (0..100).step_by(2) {
            assert!(list.remove(format!("k{i:03}").as_bytes()));
        }
        for i in (0..100).step_by(2) {
            list.put(format!("k{i:03}").into_bytes(), b"v2".to_vec());
        }

        let dump = list.dump();
        assert_eq!(dump.len(), 100);
        for (i, (key, _)) in dump.iter().enumerate() {
            assert_eq!(key, format!("k{i:03}").as_bytes());
        }
        assert_eq!(list.get(b"k000"), Some(b"v2".as_slice()));
        assert_eq!(list.get(b"k001"), Some(b"v".as_slice()));
    }
}
