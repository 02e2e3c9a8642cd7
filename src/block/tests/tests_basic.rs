#[cfg(test)]
mod tests {
    use crate::block::Block;
    use std::sync::Arc;

    #[test]
    fn test_add_entry_and_lookup() {
        let mut block = Block::new(4096);

        assert!(block.is_empty());
        assert!(block.add_entry(b"apple", b"red"));
        assert!(block.add_entry(b"banana", b"yellow"));
        assert!(block.add_entry(b"cherry", b"dark-red"));
        assert_eq!(block.num_entries(), 3);

        assert_eq!(block.find_entry_idx(b"apple"), Some(0));
        assert_eq!(block.find_entry_idx(b"banana"), Some(1));
        assert_eq!(block.find_entry_idx(b"cherry"), Some(2));
        assert_eq!(block.find_entry_idx(b"durian"), None);
        assert_eq!(block.find_entry_idx(b"aardvark"), None);

        assert_eq!(block.find_value(b"banana"), Some(b"yellow".to_vec()));
        assert_eq!(block.find_value(b"durian"), None);
    }

    #[test]
    fn test_capacity_refusal() {
        // Room for exactly two small entries.
        let mut block = Block::new(25);

        assert!(block.add_entry(b"k1", b"v1"));
        assert!(block.add_entry(b"k2", b"v2"));
        assert!(!block.add_entry(b"k3", b"v3"));

        // The refused entry must leave no trace.
        assert_eq!(block.num_entries(), 2);
        assert_eq!(block.find_value(b"k3"), None);
    }

    #[test]
    fn test_first_entry_always_accepted() {
        let mut block = Block::new(8);

        let oversized_value = vec![b'x'; 100];
        assert!(block.add_entry(b"huge", &oversized_value));
        assert_eq!(block.num_entries(), 1);

        // But the block is now over capacity, so nothing else fits.
        assert!(!block.add_entry(b"tiny", b"v"));
    }

    #[test]
    fn test_empty_value_entry() {
        let mut block = Block::new(4096);

        assert!(block.add_entry(b"tombstone", b""));
        assert_eq!(block.find_value(b"tombstone"), Some(Vec::new()));
    }

    #[test]
    fn test_lower_bound() {
        let mut block = Block::new(4096);
        for key in [b"b", b"d", b"f"] {
            block.add_entry(key, b"v");
        }

        assert_eq!(block.lower_bound(b"a"), 0);
        assert_eq!(block.lower_bound(b"b"), 0);
        assert_eq!(block.lower_bound(b"c"), 1);
        assert_eq!(block.lower_bound(b"f"), 2);
        assert_eq!(block.lower_bound(b"g"), 3);
    }

    #[test]
    fn test_iterator_walks_in_order() {
        let mut block = Block::new(4096);
        block.add_entry(b"a", b"1");
        block.add_entry(b"b", b"2");
        block.add_entry(b"c", b"3");

        let block = Arc::new(block);
        let entries: Vec<_> = block.iter().collect();
        assert_eq!(
            entries,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );

        // Seeded iteration starts at the lower bound.
        let from_b: Vec<_> = block.iter_from(b"b").map(|(k, _)| k).collect();
        assert_eq!(from_b, vec![b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(block.iter_from(b"z").count(), 0);
    }

    #[test]
    fn test_iterator_equality_is_block_identity_and_index() {
        let mut block = Block::new(4096);
        block.add_entry(b"a", b"1");
        block.add_entry(b"b", b"2");
        let block = Arc::new(block);

        let mut first = block.iter();
        let second = block.iter();
        assert_eq!(first, second);

        first.advance();
        assert_ne!(first, second);
        assert_eq!(first, block.iter_from(b"b"));
    }
}
