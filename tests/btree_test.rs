use std::sync::Arc;

use karst::buffer::BufferPoolManager;
use karst::common::INVALID_PAGE_ID;
use karst::index::{
    BPlusTree, BTreePageRef, DefaultKeyComparator, InternalPageRef, LeafPageRef, Transaction,
};
use karst::storage::disk::DiskManager;
use karst::{PageId, RecordId, SlotId};

use tempfile::NamedTempFile;

type Tree = BPlusTree<DefaultKeyComparator>;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, disk_manager));
    (bpm, temp_file)
}

fn create_tree(bpm: &Arc<BufferPoolManager>, leaf_max: u32, internal_max: u32) -> Tree {
    BPlusTree::new(
        "test_index",
        Arc::clone(bpm),
        DefaultKeyComparator,
        leaf_max,
        internal_max,
    )
}

fn rid(key: u64) -> RecordId {
    RecordId::new(PageId::new(key as u32), SlotId::new(0))
}

enum Node {
    Leaf(Vec<u64>),
    Internal { keys: Vec<u64>, children: Vec<PageId> },
}

/// Recursively verifies order, balance, separator correctness, parent
/// links, and occupancy bounds. Returns (keys in order, height).
fn check_subtree(
    bpm: &Arc<BufferPoolManager>,
    page_id: PageId,
    expected_parent: Option<PageId>,
    is_root: bool,
) -> (Vec<u64>, usize) {
    let node = {
        let guard = bpm.fetch_page_read(page_id).unwrap();
        let header = BTreePageRef::new(guard.data());
        assert_eq!(header.page_id(), page_id, "page id field disagrees");
        assert_eq!(
            header.parent_page_id(),
            expected_parent,
            "parent link broken for {page_id}"
        );
        assert!(header.size() <= header.max_size(), "{page_id} over-full");
        if !is_root {
            assert!(
                header.size() >= header.min_size(),
                "{page_id} under-full: {} < {}",
                header.size(),
                header.min_size()
            );
        }
        if header.is_leaf() {
            let leaf = LeafPageRef::new(guard.data());
            Node::Leaf(leaf.entries().iter().map(|e| e.0).collect())
        } else {
            let internal = InternalPageRef::new(guard.data());
            Node::Internal {
                keys: (1..=internal.size()).map(|i| internal.key_at(i)).collect(),
                children: (0..=internal.size()).map(|i| internal.child_at(i)).collect(),
            }
        }
    };

    match node {
        Node::Leaf(keys) => {
            assert!(
                keys.windows(2).all(|w| w[0] < w[1]),
                "leaf keys out of order"
            );
            (keys, 1)
        }
        Node::Internal { keys, children } => {
            assert!(keys.windows(2).all(|w| w[0] < w[1]));
            let mut all_keys = Vec::new();
            let mut height = None;
            for (i, &child) in children.iter().enumerate() {
                let (child_keys, child_height) = check_subtree(bpm, child, Some(page_id), false);
                match height {
                    None => height = Some(child_height),
                    Some(h) => assert_eq!(h, child_height, "leaves at unequal depth"),
                }
                assert!(!child_keys.is_empty());
                if i >= 1 {
                    assert_eq!(
                        keys[i - 1],
                        child_keys[0],
                        "separator is not the subtree minimum"
                    );
                }
                if let Some(&last) = all_keys.last() {
                    assert!(last < child_keys[0]);
                }
                all_keys.extend(child_keys);
            }
            (all_keys, height.unwrap() + 1)
        }
    }
}

/// Walks the leaf list forward, checking that backward links mirror it.
fn check_leaf_links(bpm: &Arc<BufferPoolManager>, tree: &Tree) {
    let root_id = tree.root_page_id();
    if root_id == INVALID_PAGE_ID {
        return;
    }

    let mut id = root_id;
    loop {
        let guard = bpm.fetch_page_read(id).unwrap();
        if BTreePageRef::new(guard.data()).is_leaf() {
            break;
        }
        id = InternalPageRef::new(guard.data()).child_at(0);
    }

    let mut prev: Option<PageId> = None;
    let mut cursor = Some(id);
    while let Some(page_id) = cursor {
        let guard = bpm.fetch_page_read(page_id).unwrap();
        let leaf = LeafPageRef::new(guard.data());
        assert_eq!(leaf.prev_page_id(), prev, "prev link broken at {page_id}");
        prev = Some(page_id);
        cursor = leaf.next_page_id();
    }
}

/// Full structural check. Returns (keys in order, height) and asserts that
/// the leaf list agrees with the in-order traversal and that no pins leak.
fn check_tree(bpm: &Arc<BufferPoolManager>, tree: &Tree) -> (Vec<u64>, usize) {
    let root_id = tree.root_page_id();
    if root_id == INVALID_PAGE_ID {
        assert_eq!(bpm.pinned_frame_count(), 0, "leaked pins");
        return (Vec::new(), 0);
    }

    let (keys, height) = check_subtree(bpm, root_id, None, true);
    check_leaf_links(bpm, tree);

    let scanned: Vec<u64> = tree.iter().unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(scanned, keys, "leaf list disagrees with tree order");
    assert_eq!(bpm.pinned_frame_count(), 0, "leaked pins");
    (keys, height)
}

#[test]
fn test_single_leaf_lifecycle() {
    let (bpm, _temp) = create_bpm(4);
    let tree = create_tree(&bpm, 4, 3);
    let mut txn = Transaction::new();

    assert!(tree.is_empty());
    assert_eq!(tree.get_value(10).unwrap(), None);

    for key in [10u64, 20, 30] {
        assert!(tree.insert(key, rid(key), &mut txn).unwrap());
    }

    let root_id = tree.root_page_id();
    {
        let guard = bpm.fetch_page_read(root_id).unwrap();
        assert!(BTreePageRef::new(guard.data()).is_leaf(), "root must be the leaf");
    }

    assert!(tree.remove(20, &mut txn).unwrap());
    assert_eq!(tree.get_value(20).unwrap(), None);
    assert_eq!(tree.get_value(10).unwrap(), Some(rid(10)));
    assert_eq!(tree.root_page_id(), root_id, "root unchanged by in-leaf remove");

    assert_eq!(check_tree(&bpm, &tree).0, vec![10, 30]);
}

#[test]
fn test_first_split() {
    let (bpm, _temp) = create_bpm(8);
    let tree = create_tree(&bpm, 4, 3);
    let mut txn = Transaction::new();

    for key in [10u64, 20, 30] {
        tree.insert(key, rid(key), &mut txn).unwrap();
    }
    tree.remove(20, &mut txn).unwrap();
    tree.insert(40, rid(40), &mut txn).unwrap();
    // Fourth entry fills the leaf; the next insert lands post-split
    tree.insert(50, rid(50), &mut txn).unwrap();

    let root_id = tree.root_page_id();
    let (left_id, right_id) = {
        let guard = bpm.fetch_page_read(root_id).unwrap();
        assert!(!BTreePageRef::new(guard.data()).is_leaf());
        let internal = InternalPageRef::new(guard.data());
        assert_eq!(internal.size(), 1);
        assert_eq!(internal.key_at(1), 40);
        (internal.child_at(0), internal.child_at(1))
    };
    {
        let guard = bpm.fetch_page_read(left_id).unwrap();
        let keys: Vec<u64> = LeafPageRef::new(guard.data()).entries().iter().map(|e| e.0).collect();
        assert_eq!(keys, vec![10, 30]);
    }
    {
        let guard = bpm.fetch_page_read(right_id).unwrap();
        let keys: Vec<u64> = LeafPageRef::new(guard.data()).entries().iter().map(|e| e.0).collect();
        assert_eq!(keys, vec![40, 50]);
    }

    assert_eq!(tree.get_value(50).unwrap(), Some(rid(50)));
    assert_eq!(check_tree(&bpm, &tree).0, vec![10, 30, 40, 50]);
}

#[test]
fn test_cascading_split() {
    let (bpm, _temp) = create_bpm(16);
    let tree = create_tree(&bpm, 4, 3);
    let mut txn = Transaction::new();

    for key in 1..=7u64 {
        tree.insert(key, rid(key), &mut txn).unwrap();
        check_tree(&bpm, &tree);
    }
    assert_eq!(check_tree(&bpm, &tree).1, 2, "two levels before the root split");

    // The eighth insert splits a leaf and overflows the root internal
    tree.insert(8, rid(8), &mut txn).unwrap();
    let (keys, height) = check_tree(&bpm, &tree);
    assert_eq!(height, 3, "root split adds a level");
    assert_eq!(keys, (1..=8).collect::<Vec<u64>>());

    for key in 9..=10u64 {
        tree.insert(key, rid(key), &mut txn).unwrap();
    }
    let (keys, height) = check_tree(&bpm, &tree);
    assert_eq!(height, 3);
    assert_eq!(keys, (1..=10).collect::<Vec<u64>>());

    for key in 1..=10u64 {
        assert_eq!(tree.get_value(key).unwrap(), Some(rid(key)));
    }
}

#[test]
fn test_steal_then_merge_then_collapse() {
    let (bpm, _temp) = create_bpm(16);
    let tree = create_tree(&bpm, 4, 3);
    let mut txn = Transaction::new();

    // Leaves {1,2} and {3,4,5} under a one-key root
    for key in 1..=5u64 {
        tree.insert(key, rid(key), &mut txn).unwrap();
    }
    check_tree(&bpm, &tree);

    // Removing 1 under-fills the left leaf; its right sibling can spare an
    // entry, so the leaf steals and the separator moves to 4.
    assert!(tree.remove(1, &mut txn).unwrap());
    {
        let guard = bpm.fetch_page_read(tree.root_page_id()).unwrap();
        let internal = InternalPageRef::new(guard.data());
        assert_eq!(internal.size(), 1);
        assert_eq!(internal.key_at(1), 4, "separator follows the stolen entry");
    }
    assert_eq!(check_tree(&bpm, &tree).0, vec![2, 3, 4, 5]);

    // Removing 2 forces a merge; the root loses its last separator and the
    // merged leaf is promoted.
    let free_before = bpm.free_frame_count();
    let old_root = tree.root_page_id();
    assert!(tree.remove(2, &mut txn).unwrap());

    let new_root = tree.root_page_id();
    assert_ne!(new_root, old_root);
    {
        let guard = bpm.fetch_page_read(new_root).unwrap();
        assert!(BTreePageRef::new(guard.data()).is_leaf(), "root collapsed to the leaf");
    }
    // The absorbed leaf and the old root both went back to the free list
    assert_eq!(bpm.free_frame_count(), free_before + 2);
    assert_eq!(check_tree(&bpm, &tree).0, vec![3, 4, 5]);
}

#[test]
fn test_remove_cascade_to_root_collapse() {
    let (bpm, _temp) = create_bpm(16);
    let tree = create_tree(&bpm, 4, 3);
    let mut txn = Transaction::new();

    for key in 1..=10u64 {
        tree.insert(key, rid(key), &mut txn).unwrap();
    }
    assert_eq!(check_tree(&bpm, &tree).1, 3);

    for key in (4..=10u64).rev() {
        assert!(tree.remove(key, &mut txn).unwrap());
        let (keys, _) = check_tree(&bpm, &tree);
        assert_eq!(keys, (1..key).collect::<Vec<u64>>());
    }

    // Three keys fit in a single leaf again
    let root_id = tree.root_page_id();
    {
        let guard = bpm.fetch_page_read(root_id).unwrap();
        assert!(BTreePageRef::new(guard.data()).is_leaf());
    }
    assert_eq!(check_tree(&bpm, &tree).0, vec![1, 2, 3]);
}

#[test]
fn test_duplicate_insert_does_not_overwrite() {
    let (bpm, _temp) = create_bpm(8);
    let tree = create_tree(&bpm, 4, 3);
    let mut txn = Transaction::new();

    assert!(tree.insert(5, rid(5), &mut txn).unwrap());
    assert!(!tree.insert(5, rid(99), &mut txn).unwrap());
    assert_eq!(tree.get_value(5).unwrap(), Some(rid(5)));
    check_tree(&bpm, &tree);
}

#[test]
fn test_remove_absent_key() {
    let (bpm, _temp) = create_bpm(8);
    let tree = create_tree(&bpm, 4, 3);
    let mut txn = Transaction::new();

    // Empty tree
    assert!(!tree.remove(1, &mut txn).unwrap());

    tree.insert(1, rid(1), &mut txn).unwrap();
    assert!(!tree.remove(2, &mut txn).unwrap());
    assert_eq!(tree.get_value(1).unwrap(), Some(rid(1)));
    check_tree(&bpm, &tree);
}

#[test]
fn test_remove_until_empty_then_reuse() {
    let (bpm, _temp) = create_bpm(16);
    let tree = create_tree(&bpm, 4, 3);
    let mut txn = Transaction::new();

    for key in 1..=8u64 {
        tree.insert(key, rid(key), &mut txn).unwrap();
    }
    for key in 1..=8u64 {
        assert!(tree.remove(key, &mut txn).unwrap());
        check_tree(&bpm, &tree);
    }

    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);
    assert_eq!(tree.get_value(4).unwrap(), None);
    assert_eq!(tree.iter().unwrap().count(), 0);

    // The tree starts over cleanly
    assert!(tree.insert(42, rid(42), &mut txn).unwrap());
    assert_eq!(check_tree(&bpm, &tree).0, vec![42]);
}

#[test]
fn test_iterator_positions() {
    let (bpm, _temp) = create_bpm(32);
    let tree = create_tree(&bpm, 4, 3);
    let mut txn = Transaction::new();

    for key in (2..=40u64).step_by(2) {
        tree.insert(key, rid(key), &mut txn).unwrap();
    }

    let all: Vec<u64> = tree.iter().unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(all, (2..=40).step_by(2).collect::<Vec<u64>>());

    // Present key starts on itself
    let from_present: Vec<u64> = tree.iter_from(8).unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(from_present.first(), Some(&8));

    // Absent key starts on its successor
    let from_absent: Vec<u64> = tree.iter_from(9).unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(from_absent.first(), Some(&10));

    // Past the end yields nothing
    assert_eq!(tree.iter_from(100).unwrap().count(), 0);

    assert_eq!(bpm.pinned_frame_count(), 0);
}

#[test]
fn test_range_scan() {
    let (bpm, _temp) = create_bpm(32);
    let tree = create_tree(&bpm, 4, 3);
    let mut txn = Transaction::new();

    for key in 0..100u64 {
        tree.insert(key * 10, rid(key), &mut txn).unwrap();
    }

    let results = tree.range_scan(200, 500).unwrap();
    assert_eq!(results.len(), 31);
    for (i, (key, _)) in results.iter().enumerate() {
        assert_eq!(*key, 200 + (i as u64) * 10);
    }

    assert_eq!(tree.range_scan(1001, 2000).unwrap().len(), 0);
    assert_eq!(bpm.pinned_frame_count(), 0);
}

#[test]
fn test_flush_then_reload() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
        let tree = create_tree(&bpm, 4, 3);
        let mut txn = Transaction::new();

        for key in 1..=50u64 {
            tree.insert(key, rid(key), &mut txn).unwrap();
        }
        bpm.flush_all_pages().unwrap();
    }

    // A fresh pool over the same device sees identical contents; the root
    // comes back from the header page.
    let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
    let tree = BPlusTree::open(
        "test_index",
        Arc::clone(&bpm),
        DefaultKeyComparator,
        4,
        3,
    )
    .unwrap();

    for key in 1..=50u64 {
        assert_eq!(tree.get_value(key).unwrap(), Some(rid(key)));
    }
    assert_eq!(check_tree(&bpm, &tree).0, (1..=50).collect::<Vec<u64>>());
}

#[test]
fn test_reverse_order_insert() {
    let (bpm, _temp) = create_bpm(32);
    let tree = create_tree(&bpm, 4, 3);
    let mut txn = Transaction::new();

    for key in (1..=64u64).rev() {
        tree.insert(key, rid(key), &mut txn).unwrap();
    }

    assert_eq!(check_tree(&bpm, &tree).0, (1..=64).collect::<Vec<u64>>());
    for key in 1..=64u64 {
        assert_eq!(tree.get_value(key).unwrap(), Some(rid(key)));
    }
}

#[test]
fn test_random_workload() {
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    let mut rng = rand::rngs::StdRng::seed_from_u64(0xBEEF);
    let (bpm, _temp) = create_bpm(64);
    let tree = create_tree(&bpm, 6, 5);
    let mut txn = Transaction::new();

    let mut keys: Vec<u64> = (0..400).map(|i| i * 3 + 1).collect();
    keys.shuffle(&mut rng);
    for &key in &keys {
        assert!(tree.insert(key, rid(key), &mut txn).unwrap());
    }
    check_tree(&bpm, &tree);

    let (removed, kept) = keys.split_at(200);
    let mut removed = removed.to_vec();
    removed.shuffle(&mut rng);
    for &key in &removed {
        assert!(tree.remove(key, &mut txn).unwrap(), "failed to remove {key}");
    }

    let (contents, _) = check_tree(&bpm, &tree);
    let mut expected: Vec<u64> = kept.to_vec();
    expected.sort_unstable();
    assert_eq!(contents, expected);

    for &key in &removed {
        assert_eq!(tree.get_value(key).unwrap(), None);
    }
    for &key in kept {
        assert_eq!(tree.get_value(key).unwrap(), Some(rid(key)));
    }
}
