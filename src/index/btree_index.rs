use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, trace};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_page::{
    BTreePageMut, BTreePageRef, InternalPageMut, InternalPageRef, LeafPageMut, LeafPageRef,
    INTERNAL_PAGE_CAPACITY, LEAF_PAGE_CAPACITY,
};
use super::btree_iterator::BTreeIterator;
use super::key_comparator::{IndexKey, KeyComparator};
use super::transaction::Transaction;

/// Exclusive latch on the tree's root pointer, held by writers until the
/// root is known safe.
type RootLatch<'a> = Option<RwLockWriteGuard<'a, PageId>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Insert,
    Remove,
}

/// Result of resolving one level of a remove that left a node under-full.
enum Underflow {
    /// Node is within bounds, nothing propagates
    Done,
    /// Redistributed one entry from a sibling
    Stole,
    /// Merged with a sibling; the named page was unlinked
    Merged { deleted: PageId },
    /// The root is a leaf with no entries left
    RootEmptyLeaf,
    /// The root is an internal page with a single remaining child
    RootCollapsed { child: PageId },
}

/// Clustered B+ tree index over the buffer pool.
///
/// Pages reference each other by ID only; every traversal pins pages
/// through the pool and unpins them when the guard drops. Writers crab
/// down the tree holding ancestor latches in the transaction's page set
/// until the child is known safe; readers release the parent as soon as
/// the child latch is held.
pub struct BPlusTree<C: KeyComparator> {
    /// Name under which the root page ID is registered in the header page
    index_name: String,
    /// Root page ID, INVALID_PAGE_ID while the tree is empty.
    /// The lock doubles as the tree-level root latch.
    root_id: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: u32,
    internal_max_size: u32,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Creates an empty tree. Nothing touches disk until the first insert.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Self {
        assert!((3..=LEAF_PAGE_CAPACITY as u32).contains(&leaf_max_size));
        assert!((3..=INTERNAL_PAGE_CAPACITY as u32).contains(&internal_max_size));
        Self {
            index_name: name.into(),
            root_id: RwLock::new(INVALID_PAGE_ID),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
        }
    }

    /// Opens a tree whose root was previously registered in the header page
    /// under `name`.
    pub fn open(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let name = name.into();
        let root = {
            let guard = bpm.fetch_page_read(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data())
                .get_record(&name)
                .unwrap_or(INVALID_PAGE_ID)
        };

        let mut tree = Self::new(name, bpm, comparator, leaf_max_size, internal_max_size);
        tree.root_id = RwLock::new(root);
        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        *self.root_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_id.read()
    }

    /// Point lookup. Returns None for an absent key or an empty tree.
    pub fn get_value(&self, key: IndexKey) -> Result<Option<RecordId>> {
        let Some(guard) = self.leaf_for_key(key)? else {
            return Ok(None);
        };
        let leaf = LeafPageRef::new(guard.data());
        let (found, pos) = leaf.lower_bound(key, &self.comparator);
        Ok(if found {
            Some(leaf.record_at(pos))
        } else {
            None
        })
    }

    /// Inserts a unique key. Returns false without modifying anything when
    /// the key is already present.
    pub fn insert(&self, key: IndexKey, value: RecordId, txn: &mut Transaction) -> Result<bool> {
        let mut root_latch: RootLatch = Some(self.root_id.write());

        if **root_latch.as_ref().unwrap() == INVALID_PAGE_ID {
            return self.start_new_tree(key, value, &mut root_latch);
        }

        let mut positions = Vec::new();
        let result = self.insert_inner(key, value, txn, &mut root_latch, &mut positions);
        txn.release_page_set();
        result
    }

    /// Removes a key. Returns false without modifying anything when the key
    /// is absent.
    pub fn remove(&self, key: IndexKey, txn: &mut Transaction) -> Result<bool> {
        let mut root_latch: RootLatch = Some(self.root_id.write());

        if **root_latch.as_ref().unwrap() == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut positions = Vec::new();
        let result = self.remove_inner(key, txn, &mut root_latch, &mut positions);
        txn.release_page_set();
        drop(root_latch);

        match result {
            Ok(removed) => {
                // Unlinked pages can only be reclaimed once their guards are
                // gone and the pin counts are back to zero.
                for page_id in txn.take_deleted_pages() {
                    self.bpm.delete_page(page_id)?;
                }
                Ok(removed)
            }
            Err(e) => {
                txn.take_deleted_pages();
                Err(e)
            }
        }
    }

    /// Forward iterator from the smallest key.
    pub fn iter(&self) -> Result<BTreeIterator> {
        match self.first_leaf()? {
            Some(guard) => Ok(BTreeIterator::new(
                Arc::clone(&self.bpm),
                guard.page_id(),
                0,
            )),
            None => Ok(BTreeIterator::exhausted(Arc::clone(&self.bpm))),
        }
    }

    /// Forward iterator from the first entry >= `key`.
    pub fn iter_from(&self, key: IndexKey) -> Result<BTreeIterator> {
        match self.leaf_for_key(key)? {
            Some(guard) => {
                let (_, pos) = LeafPageRef::new(guard.data()).lower_bound(key, &self.comparator);
                let page_id = guard.page_id();
                Ok(BTreeIterator::new(Arc::clone(&self.bpm), page_id, pos))
            }
            None => Ok(BTreeIterator::exhausted(Arc::clone(&self.bpm))),
        }
    }

    /// Collects every entry with start <= key <= end.
    pub fn range_scan(
        &self,
        start: IndexKey,
        end: IndexKey,
    ) -> Result<Vec<(IndexKey, RecordId)>> {
        let mut results = Vec::new();
        let mut iter = self.iter_from(start)?;
        while let Some((key, rid)) = iter.next()? {
            if self.comparator.compare(key, end) == Ordering::Greater {
                break;
            }
            results.push((key, rid));
        }
        Ok(results)
    }

    /* ===== descent ===== */

    /// Read-crabs down to the leaf that may contain `key`. The parent guard
    /// is dropped only after the child guard is held.
    fn leaf_for_key(&self, key: IndexKey) -> Result<Option<ReadPageGuard>> {
        let root_latch = self.root_id.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(root_latch);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                return Ok(Some(guard));
            }
            let (_, child) = InternalPageRef::new(guard.data()).lookup_child(key, &self.comparator);
            let child_guard = self.bpm.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    /// Read-crabs down the leftmost edge to the first leaf.
    fn first_leaf(&self) -> Result<Option<ReadPageGuard>> {
        let root_latch = self.root_id.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(root_latch);

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                return Ok(Some(guard));
            }
            let child = InternalPageRef::new(guard.data()).child_at(0);
            let child_guard = self.bpm.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    /// Write-crabs down to the target leaf, accumulating latched ancestors
    /// in the transaction's page set. Ancestors are released as soon as the
    /// child is safe for `op`; the root latch is released with them.
    ///
    /// For removes the release point is refined so the separator chain stays
    /// latched: a safe child entered through slot 0 keeps the whole held
    /// chain, and one entered through a later slot keeps its immediate
    /// parent.
    fn descend_for_write<'a>(
        &'a self,
        key: IndexKey,
        op: WriteOp,
        txn: &mut Transaction,
        root_latch: &mut RootLatch<'a>,
        positions: &mut Vec<Option<usize>>,
    ) -> Result<()> {
        let mut at = **root_latch.as_ref().unwrap();
        let mut entry_pos: Option<usize> = None;

        loop {
            let guard = self.bpm.fetch_page_write(at)?;
            let is_root = txn.page_set_mut().is_empty();
            let (is_leaf, safe) = {
                let header = BTreePageRef::new(guard.data());
                let safe = match op {
                    WriteOp::Insert => header.size() + 1 < header.max_size(),
                    // The root is exempt from the occupancy floor but pinned
                    // by a possible collapse, so it is never "safe" here.
                    WriteOp::Remove => !is_root && header.size() > header.min_size(),
                };
                (header.is_leaf(), safe)
            };

            if safe {
                *root_latch = None;
                if !is_root {
                    match op {
                        WriteOp::Insert => {
                            txn.release_page_set();
                            positions.clear();
                            entry_pos = None;
                        }
                        WriteOp::Remove => {
                            if let Some(p) = entry_pos {
                                if p > 0 {
                                    let keep_from = txn.page_set_mut().len() - 1;
                                    if keep_from > 0 {
                                        txn.page_set_mut().drain(..keep_from);
                                        positions.drain(..keep_from);
                                        positions[0] = None;
                                    }
                                }
                            }
                        }
                    }
                }
            }

            let next = if is_leaf {
                None
            } else {
                let internal = InternalPageRef::new(guard.data());
                Some(internal.lookup_child(key, &self.comparator))
            };

            positions.push(entry_pos);
            txn.page_set_mut().push(guard);

            match next {
                None => return Ok(()),
                Some((child_index, child_id)) => {
                    entry_pos = Some(child_index);
                    at = child_id;
                }
            }
        }
    }

    /* ===== insert ===== */

    fn start_new_tree<'a>(
        &'a self,
        key: IndexKey,
        value: RecordId,
        root_latch: &mut RootLatch<'a>,
    ) -> Result<bool> {
        let mut guard = self.bpm.new_page()?;
        let root_id = guard.page_id();
        {
            let mut leaf = LeafPageMut::init(guard.data_mut(), root_id, None, self.leaf_max_size);
            leaf.insert_at(0, key, value);
        }
        drop(guard);

        let latch = root_latch.as_mut().expect("root latch held");
        **latch = root_id;
        self.persist_root_id(root_id)?;
        debug!(root = %root_id, "started new tree");
        Ok(true)
    }

    fn insert_inner<'a>(
        &'a self,
        key: IndexKey,
        value: RecordId,
        txn: &mut Transaction,
        root_latch: &mut RootLatch<'a>,
        positions: &mut Vec<Option<usize>>,
    ) -> Result<bool> {
        self.descend_for_write(key, WriteOp::Insert, txn, root_latch, positions)?;

        {
            let path = txn.page_set_mut();
            let leaf_guard = path.last_mut().unwrap();
            let (found, pos) = LeafPageRef::new(leaf_guard.data()).lower_bound(key, &self.comparator);
            if found {
                return Ok(false);
            }
            LeafPageMut::new(leaf_guard.data_mut()).insert_at(pos, key, value);
        }

        // Split cascade: split the deepest held node while it sits at its
        // maximum, pushing the separator into the held parent.
        loop {
            let (needs_split, is_leaf) = {
                let path = txn.page_set_mut();
                let header = BTreePageRef::new(path.last().unwrap().data());
                (header.size() == header.max_size(), header.is_leaf())
            };
            if !needs_split {
                break;
            }

            let (separator, right_guard) = {
                let path = txn.page_set_mut();
                let guard = path.last_mut().unwrap();
                if is_leaf {
                    self.split_leaf(guard)?
                } else {
                    self.split_internal(guard)?
                }
            };

            let len = txn.page_set_mut().len();
            if len == 1 {
                // The split node has no latched parent, so it is the root.
                self.install_new_root(txn, separator, right_guard, root_latch)?;
                break;
            }

            let right_id = right_guard.page_id();
            drop(right_guard);
            {
                let path = txn.page_set_mut();
                let parent_guard = &mut path[len - 2];
                InternalPageMut::new(parent_guard.data_mut()).insert(
                    separator,
                    right_id,
                    &self.comparator,
                );
            }
            txn.page_set_mut().pop();
            positions.pop();
        }

        Ok(true)
    }

    /// Splits a full leaf: entries [max/2, max) move to a fresh right
    /// sibling spliced into the leaf list. Returns the separator (the right
    /// node's first key) and the still-latched right node.
    fn split_leaf(&self, left_guard: &mut WritePageGuard) -> Result<(IndexKey, WritePageGuard)> {
        let mut right_guard = self.bpm.new_page()?;
        let right_id = right_guard.page_id();

        let (separator, old_next, left_id) = {
            let mut left = LeafPageMut::new(left_guard.data_mut());
            let mid = left.max_size() / 2;
            let moved = left.split_off(mid);

            let mut right = LeafPageMut::init(
                right_guard.data_mut(),
                right_id,
                left.parent_page_id(),
                self.leaf_max_size,
            );
            right.append_entries(&moved);

            let old_next = left.next_page_id();
            right.set_next_page_id(old_next);
            right.set_prev_page_id(Some(left.page_id()));
            left.set_next_page_id(Some(right_id));

            (moved[0].0, old_next, left.page_id())
        };

        if let Some(next_id) = old_next {
            let mut next_guard = self.bpm.fetch_page_write(next_id)?;
            LeafPageMut::new(next_guard.data_mut()).set_prev_page_id(Some(right_id));
        }

        trace!(left = %left_id, right = %right_id, "leaf split");
        Ok((separator, right_guard))
    }

    /// Splits a full internal node at mid = max/2 + 1: the key at mid is
    /// promoted, its child becomes the right node's leading child, and the
    /// slots above move across. Moved children are re-parented.
    fn split_internal(&self, left_guard: &mut WritePageGuard) -> Result<(IndexKey, WritePageGuard)> {
        let mut right_guard = self.bpm.new_page()?;
        let right_id = right_guard.page_id();

        let (separator, moved_children, left_id) = {
            let mut left = InternalPageMut::new(left_guard.data_mut());
            let size = left.size();
            let mid = left.max_size() / 2 + 1;
            let separator = left.key_at(mid);

            let mut right = InternalPageMut::init(
                right_guard.data_mut(),
                right_id,
                left.parent_page_id(),
                self.internal_max_size,
            );

            let mut moved = Vec::with_capacity(size - mid + 1);
            right.set_child_at(0, left.child_at(mid));
            moved.push(left.child_at(mid));
            for i in mid + 1..=size {
                right.push_back(left.key_at(i), left.child_at(i));
                moved.push(left.child_at(i));
            }
            left.truncate(mid - 1);

            (separator, moved, left.page_id())
        };

        for child in moved_children {
            self.reassign_parent(child, Some(right_id))?;
        }

        trace!(left = %left_id, right = %right_id, "internal split");
        Ok((separator, right_guard))
    }

    /// Allocates a new internal root over the split halves and persists the
    /// new root ID. The root latch must still be held.
    fn install_new_root<'a>(
        &'a self,
        txn: &mut Transaction,
        separator: IndexKey,
        mut right_guard: WritePageGuard,
        root_latch: &mut RootLatch<'a>,
    ) -> Result<()> {
        let mut root_guard = self.bpm.new_page()?;
        let new_root_id = root_guard.page_id();
        let right_id = right_guard.page_id();

        let left_id = txn.page_set_mut()[0].page_id();
        {
            let mut root = InternalPageMut::init(
                root_guard.data_mut(),
                new_root_id,
                None,
                self.internal_max_size,
            );
            root.set_child_at(0, left_id);
            root.push_back(separator, right_id);
        }
        BTreePageMut::new(txn.page_set_mut()[0].data_mut()).set_parent_page_id(Some(new_root_id));
        BTreePageMut::new(right_guard.data_mut()).set_parent_page_id(Some(new_root_id));
        drop(right_guard);
        drop(root_guard);

        let latch = root_latch
            .as_mut()
            .expect("root split requires the root latch");
        **latch = new_root_id;
        self.persist_root_id(new_root_id)?;
        debug!(root = %new_root_id, "root split");
        Ok(())
    }

    /* ===== remove ===== */

    fn remove_inner<'a>(
        &'a self,
        key: IndexKey,
        txn: &mut Transaction,
        root_latch: &mut RootLatch<'a>,
        positions: &mut Vec<Option<usize>>,
    ) -> Result<bool> {
        self.descend_for_write(key, WriteOp::Remove, txn, root_latch, positions)?;

        let removed_at = {
            let path = txn.page_set_mut();
            let leaf_guard = path.last_mut().unwrap();
            let (found, pos) = LeafPageRef::new(leaf_guard.data()).lower_bound(key, &self.comparator);
            if !found {
                return Ok(false);
            }
            LeafPageMut::new(leaf_guard.data_mut()).remove_at(pos);
            pos
        };

        let leaf_is_root = txn.page_set_mut().len() == 1;
        let need_repair = removed_at == 0 && !leaf_is_root;
        self.resolve_underflow(txn, positions, root_latch, need_repair)?;
        Ok(true)
    }

    /// Walks the held path bottom-up, redistributing or merging under-full
    /// nodes. Sibling operations finish before the root collapse check.
    fn resolve_underflow<'a>(
        &'a self,
        txn: &mut Transaction,
        positions: &mut Vec<Option<usize>>,
        root_latch: &mut RootLatch<'a>,
        need_repair: bool,
    ) -> Result<()> {
        let mut level = txn.page_set_mut().len() - 1;
        let mut repair_pending = need_repair;

        loop {
            // Deeper levels are settled; their guards are no longer needed
            // and must not be held when their pages get re-parented.
            txn.page_set_mut().truncate(level + 1);
            positions.truncate(level + 1);

            let outcome = self.resolve_level(txn, positions, level)?;

            // The first pass settles the leaf; once its final first key is
            // known, rewrite the separator on the left-edge ancestor chain.
            if repair_pending {
                repair_pending = false;
                let leaf_page = txn.page_set_mut()[level].page_id();
                let merged_away =
                    matches!(&outcome, Underflow::Merged { deleted } if *deleted == leaf_page);
                if !merged_away {
                    self.repair_left_edge_separator(txn, positions);
                }
            }

            match outcome {
                Underflow::Done | Underflow::Stole => return Ok(()),
                Underflow::Merged { deleted } => {
                    txn.defer_delete(deleted);
                    level -= 1;
                }
                Underflow::RootEmptyLeaf => {
                    let old_root = txn.page_set_mut()[0].page_id();
                    txn.release_page_set();
                    positions.clear();
                    txn.defer_delete(old_root);

                    let latch = root_latch
                        .as_mut()
                        .expect("root latch must be held to empty the tree");
                    **latch = INVALID_PAGE_ID;
                    self.persist_root_id(INVALID_PAGE_ID)?;
                    debug!(root = %old_root, "tree emptied");
                    return Ok(());
                }
                Underflow::RootCollapsed { child } => {
                    let old_root = txn.page_set_mut()[0].page_id();
                    txn.release_page_set();
                    positions.clear();
                    self.reassign_parent(child, None)?;
                    txn.defer_delete(old_root);

                    let latch = root_latch
                        .as_mut()
                        .expect("root latch must be held for root collapse");
                    **latch = child;
                    self.persist_root_id(child)?;
                    debug!(old_root = %old_root, new_root = %child, "root collapsed");
                    return Ok(());
                }
            }
        }
    }

    /// Handles one level of the held path. `level` is the index of the node
    /// being checked; its parent, when needed, is held at `level - 1`.
    fn resolve_level(
        &self,
        txn: &mut Transaction,
        positions: &[Option<usize>],
        level: usize,
    ) -> Result<Underflow> {
        let path = txn.page_set_mut();

        let (is_leaf, size, min_size, page_id) = {
            let header = BTreePageRef::new(path[level].data());
            (
                header.is_leaf(),
                header.size(),
                header.min_size(),
                header.page_id(),
            )
        };

        if level == 0 {
            // The actual root: exempt from the occupancy floor, but it
            // collapses when nothing separates its children anymore.
            return Ok(if is_leaf {
                if size == 0 {
                    Underflow::RootEmptyLeaf
                } else {
                    Underflow::Done
                }
            } else if size == 0 {
                let child = InternalPageRef::new(path[0].data()).child_at(0);
                Underflow::RootCollapsed { child }
            } else {
                Underflow::Done
            });
        }

        if size >= min_size {
            return Ok(Underflow::Done);
        }

        let pos = positions[level].expect("parent of an under-full node must be latched");

        let (parent_slice, node_slice) = path.split_at_mut(level);
        let parent_guard = parent_slice.last_mut().unwrap();
        let node_guard = &mut node_slice[0];

        let parent_size = InternalPageRef::new(parent_guard.data()).size();
        // Prefer the right sibling; the last child falls back to the left.
        let (steal_from_right, sibling_slot) = if pos < parent_size {
            (true, pos + 1)
        } else {
            (false, pos - 1)
        };
        let sibling_id = InternalPageRef::new(parent_guard.data()).child_at(sibling_slot);
        let mut sibling_guard = self.bpm.fetch_page_write(sibling_id)?;

        if is_leaf {
            let sibling_size = LeafPageRef::new(sibling_guard.data()).size();
            if sibling_size > min_size {
                if steal_from_right {
                    let (key, rid) = LeafPageMut::new(sibling_guard.data_mut()).pop_front();
                    LeafPageMut::new(node_guard.data_mut()).push_back(key, rid);
                    let new_first = LeafPageRef::new(sibling_guard.data()).key_at(0);
                    InternalPageMut::new(parent_guard.data_mut()).set_key_at(pos + 1, new_first);
                } else {
                    let (key, rid) = LeafPageMut::new(sibling_guard.data_mut()).pop_back();
                    LeafPageMut::new(node_guard.data_mut()).push_front(key, rid);
                    InternalPageMut::new(parent_guard.data_mut()).set_key_at(pos, key);
                }
                trace!(node = %page_id, sibling = %sibling_id, "leaf steal");
                return Ok(Underflow::Stole);
            }

            if steal_from_right {
                // Absorb the right sibling into this leaf
                let entries = LeafPageRef::new(sibling_guard.data()).entries();
                let next = LeafPageRef::new(sibling_guard.data()).next_page_id();
                {
                    let mut node = LeafPageMut::new(node_guard.data_mut());
                    node.append_entries(&entries);
                    node.set_next_page_id(next);
                }
                if let Some(next_id) = next {
                    let mut next_guard = self.bpm.fetch_page_write(next_id)?;
                    LeafPageMut::new(next_guard.data_mut()).set_prev_page_id(Some(page_id));
                }
                InternalPageMut::new(parent_guard.data_mut()).remove_at(pos + 1);
                trace!(node = %page_id, sibling = %sibling_id, "leaf merge");
                Ok(Underflow::Merged {
                    deleted: sibling_id,
                })
            } else {
                // Merge this leaf into its left sibling
                let entries = LeafPageRef::new(node_guard.data()).entries();
                let next = LeafPageRef::new(node_guard.data()).next_page_id();
                {
                    let mut left = LeafPageMut::new(sibling_guard.data_mut());
                    left.append_entries(&entries);
                    left.set_next_page_id(next);
                }
                if let Some(next_id) = next {
                    let mut next_guard = self.bpm.fetch_page_write(next_id)?;
                    LeafPageMut::new(next_guard.data_mut()).set_prev_page_id(Some(sibling_id));
                }
                InternalPageMut::new(parent_guard.data_mut()).remove_at(pos);
                trace!(node = %page_id, sibling = %sibling_id, "leaf merge");
                Ok(Underflow::Merged { deleted: page_id })
            }
        } else {
            let sibling_size = InternalPageRef::new(sibling_guard.data()).size();
            if sibling_size > min_size {
                // Rotate one entry through the parent separator
                let moved_child;
                if steal_from_right {
                    let pulled = InternalPageRef::new(parent_guard.data()).key_at(pos + 1);
                    let (sibling_key, sibling_child) =
                        InternalPageMut::new(sibling_guard.data_mut()).pop_front();
                    InternalPageMut::new(node_guard.data_mut()).push_back(pulled, sibling_child);
                    InternalPageMut::new(parent_guard.data_mut()).set_key_at(pos + 1, sibling_key);
                    moved_child = sibling_child;
                } else {
                    let pulled = InternalPageRef::new(parent_guard.data()).key_at(pos);
                    let (sibling_key, sibling_child) =
                        InternalPageMut::new(sibling_guard.data_mut()).pop_back();
                    InternalPageMut::new(node_guard.data_mut()).push_front(pulled, sibling_child);
                    InternalPageMut::new(parent_guard.data_mut()).set_key_at(pos, sibling_key);
                    moved_child = sibling_child;
                }
                self.reassign_parent(moved_child, Some(page_id))?;
                trace!(node = %page_id, sibling = %sibling_id, "internal steal");
                return Ok(Underflow::Stole);
            }

            if steal_from_right {
                // Pull the separator down and absorb the right sibling
                let pulled = InternalPageRef::new(parent_guard.data()).key_at(pos + 1);
                let mut moved = Vec::new();
                {
                    let sibling = InternalPageRef::new(sibling_guard.data());
                    let mut node = InternalPageMut::new(node_guard.data_mut());
                    node.push_back(pulled, sibling.child_at(0));
                    moved.push(sibling.child_at(0));
                    for i in 1..=sibling.size() {
                        node.push_back(sibling.key_at(i), sibling.child_at(i));
                        moved.push(sibling.child_at(i));
                    }
                }
                InternalPageMut::new(parent_guard.data_mut()).remove_at(pos + 1);
                for child in moved {
                    self.reassign_parent(child, Some(page_id))?;
                }
                trace!(node = %page_id, sibling = %sibling_id, "internal merge");
                Ok(Underflow::Merged {
                    deleted: sibling_id,
                })
            } else {
                // Merge this node into its left sibling
                let pulled = InternalPageRef::new(parent_guard.data()).key_at(pos);
                let mut moved = Vec::new();
                {
                    let node = InternalPageRef::new(node_guard.data());
                    let mut left = InternalPageMut::new(sibling_guard.data_mut());
                    left.push_back(pulled, node.child_at(0));
                    moved.push(node.child_at(0));
                    for i in 1..=node.size() {
                        left.push_back(node.key_at(i), node.child_at(i));
                        moved.push(node.child_at(i));
                    }
                }
                InternalPageMut::new(parent_guard.data_mut()).remove_at(pos);
                for child in moved {
                    self.reassign_parent(child, Some(sibling_id))?;
                }
                trace!(node = %page_id, sibling = %sibling_id, "internal merge");
                Ok(Underflow::Merged { deleted: page_id })
            }
        }
    }

    /// After a removal at position 0, the deepest ancestor that holds a
    /// separator for the leaf's subtree must learn the new minimum. Ascend
    /// while the chain runs along slot 0; the terminating ancestor is always
    /// still latched thanks to the remove-side release rule.
    fn repair_left_edge_separator(&self, txn: &mut Transaction, positions: &[Option<usize>]) {
        let path = txn.page_set_mut();
        let leaf_index = path.len() - 1;

        let new_first = {
            let leaf = LeafPageRef::new(path[leaf_index].data());
            if leaf.size() == 0 {
                return;
            }
            leaf.key_at(0)
        };

        let mut level = leaf_index;
        loop {
            match positions[level] {
                Some(p) if p > 0 => {
                    InternalPageMut::new(path[level - 1].data_mut()).set_key_at(p, new_first);
                    return;
                }
                Some(_) if level > 0 => level -= 1,
                _ => return,
            }
        }
    }

    /* ===== shared helpers ===== */

    fn reassign_parent(&self, child: PageId, parent: Option<PageId>) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(child)?;
        BTreePageMut::new(guard.data_mut()).set_parent_page_id(parent);
        Ok(())
    }

    /// Registers the current root under the index name in the header page.
    fn persist_root_id(&self, root_id: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root_id) {
            header.insert_record(&self.index_name, root_id);
        }
        Ok(())
    }
}
