mod btree_index;
mod btree_iterator;
mod btree_page;
mod key_comparator;
mod transaction;

pub use btree_index::BPlusTree;
pub use btree_iterator::BTreeIterator;
pub use btree_page::{
    BTreePageMut, BTreePageRef, BTreePageType, InternalPageMut, InternalPageRef, LeafPageMut,
    LeafPageRef, INTERNAL_PAGE_CAPACITY, LEAF_PAGE_CAPACITY,
};
pub use key_comparator::{DefaultKeyComparator, IndexKey, KeyComparator};
pub use transaction::Transaction;
