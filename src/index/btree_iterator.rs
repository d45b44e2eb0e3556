use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, RecordId, Result};

use super::btree_page::LeafPageRef;
use super::key_comparator::IndexKey;

/// Stateful forward iterator over the leaf list.
///
/// State is just (pool handle, leaf page id, position); each advance
/// re-pins the current leaf with a read guard, so at most one leaf is
/// pinned at a time and never across calls.
pub struct BTreeIterator {
    bpm: Arc<BufferPoolManager>,
    current_page_id: Option<PageId>,
    current_index: usize,
}

impl BTreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, start_page_id: PageId, start_index: usize) -> Self {
        Self {
            bpm,
            current_page_id: Some(start_page_id),
            current_index: start_index,
        }
    }

    pub(crate) fn exhausted(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            current_page_id: None,
            current_index: 0,
        }
    }

    pub fn next(&mut self) -> Result<Option<(IndexKey, RecordId)>> {
        while let Some(page_id) = self.current_page_id {
            let next_page = {
                let guard = self.bpm.fetch_page_read(page_id)?;
                let leaf = LeafPageRef::new(guard.data());

                if self.current_index < leaf.size() {
                    let item = (
                        leaf.key_at(self.current_index),
                        leaf.record_at(self.current_index),
                    );
                    self.current_index += 1;
                    return Ok(Some(item));
                }

                leaf.next_page_id()
            };

            self.current_page_id = next_page;
            self.current_index = 0;
        }

        Ok(None)
    }
}

impl Iterator for BTreeIterator {
    type Item = Result<(IndexKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match BTreeIterator::next(self) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
