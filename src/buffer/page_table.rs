use std::collections::HashMap;

use crate::common::{FrameId, PageId};

/// Page table: maps every resident page ID to the frame holding it.
///
/// The buffer pool serializes all access through its core mutex, so the
/// table carries no locking of its own. Point insert/find/remove are all
/// that is needed; no ordered iteration.
#[derive(Default)]
pub struct PageTable {
    map: HashMap<PageId, FrameId>,
}

impl PageTable {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn insert(&mut self, page_id: PageId, frame_id: FrameId) {
        self.map.insert(page_id, frame_id);
    }

    pub fn find(&self, page_id: PageId) -> Option<FrameId> {
        self.map.get(&page_id).copied()
    }

    pub fn remove(&mut self, page_id: PageId) -> Option<FrameId> {
        self.map.remove(&page_id)
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.map.contains_key(&page_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn page_ids(&self) -> Vec<PageId> {
        self.map.keys().copied().collect()
    }
}
