use crate::buffer::WritePageGuard;
use crate::common::PageId;

/// Per-operation context threaded through tree writes.
///
/// Holds the set of pages the operation currently has latched (ancestors
/// kept during crabbing) and the pages it has unlinked from the tree, which
/// are deleted once every guard is dropped.
#[derive(Default)]
pub struct Transaction {
    page_set: Vec<WritePageGuard>,
    deleted_page_set: Vec<PageId>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn page_set_mut(&mut self) -> &mut Vec<WritePageGuard> {
        &mut self.page_set
    }

    /// Drops every held guard, unpinning the pages.
    pub(crate) fn release_page_set(&mut self) {
        self.page_set.clear();
    }

    pub(crate) fn defer_delete(&mut self, page_id: PageId) {
        self.deleted_page_set.push(page_id);
    }

    pub(crate) fn take_deleted_pages(&mut self) -> Vec<PageId> {
        std::mem::take(&mut self.deleted_page_set)
    }
}
