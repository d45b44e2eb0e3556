use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::common::{FrameId, KarstError, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruKReplacer, PageTable, ReadPageGuard, WritePageGuard};

/// Bookkeeping protected by the pool-wide mutex: the page table and the
/// free list together account for every frame.
struct PoolCore {
    page_table: PageTable,
    free_list: VecDeque<FrameId>,
}

/// State shared with page guards so their release callbacks can unpin.
struct PoolState {
    frames: Vec<Arc<FrameHeader>>,
    core: Mutex<PoolCore>,
    replacer: LruKReplacer,
    disk_scheduler: DiskScheduler,
}

impl PoolState {
    /// Unpin path shared by guard callbacks and the public API.
    /// Returns false if the page is not resident or was not pinned.
    fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let core = self.core.lock();
        let Some(frame_id) = core.page_table.find(page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        match frame.unpin() {
            None => false,
            Some(remaining) => {
                if is_dirty {
                    frame.set_dirty(true);
                }
                if remaining == 0 {
                    self.replacer.set_evictable(frame_id, true);
                }
                true
            }
        }
    }
}

/// BufferPoolManager mediates all access to pages on disk. It owns a fixed
/// number of frames, pins pages while they are in use, and evicts with an
/// LRU-K policy when it needs room.
///
/// All bookkeeping serializes on a single pool-wide mutex. The mutex is
/// never held while blocking on a page latch: eviction victims have a pin
/// count of zero (so nobody holds their latch), and the flush paths pin the
/// frame and drop the mutex before touching page data.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Shared state (also reachable from guard release callbacks)
    state: Arc<PoolState>,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, k value for
    /// LRU-K, and disk manager.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            core: Mutex::new(PoolCore {
                page_table: PageTable::new(),
                free_list,
            }),
            replacer: LruKReplacer::new(k, pool_size),
            disk_scheduler: DiskScheduler::new(disk_manager),
        });

        Self { pool_size, state }
    }

    /// Allocates a fresh page and pins it into a frame. The returned write
    /// guard holds the only pin; dropping it unpins the page.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let page_id = self.disk_manager().allocate_page()?;

        let frame_id = {
            let mut core = self.state.core.lock();
            let frame_id = self.acquire_frame(&mut core)?;
            let frame = &self.state.frames[frame_id.as_usize()];

            frame.reset();
            frame.set_page_id(page_id);
            frame.pin();

            core.page_table.insert(page_id, frame_id);
            self.state.replacer.record_access(frame_id);
            self.state.replacer.set_evictable(frame_id, false);
            frame_id
        };

        trace!(page = %page_id, frame = %frame_id, "new page");
        Ok(self.build_write_guard(page_id, frame_id))
    }

    /// Fetches a page for shared access, reading it from disk if it is not
    /// resident. Blocks until the page latch is available.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame_id = self.pin_page(page_id)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let state = Arc::clone(&self.state);

        let guard = unsafe {
            ReadPageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    state.unpin(pid, is_dirty);
                }),
            )
        };
        Ok(guard)
    }

    /// Fetches a page for exclusive access, reading it from disk if it is
    /// not resident. Blocks until the page latch is available.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame_id = self.pin_page(page_id)?;
        Ok(self.build_write_guard(page_id, frame_id))
    }

    /// Decrements a page's pin count, OR-merging the dirty flag. Returns
    /// false if the page is not resident or its pin count is already zero.
    /// Page guards call this on drop; it is public for symmetry and tests.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes a page to disk regardless of its dirty flag and clears the
    /// flag. Returns false if the page is not resident. Pin state is
    /// untouched.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(KarstError::InvalidPageId(page_id));
        }
        self.flush_resident(page_id, false)
    }

    /// Flushes every resident dirty page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids = self.state.core.lock().page_table.page_ids();
        for page_id in page_ids {
            self.flush_resident(page_id, true)?;
        }
        Ok(())
    }

    /// Deletes a page from the pool, returning its frame to the free list.
    /// Returns true when the page is not resident (the id is still
    /// deallocated) and false when the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(KarstError::InvalidPageId(page_id));
        }

        {
            let mut core = self.state.core.lock();
            if let Some(frame_id) = core.page_table.find(page_id) {
                let frame = &self.state.frames[frame_id.as_usize()];
                if frame.pin_count() > 0 {
                    return Ok(false);
                }

                core.page_table.remove(page_id);
                self.state.replacer.remove(frame_id);
                frame.reset();
                core.free_list.push_back(frame_id);
            }
        }

        self.disk_manager().deallocate_page(page_id)?;
        trace!(page = %page_id, "deleted page");
        Ok(true)
    }

    /// Returns the pin count for a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let core = self.state.core.lock();
        core.page_table
            .find(page_id)
            .map(|frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.core.lock().free_list.len()
    }

    /// Number of pages currently resident in the pool.
    pub fn resident_page_count(&self) -> usize {
        self.state.core.lock().page_table.len()
    }

    /// Number of frames with a nonzero pin count. Zero after any balanced
    /// sequence of operations.
    pub fn pinned_frame_count(&self) -> usize {
        self.state
            .frames
            .iter()
            .filter(|frame| frame.pin_count() > 0)
            .count()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.state.disk_scheduler.disk_manager()
    }

    /// Pins a page into a frame, reading it from disk on a miss.
    fn pin_page(&self, page_id: PageId) -> Result<FrameId> {
        if page_id == INVALID_PAGE_ID {
            return Err(KarstError::InvalidPageId(page_id));
        }

        let mut core = self.state.core.lock();

        if let Some(frame_id) = core.page_table.find(page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.record_access(frame_id);
            self.state.replacer.set_evictable(frame_id, false);
            return Ok(frame_id);
        }

        let frame_id = self.acquire_frame(&mut core)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self
            .state
            .disk_scheduler
            .schedule_read_sync(page_id, &mut data)
        {
            core.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();

        core.page_table.insert(page_id, frame_id);
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);

        Ok(frame_id)
    }

    /// Obtains a frame for a new resident page: from the free list if one
    /// is available, otherwise by evicting a victim. Dirty victims are
    /// written back before their frame is reused; if the write-back fails
    /// the victim stays resident and dirty.
    fn acquire_frame(&self, core: &mut PoolCore) -> Result<FrameId> {
        if let Some(frame_id) = core.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.state.replacer.evict() else {
            return Err(KarstError::PoolExhausted);
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            if let Err(e) = self
                .state
                .disk_scheduler
                .schedule_write_sync(old_page_id, &data)
            {
                // Put the victim back; its contents were not persisted.
                self.state.replacer.record_access(frame_id);
                self.state.replacer.set_evictable(frame_id, true);
                return Err(e);
            }
            frame.set_dirty(false);
        }

        trace!(victim = %old_page_id, frame = %frame_id, "evicted page");
        core.page_table.remove(old_page_id);
        frame.reset();

        Ok(frame_id)
    }

    /// Shared flush path. Pins the frame so it cannot be evicted, releases
    /// the core mutex, then copies under the page read latch and writes.
    fn flush_resident(&self, page_id: PageId, only_dirty: bool) -> Result<bool> {
        let frame = {
            let core = self.state.core.lock();
            let Some(frame_id) = core.page_table.find(page_id) else {
                return Ok(false);
            };
            let frame = &self.state.frames[frame_id.as_usize()];
            if only_dirty && !frame.is_dirty() {
                return Ok(true);
            }
            frame.pin();
            self.state.replacer.set_evictable(frame_id, false);
            Arc::clone(frame)
        };

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);

        let result = self.state.disk_scheduler.schedule_write_sync(page_id, &data);
        if result.is_ok() {
            frame.set_dirty(false);
        }
        self.state.unpin(page_id, false);

        result.map(|_| true)
    }

    fn build_write_guard(&self, page_id: PageId, frame_id: FrameId) -> WritePageGuard {
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let state = Arc::clone(&self.state);

        unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    state.unpin(pid, is_dirty);
                }),
            )
        }
    }
}
