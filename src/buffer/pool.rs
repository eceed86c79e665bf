use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::guard::{PageGuard, ReadPageGuard, WritePageGuard};
use super::page::{Frame, PageData, PageId, INVALID_PAGE_ID};
use super::replacer::{Replacer, SyncLRUKReplacer};
use super::FrameId;
use crate::error::{Error, Result};
use crate::storage::scheduler::DiskScheduler;
use crate::storage::Storage;

/// Bookkeeping protected by the pool latch: which page sits in which frame,
/// which frames are unused, and the page id allocator.
pub(crate) struct PoolState {
    /// page table for keeping track of buffer pool pages.
    pub(crate) page_table: HashMap<PageId, FrameId>,
    /// list of free frames that don't have any pages on them.
    pub(crate) free_list: Vec<FrameId>,
    /// The next page id to be allocated, monotonically increasing.
    pub(crate) next_page_id: PageId,
}

impl PoolState {
    fn allocate_page(&mut self) -> PageId {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        page_id
    }
}

/// The buffer pool is responsible for moving physical pages back and forth
/// from main memory to disk. It allows a DBMS to support databases that are
/// larger than the amount of memory available to the system.
///
/// The buffer pool's operations are transparent to other parts in the system.
/// For example, the system asks the buffer pool for a page using its unique
/// identifier (page_id) and it does not know whether that page is already in
/// memory or whether the system has to retrieve it from disk.
///
/// Locking discipline: the pool latch orders frame selection and all page
/// table, free list, pin and dirty flag updates. It is released before any
/// disk wait on the new/fetch path; the frame's page lock is what stays held
/// across the transfer and the reset.
pub struct BufferPoolManager {
    pool_size: usize,
    /// array of buffer pool frames. the array index is the FrameId,
    /// i.e., the FrameId is in range: [0, pool_size).
    pub(crate) frames: Vec<Arc<Frame>>,
    /// the pool latch.
    pub(crate) state: Mutex<PoolState>,
    /// Replacer to find unpinned frames for replacement.
    pub(crate) replacer: Arc<dyn Replacer>,
    /// Scheduler for page reads and writes against the storage engine.
    scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(storage: Box<dyn Storage>, pool_size: usize, replacer_k: usize) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Arc::new(Frame::new()));
            // initially, every frame is in the free list
            free_list.push(i);
        }
        let replacer: Arc<dyn Replacer> = Arc::new(SyncLRUKReplacer::new(replacer_k, pool_size));
        let scheduler = DiskScheduler::new(storage);
        let state =
            Mutex::new(PoolState { page_table: HashMap::new(), free_list, next_page_id: 0 });
        BufferPoolManager { pool_size, frames, state, replacer, scheduler }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Create a new page in the buffer pool, return the frame holding it or
    /// an error if all frames are currently in use and not evictable (in
    /// another word, pinned).
    ///
    /// Picks the replacement frame from either the free list or the replacer
    /// (always find from the free list first), then allocates a new page id.
    /// If the replacement frame holds a dirty page, it is written back to
    /// storage first. The frame comes back zeroed, pinned once and dirty, so
    /// the new page reaches storage even if the caller never writes to it.
    pub fn new_page(&self) -> Result<Arc<Frame>> {
        let mut state = self.state.lock();
        let frame_id = match self.pick_frame(&mut state) {
            Some(frame_id) => frame_id,
            None => return Err(Error::BufferPoolNoAvailableFrame),
        };
        let frame = Arc::clone(&self.frames[frame_id]);
        // the frame latch is uncontended: the frame was free or just evicted
        let mut page = frame.page.write();
        let page_id = state.allocate_page();
        if page.id != INVALID_PAGE_ID {
            state.page_table.remove(&page.id);
        }
        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        frame.pin_count.store(1, Ordering::SeqCst);
        drop(state);

        self.write_back(&frame, &mut page)?;
        page.reset();
        page.id = page_id;
        frame.is_dirty.store(true, Ordering::SeqCst);
        drop(page);
        Ok(frame)
    }

    /// Fetch the requested page with the given page id from the buffer pool.
    /// Returns a no available frame error if the page has to come from
    /// storage but all frames are currently in use and not evictable (in
    /// other words, pinned).
    ///
    /// A resident page is pinned and returned without touching its page
    /// lock. Otherwise a replacement frame is picked as in new_page, the old
    /// page is written back if dirty, and the requested page is read in
    /// through the scheduler.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Frame>> {
        if page_id == INVALID_PAGE_ID {
            return Err(Error::value("fetch of the invalid page id"));
        }
        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = Arc::clone(&self.frames[frame_id]);
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(frame);
        }

        let frame_id = match self.pick_frame(&mut state) {
            Some(frame_id) => frame_id,
            None => return Err(Error::BufferPoolNoAvailableFrame),
        };
        let frame = Arc::clone(&self.frames[frame_id]);
        let mut page = frame.page.write();
        if page.id != INVALID_PAGE_ID {
            state.page_table.remove(&page.id);
        }
        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        frame.pin_count.store(1, Ordering::SeqCst);
        drop(state);

        self.write_back(&frame, &mut page)?;
        let data = self.scheduler.read(page_id)?;
        page.reset();
        page.id = page_id;
        page.data.copy_from_slice(&data);
        frame.is_dirty.store(false, Ordering::SeqCst);
        drop(page);
        Ok(frame)
    }

    /// Unpin the target page from the buffer pool. If page_id is not in the
    /// buffer pool or its pin count is already 0, return false.
    ///
    /// Decrement the pin count of a page. If the pin count reaches 0, the
    /// frame becomes evictable by the replacer. The dirty flag is or-ed with
    /// is_dirty, a single clean unpin cannot hide an earlier modification.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.state.lock();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count.load(Ordering::SeqCst) == 0 {
            return false;
        }
        let remaining = frame.pin_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if is_dirty {
            frame.is_dirty.store(true, Ordering::SeqCst);
        }
        if remaining == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Flush the target page to storage regardless of the dirty flag, and
    /// unset the dirty flag afterwards. Pin counts are left alone.
    ///
    /// Return false if the page cannot be found in the page table, true
    /// otherwise.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let state = self.state.lock();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(false),
        };
        let frame = &self.frames[frame_id];
        let page = frame.page.read();
        self.scheduler.write(page_id, page.data.clone())?;
        frame.is_dirty.store(false, Ordering::SeqCst);
        Ok(true)
    }

    /// Flush all the pages in the buffer pool to storage.
    pub fn flush_all_pages(&self) -> Result<()> {
        let state = self.state.lock();
        for (&page_id, &frame_id) in state.page_table.iter() {
            let frame = &self.frames[frame_id];
            let page = frame.page.read();
            self.scheduler.write(page_id, page.data.clone())?;
            frame.is_dirty.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Delete a page from the buffer pool. If the page is not resident or is
    /// pinned, return false without touching anything.
    ///
    /// The frame is zeroed, dropped from the page table and the replacer,
    /// and put back on the free list.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(false),
        };
        let frame = Arc::clone(&self.frames[frame_id]);
        if frame.pin_count.load(Ordering::SeqCst) > 0 {
            return Ok(false);
        }
        debug_assert!(self.replacer.is_evictable(frame_id));
        let mut page = frame.page.write();
        state.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        state.free_list.push(frame_id);
        page.reset();
        frame.is_dirty.store(false, Ordering::SeqCst);
        self.deallocate_page(page_id);
        Ok(true)
    }

    /// Create a new page and wrap its pin in a guard.
    pub fn new_page_guarded(&self) -> Result<PageGuard<'_>> {
        let frame = self.new_page()?;
        let page_id = frame.page.read().id;
        Ok(PageGuard::new(self, Arc::clone(&frame.page), page_id))
    }

    /// Fetch a page and wrap its pin in a guard.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PageGuard::new(self, Arc::clone(&frame.page), page_id))
    }

    /// Fetch a page and take its latch in read mode.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_read())
    }

    /// Fetch a page and take its latch in write mode.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_write())
    }

    /// Always prefer the free list before asking the replacer for a victim.
    fn pick_frame(&self, state: &mut PoolState) -> Option<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Some(frame_id);
        }
        self.replacer.evict()
    }

    /// Write the frame's page back to storage if it is dirty. Called with
    /// the frame's page lock held and the pool latch released.
    fn write_back(&self, frame: &Frame, page: &mut PageData) -> Result<()> {
        if page.id == INVALID_PAGE_ID || !frame.is_dirty.load(Ordering::SeqCst) {
            return Ok(());
        }
        debug!("writing back page {} before frame reuse", page.id);
        self.scheduler.write(page.id, page.data.clone())?;
        frame.is_dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// The page id allocator never reuses ids, deallocation is a no-op.
    fn deallocate_page(&self, _page_id: PageId) {}
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::storage::{new_storage, StorageType};

    fn new_pool(pool_size: usize, replacer_k: usize) -> Result<BufferPoolManager> {
        let storage = new_storage(StorageType::Memory)?;
        Ok(BufferPoolManager::new(storage, pool_size, replacer_k))
    }

    fn resident_frame(bpm: &BufferPoolManager, page_id: PageId) -> Option<FrameId> {
        bpm.state.lock().page_table.get(&page_id).copied()
    }

    #[test]
    fn test_buffer_pool_basic() -> Result<()> {
        let buffer_pool_size = 10;
        let bpm = new_pool(buffer_pool_size, 5)?;

        // Scenario: The buffer pool is empty, we should be able to create a new page.
        let frame0 = bpm.new_page()?;
        let page0 = frame0.page.read().id;
        assert_eq!(0, page0);

        // Scenario: Once we have a page, we should be able to read and write the content.
        frame0.page.write().data[..5].copy_from_slice(b"hello");
        assert_eq!(b"hello", &frame0.page.read().data[..5]);

        // Scenario: we should be able to create page until we fill up the buffer pool.
        for _ in 1..buffer_pool_size {
            assert!(bpm.new_page().is_ok());
        }
        // Scenario: Once the buffer pool is full, we should not be able to create any
        // new page.
        for _ in buffer_pool_size..buffer_pool_size * 2 {
            assert_eq!(Err(Error::BufferPoolNoAvailableFrame), bpm.new_page().map(|_| ()));
        }
        // Scenario: After unpinning pages {0, 1, 2, 3, 4} and pinning another 4 new
        // pages, there would still be one buffer frame left for reading page 0.
        for i in 0..5 {
            assert_eq!(true, bpm.unpin_page(i, true));
        }
        for _ in 0..4 {
            assert!(bpm.new_page().is_ok());
        }
        // Scenario: we should be able to fetch the data we wrote a while ago.
        let frame0 = bpm.fetch_page(0)?;
        assert_eq!(b"hello", &frame0.page.read().data[..5]);

        // Scenario: If we unpin page 0 and then make a new page, all the buffer pages
        // should now be pinned. Fetching page 0 again should fail.
        assert_eq!(true, bpm.unpin_page(0, true));
        assert!(bpm.new_page().is_ok());
        assert_eq!(Err(Error::BufferPoolNoAvailableFrame), bpm.fetch_page(0).map(|_| ()));

        Ok(())
    }

    #[test]
    fn test_eviction_takes_unpinned_frame() -> Result<()> {
        let bpm = new_pool(3, 2)?;
        let p0 = bpm.new_page()?.page.read().id;
        let p1 = bpm.new_page()?.page.read().id;
        let p2 = bpm.new_page()?.page.read().id;
        assert_eq!(true, bpm.unpin_page(p0, false));

        // the only evictable frame is the one holding p0, the new page reuses it
        let f0 = resident_frame(&bpm, p0).unwrap();
        let frame3 = bpm.new_page()?;
        let p3 = frame3.page.read().id;
        assert_eq!(None, resident_frame(&bpm, p0));
        assert_eq!(Some(f0), resident_frame(&bpm, p3));

        // everything is pinned again, p1/p2 stay put
        assert!(resident_frame(&bpm, p1).is_some());
        assert!(resident_frame(&bpm, p2).is_some());
        assert_eq!(Err(Error::BufferPoolNoAvailableFrame), bpm.fetch_page(p0).map(|_| ()));
        Ok(())
    }

    #[test]
    fn test_evicted_page_round_trips() -> Result<()> {
        let bpm = new_pool(2, 2)?;
        let frame0 = bpm.new_page()?;
        let p0 = frame0.page.read().id;
        let pattern: Vec<u8> =
            (0..crate::buffer::page::PAGE_SIZE).map(|i| (i % 251) as u8).collect();
        frame0.page.write().data.copy_from_slice(&pattern);
        assert_eq!(true, bpm.unpin_page(p0, true));

        // churn both frames so p0 gets evicted and written back
        for _ in 0..2 {
            let frame = bpm.new_page()?;
            let id = frame.page.read().id;
            assert_eq!(true, bpm.unpin_page(id, false));
        }
        assert_eq!(None, resident_frame(&bpm, p0));

        let frame0 = bpm.fetch_page(p0)?;
        assert_eq!(pattern, frame0.page.read().data);
        Ok(())
    }

    #[test]
    fn test_flush_page_persists_without_dirty_unpin() -> Result<()> {
        let bpm = new_pool(2, 2)?;
        let frame0 = bpm.new_page()?;
        let p0 = frame0.page.read().id;
        frame0.page.write().data[..2].copy_from_slice(b"ok");
        assert_eq!(true, bpm.flush_page(p0)?);
        assert_eq!(false, frame0.is_dirty.load(Ordering::SeqCst));
        // pin state is untouched by the flush
        assert_eq!(1, frame0.pin_count.load(Ordering::SeqCst));

        // a clean unpin and a churn later, the flushed bytes are still there
        assert_eq!(true, bpm.unpin_page(p0, false));
        for _ in 0..2 {
            let frame = bpm.new_page()?;
            let id = frame.page.read().id;
            assert_eq!(true, bpm.unpin_page(id, false));
        }
        let frame0 = bpm.fetch_page(p0)?;
        assert_eq!(b"ok", &frame0.page.read().data[..2]);
        Ok(())
    }

    #[test]
    fn test_unpin_flush_delete_missing_page() -> Result<()> {
        let bpm = new_pool(2, 2)?;
        assert_eq!(false, bpm.unpin_page(99, true));
        assert_eq!(false, bpm.flush_page(99)?);
        assert_eq!(false, bpm.delete_page(99)?);
        Ok(())
    }

    #[test]
    fn test_delete_page() -> Result<()> {
        let bpm = new_pool(2, 2)?;
        let frame0 = bpm.new_page()?;
        let p0 = frame0.page.read().id;

        // a pinned page cannot be deleted
        assert_eq!(false, bpm.delete_page(p0)?);

        assert_eq!(true, bpm.unpin_page(p0, false));
        assert_eq!(true, bpm.delete_page(p0)?);
        assert_eq!(None, resident_frame(&bpm, p0));
        assert_eq!(0, bpm.replacer.size());
        // the frame went back to the free list and is usable again
        {
            let state = bpm.state.lock();
            assert_eq!(2, state.free_list.len() + state.page_table.len());
        }
        assert!(bpm.new_page().is_ok());
        Ok(())
    }

    #[test]
    fn test_unpin_or_with_dirty_flag() -> Result<()> {
        let bpm = new_pool(2, 2)?;
        let frame0 = bpm.new_page()?;
        let p0 = frame0.page.read().id;
        assert_eq!(true, bpm.flush_page(p0)?);
        assert_eq!(false, frame0.is_dirty.load(Ordering::SeqCst));

        // fetch adds a second pin; the clean unpin must not hide the dirty one
        let _again = bpm.fetch_page(p0)?;
        assert_eq!(true, bpm.unpin_page(p0, true));
        assert_eq!(true, bpm.unpin_page(p0, false));
        assert_eq!(true, frame0.is_dirty.load(Ordering::SeqCst));

        // pin count is exhausted now
        assert_eq!(false, bpm.unpin_page(p0, false));
        Ok(())
    }

    /// Random workload over the pool, checking the structural invariants
    /// after every operation: resident pages never exceed the pool size, a
    /// page sits in exactly one frame, and the replacer size matches the
    /// number of unpinned resident pages.
    #[test]
    fn test_random_workload_invariants() -> Result<()> {
        let pool_size = 8;
        let bpm = new_pool(pool_size, 2)?;
        let mut rng = StdRng::seed_from_u64(0xbf);
        // model of pin counts for every page ever created
        let mut pins: HashMap<PageId, u32> = HashMap::new();
        let mut created: Vec<PageId> = vec![];

        for _ in 0..500 {
            match rng.gen_range(0..4) {
                0 => {
                    if let Ok(frame) = bpm.new_page() {
                        let id = frame.page.read().id;
                        pins.insert(id, 1);
                        created.push(id);
                    }
                }
                1 => {
                    if created.is_empty() {
                        continue;
                    }
                    let id = created[rng.gen_range(0..created.len())];
                    if bpm.fetch_page(id).is_ok() {
                        *pins.entry(id).or_insert(0) += 1;
                    }
                }
                2 => {
                    if created.is_empty() {
                        continue;
                    }
                    let id = created[rng.gen_range(0..created.len())];
                    let resident = resident_frame(&bpm, id).is_some();
                    let pinned = pins.get(&id).copied().unwrap_or(0) > 0;
                    let unpinned = bpm.unpin_page(id, rng.gen_bool(0.5));
                    assert_eq!(resident && pinned, unpinned);
                    if unpinned {
                        *pins.get_mut(&id).unwrap() -= 1;
                    }
                }
                _ => {
                    if created.is_empty() {
                        continue;
                    }
                    let id = created[rng.gen_range(0..created.len())];
                    if bpm.delete_page(id)? {
                        pins.remove(&id);
                    }
                }
            }

            let state = bpm.state.lock();
            assert!(state.page_table.len() <= pool_size);
            let frames: HashSet<FrameId> = state.page_table.values().copied().collect();
            assert_eq!(state.page_table.len(), frames.len());
            let unpinned = state
                .page_table
                .keys()
                .filter(|id| pins.get(id).copied().unwrap_or(0) == 0)
                .count();
            drop(state);
            assert_eq!(unpinned, bpm.replacer.size());
        }
        Ok(())
    }
}
