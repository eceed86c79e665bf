use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use super::page::{Page, PageData, PageId, PagePayload};
use super::pool::BufferPoolManager;
use crate::error::Result;

type ReadLatch = ArcRwLockReadGuard<RawRwLock, PageData>;
type WriteLatch = ArcRwLockWriteGuard<RawRwLock, PageData>;

/// A scoped pin on a buffer pool page.
///
/// Dropping the guard releases exactly one pin, carrying the dirty flag the
/// guard accumulated. A guard that has been upgraded is empty and releases
/// nothing; Rust's move semantics rule out a second release.
///
/// The basic guard holds no latch. Its payload accessors take the page lock
/// only for the duration of the call; callers that want the latch held across
/// several accesses upgrade to a read or write guard.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page: Option<Arc<Page>>,
    page_id: PageId,
    is_dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, page: Arc<Page>, page_id: PageId) -> Self {
        PageGuard { bpm, page: Some(page), page_id, is_dirty: false }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Decode the page bytes as a typed page.
    pub fn payload<P: PagePayload>(&self) -> Result<P> {
        let page = self.page.as_ref().expect("page guard already released");
        let data = page.read();
        P::decode(&data.data)
    }

    /// Encode a typed page into the page bytes and mark the pin dirty.
    pub fn set_payload<P: PagePayload>(&mut self, payload: &P) -> Result<()> {
        let page = self.page.as_ref().expect("page guard already released");
        let mut data = page.write();
        payload.encode(&mut data.data)?;
        self.is_dirty = true;
        Ok(())
    }

    /// Acquire the page latch in read mode, transferring the pin into the
    /// returned guard.
    pub fn upgrade_read(mut self) -> ReadPageGuard<'a> {
        let page = self.page.take().expect("page guard already released");
        let latch = page.read_arc();
        let (bpm, page_id, is_dirty) = (self.bpm, self.page_id, self.is_dirty);
        let guard = PageGuard { bpm, page: Some(page), page_id, is_dirty };
        ReadPageGuard { latch, guard }
    }

    /// Acquire the page latch in write mode, transferring the pin into the
    /// returned guard.
    pub fn upgrade_write(mut self) -> WritePageGuard<'a> {
        let page = self.page.take().expect("page guard already released");
        let latch = page.write_arc();
        let (bpm, page_id, is_dirty) = (self.bpm, self.page_id, self.is_dirty);
        let guard = PageGuard { bpm, page: Some(page), page_id, is_dirty };
        WritePageGuard { latch, guard }
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if self.page.take().is_some() {
            self.bpm.unpin_page(self.page_id, self.is_dirty);
        }
    }
}

/// A pin plus the page latch in read mode. The field order matters: the
/// latch is released before the pin.
pub struct ReadPageGuard<'a> {
    latch: ReadLatch,
    guard: PageGuard<'a>,
}

impl ReadPageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch.data
    }

    pub fn payload<P: PagePayload>(&self) -> Result<P> {
        P::decode(&self.latch.data)
    }
}

/// A pin plus the page latch in write mode. Any mutable access marks the
/// pin dirty, so the release propagates the modification to the pool.
pub struct WritePageGuard<'a> {
    latch: WriteLatch,
    guard: PageGuard<'a>,
}

impl WritePageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.guard.is_dirty = true;
        &mut self.latch.data
    }

    pub fn payload<P: PagePayload>(&self) -> Result<P> {
        P::decode(&self.latch.data)
    }

    pub fn set_payload<P: PagePayload>(&mut self, payload: &P) -> Result<()> {
        self.guard.is_dirty = true;
        payload.encode(&mut self.latch.data)
    }
}
