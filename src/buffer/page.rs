use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

/// Size of a data page in bytes.
pub const PAGE_SIZE: usize = 4096;

pub type PageId = i32;

/// Sentinel for a frame that holds no page.
pub const INVALID_PAGE_ID: PageId = -1;

/// The bytes of a page plus the id of the page currently occupying the frame.
///
/// The buffer always has PAGE_SIZE bytes; callers interpret it as a typed
/// page through the [`PagePayload`] trait. The buffer pool is oblivious to
/// the content.
pub struct PageData {
    pub id: PageId,
    pub data: Vec<u8>,
}

impl PageData {
    pub fn new() -> Self {
        Self { id: INVALID_PAGE_ID, data: vec![0; PAGE_SIZE] }
    }

    /// Zero the buffer and detach the frame from whatever page it held.
    pub fn reset(&mut self) {
        self.id = INVALID_PAGE_ID;
        self.data.fill(0);
    }
}

impl Default for PageData {
    fn default() -> Self {
        Self::new()
    }
}

/// The lock around a page's bytes. It doubles as the frame latch (held by the
/// pool across disk transfers and resets) and as the page's readers-writer
/// latch (held by read/write page guards). Sharing one lock is sound because
/// guards always hold a pin and the replacer never hands out a pinned frame.
pub type Page = RwLock<PageData>;

/// A slot of the buffer pool's page array.
///
/// The pin count and dirty flag live outside the page lock so that pinning a
/// resident page never has to wait for a held read latch. Both are only
/// mutated under the pool's own latch; the atomics make the reads cheap.
pub struct Frame {
    pub pin_count: AtomicU32,
    pub is_dirty: AtomicBool,
    pub page: Arc<Page>,
}

impl Frame {
    pub fn new() -> Self {
        Frame {
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            page: Arc::new(RwLock::new(PageData::new())),
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

/// A typed view over a page's byte buffer. Implementations fix their own byte
/// layout; it must be stable across runs since the buffer is what goes to
/// disk.
pub trait PagePayload: Sized {
    fn decode(buf: &[u8]) -> Result<Self>;
    fn encode(&self, buf: &mut [u8]) -> Result<()>;
}
