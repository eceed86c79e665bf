use std::sync::mpsc;
use std::thread;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::Storage;
use crate::buffer::page::{PageId, PAGE_SIZE};
use crate::codec::bincodec;
use crate::error::{Error, Result};

/// Storage keys for page images, one entry per page id.
#[derive(Copy, Clone, Serialize, Deserialize)]
enum Key {
    Page(PageId),
}

impl Key {
    fn encode(&self) -> Result<Vec<u8>> {
        bincodec::serialize(self)
    }
}

/// A request for the scheduler worker. The `done` half of a channel pair acts
/// as the completion promise: the worker fulfils it exactly once per request,
/// and the caller blocks on the paired receiver.
pub enum DiskRequest {
    Read { page_id: PageId, done: mpsc::Sender<Result<Vec<u8>>> },
    Write { page_id: PageId, data: Vec<u8>, done: mpsc::Sender<Result<()>> },
}

/// DiskScheduler serialises page reads and writes onto a single background
/// worker thread. Requests on the same channel complete in submission order;
/// nothing is promised across callers beyond per-request completion.
///
/// The buffer pool is the only client. It schedules a request while holding
/// the frame latch of the affected frame, then parks on the promise.
pub struct DiskScheduler {
    tx: Mutex<Option<mpsc::Sender<DiskRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiskScheduler {
    /// Spawn the worker thread. The worker takes sole ownership of the
    /// underlying storage engine and runs until the request channel closes.
    pub fn new(storage: Box<dyn Storage>) -> Self {
        let (tx, rx) = mpsc::channel::<DiskRequest>();
        let worker = thread::spawn(move || Self::run_worker(storage, rx));
        DiskScheduler { tx: Mutex::new(Some(tx)), worker: Mutex::new(Some(worker)) }
    }

    fn run_worker(mut storage: Box<dyn Storage>, rx: mpsc::Receiver<DiskRequest>) {
        while let Ok(request) = rx.recv() {
            match request {
                DiskRequest::Read { page_id, done } => {
                    let _ = done.send(Self::read_page(storage.as_ref(), page_id));
                }
                DiskRequest::Write { page_id, data, done } => {
                    let _ = done.send(Self::write_page(storage.as_mut(), page_id, data));
                }
            }
        }
    }

    fn read_page(storage: &dyn Storage, page_id: PageId) -> Result<Vec<u8>> {
        let key = Key::Page(page_id).encode()?;
        match storage.get(&key)? {
            Some(mut data) => {
                data.resize(PAGE_SIZE, 0);
                Ok(data)
            }
            // a page the store has never seen reads back as zeroes
            None => Ok(vec![0; PAGE_SIZE]),
        }
    }

    fn write_page(storage: &mut dyn Storage, page_id: PageId, data: Vec<u8>) -> Result<()> {
        let key = Key::Page(page_id).encode()?;
        storage.set(&key, data)
    }

    /// Queue a request for the worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        let tx = self.tx.lock();
        match tx.as_ref() {
            Some(tx) => Ok(tx.send(request)?),
            None => Err(Error::internal("disk scheduler is shut down")),
        }
    }

    /// Schedule a read of the given page and wait for its completion.
    pub fn read(&self, page_id: PageId) -> Result<Vec<u8>> {
        let (done, future) = mpsc::channel();
        self.schedule(DiskRequest::Read { page_id, done })?;
        future.recv()?
    }

    /// Schedule a write of the given bytes and wait for its completion.
    pub fn write(&self, page_id: PageId, data: Vec<u8>) -> Result<()> {
        let (done, future) = mpsc::channel();
        self.schedule(DiskRequest::Write { page_id, data, done })?;
        future.recv()?
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // closing the channel lets the worker drain pending requests and exit
        self.tx.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{new_storage, StorageType};

    #[test]
    fn test_unknown_page_reads_zeroed() -> Result<()> {
        let scheduler = DiskScheduler::new(new_storage(StorageType::Memory)?);
        let data = scheduler.read(42)?;
        assert_eq!(PAGE_SIZE, data.len());
        assert!(data.iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn test_write_then_read() -> Result<()> {
        let scheduler = DiskScheduler::new(new_storage(StorageType::Memory)?);
        let mut data = vec![0u8; PAGE_SIZE];
        data[..5].copy_from_slice(b"hello");
        scheduler.write(7, data.clone())?;
        assert_eq!(data, scheduler.read(7)?);
        // other pages are unaffected
        assert!(scheduler.read(8)?.iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn test_requests_complete_in_order() -> Result<()> {
        let scheduler = DiskScheduler::new(new_storage(StorageType::Memory)?);
        for round in 0u8..4 {
            let mut data = vec![0u8; PAGE_SIZE];
            data[0] = round;
            scheduler.write(1, data)?;
        }
        // the last write wins
        assert_eq!(3, scheduler.read(1)?[0]);
        Ok(())
    }
}
