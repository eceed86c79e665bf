use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::bucket::HashBucketPage;
use super::directory::HashDirectoryPage;
use super::header::HashHeaderPage;
use super::{HashFn, KeyComparator, UNSET_PAGE_ID};
use crate::buffer::guard::WritePageGuard;
use crate::buffer::page::PageId;
use crate::buffer::pool::BufferPoolManager;
use crate::error::Result;

/// A disk-resident extendible hash table on top of the buffer pool, laid out
/// as a three-level page hierarchy: one header page fans out to directory
/// pages by the high hash bits, each directory maps the low hash bits to
/// bucket pages and grows or shrinks a power of two at a time.
///
/// Buckets split lazily on overflow and merge with their split image when
/// they drain; the directory doubles only when a splitting bucket already
/// discriminates on every directory bit.
pub struct DiskExtendibleHashTable<K, V, C> {
    name: String,
    bpm: Arc<BufferPoolManager>,
    cmp: C,
    hash_fn: Box<dyn HashFn<K>>,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C> DiskExtendibleHashTable<K, V, C>
where
    K: Serialize + DeserializeOwned + Clone,
    V: Serialize + DeserializeOwned + Clone,
    C: KeyComparator<K>,
{
    /// Create a table with a fresh header page.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        cmp: C,
        hash_fn: Box<dyn HashFn<K>>,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> Result<Self> {
        let header_page_id = {
            let mut header_guard = bpm.new_page_guarded()?.upgrade_write();
            header_guard.set_payload(&HashHeaderPage::new(header_max_depth))?;
            header_guard.page_id()
        };
        Ok(DiskExtendibleHashTable {
            name: name.into(),
            bpm,
            cmp,
            hash_fn,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look a key up, walking header, directory and bucket under read
    /// guards. Each guard is dropped before the next fetch so at most one
    /// page stays pinned at a time.
    pub fn get(&self, key: &K) -> Result<Vec<V>> {
        let hash = self.hash_fn.hash(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let header: HashHeaderPage = header_guard.payload()?;
        let directory_idx = header.hash_to_directory_index(hash);
        let directory_page_id = header.directory_page_id(directory_idx);
        drop(header_guard);
        if directory_page_id == UNSET_PAGE_ID {
            return Ok(vec![]);
        }

        let directory_guard = self.bpm.fetch_page_read(directory_page_id)?;
        let directory: HashDirectoryPage = directory_guard.payload()?;
        let bucket_idx = directory.hash_to_bucket_index(hash);
        let bucket_page_id = directory.bucket_page_id(bucket_idx);
        drop(directory_guard);
        if bucket_page_id == UNSET_PAGE_ID {
            return Ok(vec![]);
        }

        let bucket_guard = self.bpm.fetch_page_read(bucket_page_id)?;
        let bucket: HashBucketPage<K, V> = bucket_guard.payload()?;
        drop(bucket_guard);
        Ok(bucket.lookup(key, &self.cmp).cloned().into_iter().collect())
    }

    /// Insert a key/value pair. Returns false when the key is already
    /// present, or when making room would require growing the directory past
    /// its max depth.
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        let hash = self.hash_fn.hash(&key);

        let mut header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
        let header: HashHeaderPage = header_guard.payload()?;
        let directory_idx = header.hash_to_directory_index(hash);
        let directory_page_id = header.directory_page_id(directory_idx);
        if directory_page_id == UNSET_PAGE_ID {
            return self.insert_to_new_directory(
                &mut header_guard,
                header,
                directory_idx,
                hash,
                key,
                value,
            );
        }
        drop(header_guard);

        let mut directory_guard = self.bpm.fetch_page_write(directory_page_id)?;
        let mut directory: HashDirectoryPage = directory_guard.payload()?;
        let bucket_idx = directory.hash_to_bucket_index(hash);
        if directory.bucket_page_id(bucket_idx) == UNSET_PAGE_ID {
            return self.insert_to_new_bucket(
                &mut directory_guard,
                &mut directory,
                bucket_idx,
                key,
                value,
            );
        }

        let mut directory_changed = false;
        loop {
            let bucket_idx = directory.hash_to_bucket_index(hash);
            let bucket_page_id = directory.bucket_page_id(bucket_idx);
            let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
            let mut bucket: HashBucketPage<K, V> = bucket_guard.payload()?;

            if !bucket.is_full() {
                let inserted = bucket.insert(key.clone(), value.clone(), &self.cmp);
                if inserted {
                    bucket_guard.set_payload(&bucket)?;
                }
                if directory_changed {
                    directory_guard.set_payload(&directory)?;
                }
                return Ok(inserted);
            }

            // the bucket is full; double the directory when the bucket
            // already discriminates on every live bit, then split it
            if directory.local_depth(bucket_idx) == directory.global_depth() {
                if directory.global_depth() >= self.directory_max_depth {
                    if directory_changed {
                        directory_guard.set_payload(&directory)?;
                    }
                    debug!(
                        "hash table {}: directory page {} is at max depth, insert fails",
                        self.name, directory_page_id
                    );
                    return Ok(false);
                }
                directory.incr_global_depth();
            }
            let bucket_idx = directory.hash_to_bucket_index(hash);
            self.split_bucket(&mut directory, bucket_idx, &mut bucket_guard, &mut bucket)?;
            directory_changed = true;
        }
    }

    /// Remove a key. Empty buckets merge with their split image as long as
    /// both sit at the same local depth, and the directory halves while
    /// every bucket allows it.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let hash = self.hash_fn.hash(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let header: HashHeaderPage = header_guard.payload()?;
        let directory_idx = header.hash_to_directory_index(hash);
        let directory_page_id = header.directory_page_id(directory_idx);
        drop(header_guard);
        if directory_page_id == UNSET_PAGE_ID {
            return Ok(false);
        }

        let mut directory_guard = self.bpm.fetch_page_write(directory_page_id)?;
        let mut directory: HashDirectoryPage = directory_guard.payload()?;
        let mut bucket_idx = directory.hash_to_bucket_index(hash);
        let bucket_page_id = directory.bucket_page_id(bucket_idx);
        if bucket_page_id == UNSET_PAGE_ID {
            return Ok(false);
        }

        let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
        let mut bucket: HashBucketPage<K, V> = bucket_guard.payload()?;
        if !bucket.remove(key, &self.cmp) {
            return Ok(false);
        }
        bucket_guard.set_payload(&bucket)?;

        let mut directory_changed = false;
        while bucket.is_empty() {
            let local_depth = directory.local_depth(bucket_idx);
            if local_depth == 0 {
                break;
            }
            let image_idx = directory.split_image_index(bucket_idx);
            if directory.local_depth(image_idx) != local_depth {
                break;
            }

            // merge: every slot of either family repoints to the image
            // bucket one level up
            let empty_page_id = directory.bucket_page_id(bucket_idx);
            let image_page_id = directory.bucket_page_id(image_idx);
            for i in 0..directory.size() {
                let page_id = directory.bucket_page_id(i);
                if page_id == empty_page_id || page_id == image_page_id {
                    directory.set_bucket_page_id(i, image_page_id);
                    directory.decr_local_depth(i);
                }
            }
            directory_changed = true;
            debug!(
                "hash table {}: merged bucket page {} into {} at local depth {}",
                self.name,
                empty_page_id,
                image_page_id,
                local_depth - 1
            );

            drop(bucket_guard);
            self.bpm.delete_page(empty_page_id)?;

            bucket_idx = directory.hash_to_bucket_index(hash);
            bucket_guard = self.bpm.fetch_page_write(directory.bucket_page_id(bucket_idx))?;
            bucket = bucket_guard.payload()?;
        }
        drop(bucket_guard);

        while directory.can_shrink() {
            directory.decr_global_depth();
            directory_changed = true;
        }
        if directory_changed {
            directory_guard.set_payload(&directory)?;
        }
        Ok(true)
    }

    /// First insert under a header slot: materialise the directory page,
    /// then its first bucket. Called with the header write guard held.
    fn insert_to_new_directory(
        &self,
        header_guard: &mut WritePageGuard<'_>,
        mut header: HashHeaderPage,
        directory_idx: usize,
        hash: u32,
        key: K,
        value: V,
    ) -> Result<bool> {
        let mut directory_guard = self.bpm.new_page_guarded()?.upgrade_write();
        let directory_page_id = directory_guard.page_id();
        let mut directory = HashDirectoryPage::new(self.directory_max_depth);
        let bucket_idx = directory.hash_to_bucket_index(hash);
        let inserted =
            self.insert_to_new_bucket(&mut directory_guard, &mut directory, bucket_idx, key, value)?;

        header.set_directory_page_id(directory_idx, directory_page_id);
        header_guard.set_payload(&header)?;
        debug!(
            "hash table {}: created directory page {} for header slot {}",
            self.name, directory_page_id, directory_idx
        );
        Ok(inserted)
    }

    /// Materialise a bucket for a directory slot and insert into it. Called
    /// with the directory write guard held.
    fn insert_to_new_bucket(
        &self,
        directory_guard: &mut WritePageGuard<'_>,
        directory: &mut HashDirectoryPage,
        bucket_idx: usize,
        key: K,
        value: V,
    ) -> Result<bool> {
        let mut bucket_guard = self.bpm.new_page_guarded()?.upgrade_write();
        let bucket_page_id = bucket_guard.page_id();
        let mut bucket = HashBucketPage::new(self.bucket_max_size);
        let inserted = bucket.insert(key, value, &self.cmp);
        bucket_guard.set_payload(&bucket)?;

        directory.set_bucket_page_id(bucket_idx, bucket_page_id);
        directory_guard.set_payload(directory)?;
        Ok(inserted)
    }

    /// Split a full bucket: allocate its sibling page, rehash the entries on
    /// the newly discriminated bit, then repoint every directory slot of the
    /// old family. Entries land on their pages before the directory flips,
    /// a reader of the directory sees either the old or the new mapping,
    /// never a torn one.
    fn split_bucket(
        &self,
        directory: &mut HashDirectoryPage,
        bucket_idx: usize,
        bucket_guard: &mut WritePageGuard<'_>,
        bucket: &mut HashBucketPage<K, V>,
    ) -> Result<()> {
        let old_page_id = directory.bucket_page_id(bucket_idx);
        let new_local_depth = directory.local_depth(bucket_idx) + 1;
        let split_bit = 1u32 << (new_local_depth - 1);

        let mut image_guard = self.bpm.new_page_guarded()?.upgrade_write();
        let image_page_id = image_guard.page_id();
        let mut kept: HashBucketPage<K, V> = HashBucketPage::new(self.bucket_max_size);
        let mut moved: HashBucketPage<K, V> = HashBucketPage::new(self.bucket_max_size);
        for (key, value) in bucket.entries() {
            if self.hash_fn.hash(key) & split_bit != 0 {
                moved.insert(key.clone(), value.clone(), &self.cmp);
            } else {
                kept.insert(key.clone(), value.clone(), &self.cmp);
            }
        }
        *bucket = kept;
        bucket_guard.set_payload(bucket)?;
        image_guard.set_payload(&moved)?;

        for i in 0..directory.size() {
            if directory.bucket_page_id(i) != old_page_id {
                continue;
            }
            if (i as u32) & split_bit != 0 {
                directory.set_bucket_page_id(i, image_page_id);
            }
            directory.set_local_depth(i, new_local_depth as u8);
        }
        debug!(
            "hash table {}: split bucket page {}, sibling {} at local depth {}",
            self.name, old_page_id, image_page_id, new_local_depth
        );
        Ok(())
    }
}
