use serde::de::DeserializeOwned;
use serde::Serialize;

use super::KeyComparator;
use crate::buffer::page::PagePayload;
use crate::codec::bincodec;
use crate::error::{Error, Result};

/// The leaf level of an extendible hash table: up to `max_size` entries kept
/// strictly sorted by key, so membership is a binary search.
///
/// Layout: `size: u32`, `max_size: u32`, then `size` bincodec entries back to
/// back. `max_size` caps the entry count, the page size caps the bytes; the
/// caller picks a max size whose worst-case entries fit the page.
pub struct HashBucketPage<K, V> {
    max_size: u32,
    entries: Vec<(K, V)>,
}

impl<K, V> HashBucketPage<K, V> {
    pub fn new(max_size: u32) -> Self {
        assert!(max_size > 0, "bucket max size should be larger than zero");
        HashBucketPage { max_size, entries: Vec::new() }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() as u32 == self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(K, V)] {
        &self.entries
    }

    pub fn entry_at(&self, bucket_idx: usize) -> &(K, V) {
        &self.entries[bucket_idx]
    }

    pub fn key_at(&self, bucket_idx: usize) -> &K {
        &self.entries[bucket_idx].0
    }

    pub fn value_at(&self, bucket_idx: usize) -> &V {
        &self.entries[bucket_idx].1
    }

    /// The lowest index whose key is greater than or equal to the probe,
    /// `size` if every key is smaller.
    pub fn bin_search<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> usize {
        let (mut left, mut right) = (0, self.entries.len());
        while left < right {
            let mid = left + (right - left) / 2;
            if cmp.compare(&self.entries[mid].0, key) == std::cmp::Ordering::Less {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        left
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> Option<&V> {
        let idx = self.bin_search(key, cmp);
        if idx < self.entries.len() && cmp.compare(&self.entries[idx].0, key).is_eq() {
            return Some(&self.entries[idx].1);
        }
        None
    }

    /// Insert keeping the sort order. Fails when the bucket is full or the
    /// key is already present.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: K, value: V, cmp: &C) -> bool {
        if self.is_full() {
            return false;
        }
        let idx = self.bin_search(&key, cmp);
        if idx < self.entries.len() && cmp.compare(&self.entries[idx].0, &key).is_eq() {
            return false;
        }
        self.entries.insert(idx, (key, value));
        true
    }

    /// Remove the entry with the given key, false when absent.
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, cmp: &C) -> bool {
        let idx = self.bin_search(key, cmp);
        if idx < self.entries.len() && cmp.compare(&self.entries[idx].0, key).is_eq() {
            self.entries.remove(idx);
            return true;
        }
        false
    }

    pub fn remove_at(&mut self, bucket_idx: usize) {
        self.entries.remove(bucket_idx);
    }
}

impl<K, V> PagePayload for HashBucketPage<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn decode(buf: &[u8]) -> Result<Self> {
        let size = u32::from_le_bytes(buf[0..4].try_into()?);
        let max_size = u32::from_le_bytes(buf[4..8].try_into()?);
        if max_size == 0 || size > max_size {
            return Err(Error::value(format!(
                "corrupt bucket page, {} entries of max {}",
                size, max_size
            )));
        }
        let mut cursor = &buf[8..];
        let mut entries = Vec::with_capacity(size as usize);
        for _ in 0..size {
            entries.push(bincodec::deserialize_from(&mut cursor)?);
        }
        Ok(HashBucketPage { max_size, entries })
    }

    fn encode(&self, buf: &mut [u8]) -> Result<()> {
        buf[0..4].copy_from_slice(&(self.entries.len() as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.max_size.to_le_bytes());
        let mut cursor = &mut buf[8..];
        for entry in &self.entries {
            bincodec::serialize_into(&mut cursor, entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::OrdComparator;
    use super::*;
    use crate::buffer::page::PAGE_SIZE;

    #[test]
    fn test_insert_keeps_sort_order() {
        let cmp = OrdComparator;
        let mut bucket: HashBucketPage<u32, u32> = HashBucketPage::new(8);
        assert!(bucket.is_empty());

        for key in [5u32, 1, 3, 7, 2] {
            assert_eq!(true, bucket.insert(key, key * 10, &cmp));
        }
        let keys: Vec<u32> = bucket.entries().iter().map(|(k, _)| *k).collect();
        assert_eq!(vec![1, 2, 3, 5, 7], keys);

        // duplicate keys are rejected
        assert_eq!(false, bucket.insert(3, 99, &cmp));
        assert_eq!(Some(&30), bucket.lookup(&3, &cmp));
    }

    #[test]
    fn test_insert_fails_when_full() {
        let cmp = OrdComparator;
        let mut bucket: HashBucketPage<u32, u32> = HashBucketPage::new(2);
        assert_eq!(true, bucket.insert(1, 1, &cmp));
        assert_eq!(true, bucket.insert(2, 2, &cmp));
        assert!(bucket.is_full());
        assert_eq!(false, bucket.insert(3, 3, &cmp));
    }

    #[test]
    fn test_bin_search_bounds() {
        let cmp = OrdComparator;
        let mut bucket: HashBucketPage<u32, u32> = HashBucketPage::new(8);
        for key in [10u32, 20, 30] {
            bucket.insert(key, key, &cmp);
        }
        assert_eq!(0, bucket.bin_search(&5, &cmp));
        assert_eq!(0, bucket.bin_search(&10, &cmp));
        assert_eq!(1, bucket.bin_search(&15, &cmp));
        assert_eq!(2, bucket.bin_search(&30, &cmp));
        assert_eq!(3, bucket.bin_search(&35, &cmp));
    }

    #[test]
    fn test_remove() {
        let cmp = OrdComparator;
        let mut bucket: HashBucketPage<u32, u32> = HashBucketPage::new(4);
        for key in [1u32, 2, 3] {
            bucket.insert(key, key, &cmp);
        }
        assert_eq!(false, bucket.remove(&9, &cmp));
        assert_eq!(true, bucket.remove(&2, &cmp));
        assert_eq!(None, bucket.lookup(&2, &cmp));
        assert_eq!(2, bucket.size());

        bucket.remove_at(0);
        assert_eq!(&3, bucket.key_at(0));
        assert_eq!(&3, bucket.value_at(0));
        assert_eq!(1, bucket.size());
    }

    #[test]
    fn test_codec_round_trip() -> Result<()> {
        let cmp = OrdComparator;
        let mut bucket: HashBucketPage<String, u64> = HashBucketPage::new(4);
        bucket.insert("bob".to_string(), 2, &cmp);
        bucket.insert("alice".to_string(), 1, &cmp);
        bucket.insert("carol".to_string(), 3, &cmp);

        let mut buf = vec![0u8; PAGE_SIZE];
        bucket.encode(&mut buf)?;
        let got: HashBucketPage<String, u64> = HashBucketPage::decode(&buf)?;
        assert_eq!(3, got.size());
        assert_eq!(4, got.max_size());
        assert_eq!(Some(&1), got.lookup(&"alice".to_string(), &cmp));
        assert_eq!(Some(&3), got.lookup(&"carol".to_string(), &cmp));
        assert_eq!(&("alice".to_string(), 1), got.entry_at(0));
        Ok(())
    }
}
