use std::collections::BTreeMap;

use super::Storage;
use crate::error::Result;

#[derive(Debug)]
pub struct Memory {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory { data: BTreeMap::new() }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for Memory {
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let key = Vec::from(key);
        self.data.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.data.get(key);
        Ok(value.cloned())
    }

    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.remove(key))
    }
}
