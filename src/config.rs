use serde::Deserialize;

use crate::error::Result;
use crate::storage::StorageType;

#[derive(Debug, PartialEq, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
}

/// Knobs for the storage core. The buffer pool takes `pool_size` and
/// `replacer_k`; the hash table takes the three depth/size limits.
#[derive(Debug, PartialEq, Deserialize)]
pub struct Config {
    pub log_level: LogLevel,
    pub storage_type: StorageType,
    pub pool_size: usize,
    pub replacer_k: usize,
    pub header_max_depth: u32,
    pub directory_max_depth: u32,
    pub bucket_max_size: u32,
}

impl Config {
    #[allow(dead_code)]
    fn new(file: &str) -> Result<Config> {
        let mut cfg = config::Config::builder()
            .set_default("storage_type", "Memory")?
            .set_default("log_level", "Debug")?
            .set_default("pool_size", 64)?
            .set_default("replacer_k", 2)?
            .set_default("header_max_depth", 2)?
            .set_default("directory_max_depth", 9)?
            .set_default("bucket_max_size", 64)?;
        if !file.is_empty() {
            cfg = cfg.add_source(config::File::with_name(file))
        }
        cfg = cfg.add_source(config::Environment::with_prefix("OAKDB"));
        Ok(cfg.build()?.try_deserialize()?)
    }
}
