//! Bincodec is binary encoding for rust values. For details, see:
//! https://github.com/bincode-org/bincode
//!
//! By default, the bincode::(de)serialize functions use fixed-length integer
//! encoding, despite DefaultOptions using variable-length encoding. This module
//! provides simple wrappers for these functions that use variable-length
//! encoding and the other defaults.
//!
//! The cursor-based variants exist for page payloads, where several values are
//! laid out back to back in one fixed-size buffer and have to be read and
//! written sequentially.
use std::io::{Read, Write};

use bincode;
use bincode::{DefaultOptions, Options};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let res = DefaultOptions::new().with_big_endian().with_varint_encoding().serialize(value)?;
    Ok(res)
}

pub fn deserialize<'a, T: Deserialize<'a>>(input: &'a [u8]) -> Result<T> {
    let res = DefaultOptions::new().with_big_endian().with_varint_encoding().deserialize(input)?;
    Ok(res)
}

pub fn serialize_into<W: Write, T: Serialize>(writer: W, value: &T) -> Result<()> {
    DefaultOptions::new().with_big_endian().with_varint_encoding().serialize_into(writer, value)?;
    Ok(())
}

pub fn deserialize_from<R: Read, T: DeserializeOwned>(reader: R) -> Result<T> {
    let res =
        DefaultOptions::new().with_big_endian().with_varint_encoding().deserialize_from(reader)?;
    Ok(res)
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Entry<T> {
        key: u64,
        command: T,
    }

    impl<T: Debug + PartialEq> Entry<T> {
        fn new(key: u64, command: T) -> Self {
            Entry { key, command }
        }
    }

    #[test]
    fn test_codec() -> Result<()> {
        let entry = Entry::new(1, "hello");
        let output = serialize(&entry)?;
        let got = deserialize(&output)?;
        assert_eq!(entry, got);
        Ok(())
    }

    #[test]
    fn test_cursor_codec() -> Result<()> {
        // write two values back to back into a fixed buffer, read them back
        let mut buf = vec![0u8; 64];
        let mut cursor: &mut [u8] = &mut buf;
        serialize_into(&mut cursor, &Entry::new(1, 7u32))?;
        serialize_into(&mut cursor, &Entry::new(2, 9u32))?;

        let mut cursor: &[u8] = &buf;
        let first: Entry<u32> = deserialize_from(&mut cursor)?;
        let second: Entry<u32> = deserialize_from(&mut cursor)?;
        assert_eq!(Entry::new(1, 7u32), first);
        assert_eq!(Entry::new(2, 9u32), second);
        Ok(())
    }
}
