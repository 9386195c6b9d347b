//! # Index File Header
//!
//! The first 128 bytes of `logbook.index` identify the file and pin the
//! format parameters the log was created with. Index entries start
//! immediately after the header; 128 is a multiple of 8, so entries never
//! straddle an alignment boundary.
//!
//! ```text
//! +------------------+
//! | Header (128B)    |  <- magic, version, chunk bits, byte order
//! +------------------+
//! | Entry 0 (u64)    |  <- start offset of record 0
//! | Entry 1 (u64)    |  <- end of record 0 / start of record 1
//! | ...              |
//! +------------------+
//! ```
//!
//! All multi-byte header fields are little-endian regardless of the
//! configured record byte order; the zerocopy wrapper types handle the
//! conversion.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const INDEX_MAGIC: &[u8; 16] = b"logbook index v1";
pub const CURRENT_VERSION: u32 = 1;

/// Size of the header region at the front of the index file.
pub const HEADER_SIZE: usize = 128;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IndexFileHeader {
    magic: [u8; 16],
    version: U32,
    data_bits: U32,
    index_bits: U32,
    /// 0 = little endian record fields, 1 = big endian.
    byte_order: u8,
    _pad: [u8; 3],
    reserved: [u8; 96],
}

const _: () = assert!(std::mem::size_of::<IndexFileHeader>() == HEADER_SIZE);

impl IndexFileHeader {
    pub fn new(data_bits: u32, index_bits: u32, big_endian: bool) -> Self {
        Self {
            magic: *INDEX_MAGIC,
            version: U32::new(CURRENT_VERSION),
            data_bits: U32::new(data_bits),
            index_bits: U32::new(index_bits),
            byte_order: big_endian as u8,
            _pad: [0; 3],
            reserved: [0; 96],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(bytes.len() >= HEADER_SIZE, "index header truncated");
        // INVARIANT: length checked above; the struct is Unaligned.
        let header = Self::read_from_bytes(&bytes[..HEADER_SIZE]).unwrap();
        ensure!(
            &header.magic == INDEX_MAGIC,
            "not a logbook index file (bad magic)"
        );
        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported index format version {}",
            header.version.get()
        );
        Ok(header)
    }

    #[inline]
    pub fn data_bits(&self) -> u32 {
        self.data_bits.get()
    }

    #[inline]
    pub fn index_bits(&self) -> u32 {
        self.index_bits.get()
    }

    #[inline]
    pub fn big_endian(&self) -> bool {
        self.byte_order != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_bytes() {
        let header = IndexFileHeader::new(27, 22, false);
        let parsed = IndexFileHeader::from_bytes(header.as_bytes()).unwrap();
        assert_eq!(parsed.data_bits(), 27);
        assert_eq!(parsed.index_bits(), 22);
        assert!(!parsed.big_endian());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = IndexFileHeader::new(27, 22, false).as_bytes().to_vec();
        bytes[0] ^= 0xff;
        assert!(IndexFileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn truncated_header_is_rejected() {
        let header = IndexFileHeader::new(27, 22, true);
        assert!(IndexFileHeader::from_bytes(&header.as_bytes()[..64]).is_err());
    }
}
