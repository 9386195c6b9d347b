//! # Log Configuration Builder
//!
//! Fluent configuration for [`IndexedLog`]. Chunk sizes and byte order are
//! format parameters: they are written into the index header on creation and
//! must not be changed on reopen (leaving them unset on reopen adopts the
//! persisted values). Synchronous and multi-threaded modes are runtime
//! choices and may differ between openings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::Result;

use crate::log::indexed::IndexedLog;
use crate::log::ByteOrder;

#[derive(Debug, Clone)]
pub struct IndexedLogBuilder {
    pub(crate) dir: PathBuf,
    pub(crate) data_bits: Option<u32>,
    pub(crate) index_bits: Option<u32>,
    pub(crate) byte_order: Option<ByteOrder>,
    pub(crate) synchronous: bool,
    pub(crate) multi_threaded: bool,
}

impl IndexedLogBuilder {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            data_bits: None,
            index_bits: None,
            byte_order: None,
            synchronous: false,
            multi_threaded: false,
        }
    }

    /// Data file chunk size as a power of two; also the maximum record
    /// capacity. Defaults to 27 (128 MiB chunks).
    pub fn data_bits(mut self, bits: u32) -> Self {
        self.data_bits = Some(bits);
        self
    }

    /// Index file chunk size as a power of two. Defaults to 22 (4 MiB
    /// chunks, ~524k records each).
    pub fn index_bits(mut self, bits: u32) -> Self {
        self.index_bits = Some(bits);
        self
    }

    /// Endianness of fixed-width record fields. Defaults to the native
    /// order of the machine creating the log.
    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = Some(order);
        self
    }

    /// Force record bytes to durable media on every commit. Defaults to
    /// false.
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Disables the one-thread-per-cursor debug assertion for callers that
    /// hand cursors between threads with their own discipline. Defaults to
    /// false.
    pub fn multi_threaded(mut self, multi_threaded: bool) -> Self {
        self.multi_threaded = multi_threaded;
        self
    }

    pub fn build(self) -> Result<Arc<IndexedLog>> {
        IndexedLog::open(self)
    }
}
