//! # Excerpt - The Record Cursor
//!
//! An `Excerpt` is a cursor over one record at a time: it owns a view
//! (`start`/`position`/`limit`) into the mapped byte range of the current
//! record and provides the sequential read/write primitive set on top of
//! it. All field access is zero-copy against the mapped log.
//!
//! ## State Machine
//!
//! ```text
//!                 seek(i) -> true
//!   [unpositioned] ────────────────> [reading record i] ── finish() ──┐
//!        │  ^                                                         │
//!        │  └─────────────────────────────────────────────────────────┘
//!        │
//!        └── start_excerpt(cap) ───> [writing record size()] ─ finish() ─> committed
//! ```
//!
//! `finish()` on a write validates the record, optionally forces it to
//! disk, publishes its end offset and raises the visible count; on a read
//! it is a bounds check only. Either way the cursor releases its view and
//! must be repositioned before further field access.
//!
//! ## Thread Discipline
//!
//! One excerpt is used by exactly one thread at a time. This is asserted
//! (debug builds only, unless the log is flagged multi-threaded) by a
//! last-thread-seen check rather than enforced with a lock; the design
//! assumes external discipline, one cursor per thread, for throughput.
//! Multiple excerpts, at most one writing, may operate concurrently over
//! the same log.
//!
//! ## Zero Allocation
//!
//! The cursor carries its own scratch: a 20-byte digit buffer for integer
//! and decimal text appends and a reusable `String` for UTF-8 reads via the
//! `_into` variants. Neither is ever shared between cursors.

mod append;
mod object;
mod primitives;
mod search;

use std::io;
use std::sync::Arc;
use std::thread::ThreadId;

use eyre::{ensure, eyre, Result};

use crate::log::{RecordLog, RecordRegion, MIN_RECORD_SIZE};

/// One digit more than the longest decimal rendering of an i64, leaving
/// room for a decimal point.
pub(crate) const MAX_NUMBER_LENGTH: usize = 20;

pub struct Excerpt {
    log: Arc<dyn RecordLog>,
    index: i64,
    start: u64,
    position: u64,
    limit: u64,
    region: Option<RecordRegion>,
    for_write: bool,
    cached_size: u64,
    number_buffer: [u8; MAX_NUMBER_LENGTH],
    utf_scratch: String,
    last_thread: Option<ThreadId>,
}

impl Excerpt {
    pub fn new(log: Arc<dyn RecordLog>) -> Self {
        Self {
            log,
            index: -1,
            start: 0,
            position: 0,
            limit: 0,
            region: None,
            for_write: false,
            cached_size: 0,
            number_buffer: [0; MAX_NUMBER_LENGTH],
            utf_scratch: String::new(),
            last_thread: None,
        }
    }

    pub fn log(&self) -> &Arc<dyn RecordLog> {
        &self.log
    }

    /// Logical index of the current record, -1 before the first.
    #[inline]
    pub fn index(&self) -> i64 {
        self.index
    }

    /// Moves to logical record `index` for reading.
    ///
    /// Returns `Ok(false)`, without touching the cursor position, if the
    /// record does not exist yet, or if its committed marker (the first 8
    /// bytes) reads as all zero. The marker check cannot distinguish an
    /// uncommitted record from one whose real payload begins with 8 zero
    /// bytes; `finish` refuses to commit such a record, so within this
    /// format the ambiguity is surfaced at write time.
    ///
    /// `seek(-1)` rewinds to the before-first state and always succeeds.
    pub fn seek(&mut self, index: i64) -> Result<bool> {
        if index == -1 {
            self.for_write = false;
            self.index = -1;
            self.start = 0;
            self.position = 0;
            self.limit = 0;
            self.region = None;
            return Ok(true);
        }
        if index < -1 {
            return Ok(false);
        }

        self.log.barrier().observe();
        let end = self.log.index_data(index + 1);
        if end == 0 {
            return Ok(false);
        }
        let start = self.log.index_data(index);
        ensure!(
            end > start && end - start >= MIN_RECORD_SIZE,
            "corrupt index: record {} spans [{}, {})",
            index,
            start,
            end
        );
        let region = self.log.map_record(start, end)?;

        // SAFETY: the region is at least MIN_RECORD_SIZE (8) bytes long.
        let marker = unsafe { std::ptr::read_unaligned(region.as_ptr() as *const u64) };
        if marker == 0 {
            return Ok(false);
        }

        self.for_write = false;
        self.index = index;
        self.start = start;
        self.position = start;
        self.limit = end;
        self.region = Some(region);
        Ok(true)
    }

    /// `seek(index() + 1)`; the forward-scan convenience.
    pub fn next_index(&mut self) -> Result<bool> {
        self.seek(self.index + 1)
    }

    /// Whether `next_index` would succeed, without moving.
    pub fn has_next_index(&self) -> bool {
        self.log.barrier().observe();
        self.log.index_data(self.index + 2) != 0
    }

    /// Rewinds to the before-first state.
    pub fn to_start(&mut self) -> Result<()> {
        self.seek(-1)?;
        Ok(())
    }

    /// Moves to the last committed record, if any.
    pub fn to_end(&mut self) -> Result<bool> {
        let last = self.size() as i64 - 1;
        self.seek(last)
    }

    /// Enters write mode on a fresh record of at least `capacity` bytes
    /// (minimum [`MIN_RECORD_SIZE`]), appended at index `size()`.
    pub fn start_excerpt(&mut self, capacity: u64) -> Result<()> {
        let capacity = capacity.max(MIN_RECORD_SIZE);
        let start = self.log.start_excerpt(capacity)?;
        let end = start + capacity;
        let region = self.log.map_record(start, end)?;
        self.index = self.log.size() as i64;
        self.start = start;
        self.position = start;
        self.limit = end;
        self.region = Some(region);
        self.for_write = true;
        Ok(())
    }

    /// Commits a written record, or ends a read.
    ///
    /// For a write: validates at least the minimum record length was
    /// covered and the committed marker is non-zero, optionally forces the
    /// bytes to durable media, publishes the end offset, raises the visible
    /// count and releases the barrier. For a read: a bounds check only.
    /// Either way the cursor view is released.
    pub fn finish(&mut self) -> Result<()> {
        if !self.log.multi_threaded() {
            self.check_thread();
        }
        let length = self.check_end_of_buffer()?;
        if self.for_write {
            if self.log.synchronous() {
                self.log.sync_range(self.start, self.start + length)?;
            }
            let end = self.start + length;
            self.log.set_index_data(self.index + 1, end)?;
            self.log.increment_size((self.index + 1) as u64);
            self.log.barrier().publish();
        }
        self.region = None;
        Ok(())
    }

    /// Whether the cursor has released its record view.
    pub fn is_finished(&self) -> bool {
        self.region.is_none()
    }

    /// Live committed record count: re-reads the barrier, then probes the
    /// index forward from the cached high-water mark. O(records appended
    /// since the last call), tolerating concurrent appends.
    pub fn size(&mut self) -> u64 {
        self.log.barrier().observe();
        let mut size = self.cached_size;
        while self.log.index_data(size as i64 + 1) != 0 {
            size += 1;
        }
        self.cached_size = size;
        size
    }

    /// Read/write offset within the current record.
    #[inline]
    pub fn position(&self) -> usize {
        (self.position - self.start) as usize
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        ensure!(
            position <= self.capacity(),
            "position {} out of bounds (capacity {})",
            position,
            self.capacity()
        );
        self.position = self.start + position as u64;
        Ok(())
    }

    /// Total length of the current record in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        (self.limit - self.start) as usize
    }

    /// Bytes left between the position and the record end.
    #[inline]
    pub fn remaining(&self) -> usize {
        (self.limit - self.position) as usize
    }

    /// Advances past `n` bytes without reading them; clamps at the record
    /// end and returns how many were skipped.
    pub fn skip_bytes(&mut self, n: usize) -> usize {
        let n = n.min(self.remaining());
        self.position += n as u64;
        n
    }

    fn check_end_of_buffer(&self) -> Result<u64> {
        ensure!(
            self.region.is_some(),
            "cursor is not positioned on a record"
        );
        let mut length = self.position - self.start;
        if length < MIN_RECORD_SIZE {
            length = MIN_RECORD_SIZE;
        }
        ensure!(
            self.position <= self.limit,
            "capacity allowed: {}, data read/written: {}",
            self.capacity(),
            length
        );
        ensure!(
            self.first_word()? != 0,
            "the first 8 bytes of a record cannot be all zero"
        );
        Ok(length)
    }

    /// The committed marker: first 8 bytes of the record, byte order
    /// irrelevant for the zero test.
    fn first_word(&self) -> Result<u64> {
        let region = self.region()?;
        // SAFETY: every record is at least MIN_RECORD_SIZE (8) bytes.
        Ok(unsafe { std::ptr::read_unaligned(region.as_ptr() as *const u64) })
    }

    fn check_thread(&mut self) {
        #[cfg(debug_assertions)]
        {
            let current = std::thread::current().id();
            match self.last_thread {
                None => self.last_thread = Some(current),
                Some(last) => assert_eq!(
                    last, current,
                    "excerpt used by two threads without multi_threaded mode"
                ),
            }
        }
    }

    #[inline]
    pub(crate) fn region(&self) -> Result<&RecordRegion> {
        self.region
            .as_ref()
            .ok_or_else(|| eyre!("cursor is not positioned on a record"))
    }

    /// Borrows `len` bytes at the position and advances past them.
    pub(crate) fn read_slice(&mut self, len: usize) -> Result<&[u8]> {
        ensure!(
            len <= self.remaining(),
            "read of {} bytes exceeds the {} remaining in the record",
            len,
            self.remaining()
        );
        let offset = (self.position - self.start) as usize;
        let region = self.region()?;
        // SAFETY: offset + len <= capacity by the checks above; the region
        // pointer is valid for the life of the log.
        let slice = unsafe { std::slice::from_raw_parts(region.as_ptr().add(offset), len) };
        self.position += len as u64;
        Ok(slice)
    }

    /// Copies `bytes` to the position and advances past them.
    pub(crate) fn write_slice(&mut self, bytes: &[u8]) -> Result<()> {
        ensure!(
            bytes.len() <= self.remaining(),
            "write of {} bytes exceeds the {} remaining in the record",
            bytes.len(),
            self.remaining()
        );
        let offset = (self.position - self.start) as usize;
        let region = self.region()?;
        // SAFETY: bounds checked above; this cursor is the single writer of
        // the reserved range until finish() publishes it.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), region.as_ptr().add(offset), bytes.len())
        };
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// The unread tail of the record, without advancing.
    pub(crate) fn remaining_slice(&self) -> Result<&[u8]> {
        let offset = (self.position - self.start) as usize;
        let len = self.remaining();
        let region = self.region()?;
        // SAFETY: [position, limit) is inside the region by invariant.
        Ok(unsafe { std::slice::from_raw_parts(region.as_ptr().add(offset), len) })
    }

    /// The unwritten tail of the record, without advancing.
    pub(crate) fn remaining_slice_mut(&mut self) -> Result<&mut [u8]> {
        let offset = (self.position - self.start) as usize;
        let len = self.remaining();
        let region = self.region()?;
        // SAFETY: as for remaining_slice; single-writer discipline makes
        // the mutable view exclusive.
        Ok(unsafe { std::slice::from_raw_parts_mut(region.as_ptr().add(offset), len) })
    }

    #[inline]
    pub(crate) fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.position += n as u64;
    }

    pub(crate) fn take_utf_scratch(&mut self) -> String {
        let mut scratch = std::mem::take(&mut self.utf_scratch);
        scratch.clear();
        scratch
    }

    pub(crate) fn restore_utf_scratch(&mut self, scratch: String) {
        self.utf_scratch = scratch;
    }
}

impl io::Read for Excerpt {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        if n == 0 {
            return Ok(0);
        }
        let slice = self.read_slice(n).map_err(io::Error::other)?;
        buf[..n].copy_from_slice(slice);
        Ok(n)
    }
}

impl io::Write for Excerpt {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(self.remaining());
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "record capacity exhausted",
            ));
        }
        self.write_slice(&buf[..n]).map_err(io::Error::other)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_end_of_buffer().map(|_| ()).map_err(io::Error::other)
    }
}
