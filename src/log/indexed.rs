//! # IndexedLog - Memory-Mapped Log Store
//!
//! The on-disk [`RecordLog`] implementation: a data file holding raw record
//! bytes and an index file holding one `u64` offset per record, both mapped
//! in fixed-size chunks.
//!
//! ## Chunked Mapping
//!
//! Remapping a grown file invalidates every outstanding pointer into it, and
//! concurrent reader cursors hold live views into records. Instead of
//! growing by remap, both files are mapped in power-of-two chunks
//! (`1 << data_bits` and `1 << index_bits` bytes) that are created on demand
//! and never unmapped. The chunk tables only ever grow, so a
//! [`RecordRegion`] handed to a cursor stays valid for the life of the log.
//!
//! A record never straddles a data chunk boundary: reservation pads the
//! start to the next chunk when the requested capacity would not fit, which
//! caps a record's capacity at the chunk size.
//!
//! ## Index Access
//!
//! Index entries are read and written with per-entry atomic acquire/release
//! operations directly inside the mapped chunk, so the publish handoff is
//! sound on weakly-ordered architectures independent of the commit barrier
//! flag.
//!
//! ## Recovery
//!
//! Opening an existing log scans the index forward for the first zero entry
//! to restore the committed count and the append position. A record that was
//! reserved but never committed before a crash leaves a zero entry, so its
//! bytes are invisible and its reservation is reused.
//!
//! ## Error Handling
//!
//! All fallible operations return `eyre::Result` with the file path and the
//! operation being performed.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::excerpt::Excerpt;
use crate::log::builder::IndexedLogBuilder;
use crate::log::header::{IndexFileHeader, HEADER_SIZE};
use crate::log::{ByteOrder, CommitBarrier, RecordLog, RecordRegion, MIN_RECORD_SIZE};
use crate::marshal::MarshallerRegistry;

pub const DATA_FILE_NAME: &str = "logbook.data";
pub const INDEX_FILE_NAME: &str = "logbook.index";

pub const DEFAULT_DATA_BITS: u32 = 27;
pub const DEFAULT_INDEX_BITS: u32 = 22;

pub struct IndexedLog {
    dir: PathBuf,
    data_file: File,
    index_file: File,
    data_chunks: RwLock<Vec<Arc<MmapMut>>>,
    index_chunks: RwLock<Vec<Arc<MmapMut>>>,
    data_bits: u32,
    index_bits: u32,
    byte_order: ByteOrder,
    synchronous: bool,
    multi_threaded: bool,
    /// Next free byte in the data file. Advanced by the full reserved
    /// capacity at reservation time; a writer that dies before `finish`
    /// wastes its reservation.
    append_position: AtomicU64,
    size: AtomicU64,
    append_lock: Mutex<()>,
    barrier: CommitBarrier,
    marshallers: MarshallerRegistry,
}

impl IndexedLog {
    /// Starts configuring a log rooted at `dir`.
    pub fn builder<P: AsRef<Path>>(dir: P) -> IndexedLogBuilder {
        IndexedLogBuilder::new(dir)
    }

    /// A new cursor over this log.
    pub fn excerpt(self: &Arc<Self>) -> Excerpt {
        Excerpt::new(Arc::clone(self) as Arc<dyn RecordLog>)
    }

    /// Flushes every mapped chunk of both files to durable media.
    pub fn sync(&self) -> Result<()> {
        for chunk in self.data_chunks.read().iter() {
            chunk.flush().wrap_err("failed to flush data chunk")?;
        }
        for chunk in self.index_chunks.read().iter() {
            chunk.flush().wrap_err("failed to flush index chunk")?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn open(config: IndexedLogBuilder) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.dir)
            .wrap_err_with(|| format!("failed to create log directory '{}'", config.dir.display()))?;

        let index_path = config.dir.join(INDEX_FILE_NAME);
        let data_path = config.dir.join(DATA_FILE_NAME);

        let index_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&index_path)
            .wrap_err_with(|| format!("failed to open index file '{}'", index_path.display()))?;
        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&data_path)
            .wrap_err_with(|| format!("failed to open data file '{}'", data_path.display()))?;

        let index_len = index_file
            .metadata()
            .wrap_err("failed to stat index file")?
            .len();

        let fresh = index_len == 0;
        let (data_bits, index_bits, byte_order) = if fresh {
            let data_bits = config.data_bits.unwrap_or(DEFAULT_DATA_BITS);
            let index_bits = config.index_bits.unwrap_or(DEFAULT_INDEX_BITS);
            ensure!(
                (12..=40).contains(&data_bits),
                "data chunk bits {} out of range 12..=40",
                data_bits
            );
            ensure!(
                (12..=30).contains(&index_bits),
                "index chunk bits {} out of range 12..=30",
                index_bits
            );
            let byte_order = config.byte_order.unwrap_or_else(ByteOrder::native);

            let header =
                IndexFileHeader::new(data_bits, index_bits, byte_order == ByteOrder::Big);
            let mut f = &index_file;
            f.seek(SeekFrom::Start(0))
                .and_then(|_| f.write_all(zerocopy::IntoBytes::as_bytes(&header)))
                .wrap_err_with(|| {
                    format!("failed to write index header to '{}'", index_path.display())
                })?;
            index_file
                .set_len(1 << index_bits)
                .wrap_err("failed to size fresh index file")?;
            info!(dir = %config.dir.display(), data_bits, index_bits, "created logbook");
            (data_bits, index_bits, byte_order)
        } else {
            let mut bytes = [0u8; HEADER_SIZE];
            let mut f = &index_file;
            f.seek(SeekFrom::Start(0))
                .and_then(|_| f.read_exact(&mut bytes))
                .wrap_err_with(|| {
                    format!("failed to read index header from '{}'", index_path.display())
                })?;
            let header = IndexFileHeader::from_bytes(&bytes)?;
            let byte_order = if header.big_endian() {
                ByteOrder::Big
            } else {
                ByteOrder::Little
            };
            if let Some(requested) = config.data_bits {
                ensure!(
                    requested == header.data_bits(),
                    "configured data chunk bits {} conflict with existing log ({})",
                    requested,
                    header.data_bits()
                );
            }
            if let Some(requested) = config.index_bits {
                ensure!(
                    requested == header.index_bits(),
                    "configured index chunk bits {} conflict with existing log ({})",
                    requested,
                    header.index_bits()
                );
            }
            if let Some(requested) = config.byte_order {
                ensure!(
                    requested == byte_order,
                    "configured byte order conflicts with existing log"
                );
            }
            (header.data_bits(), header.index_bits(), byte_order)
        };

        let index_chunk_size = 1u64 << index_bits;
        let data_chunk_size = 1u64 << data_bits;
        let index_len = index_file.metadata()?.len();
        let data_len = data_file.metadata()?.len();
        ensure!(
            index_len % index_chunk_size == 0,
            "index file '{}' size {} is not a multiple of chunk size {}",
            index_path.display(),
            index_len,
            index_chunk_size
        );
        ensure!(
            data_len % data_chunk_size == 0,
            "data file '{}' size {} is not a multiple of chunk size {}",
            data_path.display(),
            data_len,
            data_chunk_size
        );

        let log = Self {
            dir: config.dir,
            data_file,
            index_file,
            data_chunks: RwLock::new(Vec::new()),
            index_chunks: RwLock::new(Vec::new()),
            data_bits,
            index_bits,
            byte_order,
            synchronous: config.synchronous,
            multi_threaded: config.multi_threaded,
            append_position: AtomicU64::new(0),
            size: AtomicU64::new(0),
            append_lock: Mutex::new(()),
            barrier: CommitBarrier::new(),
            marshallers: MarshallerRegistry::new(),
        };

        for chunk_no in 0..(index_len / index_chunk_size) as usize {
            ensure_chunk(&log.index_file, &log.index_chunks, log.index_bits, chunk_no)?;
        }
        for chunk_no in 0..(data_len / data_chunk_size) as usize {
            ensure_chunk(&log.data_file, &log.data_chunks, log.data_bits, chunk_no)?;
        }

        log.recover(fresh);
        Ok(Arc::new(log))
    }

    /// Restores the committed count and append position from the index.
    fn recover(&self, fresh: bool) {
        let mut count = 0u64;
        while self.index_data(count as i64 + 1) != 0 {
            count += 1;
        }
        let append = self.index_data(count as i64);
        self.size.store(count, Ordering::Release);
        self.append_position.store(append, Ordering::Release);
        if !fresh {
            info!(
                dir = %self.dir.display(),
                records = count,
                append_position = append,
                "recovered logbook"
            );
        }
    }

    #[inline]
    fn entry_offset(index: u64) -> u64 {
        HEADER_SIZE as u64 + index * 8
    }

    /// The atomic slot for index entry `index`, mapping the chunk on demand
    /// when `grow` is set.
    fn index_entry(&self, index: u64, grow: bool) -> Result<Option<*const AtomicU64>> {
        let offset = Self::entry_offset(index);
        let chunk_size = 1u64 << self.index_bits;
        let chunk_no = (offset >> self.index_bits) as usize;
        let within = (offset & (chunk_size - 1)) as usize;

        let chunk = {
            let chunks = self.index_chunks.read();
            chunks.get(chunk_no).cloned()
        };
        let chunk = match chunk {
            Some(chunk) => chunk,
            None if grow => {
                ensure_chunk(&self.index_file, &self.index_chunks, self.index_bits, chunk_no)?
            }
            None => return Ok(None),
        };

        // SAFETY: `within` is 8-aligned (the header size and every entry
        // stride are multiples of 8, mmaps are page aligned) and
        // `within + 8 <= chunk_size` because entries never straddle a chunk.
        // Treating shared mapped memory as an AtomicU64 is sound: every
        // access to an entry in this process goes through these atomics.
        let ptr = unsafe { chunk.as_ptr().add(within) as *const AtomicU64 };
        Ok(Some(ptr))
    }
}

/// Returns the mapped chunk `chunk_no`, extending the file and mapping any
/// missing chunks up to it.
fn ensure_chunk(
    file: &File,
    chunks: &RwLock<Vec<Arc<MmapMut>>>,
    bits: u32,
    chunk_no: usize,
) -> Result<Arc<MmapMut>> {
    {
        let chunks = chunks.read();
        if let Some(chunk) = chunks.get(chunk_no) {
            return Ok(chunk.clone());
        }
    }

    let chunk_size = 1u64 << bits;
    let mut chunks = chunks.write();
    while chunks.len() <= chunk_no {
        let n = chunks.len() as u64;
        let required = (n + 1) * chunk_size;
        let current = file.metadata().wrap_err("failed to stat log file")?.len();
        if current < required {
            file.set_len(required)
                .wrap_err_with(|| format!("failed to extend log file to {} bytes", required))?;
        }

        // SAFETY: the file region [n * chunk_size, (n + 1) * chunk_size) was
        // just sized above, the mapping is private to this process, and the
        // Arc is pushed into a table that only ever grows, so the mapping
        // outlives every RecordRegion derived from it.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(n * chunk_size)
                .len(chunk_size as usize)
                .map_mut(file)
                .wrap_err_with(|| format!("failed to map chunk {} of log file", n))?
        };
        chunks.push(Arc::new(mmap));
    }
    Ok(chunks[chunk_no].clone())
}

impl RecordLog for IndexedLog {
    fn start_excerpt(&self, capacity: u64) -> Result<u64> {
        let capacity = capacity.max(MIN_RECORD_SIZE);
        let chunk_size = 1u64 << self.data_bits;
        ensure!(
            capacity <= chunk_size,
            "record capacity {} exceeds data chunk size {}",
            capacity,
            chunk_size
        );

        let _guard = self.append_lock.lock();
        let mut start = self.append_position.load(Ordering::Acquire);
        if (start & (chunk_size - 1)) + capacity > chunk_size {
            // Pad to the next chunk so the record never straddles chunks.
            start = (start | (chunk_size - 1)) + 1;
        }

        let size = self.size.load(Ordering::Acquire);
        // Publish the true start of the upcoming record: covers padding and
        // slack left by a previous record that finished short.
        self.set_index_data(size as i64, start)?;
        ensure_chunk(
            &self.data_file,
            &self.data_chunks,
            self.data_bits,
            (start >> self.data_bits) as usize,
        )?;
        self.append_position.store(start + capacity, Ordering::Release);
        debug!(index = size, start, capacity, "reserved record range");
        Ok(start)
    }

    fn index_data(&self, index: i64) -> u64 {
        if index < 0 {
            return 0;
        }
        match self.index_entry(index as u64, false) {
            // SAFETY: index_entry returns a live, aligned, in-bounds slot.
            Ok(Some(entry)) => unsafe { (*entry).load(Ordering::Acquire) },
            _ => 0,
        }
    }

    fn set_index_data(&self, index: i64, offset: u64) -> Result<()> {
        ensure!(index >= 0, "negative index entry {}", index);
        // INVARIANT: with grow set, index_entry maps the chunk on demand.
        let entry = self.index_entry(index as u64, true)?.unwrap();
        // SAFETY: as above; release ordering pairs with the acquire loads in
        // index_data so a published offset seals the record bytes before it.
        unsafe { (*entry).store(offset, Ordering::Release) };
        Ok(())
    }

    fn increment_size(&self, new_count: u64) {
        self.size.fetch_max(new_count, Ordering::AcqRel);
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn synchronous(&self) -> bool {
        self.synchronous
    }

    fn multi_threaded(&self) -> bool {
        self.multi_threaded
    }

    fn map_record(&self, start: u64, end: u64) -> Result<RecordRegion> {
        ensure!(end > start, "empty record range [{}, {})", start, end);
        ensure!(
            end <= self.append_position.load(Ordering::Acquire),
            "record range [{}, {}) extends past the append position",
            start,
            end
        );
        ensure!(
            (end - 1) >> self.data_bits == start >> self.data_bits,
            "record range [{}, {}) straddles a data chunk",
            start,
            end
        );

        let chunk_size = 1u64 << self.data_bits;
        let chunk_no = (start >> self.data_bits) as usize;
        let chunk = ensure_chunk(&self.data_file, &self.data_chunks, self.data_bits, chunk_no)?;

        // SAFETY: the range is inside this chunk (checked above) and the
        // chunk mapping is pinned for the life of the log. The *mut view is
        // exercised only by the single writer that reserved the range;
        // readers get here only after the commit barrier publishes it.
        let ptr = unsafe { chunk.as_ptr().add((start & (chunk_size - 1)) as usize) as *mut u8 };
        Ok(RecordRegion::new(ptr, (end - start) as usize))
    }

    fn sync_range(&self, start: u64, end: u64) -> Result<()> {
        ensure!(end >= start, "invalid sync range [{}, {})", start, end);
        let chunk_size = 1u64 << self.data_bits;
        let chunk_no = (start >> self.data_bits) as usize;
        let chunk = {
            let chunks = self.data_chunks.read();
            chunks
                .get(chunk_no)
                .cloned()
                .ok_or_else(|| eyre::eyre!("sync range [{}, {}) is not mapped", start, end))?
        };
        chunk
            .flush_range((start & (chunk_size - 1)) as usize, (end - start) as usize)
            .wrap_err("failed to force record bytes to disk")
    }

    fn barrier(&self) -> &CommitBarrier {
        &self.barrier
    }

    fn marshallers(&self) -> &MarshallerRegistry {
        &self.marshallers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_log(dir: &Path) -> Arc<IndexedLog> {
        IndexedLog::builder(dir)
            .data_bits(16)
            .index_bits(12)
            .build()
            .unwrap()
    }

    #[test]
    fn create_and_reopen_preserves_config() {
        let dir = tempdir().unwrap();
        {
            let log = small_log(dir.path());
            assert_eq!(log.size(), 0);
        }
        // Reopen without explicit bits; header supplies them.
        let log = IndexedLog::builder(dir.path()).build().unwrap();
        assert_eq!(log.data_bits, 16);
        assert_eq!(log.index_bits, 12);
    }

    #[test]
    fn conflicting_config_is_rejected() {
        let dir = tempdir().unwrap();
        drop(small_log(dir.path()));
        let result = IndexedLog::builder(dir.path()).data_bits(20).build();
        assert!(result.is_err());
    }

    #[test]
    fn reservation_advances_by_full_capacity() {
        let dir = tempdir().unwrap();
        let log = small_log(dir.path());
        let start = log.start_excerpt(100).unwrap();
        assert_eq!(start, 0);
        assert_eq!(log.index_data(0), 0);
        // A second reservation begins after the first's full capacity even
        // though nothing was committed.
        let second = log.start_excerpt(50).unwrap();
        assert_eq!(second, 100);
        assert_eq!(log.index_data(0), 100); // start republished for entry 0
    }

    #[test]
    fn reservation_pads_to_chunk_boundary() {
        let dir = tempdir().unwrap();
        let log = small_log(dir.path());
        let chunk = 1u64 << 16;
        let first = log.start_excerpt(chunk - 10).unwrap();
        assert_eq!(first, 0);
        let second = log.start_excerpt(100).unwrap();
        assert_eq!(second, chunk);
    }

    #[test]
    fn oversized_record_is_rejected() {
        let dir = tempdir().unwrap();
        let log = small_log(dir.path());
        assert!(log.start_excerpt((1 << 16) + 1).is_err());
    }

    #[test]
    fn index_entries_roundtrip_across_chunks() {
        let dir = tempdir().unwrap();
        let log = small_log(dir.path());
        // Entry 1000 lands in the second 4 KiB index chunk.
        log.set_index_data(1000, 0xdead_beef).unwrap();
        assert_eq!(log.index_data(1000), 0xdead_beef);
        assert_eq!(log.index_data(999), 0);
        assert_eq!(log.index_data(-1), 0);
    }

    #[test]
    fn size_only_grows() {
        let dir = tempdir().unwrap();
        let log = small_log(dir.path());
        log.increment_size(3);
        log.increment_size(2);
        assert_eq!(log.size(), 3);
    }
}
