//! # Logbook - Append-Only Memory-Mapped Record Log
//!
//! Logbook is an embedded, append-only binary log with zero-copy cursors.
//! Records are variable-length byte ranges in a memory-mapped data file,
//! located through a memory-mapped offset index. This implementation
//! prioritizes:
//!
//! - **Zero-copy data access**: Cursors read and write directly in the mmap
//! - **Zero allocation on the hot path**: Cursor-owned scratch buffers,
//!   variable-width encodings computed in place
//! - **Lock-free visibility**: A single writer publishes each record to any
//!   number of concurrent readers through a release/acquire handoff, with no
//!   mutex on the read or commit path
//!
//! ## Quick Start
//!
//! ```ignore
//! use logbook::IndexedLog;
//!
//! let log = IndexedLog::builder("./mylog").build()?;
//!
//! let mut writer = log.excerpt();
//! writer.start_excerpt(64)?;
//! writer.write_utf8(Some("hello"))?;
//! writer.write_stop_bit(-300)?;
//! writer.finish()?;
//!
//! let mut reader = log.excerpt();
//! assert!(reader.next_index()?);
//! assert_eq!(reader.read_utf8()?.as_deref(), Some("hello"));
//! assert_eq!(reader.read_stop_bit()?, -300);
//! reader.finish()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │       DataStore (named events)       │
//! ├──────────────────────────────────────┤
//! │  Marshaller Registry (typed fields)  │
//! ├──────────────────────────────────────┤
//! │   Excerpt (cursor + codec + search)  │
//! ├──────────────────────────────────────┤
//! │  RecordLog trait (index + regions)   │
//! ├──────────────────────────────────────┤
//! │ IndexedLog (chunked mmap data+index) │
//! └──────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! log_dir/
//! ├── logbook.data    # Raw record bytes, mapped in fixed-size chunks
//! └── logbook.index   # 128-byte header + one u64 end offset per record
//! ```
//!
//! ## Concurrency Model
//!
//! One `Excerpt` is used by exactly one thread at a time (asserted in debug
//! builds). Many excerpts, at most one writing, may operate over the same
//! log concurrently. Nothing blocks: navigating to a record that has not
//! been written yet returns `false` immediately.
//!
//! ## Module Overview
//!
//! - [`encoding`]: Stateless codecs: stop-bit varints, modified UTF-8,
//!   decimal-exact float reconstruction
//! - [`excerpt`]: The per-record cursor with its read/write primitive set
//! - [`log`]: The `RecordLog` collaborator contract and the mmap-backed
//!   `IndexedLog` implementation
//! - [`marshal`]: Typed marshaller registry for enum/object fields
//! - [`datastore`]: Named-event dispatch over the raw log

pub mod datastore;
pub mod encoding;
pub mod excerpt;
pub mod log;
pub mod marshal;

pub use datastore::{DataStore, EventSink};
pub use encoding::float::Decimal;
pub use excerpt::Excerpt;
pub use log::{ByteOrder, CommitBarrier, IndexedLog, IndexedLogBuilder, RecordLog, RecordRegion};
pub use marshal::{Marshaller, MarshallerRegistry, StringMarshaller, TextMarshaller};
