//! # Named Event Dispatch
//!
//! A thin event layer over the raw log: every record written through a
//! [`DataStore`] starts with a sink name (UTF-8 field), and reading
//! dispatches each record to the sink registered under that name. Sinks are
//! registered explicitly up front; there is no runtime scanning of caller
//! structures to discover them.
//!
//! Nothing here polls or spawns threads: [`DataStore::poll_next`] dispatches
//! at most one new record and reports whether one was found, which is the
//! steady-state "caught up" signal. Driving that in a loop, with whatever
//! backoff suits the application, is the caller's concern.

use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashMap;
use tracing::debug;

use crate::encoding::stopbit::stop_bit_len;
use crate::encoding::utf8::utf8_len;
use crate::excerpt::Excerpt;
use crate::log::RecordLog;

/// Receives the records written under one registered name. The cursor is
/// positioned just past the name field; the sink reads its own payload.
pub trait EventSink: Send {
    fn on_event(&mut self, excerpt: &mut Excerpt) -> Result<()>;
}

impl<F> EventSink for F
where
    F: FnMut(&mut Excerpt) -> Result<()> + Send,
{
    fn on_event(&mut self, excerpt: &mut Excerpt) -> Result<()> {
        self(excerpt)
    }
}

pub struct DataStore {
    sinks: HashMap<String, Box<dyn EventSink>>,
    cursor: Excerpt,
    name_scratch: String,
}

impl DataStore {
    pub fn new(log: Arc<dyn RecordLog>) -> Self {
        Self {
            sinks: HashMap::new(),
            cursor: Excerpt::new(log),
            name_scratch: String::new(),
        }
    }

    /// Registers `sink` to receive records written under `name`.
    pub fn register(&mut self, name: impl Into<String>, sink: impl EventSink + 'static) {
        self.sinks.insert(name.into(), Box::new(sink));
    }

    /// Dispatches every record from the beginning of the log; returns how
    /// many were dispatched to a registered sink.
    pub fn replay(&mut self) -> Result<u64> {
        self.cursor.to_start()?;
        let mut dispatched = 0;
        while self.cursor.next_index()? {
            if self.dispatch_current()? {
                dispatched += 1;
            }
        }
        debug!(dispatched, "replayed logbook events");
        Ok(dispatched)
    }

    /// Dispatches the next record if one has been committed. `Ok(false)`
    /// means the store is caught up with the writer.
    pub fn poll_next(&mut self) -> Result<bool> {
        if !self.cursor.next_index()? {
            return Ok(false);
        }
        self.dispatch_current()?;
        Ok(true)
    }

    /// Records consumed so far (the next poll reads this index).
    pub fn events(&self) -> i64 {
        self.cursor.index() + 1
    }

    /// Begins an appended record with the name field already written;
    /// `capacity` covers the caller's payload on top of the name. The
    /// caller writes its fields and calls `finish()` on the returned
    /// cursor.
    pub fn start_excerpt(&mut self, capacity: u64, name: &str) -> Result<&mut Excerpt> {
        ensure!(
            self.sinks.contains_key(name),
            "no sink registered under {:?}",
            name
        );
        let name_len = utf8_len(name);
        let total = capacity + stop_bit_len(name_len as i64) as u64 + name_len as u64;
        self.cursor.start_excerpt(total)?;
        self.cursor.write_utf8(Some(name))?;
        Ok(&mut self.cursor)
    }

    fn dispatch_current(&mut self) -> Result<bool> {
        let mut name = std::mem::take(&mut self.name_scratch);
        let result = self.cursor.read_utf8_into(&mut name);
        let dispatched = match result {
            Ok(true) => {
                if let Some(sink) = self.sinks.get_mut(name.as_str()) {
                    sink.on_event(&mut self.cursor)?;
                    true
                } else {
                    debug!(name = %name, "skipping record with no registered sink");
                    false
                }
            }
            Ok(false) => false,
            Err(e) => {
                self.name_scratch = name;
                return Err(e);
            }
        };
        self.name_scratch = name;
        self.cursor.finish()?;
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::log::IndexedLog;

    fn open_log(dir: &std::path::Path) -> Arc<IndexedLog> {
        IndexedLog::builder(dir)
            .data_bits(16)
            .index_bits(12)
            .build()
            .unwrap()
    }

    #[test]
    fn records_dispatch_to_registered_sinks() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path());

        let total = Arc::new(AtomicI64::new(0));
        let seen = Arc::clone(&total);

        let mut store = DataStore::new(log.clone());
        store.register("prices", move |excerpt: &mut Excerpt| -> Result<()> {
            let v = excerpt.read_stop_bit()?;
            seen.fetch_add(v, Ordering::Relaxed);
            Ok(())
        });

        for v in [10i64, -3, 5] {
            let excerpt = store.start_excerpt(16, "prices").unwrap();
            excerpt.write_stop_bit(v).unwrap();
            excerpt.finish().unwrap();
        }

        assert!(!store.poll_next().unwrap());
        // A fresh store replays everything from the start.
        let mut replayer = DataStore::new(log.clone());
        let tallied = Arc::new(AtomicI64::new(0));
        let sink_total = Arc::clone(&tallied);
        replayer.register("prices", move |excerpt: &mut Excerpt| -> Result<()> {
            let v = excerpt.read_stop_bit()?;
            sink_total.fetch_add(v, Ordering::Relaxed);
            Ok(())
        });
        assert_eq!(replayer.replay().unwrap(), 3);
        assert_eq!(tallied.load(Ordering::Relaxed), 12);
        assert_eq!(replayer.events(), 3);
    }

    #[test]
    fn unregistered_names_are_skipped() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path());

        let mut writer = DataStore::new(log.clone());
        writer.register("known", |_: &mut Excerpt| -> Result<()> { Ok(()) });
        writer.register("ignored", |_: &mut Excerpt| -> Result<()> { Ok(()) });
        let excerpt = writer.start_excerpt(16, "ignored").unwrap();
        excerpt.write_stop_bit(1).unwrap();
        excerpt.finish().unwrap();
        let excerpt = writer.start_excerpt(16, "known").unwrap();
        excerpt.write_stop_bit(2).unwrap();
        excerpt.finish().unwrap();

        let mut reader = DataStore::new(log.clone());
        reader.register("known", |excerpt: &mut Excerpt| -> Result<()> {
            assert_eq!(excerpt.read_stop_bit()?, 2);
            Ok(())
        });
        assert_eq!(reader.replay().unwrap(), 1);
    }

    #[test]
    fn start_excerpt_requires_registration() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path());
        let mut store = DataStore::new(log);
        assert!(store.start_excerpt(16, "nobody").is_err());
    }
}
