//! # Commit Visibility Barrier
//!
//! The single-writer-publishes/reader-observes handoff. On commit the writer
//! (a) writes all record bytes, (b) optionally forces them to durable
//! storage, (c) publishes the end offset into the index, (d) raises the
//! visible record count, and (e) performs a release-store on this flag.
//! Readers acquire-load the flag before consulting the index, so they never
//! observe a partially written record's offset even though no mutex is held.
//!
//! The release/acquire pair is a true memory fence, not merely visibility: a
//! plain shared write here would lose the ordering guarantee on
//! weakly-ordered architectures.

use std::sync::atomic::{AtomicBool, Ordering};

/// Release/acquire flag pair ordering writer commits before reader
/// observation.
#[derive(Debug, Default)]
pub struct CommitBarrier {
    flag: AtomicBool,
}

impl CommitBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer side: release-store after the index publish, sealing
    /// everything written before it.
    #[inline]
    pub fn publish(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Reader side: acquire-load before any index lookup.
    #[inline]
    pub fn observe(&self) {
        self.flag.load(Ordering::Acquire);
    }
}
