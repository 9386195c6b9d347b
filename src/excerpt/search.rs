//! # Binary Search Over Sorted Records
//!
//! Random access by comparator: the cursor is positioned on each probed
//! record and a caller-supplied three-way comparator reads whatever fields
//! it needs to classify the record against the sought key.

use std::cmp::Ordering;

use eyre::{ensure, Result};

use crate::excerpt::Excerpt;

impl Excerpt {
    /// Binary search over `[0, size())` for a record the comparator reports
    /// equal.
    ///
    /// Returns the matching index, or the bitwise complement of the
    /// insertion point when absent, following the standard
    /// binary-search-with-insertion-point contract, so `!result` recovers
    /// where an equal record would belong. With duplicates, any one of the
    /// equal run may be returned; use [`Excerpt::find_range`] for the full
    /// run.
    ///
    /// The comparator returns `Less` when the positioned record sorts
    /// before the sought key.
    pub fn find_match(
        &mut self,
        mut comparator: impl FnMut(&mut Excerpt) -> Result<Ordering>,
    ) -> Result<i64> {
        let mut lo: i64 = 0;
        let mut hi: i64 = self.size() as i64 - 1;
        while lo <= hi {
            let mid = (hi + lo) >> 1;
            let found = self.seek(mid)?;
            ensure!(found, "record {} disappeared during search", mid);

            let cmp = comparator(self)?;
            self.finish()?;
            match cmp {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid - 1,
                Ordering::Equal => return Ok(mid),
            }
        }
        Ok(!lo)
    }

    /// Two interleaved binary searches producing `[start, end)` spanning
    /// exactly the records the comparator reports equal (empty, with
    /// `start == end` at the insertion point, when none do).
    ///
    /// Both bounds share the same probes while the candidate range is still
    /// a single point, splitting into an independent upper search only once
    /// an equal record pins them apart.
    pub fn find_range(
        &mut self,
        mut comparator: impl FnMut(&mut Excerpt) -> Result<Ordering>,
    ) -> Result<(i64, i64)> {
        // Lower search range.
        let mut lo1: i64 = 0;
        let mut hi1: i64 = self.size() as i64 - 1;
        // Upper search range.
        let mut lo2: i64 = 0;
        let mut hi2: i64 = hi1;
        let mut both = true;

        // Search for the low bound.
        while lo1 <= hi1 {
            let mid = (hi1 + lo1) >> 1;
            let found = self.seek(mid)?;
            ensure!(found, "record {} disappeared during search", mid);

            let cmp = comparator(self)?;
            self.finish()?;

            match cmp {
                Ordering::Less => {
                    lo1 = mid + 1;
                    if both {
                        lo2 = lo1;
                    }
                }
                Ordering::Greater => {
                    hi1 = mid - 1;
                    if both {
                        hi2 = hi1;
                    }
                }
                Ordering::Equal => {
                    hi1 = mid - 1;
                    if both {
                        lo2 = mid + 1;
                    }
                    both = false;
                }
            }
        }

        // Search for the high bound.
        while lo2 <= hi2 {
            let mut mid = (hi2 + lo2) >> 1;
            if !self.seek(mid)? {
                if mid > lo2 {
                    mid -= 1;
                    let found = self.seek(mid)?;
                    ensure!(found, "record {} disappeared during search", mid);
                } else {
                    break;
                }
            }
            let cmp = comparator(self)?;
            self.finish()?;

            if cmp != Ordering::Greater {
                lo2 = mid + 1;
            } else {
                hi2 = mid - 1;
            }
        }

        Ok((lo1, lo2))
    }
}
