//! Bit-range bookkeeping for proxy nodes.
//!
//! A proxy's output is assembled from ranges of its sources. [`RangeList`]
//! keeps those ranges as a canonical interval list: sorted by destination
//! offset, non-overlapping, and coalesced wherever two neighbours copy
//! contiguous bits of the same source. Inserting a range overwrites whatever
//! previously covered the same destination bits (last write wins).

use kiln_common::BitVector;
use serde::{Deserialize, Serialize};

/// One contiguous copy from a proxy source into the proxy's output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ProxyRange {
    /// Index into the proxy's source list.
    pub src_idx: u32,
    /// First destination bit.
    pub dst_offset: u32,
    /// First source bit.
    pub src_offset: u32,
    /// Number of bits copied.
    pub length: u32,
}

impl ProxyRange {
    /// Creates a range.
    pub fn new(src_idx: u32, dst_offset: u32, src_offset: u32, length: u32) -> Self {
        Self {
            src_idx,
            dst_offset,
            src_offset,
            length,
        }
    }

    /// One past the last destination bit.
    pub fn dst_end(&self) -> u32 {
        self.dst_offset + self.length
    }

    /// Returns the part of this range covering destination bits `[start, end)`.
    ///
    /// The caller guarantees the window intersects the range.
    fn clip(&self, start: u32, end: u32) -> ProxyRange {
        let lo = self.dst_offset.max(start);
        let hi = self.dst_end().min(end);
        debug_assert!(lo < hi);
        ProxyRange {
            src_idx: self.src_idx,
            dst_offset: lo,
            src_offset: self.src_offset + (lo - self.dst_offset),
            length: hi - lo,
        }
    }

    /// Returns true if `next` continues this range in both destination and source.
    fn joins(&self, next: &ProxyRange) -> bool {
        self.src_idx == next.src_idx
            && self.dst_end() == next.dst_offset
            && self.src_offset + self.length == next.src_offset
    }
}

/// Sorted, non-overlapping, coalesced list of [`ProxyRange`]s.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct RangeList {
    ranges: Vec<ProxyRange>,
}

impl RangeList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ranges in destination order.
    pub fn ranges(&self) -> &[ProxyRange] {
        &self.ranges
    }

    /// Returns the number of ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns true if no bit is sourced.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Inserts a range, replacing every overlapped part of existing ranges.
    ///
    /// Zero-length ranges are ignored.
    pub fn insert(&mut self, range: ProxyRange) {
        if range.length == 0 {
            return;
        }
        let start = range.dst_offset;
        let end = range.dst_end();
        // [first, last) are the ranges overlapping the new one.
        let first = self.ranges.partition_point(|r| r.dst_end() <= start);
        let last = self.ranges.partition_point(|r| r.dst_offset < end);

        let mut replacement = Vec::with_capacity(3);
        if first < last {
            let head = self.ranges[first];
            if head.dst_offset < start {
                replacement.push(head.clip(head.dst_offset, start));
            }
        }
        replacement.push(range);
        if first < last {
            let tail = self.ranges[last - 1];
            if tail.dst_end() > end {
                replacement.push(tail.clip(end, tail.dst_end()));
            }
        }
        let inserted = replacement.len();
        self.ranges.splice(first..last, replacement);
        self.coalesce_around(first, first + inserted);
    }

    /// Merges neighbours of the freshly spliced slice `[lo, hi)`.
    fn coalesce_around(&mut self, lo: usize, hi: usize) {
        let from = lo.saturating_sub(1);
        let to = (hi + 1).min(self.ranges.len());
        let mut merged: Vec<ProxyRange> = Vec::with_capacity(to - from);
        for r in &self.ranges[from..to] {
            match merged.last_mut() {
                Some(prev) if prev.joins(r) => prev.length += r.length,
                _ => merged.push(*r),
            }
        }
        self.ranges.splice(from..to, merged);
    }

    /// Returns the ranges covering destination bits `[offset, offset + length)`,
    /// rebased so that `offset` becomes bit 0.
    pub fn window(&self, offset: u32, length: u32) -> RangeList {
        let end = offset + length;
        let first = self.ranges.partition_point(|r| r.dst_end() <= offset);
        let mut out = RangeList::new();
        for r in self.ranges[first..].iter().take_while(|r| r.dst_offset < end) {
            let mut c = r.clip(offset, end);
            c.dst_offset -= offset;
            out.ranges.push(c);
        }
        out
    }

    /// Returns true iff the list is one range copying all of a `source_width`-bit
    /// source into a proxy of the same width.
    pub fn is_identity(&self, width: u32, source_width: u32) -> bool {
        match self.ranges.as_slice() {
            [r] => {
                r.dst_offset == 0 && r.src_offset == 0 && r.length == width && source_width == width
            }
            _ => false,
        }
    }

    /// Returns true if every bit of `[0, width)` is sourced.
    pub fn covers(&self, width: u32) -> bool {
        let mut next = 0;
        for r in &self.ranges {
            if r.dst_offset != next {
                return false;
            }
            next = r.dst_end();
        }
        next >= width
    }

    /// Returns the sorted, de-duplicated source indices still referenced.
    pub fn used_sources(&self) -> Vec<u32> {
        let mut used: Vec<u32> = self.ranges.iter().map(|r| r.src_idx).collect();
        used.sort_unstable();
        used.dedup();
        used
    }

    /// Rewrites source indices through `map` (old index -> new index).
    ///
    /// Ranges that become contiguous after remapping are coalesced.
    pub fn remap_sources(&mut self, map: impl Fn(u32) -> u32) {
        for r in &mut self.ranges {
            r.src_idx = map(r.src_idx);
        }
        let len = self.ranges.len();
        self.coalesce_around(0, len);
    }

    /// Evaluates the proxy given the values of its sources.
    ///
    /// Bits not covered by any range read as zero.
    pub fn gather(&self, width: u32, sources: &[&BitVector]) -> BitVector {
        let mut out = BitVector::new(width);
        for r in &self.ranges {
            out.write(r.dst_offset, sources[r.src_idx as usize], r.src_offset, r.length);
        }
        out
    }

    /// Checks the canonical-form invariant.
    pub fn is_canonical(&self) -> bool {
        self.ranges.iter().all(|r| r.length > 0)
            && self.ranges.windows(2).all(|w| {
                w[0].dst_end() <= w[1].dst_offset && !w[0].joins(&w[1])
            })
    }
}
