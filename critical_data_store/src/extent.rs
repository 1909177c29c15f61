//! Free space tracking for the CDS data area

use std::ops::Range;

/// Sorted, non-overlapping, non-adjacent free ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExtentMap {
    free: Vec<Range<usize>>,
}

impl ExtentMap {
    /// Everything in `area` free
    pub fn new(area: Range<usize>) -> Self {
        let free = if area.is_empty() { Vec::new() } else { vec![area] };
        Self { free }
    }

    /// First-fit allocation of `len` bytes
    pub fn allocate(&mut self, len: usize) -> Option<usize> {
        let pos = self.free.iter().position(|r| r.len() >= len)?;
        let start = self.free[pos].start;
        if self.free[pos].len() == len {
            self.free.remove(pos);
        } else {
            self.free[pos].start += len;
        }
        Some(start)
    }

    /// Marks a specific range as used; false if any of it is not free
    pub fn claim(&mut self, range: Range<usize>) -> bool {
        if range.is_empty() {
            return false;
        }
        let Some(pos) = self
            .free
            .iter()
            .position(|r| r.start <= range.start && range.end <= r.end)
        else {
            return false;
        };

        let outer = self.free.remove(pos);
        let mut insert_at = pos;
        if outer.start < range.start {
            self.free.insert(insert_at, outer.start..range.start);
            insert_at += 1;
        }
        if range.end < outer.end {
            self.free.insert(insert_at, range.end..outer.end);
        }
        true
    }

    /// Returns a range to the free set, merging with neighbours
    pub fn release(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        let pos = self.free.partition_point(|r| r.start < range.start);
        self.free.insert(pos, range);

        // Merge with the following range, then the preceding one
        if pos + 1 < self.free.len() && self.free[pos].end == self.free[pos + 1].start {
            let next = self.free.remove(pos + 1);
            self.free[pos].end = next.end;
        }
        if pos > 0 && self.free[pos - 1].end == self.free[pos].start {
            let current = self.free.remove(pos);
            self.free[pos - 1].end = current.end;
        }
    }

    pub fn free_bytes(&self) -> usize {
        self.free.iter().map(|r| r.len()).sum()
    }

    pub fn largest_free(&self) -> usize {
        self.free.iter().map(|r| r.len()).max().unwrap_or(0)
    }
}
