use std::collections::{BTreeMap, HashMap};

use log::{trace, warn};

use crate::error::AllocError;

/// Hands out contiguous ranges of integer ids from `[reserved, capacity)`.
///
/// Fresh ids come from a cursor that only moves up. Freed ranges go to a
/// free list that is coalesced with its neighbours and searched best-fit
/// before the cursor advances. A range that ends at the cursor is returned to
/// the cursor instead.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    capacity: usize,
    reserved: usize,
    cursor: usize,
    /// base -> length of free ranges below the cursor
    free: BTreeMap<usize, usize>,
    /// base -> length of live allocations
    areas: HashMap<usize, usize>,
}

impl IdAllocator {
    pub fn new(capacity: usize) -> Self {
        Self::with_reserved(capacity, 0)
    }

    /// Ids below `reserved` are never handed out (hardware audio buses).
    pub fn with_reserved(capacity: usize, reserved: usize) -> Self {
        let reserved = reserved.min(capacity);
        Self {
            capacity,
            reserved,
            cursor: reserved,
            free: BTreeMap::new(),
            areas: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Allocates `size` contiguous ids and returns the first.
    pub fn alloc(&mut self, size: usize) -> Result<usize, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let best = self
            .free
            .iter()
            .filter(|(_, &len)| len >= size)
            .min_by_key(|(&base, &len)| (len, base))
            .map(|(&base, &len)| (base, len));
        let base = if let Some((base, len)) = best {
            self.free.remove(&base);
            if len > size {
                self.free.insert(base + size, len - size);
            }
            base
        } else if self.capacity - self.cursor >= size {
            let base = self.cursor;
            self.cursor += size;
            base
        } else {
            return Err(AllocError::Exhausted {
                size,
                capacity: self.capacity,
            });
        };
        self.areas.insert(base, size);
        trace!(target: "server::alloc", "alloc {size} at {base}");
        Ok(base)
    }

    /// Returns the range starting at `base`. Unknown ids are ignored.
    pub fn free(&mut self, base: usize) -> bool {
        let Some(size) = self.areas.remove(&base) else {
            warn!(target: "server::alloc", "ignoring free of unallocated id {base}");
            return false;
        };
        let mut start = base;
        let mut len = size;
        if let Some((&prev, &prev_len)) = self.free.range(..start).next_back() {
            if prev + prev_len == start {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&(start + len)) {
            len += next_len;
        }
        if start + len == self.cursor {
            self.cursor = start;
        } else {
            self.free.insert(start, len);
        }
        trace!(target: "server::alloc", "free {size} at {base}");
        true
    }

    pub fn is_allocated(&self, base: usize) -> bool {
        self.areas.contains_key(&base)
    }

    /// Size of the live allocation starting at `base`.
    pub fn size_of(&self, base: usize) -> Option<usize> {
        self.areas.get(&base).copied()
    }

    /// Total ids currently handed out.
    pub fn in_use(&self) -> usize {
        self.areas.values().sum()
    }

    /// Forgets every allocation.
    pub fn reset(&mut self) {
        self.cursor = self.reserved;
        self.free.clear();
        self.areas.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_disjoint(alloc: &IdAllocator) {
        let mut ranges: Vec<(usize, usize)> = alloc.areas.iter().map(|(&b, &l)| (b, l)).collect();
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0, "overlap: {pair:?}");
        }
        for (base, len) in ranges {
            assert!(base >= alloc.reserved && base + len <= alloc.capacity);
        }
    }

    #[test]
    fn reuses_freed_range() {
        let mut alloc = IdAllocator::new(64);
        assert_eq!(alloc.alloc(2), Ok(0));
        assert_eq!(alloc.alloc(2), Ok(2));
        assert!(alloc.free(0));
        assert_eq!(alloc.alloc(2), Ok(0));
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut alloc = IdAllocator::new(64);
        assert_eq!(alloc.alloc(60), Ok(0));
        assert_eq!(
            alloc.alloc(8),
            Err(AllocError::Exhausted { size: 8, capacity: 64 })
        );
        assert_eq!(alloc.alloc(4), Ok(60));
    }

    #[test]
    fn zero_size_rejected() {
        let mut alloc = IdAllocator::new(8);
        assert_eq!(alloc.alloc(0), Err(AllocError::ZeroSize));
    }

    #[test]
    fn reserved_ids_are_skipped() {
        let mut alloc = IdAllocator::with_reserved(128, 64);
        assert_eq!(alloc.alloc(2), Ok(64));
        alloc.free(64);
        alloc.reset();
        assert_eq!(alloc.alloc(1), Ok(64));
    }

    #[test]
    fn unknown_free_is_a_no_op() {
        let mut alloc = IdAllocator::new(16);
        alloc.alloc(4).unwrap();
        assert!(!alloc.free(7));
        assert!(!alloc.free(2));
        assert_eq!(alloc.in_use(), 4);
    }

    #[test]
    fn double_free_is_a_no_op() {
        let mut alloc = IdAllocator::new(16);
        let a = alloc.alloc(4).unwrap();
        let _b = alloc.alloc(4).unwrap();
        assert!(alloc.free(a));
        assert!(!alloc.free(a));
        assert_eq!(alloc.in_use(), 4);
    }

    #[test]
    fn neighbours_coalesce() {
        let mut alloc = IdAllocator::new(16);
        let a = alloc.alloc(2).unwrap();
        let b = alloc.alloc(2).unwrap();
        let c = alloc.alloc(2).unwrap();
        let _d = alloc.alloc(2).unwrap();
        alloc.free(a);
        alloc.free(c);
        alloc.free(b);
        // a, b and c merged into one range of six
        assert_eq!(alloc.alloc(6), Ok(0));
    }

    #[test]
    fn best_fit_prefers_smallest_hole() {
        let mut alloc = IdAllocator::new(32);
        let big = alloc.alloc(8).unwrap();
        let _gap1 = alloc.alloc(1).unwrap();
        let small = alloc.alloc(3).unwrap();
        let _gap2 = alloc.alloc(1).unwrap();
        alloc.free(big);
        alloc.free(small);
        assert_eq!(alloc.alloc(3), Ok(small));
        assert_eq!(alloc.alloc(3), Ok(big));
    }

    #[test]
    fn tail_free_returns_to_cursor() {
        let mut alloc = IdAllocator::new(8);
        let a = alloc.alloc(4).unwrap();
        let b = alloc.alloc(4).unwrap();
        alloc.free(b);
        alloc.free(a);
        assert_eq!(alloc.alloc(8), Ok(0));
    }

    #[test]
    fn random_churn_never_overlaps() {
        let mut alloc = IdAllocator::new(256);
        let mut live: Vec<usize> = Vec::new();
        let mut seed: u32 = 0x2545_F491;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            if seed % 3 == 0 && !live.is_empty() {
                let victim = live.swap_remove(seed as usize % live.len());
                assert!(alloc.free(victim));
            } else if let Ok(base) = alloc.alloc(1 + seed as usize % 7) {
                live.push(base);
            }
            assert_disjoint(&alloc);
        }
        for base in live {
            alloc.free(base);
        }
        assert_eq!(alloc.in_use(), 0);
        assert_eq!(alloc.alloc(256), Ok(0));
    }
}
