//! Owner-local byte storage backing distributed references.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Byte range `[start, end)` in the owner's arena.
///
/// `end == 0` means there are no local bytes; the value must be fetched and
/// deserialized instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShmemRange {
    /// First byte.
    pub start: u64,
    /// One past the last byte; 0 for "no range".
    pub end: u64,
}

impl ShmemRange {
    /// The "no local bytes" range.
    pub const NULL: ShmemRange = ShmemRange { start: 0, end: 0 };

    /// Create a range.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Whether this range points at nothing.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.end == 0
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    /// Whether the range covers no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// First-fit arena of live byte ranges.
///
/// A new range goes into the lowest gap between live ranges that can hold
/// it, or after the last one. The buffer is truncated to the end of the last
/// live range whenever a range is freed.
#[derive(Debug, Default)]
pub struct ShmemArena {
    buf: Vec<u8>,
    /// Live ranges, `start -> end`.
    live: BTreeMap<u64, u64>,
}

impl ShmemArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `data` in. Empty data yields [`ShmemRange::NULL`].
    pub fn alloc(&mut self, data: &[u8]) -> ShmemRange {
        if data.is_empty() {
            return ShmemRange::NULL;
        }
        let len = data.len() as u64;

        let mut start = 0;
        for (&live_start, &live_end) in &self.live {
            if live_start - start >= len {
                break;
            }
            start = live_end;
        }
        let end = start + len;

        if self.buf.len() < end as usize {
            self.buf.resize(end as usize, 0);
        }
        self.buf[start as usize..end as usize].copy_from_slice(data);
        self.live.insert(start, end);
        ShmemRange { start, end }
    }

    /// Bytes of a live range.
    pub fn get(&self, range: ShmemRange) -> Option<&[u8]> {
        match self.live.get(&range.start) {
            Some(&end) if end == range.end && !range.is_null() => {
                Some(&self.buf[range.start as usize..range.end as usize])
            }
            _ => None,
        }
    }

    /// Release a range. Returns false if it was not live.
    pub fn free(&mut self, range: ShmemRange) -> bool {
        if range.is_null() || self.live.get(&range.start) != Some(&range.end) {
            return false;
        }
        self.live.remove(&range.start);
        let tail = self.live.last_key_value().map_or(0, |(_, &end)| end);
        self.buf.truncate(tail as usize);
        true
    }

    /// Number of live ranges.
    pub fn live_ranges(&self) -> usize {
        self.live.len()
    }

    /// Bytes currently held, gaps between live ranges included.
    pub fn footprint(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_range() {
        assert!(ShmemRange::NULL.is_null());
        assert!(ShmemRange::default().is_null());
        assert!(!ShmemRange::new(0, 4).is_null());
        assert_eq!(ShmemRange::new(2, 6).len(), 4);
    }

    #[test]
    fn test_alloc_and_get() {
        let mut arena = ShmemArena::new();
        let a = arena.alloc(b"hello");
        let b = arena.alloc(b"world!");

        assert_eq!(a, ShmemRange::new(0, 5));
        assert_eq!(b, ShmemRange::new(5, 11));
        assert_eq!(arena.get(a), Some(&b"hello"[..]));
        assert_eq!(arena.get(b), Some(&b"world!"[..]));
    }

    #[test]
    fn test_empty_alloc_is_null() {
        let mut arena = ShmemArena::new();
        assert!(arena.alloc(b"").is_null());
        assert_eq!(arena.live_ranges(), 0);
    }

    #[test]
    fn test_free_resets_when_empty() {
        let mut arena = ShmemArena::new();
        let a = arena.alloc(b"abc");
        let b = arena.alloc(b"def");

        assert!(arena.free(a));
        assert!(arena.get(a).is_none());
        assert_eq!(arena.footprint(), 6);

        assert!(arena.free(b));
        assert_eq!(arena.footprint(), 0);
        assert_eq!(arena.live_ranges(), 0);
    }

    #[test]
    fn test_freed_gap_is_reused() {
        let mut arena = ShmemArena::new();
        let a = arena.alloc(b"aaaa");
        let b = arena.alloc(b"bbbb");
        let c = arena.alloc(b"cccc");

        assert!(arena.free(b));
        let d = arena.alloc(b"dd");
        assert_eq!(d, ShmemRange::new(4, 6));
        assert_eq!(arena.footprint(), 12);

        // Too big for the two bytes left in the gap.
        let e = arena.alloc(b"eeee");
        assert_eq!(e, ShmemRange::new(12, 16));

        assert_eq!(arena.get(a), Some(&b"aaaa"[..]));
        assert_eq!(arena.get(c), Some(&b"cccc"[..]));
        assert_eq!(arena.get(d), Some(&b"dd"[..]));
    }

    #[test]
    fn test_footprint_bounded_under_churn() {
        let mut arena = ShmemArena::new();
        let keep = arena.alloc(b"long-lived");
        let chunk = vec![7u8; 1024];

        for _ in 0..1000 {
            let r = arena.alloc(&chunk);
            assert!(arena.free(r));
        }

        assert_eq!(arena.live_ranges(), 1);
        assert_eq!(arena.footprint(), keep.len());
        assert_eq!(arena.get(keep), Some(&b"long-lived"[..]));
    }

    #[test]
    fn test_head_gap_reused_after_free() {
        let mut arena = ShmemArena::new();
        let a = arena.alloc(b"head");
        let _b = arena.alloc(b"tail");

        assert!(arena.free(a));
        assert_eq!(arena.alloc(b"new!"), ShmemRange::new(0, 4));
    }

    #[test]
    fn test_double_free_rejected() {
        let mut arena = ShmemArena::new();
        let a = arena.alloc(b"abc");
        let _keep = arena.alloc(b"xyz");
        assert!(arena.free(a));
        assert!(!arena.free(a));
        assert!(!arena.free(ShmemRange::NULL));
    }

    #[test]
    fn test_mismatched_range_not_readable() {
        let mut arena = ShmemArena::new();
        let a = arena.alloc(b"abcdef");
        assert!(arena.get(ShmemRange::new(a.start, a.end - 1)).is_none());
    }
}
