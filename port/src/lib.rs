// SPDX-License-Identifier: Apache-2.0

//! Thread-safe bitmap allocator over a contiguous `[min, max]` port range.
//!
//! The controller keeps one [`PortAllocator`] per transport protocol, since
//! the same integer port can be bound independently by TCP and UDP. State is
//! a fixed-length array of `AtomicU32` words; every operation is a
//! compare-exchange loop on a single word, so there is no locking and no
//! allocation on the hot path (spec.md §4.1).

use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

/// Upper bound enforced on `max` to stay clear of the Kubernetes NodePort
/// range (spec.md §4.1).
pub const NODEPORT_FLOOR: u16 = 30000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PortAllocatorError {
    #[error("invalid range [{min}, {max}]: max must be greater than min")]
    InvalidRange { min: u16, max: u16 },
    #[error("range upper bound {0} must stay below the NodePort floor ({NODEPORT_FLOOR})")]
    RangeTooHigh(u16),
}

const BITS_PER_WORD: u32 = u32::BITS;

#[derive(Debug)]
pub struct PortAllocator {
    min: u16,
    max: u16,
    words: Vec<AtomicU32>,
}

impl PortAllocator {
    /// Build an allocator covering `[min, max]` inclusive.
    ///
    /// # Errors
    ///
    /// Returns [`PortAllocatorError`] if `max <= min` or `max >=
    /// `[`NODEPORT_FLOOR`].
    pub fn new(min: u16, max: u16) -> Result<Self, PortAllocatorError> {
        if max <= min {
            return Err(PortAllocatorError::InvalidRange { min, max });
        }
        if max >= NODEPORT_FLOOR {
            return Err(PortAllocatorError::RangeTooHigh(max));
        }
        let span = u32::from(max - min) + 1;
        let word_count = span.div_ceil(BITS_PER_WORD);
        let words = (0..word_count).map(|_| AtomicU32::new(0)).collect();
        Ok(Self { min, max, words })
    }

    #[must_use]
    pub fn min(&self) -> u16 {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> u16 {
        self.max
    }

    fn in_range(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }

    fn word_and_mask(ordinal: u32) -> (usize, u32) {
        #[allow(clippy::cast_possible_truncation)] // span is bounded by u16 range
        let index = (ordinal / BITS_PER_WORD) as usize;
        let mask = 1u32 << (ordinal % BITS_PER_WORD);
        (index, mask)
    }

    /// Attempt to transition the bit for `ordinal` from unset to set.
    /// Returns `true` iff this call performed the 0->1 transition.
    fn try_claim(&self, ordinal: u32) -> bool {
        let (index, mask) = Self::word_and_mask(ordinal);
        let mut current = self.words[index].load(Ordering::Relaxed);
        loop {
            if current & mask != 0 {
                return false;
            }
            match self.words[index].compare_exchange_weak(
                current,
                current | mask,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Attempt to transition the bit for `ordinal` from set to unset.
    /// Returns `true` iff this call performed the 1->0 transition.
    fn try_release(&self, ordinal: u32) -> bool {
        let (index, mask) = Self::word_and_mask(ordinal);
        let mut current = self.words[index].load(Ordering::Relaxed);
        loop {
            if current & mask == 0 {
                return false;
            }
            match self.words[index].compare_exchange_weak(
                current,
                current & !mask,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Claim the lowest unset bit in `[min, max]`. Returns `None` if the
    /// range is full.
    pub fn allocate(&self) -> Option<u16> {
        for ordinal in 0..=u32::from(self.max - self.min) {
            if self.try_claim(ordinal) {
                #[allow(clippy::cast_possible_truncation)] // ordinal <= max - min <= u16::MAX
                return Some(self.min + ordinal as u16);
            }
        }
        None
    }

    /// Mark `port` allocated. Returns `true` iff this call is the one that
    /// transitioned the bit from unset to set — i.e. the caller now owns the
    /// port. A `false` return means either `port` is out of range, or another
    /// caller already holds it; idempotent callers must treat `false` as
    /// "someone else holds it" (spec.md §4.1).
    pub fn allocated(&self, port: u16) -> bool {
        if !self.in_range(port) {
            return false;
        }
        self.try_claim(u32::from(port - self.min))
    }

    /// Release `port`. Returns `true` iff this call transitioned the bit
    /// from set to unset.
    pub fn revoke(&self, port: u16) -> bool {
        if !self.in_range(port) {
            return false;
        }
        self.try_release(u32::from(port - self.min))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_invalid_ranges() {
        assert_eq!(
            PortAllocator::new(100, 100),
            Err(PortAllocatorError::InvalidRange { min: 100, max: 100 })
        );
        assert_eq!(
            PortAllocator::new(29000, 30000),
            Err(PortAllocatorError::RangeTooHigh(30000))
        );
    }

    #[test]
    fn allocate_picks_lowest_free_port() {
        let alloc = PortAllocator::new(100, 103).unwrap();
        assert_eq!(alloc.allocate(), Some(100));
        assert_eq!(alloc.allocate(), Some(101));
        alloc.revoke(100);
        assert_eq!(alloc.allocate(), Some(100));
        assert_eq!(alloc.allocate(), Some(102));
        assert_eq!(alloc.allocate(), Some(103));
        assert_eq!(alloc.allocate(), None);
    }

    #[test]
    fn allocated_is_idempotent_and_racy_safe() {
        let alloc = PortAllocator::new(100, 200).unwrap();
        assert!(alloc.allocated(150));
        assert!(!alloc.allocated(150), "second claimant must lose");
    }

    #[test]
    fn allocated_rejects_out_of_range_without_side_effect() {
        let alloc = PortAllocator::new(100, 200).unwrap();
        assert!(!alloc.allocated(99));
        assert!(!alloc.allocated(201));
        assert_eq!(alloc.allocate(), Some(100));
    }

    #[test]
    fn revoke_transitions_exactly_once() {
        let alloc = PortAllocator::new(100, 200).unwrap();
        assert!(alloc.allocated(150));
        assert!(alloc.revoke(150));
        assert!(!alloc.revoke(150));
    }

    #[test]
    fn revoke_out_of_range_is_a_noop() {
        let alloc = PortAllocator::new(100, 200).unwrap();
        assert!(!alloc.revoke(9999));
    }

    #[test]
    fn concurrent_allocate_never_double_allocates() {
        let alloc = Arc::new(PortAllocator::new(1000, 1255).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || {
                    let mut claimed = Vec::new();
                    while let Some(port) = alloc.allocate() {
                        claimed.push(port);
                    }
                    claimed
                })
            })
            .collect();
        let mut all_claimed: Vec<u16> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all_claimed.sort_unstable();
        let expected: Vec<u16> = (1000..=1255).collect();
        assert_eq!(all_claimed, expected);
    }
}
