//! Packet identifier allocation.
//!
//! Identifiers are scoped to one direction of one session and stay reserved
//! until the handshake they belong to is terminally acknowledged. Zero is
//! reserved by the protocol and is never handed out.

use std::collections::HashSet;

/// Wire width of packet identifiers.
///
/// `Sixteen` is the MQTT-conformant default. `ThirtyTwo` is an experimental
/// extension for broker-internal links; both peers must agree on it.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum IdWidth {
    #[default]
    Sixteen,
    ThirtyTwo,
}

impl IdWidth {
    pub const fn max_id(self) -> u32 {
        match self {
            IdWidth::Sixteen => u16::MAX as u32,
            IdWidth::ThirtyTwo => u32::MAX,
        }
    }
}

/// Allocates, reserves and releases packet identifiers.
///
/// A monotonically increasing cursor probes for the next free value, so
/// allocation stays O(1) amortised even when the set wraps around.
#[derive(Debug, Clone)]
pub struct PacketIdAllocator {
    width: IdWidth,
    cursor: u32,
    used: HashSet<u32>,
}

impl PacketIdAllocator {
    pub fn new(width: IdWidth) -> Self {
        PacketIdAllocator {
            width,
            cursor: 0,
            used: HashSet::new(),
        }
    }

    pub fn width(&self) -> IdWidth {
        self.width
    }

    /// Hands out the next unused nonzero identifier, or `None` if every
    /// identifier the width allows is in flight.
    pub fn acquire(&mut self) -> Option<u32> {
        if self.used.len() >= self.width.max_id() as usize {
            return None;
        }
        loop {
            self.cursor = if self.cursor >= self.width.max_id() {
                1
            } else {
                self.cursor + 1
            };
            if !self.used.contains(&self.cursor) {
                self.used.insert(self.cursor);
                return Some(self.cursor);
            }
        }
    }

    /// Claims an application-chosen identifier. Fails if the value is zero,
    /// wider than the configured width, or already in use.
    pub fn reserve(&mut self, id: u32) -> bool {
        if id == 0 || id > self.width.max_id() || self.used.contains(&id) {
            return false;
        }
        self.used.insert(id);
        true
    }

    /// Frees an identifier on terminal acknowledgement. Returns whether it
    /// was actually in use.
    pub fn release(&mut self, id: u32) -> bool {
        self.used.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.used.contains(&id)
    }

    pub fn in_use(&self) -> usize {
        self.used.len()
    }

    pub fn clear(&mut self) {
        self.used.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_starts_at_one() {
        let mut alloc = PacketIdAllocator::new(IdWidth::Sixteen);
        assert_eq!(alloc.acquire(), Some(1));
        assert_eq!(alloc.acquire(), Some(2));
        assert!(alloc.contains(1));
        assert!(!alloc.contains(0));
    }

    #[test]
    fn zero_is_never_handed_out() {
        let mut alloc = PacketIdAllocator::new(IdWidth::Sixteen);
        alloc.cursor = u16::MAX as u32 - 1;
        assert_eq!(alloc.acquire(), Some(u16::MAX as u32));
        // Wrap-around skips zero.
        assert_eq!(alloc.acquire(), Some(1));
        assert!(!alloc.contains(0));
    }

    #[test]
    fn acquire_skips_reserved_ids() {
        let mut alloc = PacketIdAllocator::new(IdWidth::Sixteen);
        assert!(alloc.reserve(1));
        assert!(alloc.reserve(2));
        assert_eq!(alloc.acquire(), Some(3));
    }

    #[test]
    fn reserve_rejects_live_and_invalid_ids() {
        let mut alloc = PacketIdAllocator::new(IdWidth::Sixteen);
        assert!(alloc.reserve(7));
        assert!(!alloc.reserve(7));
        assert!(!alloc.reserve(0));
        assert!(!alloc.reserve(0x1_0000));
    }

    #[test]
    fn release_frees_for_reuse() {
        let mut alloc = PacketIdAllocator::new(IdWidth::Sixteen);
        let id = alloc.acquire().unwrap();
        assert!(alloc.release(id));
        assert!(!alloc.release(id));
        assert!(alloc.reserve(id));
    }

    #[test]
    fn thirty_two_bit_width_accepts_wide_ids() {
        let mut alloc = PacketIdAllocator::new(IdWidth::ThirtyTwo);
        assert!(alloc.reserve(0x0001_0000));
        assert_eq!(alloc.acquire(), Some(1));
    }
}
