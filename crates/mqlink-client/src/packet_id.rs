//! Packet identifier allocation.
//!
//! Identifiers are 16-bit non-zero values carried by SUBSCRIBE and
//! UNSUBSCRIBE. The allocator is shared by every thread that sends, so the
//! counter sits behind a lock; correlation of replies lives in
//! [`PendingAcks`](crate::pending::PendingAcks).

use parking_lot::Mutex;

/// Monotonic packet identifier source.
#[derive(Debug)]
pub struct PacketIdAllocator {
    /// Next ID to hand out, never 0
    next_id: Mutex<u16>,
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
        }
    }

    /// Return the current identifier and advance, wrapping 65535 to 1.
    pub fn allocate(&self) -> u16 {
        let mut next = self.next_id.lock();
        let id = *next;
        *next = advance(id);
        id
    }

    /// The identifier the next `allocate` will return.
    pub fn peek(&self) -> u16 {
        *self.next_id.lock()
    }
}

/// Step forward, skipping 0.
fn advance(id: u16) -> u16 {
    match id.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_sequential_allocation() {
        let alloc = PacketIdAllocator::new();
        assert_eq!(alloc.allocate(), 1);
        assert_eq!(alloc.allocate(), 2);
        assert_eq!(alloc.allocate(), 3);
        assert_eq!(alloc.peek(), 4);
    }

    #[test]
    fn test_skips_zero() {
        let alloc = PacketIdAllocator::new();
        *alloc.next_id.lock() = 65535;
        assert_eq!(alloc.allocate(), 65535);
        assert_eq!(alloc.allocate(), 1); // Skipped 0
    }

    #[test]
    fn test_concurrent_allocations_are_distinct() {
        let alloc = Arc::new(PacketIdAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || (0..1000).map(|_| alloc.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert_ne!(id, 0);
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
