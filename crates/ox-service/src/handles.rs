//! Service-side handle allocation.
//!
//! Handles are 64-bit, allocated monotonically from 1, and never recycled
//! within the life of the service; 0 is the null handle.

use std::collections::HashMap;
use std::sync::Mutex;

use ox_protocol::HandleKind;

#[derive(Default)]
struct AllocatorInner {
    next: u64,
    kinds: HashMap<u64, HandleKind>,
}

pub struct HandleAllocator {
    inner: Mutex<AllocatorInner>,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AllocatorInner {
                next: 1,
                kinds: HashMap::new(),
            }),
        }
    }

    pub fn allocate(&self, kind: HandleKind) -> u64 {
        let mut inner = self.inner.lock().expect("allocator poisoned");
        let handle = inner.next;
        inner.next += 1;
        inner.kinds.insert(handle, kind);
        handle
    }

    pub fn kind_of(&self, handle: u64) -> Option<HandleKind> {
        self.inner
            .lock()
            .expect("allocator poisoned")
            .kinds
            .get(&handle)
            .copied()
    }

    /// Forget a handle. The value is never handed out again.
    pub fn release(&self, handle: u64) {
        self.inner
            .lock()
            .expect("allocator poisoned")
            .kinds
            .remove(&handle);
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_and_non_zero() {
        let allocator = HandleAllocator::new();
        let mut seen = std::collections::HashSet::new();
        for i in 0..1000 {
            let kind = if i % 2 == 0 {
                HandleKind::Space
            } else {
                HandleKind::Action
            };
            let handle = allocator.allocate(kind);
            assert_ne!(handle, 0);
            assert!(seen.insert(handle));
        }
    }

    #[test]
    fn released_handles_are_not_recycled() {
        let allocator = HandleAllocator::new();
        let first = allocator.allocate(HandleKind::Session);
        allocator.release(first);
        let second = allocator.allocate(HandleKind::Session);
        assert_ne!(first, second);
        assert_eq!(allocator.kind_of(first), None);
        assert_eq!(allocator.kind_of(second), Some(HandleKind::Session));
    }

    #[test]
    fn uniqueness_holds_across_threads() {
        let allocator = std::sync::Arc::new(HandleAllocator::new());
        let mut threads = Vec::new();
        for _ in 0..4 {
            let allocator = std::sync::Arc::clone(&allocator);
            threads.push(std::thread::spawn(move || {
                (0..500)
                    .map(|_| allocator.allocate(HandleKind::Space))
                    .collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u64> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 2000);
    }
}
