//! Message buffer pooling (component C2, §4.2).
//!
//! The source's linked free-list-per-size-class lives on here as a
//! byte-buffer pool used by the transport layer's encode-then-send path;
//! the message *type* itself is ordinary `Box`/`Vec`-owned data (§3, §9 —
//! "reinterpreted per the source redesign note as ordinary ownership"), so
//! this module is an allocation-reuse optimization, not a correctness
//! requirement. The pluggable allocator hook (§9 "keep as a pluggable
//! collaborator") is honored here: `Pool` never calls `Vec::with_capacity`
//! itself outside of [`GlobalAllocator`], the default collaborator.
use std::collections::HashMap;

/// `O2_MALLOC`/`O2_FREE` as a Rust trait object (§4.2, §9).
pub trait Allocator: 'static {
    /// Returns a new buffer with at least `capacity` bytes of capacity, or
    /// `None` on allocation failure (§6 `NO_MEMORY`).
    fn alloc(&self, capacity: usize) -> Option<Vec<u8>>;
    /// Releases a buffer this allocator produced. Default: drop it.
    fn free(&self, _buf: Vec<u8>) {}
}

/// The default collaborator: the process's ordinary global allocator.
#[derive(Debug, Default)]
pub struct GlobalAllocator;

impl Allocator for GlobalAllocator {
    fn alloc(&self, capacity: usize) -> Option<Vec<u8>> {
        Some(Vec::with_capacity(capacity))
    }
}

/// A free-list-per-size-class buffer pool (§4.2).
pub struct Pool {
    allocator: Box<dyn Allocator>,
    classes: HashMap<usize, Vec<Vec<u8>>>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(Box::new(GlobalAllocator))
    }
}

impl Pool {
    pub fn new(allocator: Box<dyn Allocator>) -> Self {
        Self {
            allocator,
            classes: HashMap::new(),
        }
    }

    fn size_class(len: usize) -> usize {
        len.max(16).next_power_of_two()
    }

    /// Acquires a cleared, empty-length buffer with at least `len` bytes of
    /// capacity, reusing a freed one from its size class if available.
    pub fn acquire(&mut self, len: usize) -> Option<Vec<u8>> {
        let class = Self::size_class(len);
        if let Some(bucket) = self.classes.get_mut(&class) {
            if let Some(mut buf) = bucket.pop() {
                buf.clear();
                return Some(buf);
            }
        }
        self.allocator.alloc(class)
    }

    /// Returns `buf` to the pool, bucketed by its capacity's size class.
    pub fn release(&mut self, mut buf: Vec<u8>) {
        buf.clear();
        let class = Self::size_class(buf.capacity());
        self.classes.entry(class).or_default().push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffer_is_reused_from_its_size_class() {
        let mut pool = Pool::default();
        let buf = pool.acquire(64).unwrap();
        let cap = buf.capacity();
        pool.release(buf);
        let reused = pool.acquire(64).unwrap();
        assert_eq!(reused.capacity(), cap);
        assert!(reused.is_empty());
    }

    #[test]
    fn acquire_without_prior_release_allocates_fresh() {
        let mut pool = Pool::default();
        let buf = pool.acquire(8).unwrap();
        assert!(buf.capacity() >= 8);
    }
}
