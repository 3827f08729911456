//! Hierarchical bump allocator.
//!
//! Every protocol cycle needs scratch memory whose lifetime is exactly one
//! request/response or one reading batch. A [`Pool`] hands out 4-byte aligned
//! [`Block`]s by advancing a cursor and releases everything at once with
//! [`Pool::empty`]. There is no per-block free.
//!
//! Pools form a tree: a child's bytes are carved out of its parent's remaining
//! space when it is created, and the parent keeps a record of its children.
//! All pools of one tree share the root's storage.
//!
//! ```text
//! root "module" (1024)
//! ├── child "reply"    [base   0 .. 320)
//! └── child "readings" [base 320 .. 520)
//! ```
//!
//! Blocks remember the pool generation they were issued in. [`Pool::empty`]
//! bumps the generation, so reading a block that outlived an `empty()` is a
//! [`FieldkitError::StaleBlock`] instead of silently returning reused bytes.
//! Emptying a pool also releases every pool carved from it, directly or
//! through other children: a released child refuses further use with
//! [`FieldkitError::PoolReleased`].
//!
//! # Example
//!
//! ```
//! use fieldkit_bus::pool::Pool;
//!
//! let mut pool = Pool::root("scratch", 64);
//! let a = pool.alloc_copy(b"abc").unwrap();
//! assert_eq!(pool.used(), 4);
//! assert_eq!(&pool.read(&a).unwrap()[..], b"abc");
//!
//! pool.empty();
//! assert_eq!(pool.used(), 0);
//! assert!(pool.read(&a).is_err());
//! ```

pub mod budget;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::{FieldkitError, Result};
use budget::{align_up, checked_align_up};

type Storage = Rc<RefCell<Vec<u8>>>;

/// An ancestor's generation cell and the value it had when the child was carved.
type Ancestor = (Rc<Cell<u32>>, u32);

/// Handle to one allocation inside a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    offset: usize,
    len: usize,
    aligned: usize,
    generation: u32,
}

impl Block {
    /// Offset from the start of the owning pool.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Requested length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length allocations.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes actually consumed from the pool.
    #[inline]
    pub fn aligned_len(&self) -> usize {
        self.aligned
    }

    /// Pool generation this block was issued in.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Record a parent keeps for each child carved out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildPool {
    /// Child name.
    pub name: String,
    /// Absolute start of the child within the root storage.
    pub base: usize,
    /// Child size in bytes.
    pub size: usize,
}

/// A bump allocator over a fixed byte block.
///
/// Invariant: `used() + remaining() == size()` after every operation.
pub struct Pool {
    name: String,
    storage: Storage,
    base: usize,
    size: usize,
    remaining: usize,
    generation: Rc<Cell<u32>>,
    ancestors: Vec<Ancestor>,
    root: bool,
    children: Vec<ChildPool>,
}

impl Pool {
    /// Create a pool, either on the heap or carved from `parent`.
    ///
    /// # Errors
    ///
    /// Returns `PoolExhausted` if the parent lacks room for the child.
    pub fn create(name: &str, size: usize, parent: Option<&mut Pool>) -> Result<Pool> {
        match parent {
            Some(parent) => parent.child(name, size),
            None => Ok(Pool::root(name, size)),
        }
    }

    /// Create a root pool with its own heap storage.
    pub fn root(name: &str, size: usize) -> Pool {
        let size = align_up(size);
        tracing::trace!("pool '{}': create root size={}", name, size);
        Pool {
            name: name.to_string(),
            storage: Rc::new(RefCell::new(vec![0u8; size])),
            base: 0,
            size,
            remaining: size,
            generation: Rc::new(Cell::new(0)),
            ancestors: Vec::new(),
            root: true,
            children: Vec::new(),
        }
    }

    /// Carve a child pool out of this pool's remaining space.
    ///
    /// # Errors
    ///
    /// Returns `PoolExhausted` (naming this pool) if there is not enough room.
    pub fn child(&mut self, name: &str, size: usize) -> Result<Pool> {
        let block = self.alloc(size)?;
        let mut ancestors = self.ancestors.clone();
        ancestors.push((Rc::clone(&self.generation), self.generation.get()));
        let base = self.base + block.offset;
        self.children.push(ChildPool {
            name: name.to_string(),
            base,
            size: block.aligned,
        });
        tracing::trace!(
            "pool '{}': carved child '{}' base={} size={}",
            self.name,
            name,
            base,
            block.aligned
        );
        Ok(Pool {
            name: name.to_string(),
            storage: Rc::clone(&self.storage),
            base,
            size: block.aligned,
            remaining: block.aligned,
            generation: Rc::new(Cell::new(0)),
            ancestors,
            root: false,
            children: Vec::new(),
        })
    }

    /// Allocate `size` bytes rounded up to the pool alignment.
    ///
    /// # Errors
    ///
    /// Returns `PoolExhausted` if `remaining() < align_up(size)`. The pool is
    /// left untouched in that case. Returns `PoolReleased` if an ancestor was
    /// emptied since this pool was carved.
    pub fn alloc(&mut self, size: usize) -> Result<Block> {
        self.check_attached()?;
        let aligned = checked_align_up(size)
            .filter(|aligned| *aligned <= self.remaining)
            .ok_or_else(|| FieldkitError::PoolExhausted {
                pool: self.name.clone(),
                requested: align_up(size),
                remaining: self.remaining,
            })?;

        let offset = self.used();
        self.remaining -= aligned;

        Ok(Block {
            offset,
            len: size,
            aligned,
            generation: self.generation(),
        })
    }

    fn check_attached(&self) -> Result<()> {
        if self.ancestors.iter().any(|(cell, seen)| cell.get() != *seen) {
            return Err(FieldkitError::PoolReleased(self.name.clone()));
        }
        Ok(())
    }

    /// Allocate a block and copy `data` into it.
    pub fn alloc_copy(&mut self, data: &[u8]) -> Result<Block> {
        let block = self.alloc(data.len())?;
        self.write(&block, data);
        Ok(block)
    }

    /// Allocate `len + 1` bytes, copy the string in and NUL-terminate it.
    pub fn alloc_str(&mut self, value: &str) -> Result<Block> {
        let block = self.alloc(value.len() + 1)?;
        let mut terminated = Vec::with_capacity(value.len() + 1);
        terminated.extend_from_slice(value.as_bytes());
        terminated.push(0);
        self.write(&block, &terminated);
        Ok(block)
    }

    fn write(&mut self, block: &Block, data: &[u8]) {
        let start = self.base + block.offset;
        let mut storage = self.storage.borrow_mut();
        storage[start..start + data.len()].copy_from_slice(data);
    }

    /// Copy a block's bytes out of the pool.
    ///
    /// # Errors
    ///
    /// Returns `StaleBlock` if the pool was emptied since the block was issued.
    pub fn read(&self, block: &Block) -> Result<Bytes> {
        self.check_attached()?;
        if block.generation != self.generation() {
            return Err(FieldkitError::StaleBlock {
                pool: self.name.clone(),
                block: block.generation,
                current: self.generation(),
            });
        }
        if block.offset + block.len > self.used() {
            return Err(FieldkitError::InvalidState(format!(
                "block at {}+{} lies outside pool '{}'",
                block.offset, block.len, self.name
            )));
        }

        let start = self.base + block.offset;
        let storage = self.storage.borrow();
        Ok(Bytes::copy_from_slice(&storage[start..start + block.len]))
    }

    /// Reset the cursor; every outstanding block becomes stale.
    ///
    /// Children carved from this pool are forgotten and released: their
    /// bytes will be handed out again by the next allocations.
    pub fn empty(&mut self) {
        self.remaining = self.size;
        self.generation.set(self.generation.get().wrapping_add(1));
        self.children.clear();
        tracing::trace!("pool '{}': empty (generation {})", self.name, self.generation());
    }

    /// Release a root pool's storage.
    ///
    /// # Errors
    ///
    /// Returns `NotRootPool` for pools carved from a parent.
    pub fn free(self) -> Result<()> {
        if !self.root {
            return Err(FieldkitError::NotRootPool(self.name));
        }
        tracing::trace!("pool '{}': free", self.name);
        Ok(())
    }

    /// Bytes handed out since creation or the last `empty()`.
    #[inline]
    pub fn used(&self) -> usize {
        self.size - self.remaining
    }

    /// Bytes still available.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Total size (aligned).
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Absolute start of this pool within its root's storage.
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Absolute byte range of this pool within its root's storage.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.base..self.base + self.size
    }

    /// Pool name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if this pool owns its storage.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Current generation; bumped by every `empty()`.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.get()
    }

    /// Children carved out of this pool, in creation order.
    pub fn children(&self) -> &[ChildPool] {
        &self.children
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("size", &self.size)
            .field("remaining", &self.remaining)
            .field("generation", &self.generation())
            .field("root", &self.root)
            .field("children", &self.children.len())
            .finish()
    }
}
