//! Bump allocator over a growing list of blocks.
//!
//! Blocks are only ever appended. `recover` rewinds the cursor to the start of
//! the first block without freeing anything, so the next computation reuses
//! the memory; `release` gives every block but the first back to the system.
//! Elements are addressed by [`Slot`] / [`Span`] indices rather than pointers.

use std::mem::size_of;

use crate::utils::errors::{AdError, Result};

pub const DEFAULT_INITIAL_BLOCK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    pub initial_block_bytes: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            initial_block_bytes: DEFAULT_INITIAL_BLOCK_BYTES,
        }
    }
}

impl ArenaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_block_bytes(mut self, bytes: usize) -> Self {
        self.initial_block_bytes = bytes;
        self
    }
}

/// Position of a single element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    block: usize,
    offset: usize,
}

/// Contiguous run of elements inside one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    block: usize,
    offset: usize,
    len: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Cursor position that [`Arena::rewind`] can return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    block: usize,
    offset: usize,
}

#[derive(Debug)]
pub struct Arena<T> {
    blocks: Vec<Vec<T>>,
    sizes: Vec<usize>, // block capacities, in elements
    cur: usize,
    initial: usize,
}

impl<T: Copy> Default for Arena<T> {
    fn default() -> Self {
        Self::new(ArenaConfig::default())
    }
}

impl<T: Copy> Arena<T> {
    /// Blocks are created lazily, on the first allocation.
    pub fn new(config: ArenaConfig) -> Self {
        let elem = size_of::<T>().max(1);
        Self {
            blocks: Vec::new(),
            sizes: Vec::new(),
            cur: 0,
            initial: (config.initial_block_bytes / elem).max(1),
        }
    }

    pub fn alloc(&mut self, value: T) -> Result<Slot> {
        self.reserve(1)?;
        let block = &mut self.blocks[self.cur];
        block.push(value);
        Ok(Slot {
            block: self.cur,
            offset: block.len() - 1,
        })
    }

    pub fn alloc_slice(&mut self, values: &[T]) -> Result<Span> {
        if values.is_empty() {
            return Ok(Span {
                block: 0,
                offset: 0,
                len: 0,
            });
        }
        self.reserve(values.len())?;
        let block = &mut self.blocks[self.cur];
        let offset = block.len();
        block.extend_from_slice(values);
        Ok(Span {
            block: self.cur,
            offset,
            len: values.len(),
        })
    }

    /// Makes sure the next `n` elements fit contiguously in the current
    /// block, moving to (or creating) a large enough block otherwise.
    pub fn reserve(&mut self, n: usize) -> Result<()> {
        if self.blocks.is_empty() {
            self.push_block(self.initial.max(n))?;
            self.cur = 0;
            return Ok(());
        }
        if self.room(self.cur) >= n {
            return Ok(());
        }
        let mut next = self.cur + 1;
        while next < self.blocks.len() && self.sizes[next] < n {
            next += 1;
        }
        if next == self.blocks.len() {
            let doubled = self.sizes.last().copied().unwrap_or(self.initial).saturating_mul(2);
            self.push_block(doubled.max(n))?;
        }
        self.cur = next;
        Ok(())
    }

    fn room(&self, block: usize) -> usize {
        self.sizes[block] - self.blocks[block].len()
    }

    fn push_block(&mut self, size: usize) -> Result<()> {
        let bytes = size.saturating_mul(size_of::<T>());
        let mut block = Vec::new();
        block
            .try_reserve_exact(size)
            .map_err(|_| AdError::OutOfMemory { bytes })?;
        log::debug!(
            "arena: block #{} of {} bytes ({} elements)",
            self.blocks.len(),
            bytes,
            size
        );
        self.blocks.push(block);
        self.sizes.push(size);
        Ok(())
    }

    pub fn get(&self, slot: Slot) -> Option<&T> {
        self.blocks.get(slot.block)?.get(slot.offset)
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        self.blocks.get_mut(slot.block)?.get_mut(slot.offset)
    }

    pub fn slice(&self, span: Span) -> &[T] {
        if span.len == 0 {
            return &[];
        }
        self.blocks
            .get(span.block)
            .and_then(|b| b.get(span.offset..span.offset + span.len))
            .unwrap_or(&[])
    }

    /// Everything allocated so far becomes garbage; no block is freed.
    pub fn recover(&mut self) {
        let upto = self.cur.min(self.blocks.len());
        for block in self.blocks.iter_mut().take(upto + 1) {
            block.clear();
        }
        self.cur = 0;
        log::trace!("arena: recovered, {} blocks retained", self.blocks.len());
    }

    /// Frees every block except the first, then recovers.
    pub fn release(&mut self) {
        let freed = self.blocks.len().saturating_sub(1);
        self.blocks.truncate(1);
        self.sizes.truncate(1);
        self.blocks.shrink_to_fit();
        self.sizes.shrink_to_fit();
        self.recover();
        log::debug!("arena: released {} blocks", freed);
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            block: self.cur,
            offset: self.blocks.get(self.cur).map_or(0, Vec::len),
        }
    }

    /// Discards everything allocated after `cp`.
    pub fn rewind(&mut self, cp: Checkpoint) {
        if self.blocks.is_empty() || cp.block >= self.blocks.len() {
            return;
        }
        for block in self.blocks.iter_mut().take(self.cur + 1).skip(cp.block + 1) {
            block.clear();
        }
        self.blocks[cp.block].truncate(cp.offset);
        self.cur = cp.block;
    }

    /* ---- statistics ---- */

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Elements currently handed out.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reserved_bytes(&self) -> usize {
        self.sizes.iter().sum::<usize>() * size_of::<T>()
    }
}
