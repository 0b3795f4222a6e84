use std::{
  marker::PhantomData,
  ptr::{self, NonNull},
};

use log::{trace, warn};

use crate::{
  align::checked_align,
  block::{Block, HEADER_SIZE, SENTINEL_SIZE},
  config::AllocatorConfig,
  error::AllocError,
  region::HeapRegion,
  source::BreakSource,
};

/// Outcome of a first-fit scan.
enum Fit {
  /// The lowest-addressed free block large enough for the request.
  Found(Block),
  /// Nothing fits; carries the block that currently ends at the break, if any.
  Miss { last: Option<Block> },
}

/// Iterator over the implicit block chain.
///
/// Stops at the break, and stops early rather than read a header that would
/// not fit below the break.
pub(crate) struct Blocks<'a> {
  cursor: Option<Block>,
  end: usize,
  _heap: PhantomData<&'a ()>,
}

impl Iterator for Blocks<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    let block = self.cursor?;
    let next_end = block
      .addr()
      .checked_add(HEADER_SIZE)
      .and_then(|payload| payload.checked_add(unsafe { block.size() }))
      .and_then(|block_end| block_end.checked_add(HEADER_SIZE));
    self.cursor = match next_end {
      Some(next_end) if next_end <= self.end => Some(unsafe { block.next() }),
      _ => None,
    };
    Some(block)
  }
}

/// A first-fit allocator with boundary-tag coalescing over one growable heap.
///
/// The allocator is single-threaded: it takes `&mut self` and does no locking
/// of its own. Wrap it in [`Locked`](crate::Locked) to share it.
pub struct Allocator<S> {
  pub(crate) region: HeapRegion<S>,
  config: AllocatorConfig,
}

impl<S> Allocator<S> {
  pub const fn new(source: S) -> Self {
    Self::with_config(source, AllocatorConfig::DEFAULT)
  }

  pub const fn with_config(
    source: S,
    config: AllocatorConfig,
  ) -> Self {
    Self {
      region: HeapRegion::new(source, config.max_heap_size),
      config,
    }
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  pub fn region(&self) -> &HeapRegion<S> {
    &self.region
  }

  /// Blocks in address order from `heap_start` up to the break.
  pub(crate) fn blocks(&self) -> Blocks<'_> {
    Blocks {
      cursor: self.region.start().map(Block::at),
      end: self.region.end(),
      _heap: PhantomData,
    }
  }

  fn find_fit(
    &self,
    size: usize,
  ) -> Fit {
    let mut last = None;
    for block in self.blocks() {
      if unsafe { block.is_free() && block.size() >= size } {
        return Fit::Found(block);
      }
      last = Some(block);
    }
    Fit::Miss { last }
  }
}

impl<S: BreakSource> Allocator<S> {
  /// Allocates `size` bytes and returns the payload address.
  ///
  /// Returns null for a zero-sized request or when the heap cannot grow.
  pub fn alloc(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    match self.try_alloc(size) {
      Ok(Some(payload)) => payload.as_ptr(),
      Ok(None) => ptr::null_mut(),
      Err(err) => {
        warn!("alloc({size}) failed: {err}");
        ptr::null_mut()
      }
    }
  }

  /// Like [`alloc`](Self::alloc), but reports why an allocation failed.
  ///
  /// `Ok(None)` is the answer to a zero-sized request.
  ///
  /// The payload is at least `size` bytes rounded up to the machine word; a
  /// reused block that was not worth splitting may be larger.
  pub fn try_alloc(
    &mut self,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, AllocError> {
    if size == 0 {
      return Ok(None);
    }
    let size = checked_align(size).ok_or(AllocError::SizeOverflow { requested: size })?;

    let block = match self.find_fit(size) {
      Fit::Found(block) => {
        self.take(block, size);
        block
      }
      Fit::Miss { last } => self.append(size, last)?,
    };

    trace!("alloc({size}) -> {:p}", block.payload());
    Ok(Some(block.payload()))
  }

  /// Marks a free block used, splitting off the tail when the slack is worth keeping.
  fn take(
    &mut self,
    block: Block,
    size: usize,
  ) {
    let end = self.region.end();
    unsafe {
      let slack = block.size() - size;
      if slack < self.config.split_threshold() {
        block.set_current(block.size(), false, end);
        return;
      }

      // Shrinking mirrors the new size into the spot the remainder is about to occupy.
      block.set_current(size, false, end);
      let remainder = block.next();
      remainder.set_current(slack - HEADER_SIZE, true, end);

      trace!(
        "split block at {:#x}: {size} used + {} free at {:#x}",
        block.addr(),
        slack - HEADER_SIZE,
        remainder.addr()
      );
    }
  }

  /// Grows the heap by one used block of `size` bytes placed after `last`.
  fn append(
    &mut self,
    size: usize,
    last: Option<Block>,
  ) -> Result<Block, AllocError> {
    let block = Block::at(self.region.grow(size)?);
    let end = self.region.end();

    unsafe {
      match last {
        Some(last) => block.set_prev(last.size(), last.is_free()),
        None => block.set_prev(SENTINEL_SIZE, true),
      }
      block.set_current(size, false, end);
    }
    Ok(block)
  }

  /// Returns a block to the heap, merging it with free physical neighbors.
  ///
  /// A null `ptr` is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by this allocator and not freed since.
  #[cfg(not(feature = "hardened"))]
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    if let Some(payload) = NonNull::new(ptr) {
      unsafe { self.release(Block::from_payload(payload)) };
    }
  }

  /// Returns a block to the heap, merging it with free physical neighbors.
  ///
  /// A null `ptr` is ignored.
  ///
  /// # Panics
  ///
  /// If [`try_free`](Self::try_free) rejects `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by this allocator and not freed since.
  #[cfg(feature = "hardened")]
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    if let Err(err) = unsafe { self.try_free(ptr) } {
      log::error!("{err}");
      panic!("{err}");
    }
  }

  /// Checked [`free`](Self::free): rejects handles outside the heap, handles
  /// whose header carries no magic, and blocks that are already free.
  ///
  /// # Safety
  ///
  /// A pointer into the heap that is not a handle can still land on bytes
  /// that look like a valid header; the check catches mistakes, not forgeries.
  #[cfg(feature = "hardened")]
  pub unsafe fn try_free(
    &mut self,
    ptr: *mut u8,
  ) -> Result<(), AllocError> {
    let Some(payload) = NonNull::new(ptr) else {
      return Ok(());
    };
    let address = ptr as usize;
    let invalid = AllocError::InvalidFree { address };

    let start = self.region.start_addr();
    let in_heap = !self.region.is_empty()
      && address >= start + HEADER_SIZE
      && address < self.region.end()
      && (address - start) % crate::block::HEADER_ALIGN == 0;
    if !in_heap {
      return Err(invalid);
    }

    let block = unsafe { Block::from_payload(payload) };
    unsafe {
      let fits = block
        .checked_end()
        .is_some_and(|block_end| block_end <= self.region.end());
      if !block.has_magic() || block.is_free() || !fits {
        return Err(invalid);
      }
      self.release(block);
    }
    Ok(())
  }

  unsafe fn release(
    &mut self,
    block: Block,
  ) {
    let start = self.region.start_addr();
    let end = self.region.end();

    unsafe {
      trace!("free({:p}) of {} bytes", block.payload(), block.size());
      block.set_current(block.size(), true, end);

      if !block.is_last(end) {
        let next = block.next();
        if next.is_free() {
          trace!("merge {:#x} with following {:#x}", block.addr(), next.addr());
          block.set_current(block.size() + HEADER_SIZE + next.size(), true, end);
        }
      }

      if !block.is_first(start) && block.prev_free() {
        let prev = block.prev();
        trace!("merge {:#x} into preceding {:#x}", block.addr(), prev.addr());
        prev.set_current(prev.size() + HEADER_SIZE + block.size(), true, end);
      }
    }
  }
}
