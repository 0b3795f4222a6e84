use std::ptr::NonNull;

use log::{debug, warn};

use crate::{
  align::padding_for,
  block::{HEADER_ALIGN, HEADER_SIZE},
  error::AllocError,
  source::{BreakSource, FAILURE_SENTINEL},
};

/// The committed, contiguous range `[start, end)` carved from a [`BreakSource`].
///
/// `start` is fixed by the first growth; `end` only ever moves up.
pub struct HeapRegion<S> {
  source: S,
  start: Option<NonNull<u8>>,
  end: usize,
  max_size: Option<usize>,
}

// Safety: the region only hands out addresses inside memory it exclusively owns.
unsafe impl<S: Send> Send for HeapRegion<S> {}

impl<S> HeapRegion<S> {
  pub const fn new(
    source: S,
    max_size: Option<usize>,
  ) -> Self {
    Self {
      source,
      start: None,
      end: 0,
      max_size,
    }
  }

  /// First byte of the heap, once anything has been committed.
  pub fn start(&self) -> Option<NonNull<u8>> {
    self.start
  }

  pub fn start_addr(&self) -> usize {
    self.start.map_or(0, |start| start.as_ptr() as usize)
  }

  /// The current break: one past the last committed byte.
  pub fn end(&self) -> usize {
    self.end
  }

  pub fn len(&self) -> usize {
    self.end - self.start_addr()
  }

  pub fn is_empty(&self) -> bool {
    self.start.is_none()
  }

  pub fn source(&self) -> &S {
    &self.source
  }
}

impl<S: BreakSource> HeapRegion<S> {
  /// Commits room for a block with an `n`-byte payload and returns the
  /// address its header goes at, which is the old `end`.
  pub(crate) fn grow(
    &mut self,
    n: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let total = n
      .checked_add(HEADER_SIZE)
      .ok_or(AllocError::SizeOverflow { requested: n })?;
    let increment = isize::try_from(total).map_err(|_| AllocError::SizeOverflow { requested: n })?;

    if let Some(max_size) = self.max_size {
      if self.len().checked_add(total).is_none_or(|len| len > max_size) {
        warn!("heap growth by {total} bytes refused: cap of {max_size} bytes reached");
        return Err(AllocError::OutOfMemory { requested: total });
      }
    }

    match self.start {
      None => self.grow_first(total, increment),
      Some(_) => self.grow_contiguous(total, increment),
    }
  }

  fn grow_first(
    &mut self,
    total: usize,
    increment: isize,
  ) -> Result<NonNull<u8>, AllocError> {
    let brk = unsafe { self.source.extend(0) };
    if brk == FAILURE_SENTINEL {
      warn!("break source could not report its break");
      return Err(AllocError::OutOfMemory { requested: total });
    }

    let padding = padding_for(brk as usize, HEADER_ALIGN);
    let padded = increment
      .checked_add(padding as isize)
      .ok_or(AllocError::SizeOverflow { requested: total })?;

    let address = self.extend(padded, total)?;
    if address != brk {
      unsafe { self.source.extend(-padded) };
      return Err(self.discontiguous(brk as usize, address as usize));
    }

    let start = unsafe { address.add(padding) };
    let start = NonNull::new(start).ok_or(AllocError::OutOfMemory { requested: total })?;
    self.start = Some(start);
    self.end = start.as_ptr() as usize + total;

    debug!("heap starts at {:p}, break now {:#x}", start, self.end);
    Ok(start)
  }

  fn grow_contiguous(
    &mut self,
    total: usize,
    increment: isize,
  ) -> Result<NonNull<u8>, AllocError> {
    let address = self.extend(increment, total)?;
    if address as usize != self.end {
      unsafe { self.source.extend(-increment) };
      return Err(self.discontiguous(self.end, address as usize));
    }

    let block = NonNull::new(address).ok_or(AllocError::OutOfMemory { requested: total })?;
    self.end += total;

    debug!("heap grew by {total} bytes, break now {:#x}", self.end);
    Ok(block)
  }

  /// Moves the break, rejecting the failure sentinel before anything looks at the address.
  fn extend(
    &mut self,
    increment: isize,
    requested: usize,
  ) -> Result<*mut u8, AllocError> {
    let address = unsafe { self.source.extend(increment) };
    if address == FAILURE_SENTINEL {
      warn!("break source refused to grow by {increment} bytes");
      return Err(AllocError::OutOfMemory { requested });
    }
    Ok(address)
  }

  fn discontiguous(
    &self,
    expected: usize,
    actual: usize,
  ) -> AllocError {
    warn!("break moved behind the heap's back: expected {expected:#x}, got {actual:#x}");
    AllocError::Discontiguous { expected, actual }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::FixedArena;

  /// Reports a break that is not word-aligned.
  struct Misaligned(FixedArena);

  impl BreakSource for Misaligned {
    unsafe fn extend(
      &mut self,
      increment: isize,
    ) -> *mut u8 {
      let address = unsafe { self.0.extend(increment) };
      if address == FAILURE_SENTINEL { address } else { unsafe { address.add(1) } }
    }
  }

  /// Always fails.
  struct Exhausted;

  impl BreakSource for Exhausted {
    unsafe fn extend(
      &mut self,
      _increment: isize,
    ) -> *mut u8 {
      FAILURE_SENTINEL
    }
  }

  #[test]
  fn test_grow_is_contiguous() {
    let mut region = HeapRegion::new(FixedArena::new(1024), None);
    assert!(region.is_empty());

    let first = region.grow(16).unwrap();
    assert_eq!(region.start(), Some(first));
    assert_eq!(region.len(), 16 + HEADER_SIZE);

    let second = region.grow(32).unwrap();
    assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 16 + HEADER_SIZE);
    assert_eq!(region.end(), region.start_addr() + 48 + 2 * HEADER_SIZE);
  }

  #[test]
  fn test_grow_fails_on_sentinel() {
    let mut region = HeapRegion::new(Exhausted, None);

    assert_eq!(
      region.grow(8),
      Err(AllocError::OutOfMemory { requested: 8 + HEADER_SIZE })
    );
    assert!(region.is_empty());
    assert_eq!(region.len(), 0);
  }

  #[test]
  fn test_grow_fails_when_arena_exhausted() {
    let mut region = HeapRegion::new(FixedArena::new(64), None);

    region.grow(64 - HEADER_SIZE).unwrap();
    let end = region.end();

    assert!(matches!(region.grow(8), Err(AllocError::OutOfMemory { .. })));
    assert_eq!(region.end(), end);
  }

  #[test]
  fn test_grow_respects_cap() {
    let mut region = HeapRegion::new(FixedArena::new(1024), Some(128));

    region.grow(64).unwrap();
    assert!(matches!(region.grow(64), Err(AllocError::OutOfMemory { .. })));
    assert_eq!(region.source().remaining(), 1024 - 64 - HEADER_SIZE);
  }

  #[test]
  fn test_grow_rejects_overflow() {
    let mut region = HeapRegion::new(FixedArena::new(64), None);

    assert_eq!(
      region.grow(usize::MAX),
      Err(AllocError::SizeOverflow { requested: usize::MAX })
    );
    assert!(matches!(region.grow(isize::MAX as usize), Err(AllocError::SizeOverflow { .. })));
  }

  #[test]
  fn test_first_growth_aligns_start() {
    let mut region = HeapRegion::new(Misaligned(FixedArena::new(256)), None);

    let start = region.grow(8).unwrap();
    assert_eq!(start.as_ptr() as usize % HEADER_ALIGN, 0);
    assert_eq!(region.len(), 8 + HEADER_SIZE);
  }

  #[test]
  fn test_foreign_break_move_is_detected() {
    let mut region = HeapRegion::new(FixedArena::new(256), None);
    region.grow(8).unwrap();
    let end = region.end();

    // Someone else takes a word off the top of the break.
    unsafe { region.source.extend(8) };

    let err = region.grow(8).unwrap_err();
    assert_eq!(
      err,
      AllocError::Discontiguous {
        expected: end,
        actual: end + 8
      }
    );
    assert_eq!(region.end(), end);
    assert_eq!(region.source().remaining(), 256 - 8 - HEADER_SIZE - 8);
  }
}
