//! Growth primitives the heap is carved out of.
//!
//! A [`BreakSource`] behaves like `sbrk(2)`: it moves a break by `increment`
//! bytes and hands back the *previous* break, or [`FAILURE_SENTINEL`] when it
//! cannot.

use std::ptr::{self, NonNull};

use libc::{intptr_t, sbrk};

/// Address returned by [`BreakSource::extend`] on failure, `(void *) -1`.
pub const FAILURE_SENTINEL: *mut u8 = ptr::without_provenance_mut(usize::MAX);

/// An `sbrk`-shaped growth primitive.
pub trait BreakSource {
  /// Moves the break by `increment` bytes and returns the previous break, or
  /// [`FAILURE_SENTINEL`] if the break could not be moved.
  ///
  /// # Safety
  ///
  /// A negative `increment` releases memory below the old break; the caller
  /// must own that memory and no longer use it.
  unsafe fn extend(
    &mut self,
    increment: isize,
  ) -> *mut u8;
}

/// The process program break, moved with `sbrk(2)`.
///
/// Only one heap per process should be built on `Sbrk`, and nothing else in
/// the process should move the break while it is in use.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

impl BreakSource for Sbrk {
  unsafe fn extend(
    &mut self,
    increment: isize,
  ) -> *mut u8 {
    unsafe { sbrk(increment as intptr_t) as *mut u8 }
  }
}

/// A fixed-capacity, word-aligned buffer with a private break.
///
/// Lets any number of independent heaps coexist in one process, which is what
/// tests and embedders without `sbrk` want. The buffer is freed on drop.
pub struct FixedArena {
  memory: NonNull<[usize]>,
  capacity: usize,
  brk: usize,
}

// Safety: the arena exclusively owns its buffer.
unsafe impl Send for FixedArena {}

impl FixedArena {
  /// Creates an arena able to hand out `capacity` bytes, rounded down to the word.
  pub fn new(capacity: usize) -> Self {
    let words = capacity / core::mem::size_of::<usize>();
    let memory = Box::into_raw(vec![0usize; words].into_boxed_slice());

    Self {
      // Safety: `Box::into_raw` never returns null.
      memory: unsafe { NonNull::new_unchecked(memory) },
      capacity: words * core::mem::size_of::<usize>(),
      brk: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes still available above the break.
  pub fn remaining(&self) -> usize {
    self.capacity - self.brk
  }

  fn base(&self) -> *mut u8 {
    self.memory.as_ptr() as *mut u8
  }
}

impl BreakSource for FixedArena {
  unsafe fn extend(
    &mut self,
    increment: isize,
  ) -> *mut u8 {
    let Some(new_brk) = self.brk.checked_add_signed(increment) else {
      return FAILURE_SENTINEL;
    };
    if new_brk > self.capacity {
      return FAILURE_SENTINEL;
    }

    let previous = unsafe { self.base().add(self.brk) };
    self.brk = new_brk;
    previous
  }
}

impl Drop for FixedArena {
  fn drop(&mut self) {
    // Safety: `memory` came from `Box::into_raw` in `new` and is released once.
    drop(unsafe { Box::from_raw(self.memory.as_ptr()) });
  }
}

impl core::fmt::Debug for FixedArena {
  fn fmt(
    &self,
    f: &mut core::fmt::Formatter<'_>,
  ) -> core::fmt::Result {
    f.debug_struct("FixedArena")
      .field("base", &self.base())
      .field("capacity", &self.capacity)
      .field("brk", &self.brk)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arena_extend_returns_previous_break() {
    let mut arena = FixedArena::new(64);

    unsafe {
      let start = arena.extend(0);
      assert_ne!(start, FAILURE_SENTINEL);
      assert_eq!(start as usize % core::mem::align_of::<usize>(), 0);

      let first = arena.extend(16);
      assert_eq!(first, start);

      let second = arena.extend(16);
      assert_eq!(second, start.add(16));

      assert_eq!(arena.extend(0), start.add(32));
      assert_eq!(arena.remaining(), 32);
    }
  }

  #[test]
  fn test_arena_refuses_past_capacity() {
    let mut arena = FixedArena::new(32);

    unsafe {
      assert_eq!(arena.extend(33), FAILURE_SENTINEL);
      assert_eq!(arena.remaining(), 32);

      assert_ne!(arena.extend(32), FAILURE_SENTINEL);
      assert_eq!(arena.extend(1), FAILURE_SENTINEL);
      assert_eq!(arena.extend(-64), FAILURE_SENTINEL);
    }
  }

  #[test]
  fn test_arena_shrinks() {
    let mut arena = FixedArena::new(32);

    unsafe {
      let start = arena.extend(24);
      arena.extend(-8);
      assert_eq!(arena.extend(0), start.add(16));
    }
  }

  #[test]
  fn test_arena_capacity_rounds_down() {
    let word = core::mem::size_of::<usize>();
    let arena = FixedArena::new(word * 3 + 1);

    assert_eq!(arena.capacity(), word * 3);
  }

  #[test]
  fn test_sentinel_is_all_ones() {
    assert_eq!(FAILURE_SENTINEL as usize, usize::MAX);
  }
}
