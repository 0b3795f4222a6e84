//! In-band block metadata.
//!
//! ```text
//!   ┌──────────────────────────────┬──────────────────────┐
//!   │ BlockHeader                  │ payload (size bytes) │
//!   │  size, free                  │                      │
//!   │  prev_size, prev_free ◄──────┼── mirror of the block │
//!   │                              │   physically before  │
//!   └──────────────────────────────┴──────────────────────┘
//!   ▲ block address                ▲ handle returned by alloc
//! ```
//!
//! Blocks are never linked by pointers. The next block starts right after the
//! payload, the previous one is found by stepping back over the mirrored
//! `prev_size`.

use std::mem;
use std::ptr::NonNull;

#[repr(C)]
pub(crate) struct BlockHeader {
  size: usize,
  prev_size: usize,
  free: bool,
  prev_free: bool,
  #[cfg(feature = "hardened")]
  magic: u32,
}

/// Bytes of metadata in front of every payload.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Alignment of every block header, and therefore of every handle.
pub const HEADER_ALIGN: usize = mem::align_of::<BlockHeader>();

/// `prev_size` of the first block, standing in for `-1`.
pub const SENTINEL_SIZE: usize = usize::MAX;

#[cfg(feature = "hardened")]
pub(crate) const MAGIC: u32 = 0xB10C_7A65;

const _: () = assert!(HEADER_SIZE % mem::size_of::<usize>() == 0);

/// Handle to a header living inside the heap.
///
/// All accessors are `unsafe`: the caller guarantees the handle points at a
/// formatted header inside the heap it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block(NonNull<BlockHeader>);

impl Block {
  pub(crate) fn at(address: NonNull<u8>) -> Self {
    Self(address.cast())
  }

  pub(crate) unsafe fn from_payload(payload: NonNull<u8>) -> Self {
    Self(unsafe { payload.byte_sub(HEADER_SIZE) }.cast())
  }

  pub(crate) fn addr(self) -> usize {
    self.0.as_ptr() as usize
  }

  pub(crate) fn payload(self) -> NonNull<u8> {
    unsafe { self.0.byte_add(HEADER_SIZE) }.cast()
  }

  pub(crate) unsafe fn size(self) -> usize {
    unsafe { (*self.0.as_ptr()).size }
  }

  pub(crate) unsafe fn is_free(self) -> bool {
    unsafe { (*self.0.as_ptr()).free }
  }

  pub(crate) unsafe fn prev_size(self) -> usize {
    unsafe { (*self.0.as_ptr()).prev_size }
  }

  pub(crate) unsafe fn prev_free(self) -> bool {
    unsafe { (*self.0.as_ptr()).prev_free }
  }

  #[cfg(feature = "hardened")]
  pub(crate) unsafe fn has_magic(self) -> bool {
    unsafe { (*self.0.as_ptr()).magic == MAGIC }
  }

  /// Address one past the payload, which is where the next block would start.
  pub(crate) unsafe fn end(self) -> usize {
    self.addr() + HEADER_SIZE + unsafe { self.size() }
  }

  /// Like [`end`](Self::end), but `None` if a corrupt size overflows the address space.
  #[cfg(any(test, feature = "hardened"))]
  pub(crate) unsafe fn checked_end(self) -> Option<usize> {
    self
      .addr()
      .checked_add(HEADER_SIZE)
      .and_then(|payload| payload.checked_add(unsafe { self.size() }))
  }

  pub(crate) fn is_first(
    self,
    heap_start: usize,
  ) -> bool {
    self.addr() == heap_start
  }

  pub(crate) unsafe fn is_last(
    self,
    heap_end: usize,
  ) -> bool {
    unsafe { self.end() == heap_end }
  }

  /// The block physically after this one. Only meaningful if this is not the last block.
  pub(crate) unsafe fn next(self) -> Block {
    Self(unsafe { self.0.byte_add(HEADER_SIZE + self.size()) })
  }

  /// The block physically before this one, found through the mirrored size.
  /// Only meaningful if this is not the first block.
  pub(crate) unsafe fn prev(self) -> Block {
    Self(unsafe { self.0.byte_sub(self.prev_size() + HEADER_SIZE) })
  }

  pub(crate) unsafe fn set_prev(
    self,
    size: usize,
    free: bool,
  ) {
    let header = self.0.as_ptr();
    unsafe {
      (*header).prev_size = size;
      (*header).prev_free = free;
    }
  }

  /// Writes this block's own metadata and mirrors it into the block that
  /// follows, unless this block now ends at `heap_end`.
  ///
  /// Every size or state change goes through here, so mirrors cannot go stale.
  pub(crate) unsafe fn set_current(
    self,
    size: usize,
    free: bool,
    heap_end: usize,
  ) {
    let header = self.0.as_ptr();
    unsafe {
      (*header).size = size;
      (*header).free = free;
      #[cfg(feature = "hardened")]
      {
        (*header).magic = MAGIC;
      }

      if !self.is_last(heap_end) {
        self.next().set_prev(size, free);
      }
    }
  }

  #[cfg(all(test, feature = "hardened"))]
  pub(crate) unsafe fn clear_magic(self) {
    unsafe { (*self.0.as_ptr()).magic = 0 };
  }

  /// Overwrites the size alone, leaving the magic and every mirror untouched.
  #[cfg(test)]
  pub(crate) unsafe fn overwrite_size(
    self,
    size: usize,
  ) {
    unsafe { (*self.0.as_ptr()).size = size };
  }
}
