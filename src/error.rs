use thiserror::Error;

/// Reasons an allocator operation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  /// The break source refused to grow, or the configured heap cap was reached.
  #[error("out of memory: could not grow the heap by {requested} bytes")]
  OutOfMemory { requested: usize },

  /// The request cannot be represented once rounded and combined with a header.
  #[error("allocation of {requested} bytes overflows the address space")]
  SizeOverflow { requested: usize },

  /// The program break was moved by someone other than this allocator.
  #[error("heap is no longer contiguous: expected break at {expected:#x}, got {actual:#x}")]
  Discontiguous { expected: usize, actual: usize },

  /// The pointer handed to `free` is not a live allocation of this heap.
  #[error("invalid free of {address:#x}")]
  InvalidFree { address: usize },
}

/// A layout invariant found broken by [`Allocator::check`](crate::Allocator::check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapCheckError {
  /// A block extends past `heap_end`.
  #[error("block at {address:#x} ends at {block_end:#x}, past the heap end {heap_end:#x}")]
  Overrun {
    address: usize,
    block_end: usize,
    heap_end: usize,
  },

  /// The walk stopped before covering the whole heap.
  #[error("blocks cover the heap only up to {covered:#x}, heap ends at {heap_end:#x}")]
  Underrun { covered: usize, heap_end: usize },

  /// A block's mirrored predecessor metadata does not match its predecessor.
  #[error(
    "stale boundary tag at {address:#x}: mirrors ({found_size}, free={found_free}), predecessor is ({expected_size}, free={expected_free})"
  )]
  StaleBoundaryTag {
    address: usize,
    expected_size: usize,
    expected_free: bool,
    found_size: usize,
    found_free: bool,
  },

  /// The first block does not carry the sentinel predecessor.
  #[error("first block at {address:#x} does not carry the sentinel predecessor")]
  BadSentinel { address: usize },

  /// Two physically adjacent blocks are both free.
  #[error("free blocks at {first:#x} and {second:#x} were not coalesced")]
  UncoalescedNeighbors { first: usize, second: usize },
}
