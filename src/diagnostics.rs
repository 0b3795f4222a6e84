//! Heap walking and invariant checks.
//!
//! Nothing here is used by `alloc` or `free`; it exists for tests, debugging
//! and the demo.

use std::fmt;

use crate::{
  allocator::{Allocator, Blocks},
  block::{HEADER_SIZE, SENTINEL_SIZE},
  error::HeapCheckError,
};

/// One block as seen by [`Allocator::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Address of the block header.
  pub address: usize,
  /// Payload bytes, excluding the header.
  pub size: usize,
  pub free: bool,
  /// Mirrored size of the preceding block, [`SENTINEL_SIZE`] for the first block.
  pub prev_size: usize,
  pub prev_free: bool,
}

impl BlockInfo {
  /// Address handed out by `alloc` for this block.
  pub fn payload(&self) -> usize {
    self.address + HEADER_SIZE
  }

  /// One past the last payload byte.
  pub fn end(&self) -> usize {
    self.payload() + self.size
  }
}

/// Address-ordered iterator over every block in the heap.
///
/// Call [`Allocator::walk`] again to restart.
pub struct Walk<'a> {
  blocks: Blocks<'a>,
}

impl Iterator for Walk<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let block = self.blocks.next()?;
    unsafe {
      Some(BlockInfo {
        address: block.addr(),
        size: block.size(),
        free: block.is_free(),
        prev_size: block.prev_size(),
        prev_free: block.prev_free(),
      })
    }
  }
}

/// Summary of a heap's occupancy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  /// `heap_end - heap_start`, headers included.
  pub heap_bytes: usize,
  pub blocks: usize,
  pub free_blocks: usize,
  pub used_bytes: usize,
  pub free_bytes: usize,
  /// Payload of the largest free block; the biggest request served without growth.
  pub largest_free: usize,
}

impl<S> Allocator<S> {
  pub fn walk(&self) -> Walk<'_> {
    Walk { blocks: self.blocks() }
  }

  /// Verifies the heap layout:
  ///
  /// - blocks tile `[heap_start, heap_end)` exactly,
  /// - the first block carries the sentinel predecessor,
  /// - every other block mirrors its predecessor's size and state,
  /// - no two neighbors are both free.
  pub fn check(&self) -> Result<(), HeapCheckError> {
    let heap_end = self.region.end();
    let mut covered = self.region.start_addr();
    let mut prev: Option<BlockInfo> = None;

    for info in self.walk() {
      match prev {
        None if info.prev_size != SENTINEL_SIZE || !info.prev_free => {
          return Err(HeapCheckError::BadSentinel { address: info.address });
        }
        Some(prev) if info.prev_size != prev.size || info.prev_free != prev.free => {
          return Err(HeapCheckError::StaleBoundaryTag {
            address: info.address,
            expected_size: prev.size,
            expected_free: prev.free,
            found_size: info.prev_size,
            found_free: info.prev_free,
          });
        }
        Some(prev) if prev.free && info.free => {
          return Err(HeapCheckError::UncoalescedNeighbors {
            first: prev.address,
            second: info.address,
          });
        }
        _ => {}
      }

      let block_end = info
        .payload()
        .checked_add(info.size)
        .filter(|&block_end| block_end <= heap_end);
      let Some(block_end) = block_end else {
        return Err(HeapCheckError::Overrun {
          address: info.address,
          block_end: info.payload().saturating_add(info.size),
          heap_end,
        });
      };

      covered = block_end;
      prev = Some(info);
    }

    if covered != heap_end {
      return Err(HeapCheckError::Underrun { covered, heap_end });
    }
    Ok(())
  }

  pub fn stats(&self) -> HeapStats {
    self.walk().fold(
      HeapStats {
        heap_bytes: self.region.len(),
        ..HeapStats::default()
      },
      |mut stats, info| {
        stats.blocks += 1;
        if info.free {
          stats.free_blocks += 1;
          stats.free_bytes += info.size;
          stats.largest_free = stats.largest_free.max(info.size);
        } else {
          stats.used_bytes += info.size;
        }
        stats
      },
    )
  }
}

impl<S> fmt::Display for Allocator<S> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(
      f,
      "heap [{:#x}, {:#x}) {} bytes",
      self.region.start_addr(),
      self.region.end(),
      self.region.len()
    )?;
    for info in self.walk() {
      writeln!(
        f,
        "  {:#x}  {:>8}  {}",
        info.payload(),
        info.size,
        if info.free { "free" } else { "used" }
      )?;
    }
    Ok(())
  }
}
