//! # tagalloc - A Boundary-Tag Heap Allocator
//!
//! This crate provides a first-fit **boundary-tag allocator**: a replacement
//! for `malloc`/`free` over one contiguous heap that grows through an
//! `sbrk`-like break.
//!
//! ## Overview
//!
//! Every block carries its metadata in-band, right in front of the payload.
//! Besides its own size and state, each header mirrors the size and state of
//! the block physically before it (the "boundary tag"):
//!
//! ```text
//!   heap_start                                                      heap_end
//!   │                                                                (break)
//!   ▼                                                                   ▼
//!   ┌────────┬─────────┬────────┬────────────────┬────────┬─────────────┐
//!   │ hdr A  │ A (16)  │ hdr B  │ B (40, free)   │ hdr C  │ C (24)      │
//!   │ prev:  │  used   │ prev:  │                │ prev:  │  used       │
//!   │ -1/free│         │ 16/used│                │ 40/free│             │
//!   └────────┴─────────┴────────┴────────────────┴────────┴─────────────┘
//!
//!   next block = header + size           (forward, by arithmetic)
//!   prev block = header - prev_size - hdr (backward, through the mirror)
//! ```
//!
//! There is no free list and no pointer between blocks. Freeing C above
//! finds B in O(1) through C's mirror and merges the two.
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align        - Word rounding (align!, checked_align)
//!   ├── block        - In-band header and address arithmetic (internal)
//!   ├── source       - Growth primitives: Sbrk, FixedArena
//!   ├── region       - The committed [heap_start, heap_end) range
//!   ├── allocator    - First-fit alloc, split, free, coalesce
//!   ├── diagnostics  - walk(), check(), stats()
//!   └── locked       - Spin-locked GlobalAlloc wrapper
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Allocator, FixedArena};
//!
//! let mut allocator = Allocator::new(FixedArena::new(64 * 1024));
//!
//! let x = allocator.alloc(10);
//! unsafe { allocator.free(x) };
//!
//! // The freed block is reused, no growth needed.
//! assert_eq!(allocator.alloc(10), x);
//! assert!(allocator.check().is_ok());
//! ```
//!
//! ## How It Works
//!
//! `alloc` walks the blocks from `heap_start` and takes the first free one
//! that is large enough. If the leftover is worth a block of its own it is
//! split off as a new free block:
//!
//! ```text
//!   before:  ┌─────┬──────────────── S (free) ────────────────┐
//!   after:   ┌─────┬─── k (used) ───┬─────┬── S-k-hdr (free) ─┐
//! ```
//!
//! When nothing fits, the heap grows by exactly one block. `free` marks the
//! block free and merges it with a free successor and a free predecessor,
//! so adjacent free blocks never survive a call.
//!
//! ## Limitations
//!
//! - **Single-threaded engine**: wrap it in [`Locked`] to share it
//! - **No shrinking**: memory is never given back to the break source
//! - **Word alignment only**: handles are aligned to [`HEADER_ALIGN`]
//! - **Trusting `free`**: a foreign or double-freed pointer is undefined
//!   behavior unless the `hardened` feature is enabled
//!
//! ## Safety
//!
//! `free` is `unsafe`: only handles returned by the same allocator and not
//! yet freed may be passed to it.

pub mod align;
mod allocator;
mod block;
mod config;
mod diagnostics;
mod error;
mod locked;
mod region;
mod source;

pub use allocator::Allocator;
pub use block::{HEADER_ALIGN, HEADER_SIZE, SENTINEL_SIZE};
pub use config::AllocatorConfig;
pub use diagnostics::{BlockInfo, HeapStats, Walk};
pub use error::{AllocError, HeapCheckError};
pub use locked::Locked;
pub use region::HeapRegion;
pub use source::{BreakSource, FAILURE_SENTINEL, FixedArena, Sbrk};
