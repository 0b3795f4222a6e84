use core::alloc::{GlobalAlloc, Layout};
use core::cell::Cell;
use core::ptr;

use spin::{Mutex, MutexGuard};

use crate::{Allocator, block::HEADER_ALIGN, source::BreakSource};

thread_local! {
  /// Address of the `Locked` this thread is currently inside, 0 if none.
  static HELD: Cell<usize> = const { Cell::new(0) };
}

/// An [`Allocator`] behind a spin lock, usable as a `#[global_allocator]`.
///
/// ```rust,ignore
/// use tagalloc::{Allocator, Locked, Sbrk};
///
/// #[global_allocator]
/// static HEAP: Locked<Sbrk> = Locked::new(Allocator::new(Sbrk));
/// ```
///
/// Handles are only aligned to [`HEADER_ALIGN`], and requests for stricter
/// alignment get null. A program whose std or dependencies ask for more
/// (the libtest harness does) aborts on its first such allocation, so it
/// cannot install this as its global allocator.
///
/// The engine logs while the lock is held. If the installed logger
/// allocates, its allocation re-enters the same `Locked` on the same thread:
/// such a nested `alloc` returns null and a nested `dealloc` leaks the block
/// instead of spinning on the lock forever.
pub struct Locked<S> {
  inner: Mutex<Allocator<S>>,
}

/// Restores the outer `HELD` value when a `Locked` call returns or unwinds.
struct Entered {
  outer: usize,
}

impl Drop for Entered {
  fn drop(&mut self) {
    HELD.with(|held| held.set(self.outer));
  }
}

impl<S> Locked<S> {
  pub const fn new(allocator: Allocator<S>) -> Self {
    Self {
      inner: Mutex::new(allocator),
    }
  }

  /// Locks the engine. Not guarded against re-entry; keep allocating loggers
  /// away from code that holds this guard.
  pub fn lock(&self) -> MutexGuard<'_, Allocator<S>> {
    self.inner.lock()
  }

  /// Marks this thread as inside `self`, or `None` if it already is.
  fn enter(&self) -> Option<Entered> {
    let this = self as *const Self as usize;
    let outer = HELD.with(|held| held.replace(this));
    if outer == this {
      return None;
    }
    Some(Entered { outer })
  }
}

unsafe impl<S: BreakSource + Send> GlobalAlloc for Locked<S> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > HEADER_ALIGN {
      return ptr::null_mut();
    }
    let Some(_entered) = self.enter() else {
      return ptr::null_mut();
    };
    self.lock().alloc(layout.size())
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    let Some(_entered) = self.enter() else {
      return;
    };
    unsafe { self.lock().free(ptr) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::FixedArena;
  use log::{LevelFilter, Log, Metadata, Record};
  use spin::Once;
  use std::{sync::Arc, thread};

  static LOGGED_HEAP: Once<Locked<FixedArena>> = Once::new();

  thread_local! {
    static NESTED_REFUSED: Cell<bool> = const { Cell::new(false) };
  }

  /// A logger that allocates from `LOGGED_HEAP` for every record.
  struct AllocatingLogger;

  impl Log for AllocatingLogger {
    fn enabled(
      &self,
      _metadata: &Metadata<'_>,
    ) -> bool {
      true
    }

    fn log(
      &self,
      _record: &Record<'_>,
    ) {
      let Some(heap) = LOGGED_HEAP.get() else {
        return;
      };
      let layout = Layout::new::<u64>();
      unsafe {
        let ptr = heap.alloc(layout);
        if ptr.is_null() {
          NESTED_REFUSED.with(|refused| refused.set(true));
        } else {
          heap.dealloc(ptr, layout);
        }
      }
    }

    fn flush(&self) {}
  }

  static LOGGER: AllocatingLogger = AllocatingLogger;

  #[test]
  fn test_global_alloc_interface() {
    let heap = Locked::new(Allocator::new(FixedArena::new(4096)));

    unsafe {
      let layout = Layout::new::<u64>();
      let ptr = heap.alloc(layout) as *mut u64;
      assert!(!ptr.is_null());
      ptr.write(42);
      assert_eq!(ptr.read(), 42);

      heap.dealloc(ptr as *mut u8, layout);
      assert_eq!(heap.alloc(layout) as *mut u64, ptr);
    }
    heap.lock().check().unwrap();
  }

  #[test]
  fn test_over_aligned_layout_is_refused() {
    let heap = Locked::new(Allocator::new(FixedArena::new(4096)));
    let layout = Layout::from_size_align(16, HEADER_ALIGN * 4).unwrap();

    assert!(unsafe { heap.alloc(layout) }.is_null());
    assert!(heap.lock().region().is_empty());
  }

  #[test]
  fn test_allocating_logger_does_not_deadlock() {
    let heap = LOGGED_HEAP.call_once(|| Locked::new(Allocator::new(FixedArena::new(1 << 20))));
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);

    let layout = Layout::array::<u8>(100).unwrap();
    unsafe {
      let ptr = heap.alloc(layout);
      assert!(!ptr.is_null());
      assert!(NESTED_REFUSED.with(Cell::get));

      heap.dealloc(ptr, layout);
    }

    // The outer call left the thread free to enter again.
    let again = unsafe { heap.alloc(Layout::new::<u64>()) };
    assert!(!again.is_null());
    heap.lock().check().unwrap();
  }

  #[test]
  fn test_separate_heaps_nest() {
    let outer = Locked::new(Allocator::new(FixedArena::new(4096)));
    let inner = Locked::new(Allocator::new(FixedArena::new(4096)));

    let _entered = outer.enter().unwrap();
    assert!(outer.enter().is_none());

    let layout = Layout::new::<u64>();
    let ptr = unsafe { inner.alloc(layout) };
    assert!(!ptr.is_null());
    assert!(outer.enter().is_none());
  }

  #[test]
  fn test_shared_across_threads() {
    let heap = Arc::new(Locked::new(Allocator::new(FixedArena::new(1 << 20))));

    let workers: Vec<_> = (0..4)
      .map(|id| {
        let heap = Arc::clone(&heap);
        thread::spawn(move || {
          let layout = Layout::from_size_align(32 + id * 8, 8).unwrap();
          for round in 0..200 {
            unsafe {
              let ptr = heap.alloc(layout);
              assert!(!ptr.is_null());
              ptr::write_bytes(ptr, (id + round) as u8, layout.size());
              assert_eq!(*ptr.add(layout.size() - 1), (id + round) as u8);
              heap.dealloc(ptr, layout);
            }
          }
        })
      })
      .collect();

    for worker in workers {
      worker.join().unwrap();
    }

    let allocator = heap.lock();
    allocator.check().unwrap();
    assert_eq!(allocator.stats().used_bytes, 0);
  }
}
