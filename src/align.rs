/// Rounds the given size up to the machine word.
///
/// # Examples
///
/// ```rust
/// use tagalloc::align;
///
/// match core::mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + ::core::mem::size_of::<usize>() - 1) & !(::core::mem::size_of::<usize>() - 1)
  };
}

/// Like [`align!`], but returns `None` instead of wrapping for sizes near `usize::MAX`.
pub const fn checked_align(value: usize) -> Option<usize> {
  let word = core::mem::size_of::<usize>();
  match value.checked_add(word - 1) {
    Some(padded) => Some(padded & !(word - 1)),
    None => None,
  }
}

/// Distance from `addr` to the next multiple of `align` (a power of two).
pub(crate) const fn padding_for(
  addr: usize,
  align: usize,
) -> usize {
  addr.wrapping_neg() & (align - 1)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::mem;

  #[test]
  fn test_align() {
    let ptr_size = mem::size_of::<usize>();

    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (ptr_size * i + 1)..=(ptr_size * (i + 1));

      let expected_alignment = ptr_size * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
        assert_eq!(Some(expected), checked_align(size));
      }
    }
  }

  #[test]
  fn test_checked_align_overflow() {
    assert_eq!(checked_align(0), Some(0));
    assert_eq!(checked_align(usize::MAX), None);
    assert_eq!(checked_align(usize::MAX - 1), None);
  }

  #[test]
  fn test_padding_for() {
    assert_eq!(padding_for(0x1000, 8), 0);
    assert_eq!(padding_for(0x1001, 8), 7);
    assert_eq!(padding_for(0x1007, 8), 1);
    assert_eq!(padding_for(0x1008, 16), 8);
  }
}
