/// Tunables for an [`Allocator`](crate::Allocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
  /// Smallest payload worth carving off as a free remainder when splitting.
  ///
  /// A free block is split only if its slack over the request is at least
  /// `min_block_size + HEADER_SIZE`.
  pub min_block_size: usize,
  /// Upper bound on `heap_end - heap_start`; `None` leaves it to the break source.
  pub max_heap_size: Option<usize>,
}

impl AllocatorConfig {
  pub const DEFAULT: Self = Self {
    min_block_size: core::mem::size_of::<usize>(),
    max_heap_size: None,
  };

  pub const fn with_min_block_size(
    mut self,
    min_block_size: usize,
  ) -> Self {
    self.min_block_size = min_block_size;
    self
  }

  pub const fn with_max_heap_size(
    mut self,
    max_heap_size: usize,
  ) -> Self {
    self.max_heap_size = Some(max_heap_size);
    self
  }

  /// Slack a free block needs over a request before it is split.
  pub const fn split_threshold(&self) -> usize {
    self.min_block_size.saturating_add(crate::block::HEADER_SIZE)
  }
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}
