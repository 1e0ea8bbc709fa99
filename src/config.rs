use crate::error::Error;

/// Default number of bytes requested from the backing store when no free block fits.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Tuning knobs for a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Minimum growth step when the free list has no fit.
  pub chunk_size: usize,
  /// Size of the free block created by `init`.
  pub initial_size: usize,
  /// Run the heap validator after every mutating operation and log what it finds.
  pub debug_checks: bool,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      chunk_size: DEFAULT_CHUNK_SIZE,
      initial_size: DEFAULT_CHUNK_SIZE,
      debug_checks: false,
    }
  }
}

impl HeapConfig {
  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_initial_size(
    mut self,
    initial_size: usize,
  ) -> Self {
    self.initial_size = initial_size;
    self
  }

  pub fn with_debug_checks(
    mut self,
    debug_checks: bool,
  ) -> Self {
    self.debug_checks = debug_checks;
    self
  }

  pub fn validate(&self) -> Result<(), Error> {
    if self.chunk_size == 0 {
      return Err(Error::InvalidConfig("chunk_size must be non-zero"));
    }
    if self.initial_size == 0 {
      return Err(Error::InvalidConfig("initial_size must be non-zero"));
    }
    Ok(())
  }
}
