use std::fmt;

/// Errors reported by the allocator and its backing stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// A zero-byte allocation or resize was requested.
  InvalidSize,
  /// The backing store cannot supply any more address space.
  OutOfMemory,
  /// The backing store granted a region that does not follow the managed range.
  Discontiguous,
  /// The backing store's first region is not aligned to the alignment quantum.
  Misaligned,
  /// A [`HeapConfig`](crate::HeapConfig) field is out of range.
  InvalidConfig(&'static str),
}

impl fmt::Display for Error {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::InvalidSize => write!(f, "invalid allocation size"),
      Self::OutOfMemory => write!(f, "backing store exhausted"),
      Self::Discontiguous => write!(f, "backing store returned a non-contiguous region"),
      Self::Misaligned => write!(f, "backing store returned a misaligned region"),
      Self::InvalidConfig(field) => write!(f, "invalid heap configuration: {field}"),
    }
  }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display() {
    assert_eq!(Error::OutOfMemory.to_string(), "backing store exhausted");
    assert_eq!(
      Error::InvalidConfig("chunk_size must be non-zero").to_string(),
      "invalid heap configuration: chunk_size must be non-zero"
    );
  }
}
