use std::mem;

/// Size of one boundary tag (a machine word).
pub const WSIZE: usize = mem::size_of::<usize>();

/// Alignment quantum for block sizes and payload addresses (a double word).
pub const ALIGNMENT: usize = 2 * WSIZE;

/// Rounds `value` up to the next multiple of `quantum`, which must be a power of two.
///
/// # Examples
///
/// ```rust
/// use tagalloc::align_to;
///
/// assert_eq!(align_to!(13, 8), 16);
/// assert_eq!(align_to!(16, 16), 16);
/// assert_eq!(align_to!(17, 16), 32);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $quantum:expr) => {
    (($value) + ($quantum) - 1) & !(($quantum) - 1)
  };
}

/// Rounds the given size up to the allocator's alignment quantum.
///
/// # Examples
///
/// ```rust
/// use std::mem;
/// use tagalloc::align;
///
/// match mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 16), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}

/// Overflow-checked [`align!`], for sizes that come straight from a caller.
pub fn checked_align(value: usize) -> Option<usize> {
  value.checked_add(ALIGNMENT - 1).map(|v| v & !(ALIGNMENT - 1))
}
