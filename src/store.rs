use std::ptr::{self, NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::{align, align::checked_align, error::Error};

/// Source of fresh address space for a [`Heap`](crate::Heap).
///
/// Every successful `grow` should return a region that starts exactly where
/// the previous one ended, and the first region should be aligned to
/// [`ALIGNMENT`](crate::align::ALIGNMENT). The heap checks both and refuses
/// a region that breaks them. Space is never handed back.
///
/// # Safety
///
/// The heap writes boundary tags straight into every region `grow` returns.
/// Each region must be valid for reads and writes of `bytes` bytes, owned
/// exclusively by the heap, and stay mapped for as long as the store lives.
/// Implementing the trait therefore takes an `unsafe impl`:
///
/// ```compile_fail
/// use std::ptr::NonNull;
/// use tagalloc::{BackingStore, Error};
///
/// struct Dangling;
///
/// impl BackingStore for Dangling {
///     fn grow(&mut self, _bytes: usize) -> Result<NonNull<u8>, Error> {
///         Ok(NonNull::dangling())
///     }
/// }
/// ```
pub unsafe trait BackingStore {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, Error>;
}

/// Grows the process data segment with `sbrk(2)`.
///
/// ```text
///   High Address ┌─────────────────────┐
///                │       Heap          │ ↑ grows up (sbrk)
///                ├─────────────────────┤ ← Program Break
///                │   Uninitialized     │
///                │       Data          │
///   Low Address  └─────────────────────┘
/// ```
///
/// Anything else in the process that moves the break (the system `malloc`
/// included) breaks contiguity; the heap notices and refuses such a region.
#[derive(Debug, Default)]
pub struct SbrkStore {
  primed: bool,
}

impl SbrkStore {
  pub fn new() -> Self {
    Self { primed: false }
  }

  /// Current program break.
  pub fn program_break() -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }

  /// Pads the break up to the alignment quantum before the first grant.
  unsafe fn prime(&mut self) -> Result<(), Error> {
    unsafe {
      let brk = sbrk(0) as usize;
      let pad = align!(brk) - brk;

      if pad > 0 && sbrk(pad as intptr_t) == usize::MAX as *mut c_void {
        return Err(Error::OutOfMemory);
      }

      self.primed = true;
      Ok(())
    }
  }
}

unsafe impl BackingStore for SbrkStore {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, Error> {
    let increment = intptr_t::try_from(bytes).map_err(|_| Error::OutOfMemory)?;

    unsafe {
      if !self.primed {
        self.prime()?;
      }

      let address = sbrk(increment);

      if address == usize::MAX as *mut c_void {
        return Err(Error::OutOfMemory);
      }

      NonNull::new(address as *mut u8).ok_or(Error::OutOfMemory)
    }
  }
}

/// A fixed-capacity private mapping handed out front to back.
///
/// The whole capacity is reserved up front with `mmap(2)`, so grants are
/// always contiguous and the heap can be torn down by dropping the store.
#[derive(Debug)]
pub struct MmapStore {
  base: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

impl MmapStore {
  pub fn with_capacity(capacity: usize) -> Result<Self, Error> {
    if capacity == 0 {
      return Err(Error::InvalidConfig("store capacity must be non-zero"));
    }

    let capacity = checked_align(capacity).ok_or(Error::OutOfMemory)?;

    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        capacity,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(Error::OutOfMemory);
    }

    let base = NonNull::new(address as *mut u8).ok_or(Error::OutOfMemory)?;

    Ok(Self {
      base,
      capacity,
      brk: 0,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes granted so far.
  pub fn used(&self) -> usize {
    self.brk
  }
}

unsafe impl BackingStore for MmapStore {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, Error> {
    if bytes > self.capacity - self.brk {
      return Err(Error::OutOfMemory);
    }

    let address = unsafe { self.base.add(self.brk) };
    self.brk += bytes;

    Ok(address)
  }
}

impl Drop for MmapStore {
  fn drop(&mut self) {
    unsafe {
      libc::munmap(self.base.as_ptr() as *mut c_void, self.capacity);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::align::ALIGNMENT;

  #[test]
  fn test_mmap_grants_are_contiguous() {
    let mut store = MmapStore::with_capacity(4096).unwrap();

    let first = store.grow(64).unwrap();
    let second = store.grow(128).unwrap();

    assert_eq!(first.as_ptr() as usize % ALIGNMENT, 0);
    assert_eq!(unsafe { first.add(64) }, second);
    assert_eq!(store.used(), 192);

    unsafe {
      ptr::write_bytes(first.as_ptr(), 0xAB, 192);
      assert_eq!(*second.as_ptr().add(127), 0xAB);
    }
  }

  #[test]
  fn test_mmap_out_of_memory() {
    let mut store = MmapStore::with_capacity(256).unwrap();

    assert!(store.grow(200).is_ok());
    assert_eq!(store.grow(100), Err(Error::OutOfMemory));
    assert_eq!(store.used(), 200);
    assert!(store.grow(56).is_ok());
    assert_eq!(store.grow(1), Err(Error::OutOfMemory));
  }

  #[test]
  fn test_mmap_rejects_zero_capacity() {
    assert!(matches!(MmapStore::with_capacity(0), Err(Error::InvalidConfig(_))));
  }

  #[test]
  #[ignore = "moves the process program break; run alone with --ignored"]
  fn test_sbrk_grant_is_aligned_and_writable() {
    let mut store = SbrkStore::new();

    let region = store.grow(ALIGNMENT * 4).unwrap();

    assert_eq!(region.as_ptr() as usize % ALIGNMENT, 0);
    assert!(SbrkStore::program_break() as usize >= region.as_ptr() as usize + ALIGNMENT * 4);

    unsafe {
      ptr::write_bytes(region.as_ptr(), 0x5A, ALIGNMENT * 4);
      assert_eq!(*region.as_ptr().add(ALIGNMENT * 4 - 1), 0x5A);
    }
  }
}
