use std::{fmt, ptr, ptr::NonNull};

use log::{debug, error, trace, warn};

use crate::{
  align::{ALIGNMENT, checked_align},
  block::{
    Arena, Block, INITIAL_IMAGE, MIN_BLOCK_SIZE, PROLOGUE, PROLOGUE_SIZE, block_size, payload_size,
  },
  check::{Violation, validate},
  coalesce::coalesce,
  config::HeapConfig,
  error::Error,
  free_list::FreeList,
  store::BackingStore,
};

/// One block as seen from outside the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload address.
  pub address: NonNull<u8>,
  /// Total size including header and footer.
  pub size: usize,
  pub allocated: bool,
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "{:p}: [{}:{}]",
      self.address,
      self.size,
      if self.allocated { 'a' } else { 'f' }
    )
  }
}

/// Totals over the blocks between the sentinels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes granted by the backing store, sentinels included.
  pub heap_size: usize,
  pub free_bytes: usize,
  pub free_blocks: usize,
  pub allocated_bytes: usize,
  pub allocated_blocks: usize,
}

/// A boundary-tag heap with an explicit free list, grown on demand from a
/// [`BackingStore`].
///
/// ```text
///   ┌─────┬──────────┬─────────┬──────────┬─────────┬──────────┐
///   │ pad │ prologue │ block … │ block …  │ block … │ epilogue │
///   │     │  [16:a]  │ [n:a/f] │ [n:a/f]  │ [n:a/f] │  [0:a]   │
///   └─────┴──────────┴─────────┴──────────┴─────────┴──────────┘
///                                                    ▲
///                                                    └── next grow lands here
/// ```
pub struct Heap<S: BackingStore> {
  store: S,
  arena: Arena,
  free: FreeList,
  config: HeapConfig,
}

impl<S: BackingStore> Heap<S> {
  /// Lays down the sentinels and one initial free block of
  /// `config.initial_size` bytes.
  pub fn init(
    mut store: S,
    config: HeapConfig,
  ) -> Result<Self, Error> {
    config.validate()?;

    let base = store.grow(INITIAL_IMAGE)?;

    if base.as_ptr() as usize % ALIGNMENT != 0 {
      return Err(Error::Misaligned);
    }

    let mut arena = Arena::new(base, INITIAL_IMAGE);
    arena.set_tags(PROLOGUE, PROLOGUE_SIZE, true);
    arena.write_epilogue();

    let mut heap = Self {
      store,
      arena,
      free: FreeList::new(),
      config,
    };

    heap.grow_heap(config.initial_size)?;

    debug!("heap initialised at {:p} with {} bytes", base, heap.arena.len());

    Ok(heap)
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Bytes granted by the backing store so far.
  pub fn heap_size(&self) -> usize {
    self.arena.len()
  }

  /// Returns a payload of at least `size` bytes, or null on failure.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    match self.try_allocate(size) {
      Ok(address) => address.as_ptr(),
      Err(err) => {
        Self::report("allocate", size, err);
        ptr::null_mut()
      }
    }
  }

  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, Error> {
    if size == 0 {
      return Err(Error::InvalidSize);
    }

    let asize = block_size(size).ok_or(Error::OutOfMemory)?;

    let block = match self.free.find_fit(&self.arena, asize) {
      Some(block) => block,
      None => self.grow_heap(asize.max(self.config.chunk_size))?,
    };

    self.place(block, asize);

    let address = self.arena.address(block);
    trace!("allocate {} -> {:p} ({} bytes)", size, address, self.arena.size(block));
    self.debug_check("allocate");

    Ok(address)
  }

  /// Returns the block at `address` to the free list. Null is ignored.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this heap.
  pub unsafe fn release(
    &mut self,
    address: *mut u8,
  ) {
    let Some(address) = NonNull::new(address) else {
      return;
    };

    let block = self.arena.block_of(address);
    let size = self.arena.size(block);

    self.arena.set_tags(block, size, false);
    coalesce(&mut self.arena, &mut self.free, block);

    trace!("release {:p} ({} bytes)", address, size);
    self.debug_check("release");
  }

  /// Resizes the block at `address`, returning null on failure or when
  /// `size` is zero (the block is released then).
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this heap. If a
  /// different pointer is returned, `address` is no longer valid.
  pub unsafe fn resize(
    &mut self,
    address: *mut u8,
    size: usize,
  ) -> *mut u8 {
    match unsafe { self.try_resize(address, size) } {
      Ok(Some(address)) => address.as_ptr(),
      Ok(None) => ptr::null_mut(),
      Err(err) => {
        Self::report("resize", size, err);
        ptr::null_mut()
      }
    }
  }

  /// Like [`resize`](Self::resize). `Ok(None)` means the block was released.
  /// On error the old block is untouched.
  ///
  /// # Safety
  ///
  /// Same contract as [`resize`](Self::resize).
  pub unsafe fn try_resize(
    &mut self,
    address: *mut u8,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, Error> {
    let Some(address) = NonNull::new(address) else {
      return self.try_allocate(size).map(Some);
    };

    if size == 0 {
      unsafe { self.release(address.as_ptr()) };
      return Ok(None);
    }

    let block = self.arena.block_of(address);
    let old_size = self.arena.size(block);
    let new_size = block_size(size).ok_or(Error::OutOfMemory)?;

    if new_size <= old_size {
      if old_size - new_size >= MIN_BLOCK_SIZE {
        self.arena.set_tags(block, new_size, true);
        let tail = self.arena.next_block(block);
        self.arena.set_tags(tail, old_size - new_size, false);
        coalesce(&mut self.arena, &mut self.free, tail);

        trace!("shrink {:p} from {} to {} bytes", address, old_size, new_size);
        self.debug_check("resize");
      }

      return Ok(Some(address));
    }

    let fresh = self.try_allocate(size)?;
    let target = self.arena.block_of(fresh);

    unsafe {
      self.arena.copy_payload(block, target, size.min(payload_size(old_size)));
      self.release(address.as_ptr());
    }

    trace!("move {:p} -> {:p} ({} bytes)", address, fresh, size);

    Ok(Some(fresh))
  }

  /// Payload bytes available behind `address`.
  ///
  /// # Safety
  ///
  /// `address` must be a live pointer returned by this heap.
  pub unsafe fn usable_size(
    &self,
    address: NonNull<u8>,
  ) -> usize {
    payload_size(self.arena.size(self.arena.block_of(address)))
  }

  /// Checks every heap invariant and returns what is broken. With `verbose`
  /// each block is also dumped at info level.
  pub fn check(
    &self,
    verbose: bool,
  ) -> Vec<Violation> {
    validate(&self.arena, &self.free, verbose)
  }

  /// Every block between the sentinels, in address order.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    self.arena.blocks().map(|block| self.info(block))
  }

  /// Free blocks in list order, most recently freed first.
  pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    self.free.iter(&self.arena).map(|block| self.info(block))
  }

  pub fn free_list_len(&self) -> usize {
    self.free.iter(&self.arena).count()
  }

  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(
      HeapStats {
        heap_size: self.arena.len(),
        ..HeapStats::default()
      },
      |mut stats, block| {
        if block.allocated {
          stats.allocated_bytes += block.size;
          stats.allocated_blocks += 1;
        } else {
          stats.free_bytes += block.size;
          stats.free_blocks += 1;
        }
        stats
      },
    )
  }

  fn info(
    &self,
    block: Block,
  ) -> BlockInfo {
    let tag = self.arena.header(block);
    BlockInfo {
      address: self.arena.address(block),
      size: tag.size(),
      allocated: tag.is_allocated(),
    }
  }

  /// Takes `block` off the free list and allocates `asize` bytes of it,
  /// splitting off the rest when it can stand alone as a block.
  fn place(
    &mut self,
    block: Block,
    asize: usize,
  ) {
    let csize = self.arena.size(block);
    self.free.remove(&mut self.arena, block);

    if csize - asize >= MIN_BLOCK_SIZE {
      self.arena.set_tags(block, asize, true);
      let rest = self.arena.next_block(block);
      self.arena.set_tags(rest, csize - asize, false);
      coalesce(&mut self.arena, &mut self.free, rest);
    } else {
      self.arena.set_tags(block, csize, true);
    }
  }

  /// Appends a free block of at least `bytes` before the epilogue and
  /// returns it after coalescing with a free predecessor.
  fn grow_heap(
    &mut self,
    bytes: usize,
  ) -> Result<Block, Error> {
    let size = checked_align(bytes)
      .ok_or(Error::OutOfMemory)?
      .max(MIN_BLOCK_SIZE);

    let region = self.store.grow(size)?;

    if region.as_ptr() != self.arena.end() {
      return Err(Error::Discontiguous);
    }

    let block = self.arena.extend(size);
    self.arena.set_tags(block, size, false);
    self.arena.write_epilogue();

    debug!("grow heap by {} bytes to {}", size, self.arena.len());

    Ok(coalesce(&mut self.arena, &mut self.free, block))
  }

  fn debug_check(
    &self,
    operation: &str,
  ) {
    if !self.config.debug_checks {
      return;
    }

    for violation in self.check(false) {
      error!("heap inconsistent after {operation}: {violation}");
    }
  }

  fn report(
    operation: &str,
    size: usize,
    err: Error,
  ) {
    match err {
      Error::InvalidSize => trace!("{operation} {size}: {err}"),
      _ => warn!("{operation} {size}: {err}"),
    }
  }
}

impl<S: BackingStore> fmt::Debug for Heap<S> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Heap")
      .field("arena", &self.arena)
      .field("free_head", &self.free.head())
      .field("config", &self.config)
      .finish()
  }
}
