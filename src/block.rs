//! Boundary-tag block layout.
//!
//! ```text
//!   Allocated block:                       Free block:
//!   ┌──────────┬───────────────┬────────┐  ┌──────────┬──────┬──────┬─────┬────────┐
//!   │ header   │   payload     │ footer │  │ header   │ next │ prev │ ... │ footer │
//!   │ size | a │               │size | a│  │ size | 0 │ free │ free │     │size | 0│
//!   └──────────┴───────────────┴────────┘  └──────────┴──────┴──────┴─────┴────────┘
//!              ▲                                      ▲
//!              └── Block (payload offset)             └── links are arena offsets
//! ```
//!
//! This is the only module that turns offsets into addresses. Everything
//! above it talks in [`Block`] offsets relative to the arena base.

use std::{fmt, ptr, ptr::NonNull};

use crate::align::{ALIGNMENT, WSIZE, checked_align};

/// Header plus footer.
pub const OVERHEAD: usize = 2 * WSIZE;

/// Header, footer and room for both free-list links.
pub const MIN_BLOCK_SIZE: usize = OVERHEAD + 2 * WSIZE;

/// Size of the prologue sentinel: a header and a footer, no payload.
pub const PROLOGUE_SIZE: usize = OVERHEAD;

/// Padding word, prologue header, prologue footer, epilogue header.
pub const INITIAL_IMAGE: usize = 4 * WSIZE;

/// Payload offset of the prologue sentinel.
pub const PROLOGUE: Block = Block(2 * WSIZE);

/// Payload offset of the first block after the prologue.
pub const FIRST_BLOCK: Block = Block(INITIAL_IMAGE);

const ALLOCATED: usize = 0x1;
const SIZE_MASK: usize = !(WSIZE - 1);

// Offset 0 is the padding word and never a payload.
const NIL: usize = 0;

/// A packed boundary tag: block size with the allocation bit in the low bit.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(usize);

impl Tag {
  pub const fn pack(
    size: usize,
    allocated: bool,
  ) -> Self {
    Self(size | allocated as usize)
  }

  pub const fn bits(self) -> usize {
    self.0
  }

  pub const fn size(self) -> usize {
    self.0 & SIZE_MASK
  }

  pub const fn is_allocated(self) -> bool {
    self.0 & ALLOCATED != 0
  }
}

impl fmt::Display for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "[{}:{}]", self.size(), if self.is_allocated() { 'a' } else { 'f' })
  }
}

impl fmt::Debug for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    fmt::Display::fmt(self, f)
  }
}

/// A block, named by the offset of its payload from the arena base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(usize);

impl Block {
  pub(crate) const fn at(offset: usize) -> Self {
    Self(offset)
  }

  pub const fn offset(self) -> usize {
    self.0
  }
}

/// Block size needed to hold `payload` bytes, or `None` if it overflows.
pub fn block_size(payload: usize) -> Option<usize> {
  checked_align(payload)?
    .checked_add(OVERHEAD)
    .map(|size| size.max(MIN_BLOCK_SIZE))
}

/// Payload capacity of a block of `size` bytes.
pub const fn payload_size(size: usize) -> usize {
  size - OVERHEAD
}

/// The managed range: a base address and the number of bytes granted so far.
#[derive(Debug)]
pub struct Arena {
  base: NonNull<u8>,
  len: usize,
}

impl Arena {
  pub fn new(
    base: NonNull<u8>,
    len: usize,
  ) -> Self {
    debug_assert_eq!(base.as_ptr() as usize % ALIGNMENT, 0);
    Self { base, len }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  /// First address past the managed range.
  pub fn end(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.len) }
  }

  /// Appends `bytes` just granted by the backing store. The returned block
  /// sits where the old epilogue was, so its header overwrites it.
  pub fn extend(
    &mut self,
    bytes: usize,
  ) -> Block {
    let block = self.epilogue();
    self.len += bytes;
    block
  }

  fn word(
    &self,
    offset: usize,
  ) -> usize {
    debug_assert!(offset % WSIZE == 0 && offset + WSIZE <= self.len);
    unsafe { self.base.as_ptr().add(offset).cast::<usize>().read() }
  }

  fn set_word(
    &mut self,
    offset: usize,
    value: usize,
  ) {
    debug_assert!(offset % WSIZE == 0 && offset + WSIZE <= self.len);
    unsafe { self.base.as_ptr().add(offset).cast::<usize>().write(value) }
  }

  pub fn header(
    &self,
    block: Block,
  ) -> Tag {
    Tag(self.word(block.0 - WSIZE))
  }

  pub fn footer(
    &self,
    block: Block,
  ) -> Tag {
    Tag(self.word(block.0 + self.header(block).size() - OVERHEAD))
  }

  pub fn size(
    &self,
    block: Block,
  ) -> usize {
    self.header(block).size()
  }

  pub fn is_allocated(
    &self,
    block: Block,
  ) -> bool {
    self.header(block).is_allocated()
  }

  /// Writes identical header and footer tags.
  pub fn set_tags(
    &mut self,
    block: Block,
    size: usize,
    allocated: bool,
  ) {
    let tag = Tag::pack(size, allocated);
    self.set_word(block.0 - WSIZE, tag.0);
    self.set_word(block.0 + size - OVERHEAD, tag.0);
  }

  /// Overwrites only the header word.
  pub fn set_header(
    &mut self,
    block: Block,
    tag: Tag,
  ) {
    self.set_word(block.0 - WSIZE, tag.0);
  }

  /// Physical successor.
  pub fn next_block(
    &self,
    block: Block,
  ) -> Block {
    Block(block.0 + self.size(block))
  }

  /// Footer of the physical predecessor, found just below our header.
  pub fn prev_footer(
    &self,
    block: Block,
  ) -> Tag {
    Tag(self.word(block.0 - OVERHEAD))
  }

  /// Physical predecessor.
  pub fn prev_block(
    &self,
    block: Block,
  ) -> Block {
    Block(block.0 - self.prev_footer(block).size())
  }

  /// The zero-size sentinel that terminates the range.
  pub fn epilogue(&self) -> Block {
    Block(self.len)
  }

  pub fn write_epilogue(&mut self) {
    let epilogue = self.epilogue();
    self.set_header(epilogue, Tag::pack(0, true));
  }

  pub fn next_free(
    &self,
    block: Block,
  ) -> Option<Block> {
    Self::link(self.word(block.0))
  }

  pub fn prev_free(
    &self,
    block: Block,
  ) -> Option<Block> {
    Self::link(self.word(block.0 + WSIZE))
  }

  pub fn set_next_free(
    &mut self,
    block: Block,
    next: Option<Block>,
  ) {
    self.set_word(block.0, next.map_or(NIL, |b| b.0));
  }

  pub fn set_prev_free(
    &mut self,
    block: Block,
    prev: Option<Block>,
  ) {
    self.set_word(block.0 + WSIZE, prev.map_or(NIL, |b| b.0));
  }

  fn link(offset: usize) -> Option<Block> {
    (offset != NIL).then_some(Block(offset))
  }

  pub fn address(
    &self,
    block: Block,
  ) -> NonNull<u8> {
    unsafe { self.base.add(block.0) }
  }

  /// Maps a payload address back to its block.
  pub fn block_of(
    &self,
    address: NonNull<u8>,
  ) -> Block {
    let offset = address.as_ptr() as usize - self.base.as_ptr() as usize;
    debug_assert!(offset >= FIRST_BLOCK.0 && offset < self.len);
    Block(offset)
  }

  /// Blocks between the prologue and the epilogue, in address order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      arena: self,
      cursor: FIRST_BLOCK,
    }
  }

  /// Copies `bytes` of payload between two distinct blocks.
  ///
  /// # Safety
  ///
  /// Both blocks must be live and hold at least `bytes` of payload.
  pub unsafe fn copy_payload(
    &mut self,
    from: Block,
    to: Block,
    bytes: usize,
  ) {
    unsafe {
      ptr::copy_nonoverlapping(self.address(from).as_ptr(), self.address(to).as_ptr(), bytes);
    }
  }
}

pub struct Blocks<'a> {
  arena: &'a Arena,
  cursor: Block,
}

impl Iterator for Blocks<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    let block = self.cursor;
    let size = self.arena.size(block);

    // Stops at the epilogue, or at a size that would run off the end.
    if size == 0 || block.0 + size > self.arena.len {
      return None;
    }

    self.cursor = Block(block.0 + size);
    Some(block)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn test_arena(
    buffer: &mut Vec<u128>,
    len: usize,
  ) -> Arena {
    buffer.resize(len / 16 + 1, 0);
    Arena::new(NonNull::new(buffer.as_mut_ptr() as *mut u8).unwrap(), len)
  }

  #[test]
  fn test_tag_packing() {
    let tag = Tag::pack(48, true);
    assert_eq!(tag.size(), 48);
    assert!(tag.is_allocated());
    assert_eq!(tag.bits(), 49);

    let tag = Tag::pack(4096, false);
    assert_eq!(tag.size(), 4096);
    assert!(!tag.is_allocated());
    assert_eq!(tag.to_string(), "[4096:f]");
  }

  #[test]
  fn test_block_size() {
    assert_eq!(block_size(1), Some(MIN_BLOCK_SIZE));
    assert_eq!(block_size(2 * WSIZE), Some(MIN_BLOCK_SIZE));
    assert_eq!(block_size(100), Some(crate::align!(100) + OVERHEAD));
    assert!(block_size(100).unwrap() % ALIGNMENT == 0);
    assert_eq!(block_size(usize::MAX), None);
    assert_eq!(block_size(usize::MAX - ALIGNMENT), None);
  }

  #[test]
  fn test_tags_and_neighbours() {
    let mut buffer = Vec::new();
    let mut arena = test_arena(&mut buffer, INITIAL_IMAGE + 96);

    arena.set_tags(PROLOGUE, PROLOGUE_SIZE, true);
    let first = FIRST_BLOCK;
    arena.set_tags(first, 32, true);
    let second = arena.next_block(first);
    arena.set_tags(second, 64, false);
    arena.write_epilogue();

    assert_eq!(second.offset(), first.offset() + 32);
    assert_eq!(arena.header(second), arena.footer(second));
    assert_eq!(arena.prev_block(second), first);
    assert_eq!(arena.prev_block(first), PROLOGUE);
    assert_eq!(arena.next_block(second), arena.epilogue());
    assert!(arena.is_allocated(arena.epilogue()));
    assert_eq!(arena.size(arena.epilogue()), 0);
    assert_eq!(arena.blocks().collect::<Vec<_>>(), vec![first, second]);
  }

  #[test]
  fn test_free_links() {
    let mut buffer = Vec::new();
    let mut arena = test_arena(&mut buffer, INITIAL_IMAGE + 64);

    let block = FIRST_BLOCK;
    arena.set_tags(block, 64, false);
    arena.set_next_free(block, Some(Block::at(128)));
    arena.set_prev_free(block, None);

    assert_eq!(arena.next_free(block), Some(Block::at(128)));
    assert_eq!(arena.prev_free(block), None);
    assert_eq!(arena.header(block), arena.footer(block));
  }

  #[test]
  fn test_extend_replaces_epilogue() {
    let mut buffer = Vec::new();
    let mut arena = test_arena(&mut buffer, INITIAL_IMAGE + 64);
    arena.len = INITIAL_IMAGE;

    let block = arena.extend(64);

    assert_eq!(block, FIRST_BLOCK);
    assert_eq!(arena.len(), INITIAL_IMAGE + 64);
    assert_eq!(arena.epilogue().offset(), INITIAL_IMAGE + 64);
    assert_eq!(arena.block_of(arena.address(block)), block);
  }
}
