use crate::block::{Arena, Block};

/// Explicit LIFO list threaded through the payloads of free blocks.
///
/// ```text
///   head ──► ┌──────┐ next ┌──────┐ next ┌──────┐
///            │  B3  │ ───► │  B1  │ ───► │  B2  │ ───► nil
///   nil ◄─── └──────┘ ◄─── └──────┘ ◄─── └──────┘
///              prev          prev          prev
/// ```
#[derive(Debug, Default)]
pub struct FreeList {
  head: Option<Block>,
}

impl FreeList {
  pub fn new() -> Self {
    Self { head: None }
  }

  pub fn head(&self) -> Option<Block> {
    self.head
  }

  /// Pushes `block` as the new head. `block` must be free and unlinked.
  pub fn insert(
    &mut self,
    arena: &mut Arena,
    block: Block,
  ) {
    debug_assert!(!arena.is_allocated(block));

    arena.set_prev_free(block, None);
    arena.set_next_free(block, self.head);

    if let Some(head) = self.head {
      arena.set_prev_free(head, Some(block));
    }

    self.head = Some(block);
  }

  /// Splices `block` out using only its own links.
  pub fn remove(
    &mut self,
    arena: &mut Arena,
    block: Block,
  ) {
    let prev = arena.prev_free(block);
    let next = arena.next_free(block);

    match prev {
      Some(prev) => arena.set_next_free(prev, next),
      None => {
        debug_assert_eq!(self.head, Some(block), "removing a block that is not on the free list");
        self.head = next;
      }
    }

    if let Some(next) = next {
      arena.set_prev_free(next, prev);
    }
  }

  /// First free block of at least `size` bytes, scanning from the head.
  pub fn find_fit(
    &self,
    arena: &Arena,
    size: usize,
  ) -> Option<Block> {
    self.iter(arena).find(|&block| arena.size(block) >= size)
  }

  pub fn iter<'a>(
    &self,
    arena: &'a Arena,
  ) -> Iter<'a> {
    Iter {
      arena,
      cursor: self.head,
    }
  }
}

/// Walks the list from the head following `next_free` links.
pub struct Iter<'a> {
  arena: &'a Arena,
  cursor: Option<Block>,
}

impl Iterator for Iter<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    let block = self.cursor?;
    self.cursor = self.arena.next_free(block);
    Some(block)
  }
}
