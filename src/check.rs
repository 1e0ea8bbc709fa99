use std::{collections::HashSet, fmt};

use log::info;

use crate::{
  align::ALIGNMENT,
  block::{Arena, Block, FIRST_BLOCK, MIN_BLOCK_SIZE, PROLOGUE, PROLOGUE_SIZE, Tag},
  free_list::FreeList,
};

/// A broken heap invariant. Offsets are relative to the arena base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
  BadPrologue { header: Tag, footer: Tag },
  BadEpilogue { offset: usize, tag: Tag },
  /// The block walk ended somewhere other than the end of the arena.
  EpilogueMisplaced { offset: usize, expected: usize },
  Misaligned { offset: usize },
  TagMismatch { offset: usize, header: Tag, footer: Tag },
  Undersized { offset: usize, size: usize },
  /// A block claims to extend past the end of the arena; the walk stops there.
  OutOfBounds { offset: usize, size: usize },
  AdjacentFree { offset: usize },
  /// A free block that cannot be reached from the free-list head.
  Unlisted { offset: usize },
  /// The free list points at something that is not a free block; the walk stops there.
  ListedNotFree { offset: usize },
  ListCycle { offset: usize },
  BrokenBackLink { offset: usize },
}

impl fmt::Display for Violation {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::BadPrologue { header, footer } => {
        write!(f, "bad prologue: header {header} footer {footer}")
      }
      Self::BadEpilogue { offset, tag } => write!(f, "{offset:#x}: bad epilogue header {tag}"),
      Self::EpilogueMisplaced { offset, expected } => {
        write!(f, "block walk ended at {offset:#x}, arena ends at {expected:#x}")
      }
      Self::Misaligned { offset } => write!(f, "{offset:#x}: payload is not {ALIGNMENT}-byte aligned"),
      Self::TagMismatch {
        offset,
        header,
        footer,
      } => write!(f, "{offset:#x}: header {header} does not match footer {footer}"),
      Self::Undersized { offset, size } => {
        write!(f, "{offset:#x}: size {size} is below the minimum block size")
      }
      Self::OutOfBounds { offset, size } => {
        write!(f, "{offset:#x}: size {size} runs past the end of the heap")
      }
      Self::AdjacentFree { offset } => write!(f, "{offset:#x}: free block follows a free block"),
      Self::Unlisted { offset } => write!(f, "{offset:#x}: free block missing from the free list"),
      Self::ListedNotFree { offset } => write!(f, "{offset:#x}: free list entry is not a free block"),
      Self::ListCycle { offset } => write!(f, "{offset:#x}: free list revisits a block"),
      Self::BrokenBackLink { offset } => write!(f, "{offset:#x}: prev link does not match predecessor"),
    }
  }
}

/// Walks the arena and the free list once each, collecting every violation.
pub fn validate(
  arena: &Arena,
  free: &FreeList,
  verbose: bool,
) -> Vec<Violation> {
  let mut violations = Vec::new();

  if verbose {
    info!("heap ({:p}, {} bytes):", arena.address(Block::at(0)), arena.len());
  }

  let header = arena.header(PROLOGUE);
  let footer = arena.prev_footer(FIRST_BLOCK);
  if header != Tag::pack(PROLOGUE_SIZE, true) || footer != header {
    violations.push(Violation::BadPrologue { header, footer });
  }

  let free_blocks = walk_blocks(arena, verbose, &mut violations);
  walk_free_list(arena, free, &free_blocks, &mut violations);

  violations
}

/// Prologue to epilogue by size. Returns the free blocks seen on the way.
fn walk_blocks(
  arena: &Arena,
  verbose: bool,
  violations: &mut Vec<Violation>,
) -> HashSet<Block> {
  let mut free_blocks = HashSet::new();
  let mut prev_free = false;
  let mut block = FIRST_BLOCK;

  loop {
    let header = arena.header(block);
    let offset = block.offset();
    let size = header.size();

    if size == 0 {
      break;
    }

    let end = match offset.checked_add(size) {
      Some(end) if end <= arena.len() => end,
      _ => {
        violations.push(Violation::OutOfBounds { offset, size });
        return free_blocks;
      }
    };

    let footer = arena.footer(block);

    if verbose {
      info!("{offset:#x}: header: {header} footer: {footer}");
    }

    if offset % ALIGNMENT != 0 {
      violations.push(Violation::Misaligned { offset });
    }
    if size < MIN_BLOCK_SIZE {
      violations.push(Violation::Undersized { offset, size });
    }
    if header != footer {
      violations.push(Violation::TagMismatch {
        offset,
        header,
        footer,
      });
    }

    let free = !header.is_allocated();
    if free {
      if prev_free {
        violations.push(Violation::AdjacentFree { offset });
      }
      free_blocks.insert(block);
    }
    prev_free = free;

    block = Block::at(end);
  }

  let offset = block.offset();
  let tag = arena.header(block);

  if verbose {
    info!("{offset:#x}: EOL");
  }

  if offset != arena.len() {
    violations.push(Violation::EpilogueMisplaced {
      offset,
      expected: arena.len(),
    });
  }
  if !tag.is_allocated() {
    violations.push(Violation::BadEpilogue { offset, tag });
  }

  free_blocks
}

/// Follows `next_free` from the head, only through blocks the arena walk
/// proved to be free, so a corrupt link cannot send it out of bounds.
fn walk_free_list(
  arena: &Arena,
  free: &FreeList,
  free_blocks: &HashSet<Block>,
  violations: &mut Vec<Violation>,
) {
  let mut listed = HashSet::new();
  let mut prev = None;
  let mut cursor = free.head();

  while let Some(block) = cursor {
    if !free_blocks.contains(&block) {
      violations.push(Violation::ListedNotFree {
        offset: block.offset(),
      });
      break;
    }
    if !listed.insert(block) {
      violations.push(Violation::ListCycle {
        offset: block.offset(),
      });
      break;
    }
    if arena.prev_free(block) != prev {
      violations.push(Violation::BrokenBackLink {
        offset: block.offset(),
      });
    }

    prev = Some(block);
    cursor = arena.next_free(block);
  }

  let mut unlisted: Vec<Block> = free_blocks.difference(&listed).copied().collect();
  unlisted.sort();
  violations.extend(unlisted.into_iter().map(|block| Violation::Unlisted {
    offset: block.offset(),
  }));
}

#[cfg(test)]
mod tests {
  use std::ptr::{self, NonNull};

  use test_log::test;

  use super::*;
  use crate::{Heap, HeapConfig, block::INITIAL_IMAGE, store::MmapStore};

  fn test_heap() -> Heap<MmapStore> {
    Heap::init(MmapStore::with_capacity(1 << 16).unwrap(), HeapConfig::default()).unwrap()
  }

  /// Prologue, `layout` blocks back to back, epilogue; nothing listed.
  fn test_arena(
    buffer: &mut Vec<u128>,
    layout: &[(usize, bool)],
  ) -> Arena {
    let len = INITIAL_IMAGE + layout.iter().map(|&(size, _)| size).sum::<usize>();
    buffer.resize(len / 16 + 1, 0);
    let mut arena = Arena::new(NonNull::new(buffer.as_mut_ptr() as *mut u8).unwrap(), len);

    arena.set_tags(PROLOGUE, PROLOGUE_SIZE, true);
    let mut block = FIRST_BLOCK;
    for &(size, allocated) in layout {
      arena.set_tags(block, size, allocated);
      block = arena.next_block(block);
    }
    arena.write_epilogue();

    arena
  }

  #[test]
  fn test_fresh_heap_is_clean() {
    let mut heap = test_heap();
    assert_eq!(heap.check(true), vec![]);

    let a = heap.allocate(100);
    let _b = heap.allocate(200);
    unsafe { heap.release(a) };

    assert_eq!(heap.check(true), vec![]);
  }

  #[test]
  fn test_detects_overflow_into_footer() {
    let mut heap = test_heap();

    let a = heap.allocate(40);
    let _b = heap.allocate(40);

    // Writes one word past the payload, over the footer.
    unsafe {
      let capacity = heap.usable_size(NonNull::new(a).unwrap());
      ptr::write_bytes(a.add(capacity), 0xFF, 8);
    }

    let violations = heap.check(false);
    assert!(matches!(violations[..], [Violation::TagMismatch { .. }]), "{violations:?}");
  }

  #[test]
  fn test_detects_clobbered_free_link() {
    let mut heap = test_heap();

    let a = heap.allocate(40);
    let _b = heap.allocate(40);
    unsafe {
      heap.release(a);
      // Use after free: zero the next link, cutting the tail of the list off.
      ptr::write_bytes(a, 0, 8);
    }

    let violations = heap.check(false);
    assert_eq!(violations.len(), 1);
    assert!(matches!(violations[0], Violation::Unlisted { .. }));
  }

  #[test]
  fn test_detects_adjacent_free_and_unlisted() {
    let mut buffer = Vec::new();
    let arena = test_arena(&mut buffer, &[(32, true), (48, false), (64, false)]);
    let free = FreeList::new();

    let violations = validate(&arena, &free, false);

    assert_eq!(
      violations,
      vec![
        Violation::AdjacentFree { offset: 112 },
        Violation::Unlisted { offset: 64 },
        Violation::Unlisted { offset: 112 },
      ]
    );
  }

  #[test]
  fn test_detects_bad_sentinels() {
    let mut buffer = Vec::new();
    let mut arena = test_arena(&mut buffer, &[(32, true)]);

    arena.set_header(PROLOGUE, Tag::pack(PROLOGUE_SIZE, false));
    let epilogue = arena.epilogue();
    arena.set_header(epilogue, Tag::pack(0, false));

    let violations = validate(&arena, &FreeList::new(), false);

    assert_eq!(violations.len(), 2);
    assert!(matches!(violations[0], Violation::BadPrologue { .. }));
    assert!(matches!(violations[1], Violation::BadEpilogue { offset, .. } if offset == arena.len()));
  }

  #[test]
  fn test_detects_oversized_block() {
    let mut buffer = Vec::new();
    let mut arena = test_arena(&mut buffer, &[(32, true), (32, true)]);

    arena.set_header(FIRST_BLOCK, Tag::pack(4096, true));

    let violations = validate(&arena, &FreeList::new(), false);

    assert_eq!(
      violations,
      vec![Violation::OutOfBounds {
        offset: FIRST_BLOCK.offset(),
        size: 4096,
      }]
    );
  }

  #[test]
  fn test_detects_undersized_and_misplaced_end() {
    let mut buffer = Vec::new();
    let mut arena = test_arena(&mut buffer, &[(32, true), (32, true)]);

    // Shrinks the first block to 16 bytes: the walk then lands mid-block.
    arena.set_tags(FIRST_BLOCK, 16, true);

    let violations = validate(&arena, &FreeList::new(), false);

    assert!(violations.contains(&Violation::Undersized {
      offset: FIRST_BLOCK.offset(),
      size: 16,
    }));
    assert!(violations.contains(&Violation::EpilogueMisplaced {
      offset: FIRST_BLOCK.offset() + 16,
      expected: arena.len(),
    }));
  }

  #[test]
  fn test_detects_list_cycle() {
    let mut buffer = Vec::new();
    let mut arena = test_arena(&mut buffer, &[(48, false), (32, true), (48, false)]);
    let mut free = FreeList::new();

    let first = FIRST_BLOCK;
    let second = Block::at(FIRST_BLOCK.offset() + 80);
    free.insert(&mut arena, first);
    free.insert(&mut arena, second);
    arena.set_next_free(first, Some(second));

    let violations = validate(&arena, &free, false);

    assert_eq!(
      violations,
      vec![Violation::ListCycle {
        offset: second.offset(),
      }]
    );
  }

  #[test]
  fn test_violation_messages() {
    let violation = Violation::TagMismatch {
      offset: 0x40,
      header: Tag::pack(48, true),
      footer: Tag::pack(32, false),
    };
    assert_eq!(violation.to_string(), "0x40: header [48:a] does not match footer [32:f]");
  }
}
