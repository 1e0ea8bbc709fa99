use log::trace;

use crate::{
  block::{Arena, Block},
  free_list::FreeList,
};

/// Merges a free, unlisted `block` with whichever physical neighbours are
/// free, links the result onto the free list and returns it.
///
/// ```text
///   prev   block   next          result
///   [a]    [f]     [a]     ──►   [a][   f   ][a]       block unchanged
///   [a]    [f]     [f]     ──►   [a][     f     ]      anchored at block
///   [f]    [f]     [a]     ──►   [     f     ][a]      anchored at prev
///   [f]    [f]     [f]     ──►   [       f       ]     anchored at prev
/// ```
///
/// The sentinels are always allocated, so no edge checks are needed.
pub fn coalesce(
  arena: &mut Arena,
  free: &mut FreeList,
  block: Block,
) -> Block {
  let prev_allocated = arena.prev_footer(block).is_allocated();
  let next = arena.next_block(block);
  let next_allocated = arena.is_allocated(next);
  let mut size = arena.size(block);

  let merged = match (prev_allocated, next_allocated) {
    (true, true) => block,
    (true, false) => {
      trace!("coalesce {:#x} with next {:#x}", block.offset(), next.offset());
      free.remove(arena, next);
      size += arena.size(next);
      arena.set_tags(block, size, false);
      block
    }
    (false, true) => {
      let prev = arena.prev_block(block);
      trace!("coalesce {:#x} with prev {:#x}", block.offset(), prev.offset());
      free.remove(arena, prev);
      size += arena.size(prev);
      arena.set_tags(prev, size, false);
      prev
    }
    (false, false) => {
      let prev = arena.prev_block(block);
      trace!(
        "coalesce {:#x} with prev {:#x} and next {:#x}",
        block.offset(),
        prev.offset(),
        next.offset()
      );
      free.remove(arena, prev);
      free.remove(arena, next);
      size += arena.size(prev) + arena.size(next);
      arena.set_tags(prev, size, false);
      prev
    }
  };

  free.insert(arena, merged);
  merged
}
