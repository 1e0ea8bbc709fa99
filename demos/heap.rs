use std::{io::Read, ptr};

use tagalloc::{Heap, HeapConfig, SbrkStore};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    SbrkStore::program_break(),
  );
}

/// Prints every block between the prologue and the epilogue.
fn print_heap(heap: &Heap<SbrkStore>) {
  let stats = heap.stats();
  println!(
    "    heap: {} bytes, {} allocated in {} blocks, {} free in {} blocks",
    stats.heap_size, stats.allocated_bytes, stats.allocated_blocks, stats.free_bytes, stats.free_blocks,
  );
  for block in heap.blocks() {
    println!("    {block}");
  }
}

fn main() {
  env_logger::init();

  print_program_break("start");
  block_until_enter_pressed();

  // Generous first chunk, so the system allocator behind `println!` has
  // already settled before the heap needs to grow again.
  let config = HeapConfig::default().with_initial_size(64 * 1024).with_debug_checks(true);

  let mut heap = match Heap::init(SbrkStore::new(), config) {
    Ok(heap) => heap,
    Err(err) => {
      eprintln!("failed to initialise heap: {err}");
      return;
    }
  };

  print_program_break("after init");
  print_heap(&heap);
  block_until_enter_pressed();

  unsafe {
    // --------------------------------------------------------------------
    // 1) Two allocations carved off the front of the initial free block.
    // --------------------------------------------------------------------
    let first = heap.allocate(100);
    let second = heap.allocate(200);
    println!("\n[1] allocate(100) = {:?}, allocate(200) = {:?}", first, second);

    ptr::write_bytes(first, 0xAB, 100);
    print_heap(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Release the first block and ask for a slightly smaller one.
    //    First fit hands the same block back.
    // --------------------------------------------------------------------
    heap.release(first);
    let third = heap.allocate(90);
    println!(
      "\n[2] release(first); allocate(90) = {:?} -> {}",
      third,
      if third == first {
        "Yes, it reused the freed block"
      } else {
        "No, it allocated somewhere else"
      }
    );
    print_heap(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Shrink in place: the pointer stays, the tail becomes free.
    // --------------------------------------------------------------------
    let shrunk = heap.resize(second, 16);
    println!("\n[3] resize(second, 16) = {:?} (was {:?})", shrunk, second);
    print_heap(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Grow past the end of the heap: the block moves and the program
    //    break advances.
    // --------------------------------------------------------------------
    print_program_break("before large resize");

    let grown = heap.resize(third, 128 * 1024);
    if grown.is_null() {
      println!("\n[4] resize(third, 128 KiB) failed, old block kept at {:?}", third);
      heap.release(third);
    } else {
      println!("\n[4] resize(third, 128 KiB) = {:?} (was {:?})", grown, third);
      heap.release(grown);
    }

    print_program_break("after large resize");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Release everything and check the heap.
    // --------------------------------------------------------------------
    heap.release(shrunk);
    heap.release(ptr::null_mut());
    print_heap(&heap);

    let violations = heap.check(false);
    if violations.is_empty() {
      println!("\n[5] heap is consistent");
    } else {
      for violation in violations {
        println!("\n[5] {violation}");
      }
    }
  }

  println!("\n[6] End of example. Process will exit and the OS will reclaim all memory.");
}
