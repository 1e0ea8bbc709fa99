//! # tagalloc - A Boundary-Tag Heap Allocator
//!
//! This crate provides a general purpose heap allocator over a single,
//! contiguous, growable address range. Blocks carry boundary tags at both
//! ends, free blocks are tracked on an explicit doubly-linked free list, and
//! neighbouring free blocks are merged as soon as they appear.
//!
//! ## Overview
//!
//! ```text
//!   Managed Range:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                                                                      │
//!   │  ┌────┬─────┬────────┬──────────┬────────┬──────────────────┬─────┐  │
//!   │  │pad │ pro │ A1     │ free     │ A2     │ free             │ epi │  │
//!   │  │    │[a]  │ [a]    │ [f]      │ [a]    │ [f]              │[0:a]│  │
//!   │  └────┴─────┴────────┴──────────┴────────┴──────────────────┴─────┘  │
//!   │                        ▲                   ▲                    ▲    │
//!   │                        │                   │                    │    │
//!   │                        └──── free list ────┘              grow() here│
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   First fit over the free list, split on placement, coalesce on release.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Boundary tags and offset arithmetic (internal)
//!   ├── free_list  - Explicit LIFO free list (internal)
//!   ├── coalesce   - Boundary-tag coalescing (internal)
//!   ├── heap       - Heap: init / allocate / release / resize
//!   ├── check      - Heap validator
//!   ├── store      - BackingStore trait, SbrkStore, MmapStore
//!   ├── config     - HeapConfig
//!   └── error      - Error
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Heap, HeapConfig, MmapStore};
//!
//! let store = MmapStore::with_capacity(1 << 20).unwrap();
//! let mut heap = Heap::init(store, HeapConfig::default()).unwrap();
//!
//! let ptr = heap.allocate(64);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     ptr.write_bytes(0x2A, 64);
//!
//!     let ptr = heap.resize(ptr, 16);
//!     assert_eq!(*ptr, 0x2A);
//!
//!     heap.release(ptr);
//! }
//!
//! assert!(heap.check(false).is_empty());
//! ```
//!
//! ## How It Works
//!
//! Every block starts with a header word and ends with an identical footer
//! word holding its size and an allocated bit:
//!
//! ```text
//!   ┌──────────┬────────────────────────────────┬──────────┐
//!   │  header  │            payload             │  footer  │
//!   │ size | a │                                │ size | a │
//!   └──────────┴────────────────────────────────┴──────────┘
//!              ▲
//!              └── Pointer returned to user (16-byte aligned)
//! ```
//!
//! The footer lets a block find its left neighbour in constant time, so
//! releasing a block can merge it with both neighbours without a search.
//! While a block is free its first two payload words hold the free-list
//! links, stored as offsets from the start of the managed range.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Grow only**: Memory is never returned to the backing store
//! - **First fit**: Placement favours recently freed blocks over the best fit
//!
//! ## Safety
//!
//! `allocate` is safe. `release` and `resize` take raw pointers and are
//! `unsafe`: passing a pointer this heap did not hand out, or one that was
//! already released, corrupts the heap. [`Heap::check`] exists to catch that
//! during testing. [`BackingStore`] is an `unsafe trait`: the heap writes
//! into whatever regions the store hands it.

pub mod align;
mod block;
mod check;
mod coalesce;
mod config;
mod error;
mod free_list;
mod heap;
mod store;

pub use block::{MIN_BLOCK_SIZE, OVERHEAD, Tag};
pub use check::Violation;
pub use config::{DEFAULT_CHUNK_SIZE, HeapConfig};
pub use error::Error;
pub use heap::{BlockInfo, Heap, HeapStats};
pub use store::{BackingStore, MmapStore, SbrkStore};
