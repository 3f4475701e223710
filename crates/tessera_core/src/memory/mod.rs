//! # Memory Management
//!
//! Chunked, non-relocating storage for component values.
//!
//! Each component family gets its own [`ComponentPool`]. Pools grow one
//! chunk at a time and never move a value once it has been written, so
//! slot addresses survive any amount of later growth.

mod pool;

pub use pool::ComponentPool;
