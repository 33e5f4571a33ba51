//! Catalog state
//!
//! - Shared data structures (data.rs)
//! - The PhotoStore contract and its SQLite implementation (library.rs)

pub mod data;
pub mod library;

pub use data::{PhotoRecord, PhotoUpdate, Status};
pub use library::{Library, PhotoFilter, PhotoQuery, PhotoStore, PAGE_SIZE};
