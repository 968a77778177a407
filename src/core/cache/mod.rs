// src/core/cache/mod.rs

//! The on-disk cache: positive/negative lookups and path construction.

mod repository;

pub use repository::{CacheLookup, CacheRepository};
