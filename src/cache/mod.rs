//! Cache module for storing recipe photos on disk
//!
//! Photos are downloaded once per recipe id and kept until an explicit purge.
//! Concurrent requests for the same id collapse into one download.

mod images;

pub use images::{
    CacheError, CachedImage, EnsureOutcome, EnsureResult, ImageCache, MAX_IMAGE_BYTES,
};
