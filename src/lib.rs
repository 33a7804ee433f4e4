//! Recipes library
//!
//! Fetches a remote recipe list and keeps each recipe's thumbnail cached on
//! disk. The binary in `main.rs` is a thin command-line front end.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod fetcher;

pub use cache::{CacheError, CachedImage, EnsureOutcome, ImageCache};
pub use config::Config;
pub use data::{FetchError, Recipe, RecipeClient};
pub use fetcher::{FetchState, Fetcher, FetcherConfig, ImageSummary, MalformedPolicy};
