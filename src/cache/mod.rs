//! Client-side cache of remote resources.
//!
//! This module provides a backend-agnostic keyed store that:
//! - Holds the most recent known value per resource key
//! - Notifies subscribers on every write
//! - Marks entries stale on invalidation and refetches them for active observers
//! - Lets optimistic mutations cancel and pause fetches for the keys they touch

mod key;
mod store;
mod traits;

pub use key::ResourceKey;
pub use store::{fetcher, Fetcher, QueryCache};
pub use traits::{CacheResult, CacheSource};
