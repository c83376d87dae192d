//! Catalog Result Cache
//!
//! Caches the record-id sets produced by catalog searches in an external
//! key-value backend and evicts them precisely when a record or an index
//! they depend on changes:
//!
//! - **Entries**: `q:{digest}` keys holding the encoded result set
//! - **Back-references**: `r:{id}` and `f:{field}` lists of the entry keys
//!   that must go when that record or field changes
//!
//! All keys live under the catalog's scope path, so two catalogs sharing a
//! backend never collide.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `catalogcache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_secs = 7200
//! retry_interval_secs = 10
//! # ... see config.rs for all options
//! ```

mod backend;
mod breaker;
mod clock;
mod config;
mod entry;
mod error;
mod invalidation;
mod keys;
mod memory;
mod stats;
mod store;

pub use backend::{BackendError, CacheBackend};
pub use breaker::AvailabilityBreaker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use entry::{QueryResult, RankedRow, ResultSet};
pub use error::CacheError;
pub use invalidation::{InvalidationIndex, InvalidationTarget};
pub use keys::{BackendKey, CacheKey, KeyCodec, QueryArguments, QueryValue, RecordId, Scope};
pub use memory::MemoryBackend;
pub use stats::{CacheStats, ScopeStats};
pub use store::{CacheLookup, ResultCache};
