//! In-memory catalog searched through the result cache.
//!
//! [`SearchOrchestrator`] is the read path and [`MutationHooks`] the write
//! path; both receive the catalog and the cache explicitly.

mod error;
mod hooks;
mod index;
mod search;
mod store;

pub use error::CatalogError;
pub use hooks::{CatalogOptions, MutationHooks};
pub use index::{FieldIndex, FieldValueIndex, IndexMatch};
pub use search::{ResultSource, SearchOrchestrator, SearchResults, merge};
pub use store::{Catalog, Record};
