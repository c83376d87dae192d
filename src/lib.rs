//! Result cache with record and field invalidation for multi-index search
//! catalogs.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod infra;
pub mod replay;
mod util;
