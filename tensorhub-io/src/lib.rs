#![deny(missing_docs)]

//! Storage for TensorHub datasets.
//!
//! A dataset lives in a [`ByteStore`]: a local directory, an in-memory map, or (with the
//! `object_store` feature) any bucket `object_store` can reach. Tensors read and write it through
//! a [`TieredCache`], which keeps recently used chunks in memory and in a local scratch
//! directory and defers writes until eviction or flush.

pub use cache::*;
pub use config::*;
pub use local::*;
pub use lock::*;
pub use memory::*;
#[cfg(feature = "object_store")]
pub use object_backend::*;
pub use open::*;
pub use store::*;

mod cache;
mod config;
mod local;
mod lock;
mod memory;
#[cfg(feature = "object_store")]
mod object_backend;
mod open;
mod store;
