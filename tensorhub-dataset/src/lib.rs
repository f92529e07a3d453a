#![deny(missing_docs)]

//! Datasets of samples described by a hierarchical schema.
//!
//! A [`Dataset`] flattens its schema into one [`ChunkedTensor`](tensorhub_tensor::ChunkedTensor)
//! per leaf and keeps a `meta.json` document beside them. Indexing produces [`View`]s that read
//! or write only when resolved; composite regions fan out to every leaf underneath.

pub use dataset::*;
pub use ingest::*;
pub use metadata::*;
pub use options::*;
pub use registry::*;
pub use value::*;
pub use view::*;

mod dataset;
mod ingest;
mod metadata;
mod options;
mod registry;
mod value;
mod view;
