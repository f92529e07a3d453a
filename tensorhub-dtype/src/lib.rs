#![cfg(target_endian = "little")]
#![deny(missing_docs)]

//! Element types and the schema tree for TensorHub datasets.
//!
//! A dataset sample is described by a [`SchemaNode`] tree. Flattening the tree yields one
//! [`TensorDescriptor`] per leaf; each descriptor is backed by its own chunked tensor store.

pub use descriptor::*;
pub use half;
pub use ptype::*;
pub use schema::*;

mod descriptor;
mod ptype;
mod schema;
