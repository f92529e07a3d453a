#![deny(missing_docs)]

//! Chunked tensor storage.
//!
//! A [`ChunkedTensor`] persists one flattened schema leaf as fixed-size compressed chunks in a
//! byte store, addressed by sample and inner-axis [`Selector`]s and read back as [`NdArray`]s.

pub use array::*;
pub use data::*;
pub use meta::*;
pub use selector::*;
pub use shape::SHAPE_PREFIX;
pub use tensor::*;

mod array;
mod data;
mod keys;
pub mod layout;
mod meta;
mod selector;
mod shape;
mod tensor;
