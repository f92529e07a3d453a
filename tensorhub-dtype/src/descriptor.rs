use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::PType;
use crate::schema::format_shape;

/// One flattened leaf of a schema: everything needed to allocate its chunked storage.
///
/// Axis 0 of the stored tensor is the sample axis and is not part of `shape`/`max_shape`, which
/// describe a single sample.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDescriptor {
    path: String,
    dtype: PType,
    shape: Vec<Option<usize>>,
    max_shape: Vec<usize>,
    chunk_size: usize,
    compressor: String,
    ragged: bool,
}

impl TensorDescriptor {
    /// Create a descriptor. Callers are expected to have validated `shape` against `max_shape`.
    pub fn new(
        path: String,
        dtype: PType,
        shape: Vec<Option<usize>>,
        max_shape: Vec<usize>,
        chunk_size: usize,
        compressor: &str,
        ragged: bool,
    ) -> Self {
        Self {
            path,
            dtype,
            shape,
            max_shape,
            chunk_size,
            compressor: compressor.to_lowercase(),
            ragged,
        }
    }

    /// The `/`-prefixed leaf path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The element type
    pub fn dtype(&self) -> PType {
        self.dtype
    }

    /// Declared per-sample shape, `None` for axes whose extent varies per sample
    pub fn shape(&self) -> &[Option<usize>] {
        &self.shape
    }

    /// Per-sample upper bound, which fixes chunk addressing
    pub fn max_shape(&self) -> &[usize] {
        &self.max_shape
    }

    /// Uncompressed chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Codec name, lowercased
    pub fn compressor(&self) -> &str {
        &self.compressor
    }

    /// Whether the first per-sample axis is a variable length sequence axis
    pub fn is_ragged(&self) -> bool {
        self.ragged
    }

    /// Whether any per-sample axis has a placeholder extent
    pub fn is_dynamic(&self) -> bool {
        self.shape.iter().any(Option::is_none)
    }

    /// Number of per-sample axes
    pub fn ndim(&self) -> usize {
        self.max_shape.len()
    }

    /// Bytes occupied by one sample laid out at `max_shape`
    pub fn sample_bytes(&self) -> usize {
        self.max_shape.iter().product::<usize>() * self.dtype.byte_width()
    }
}

impl Display for TensorDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}{} max=({}) chunk={} codec={}",
            self.path,
            self.dtype,
            format_shape(&self.shape),
            self.max_shape.iter().join(", "),
            self.chunk_size,
            self.compressor
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_bytes_use_max_shape() {
        let desc = TensorDescriptor::new(
            "/image".into(),
            PType::U16,
            vec![None, None, Some(3)],
            vec![32, 32, 3],
            1 << 20,
            "LZ4",
            false,
        );
        assert_eq!(desc.sample_bytes(), 32 * 32 * 3 * 2);
        assert!(desc.is_dynamic());
        assert_eq!(desc.compressor(), "lz4");
        assert_eq!(desc.to_string(), "/image: u16(None, None, 3) max=(32, 32, 3) chunk=1048576 codec=lz4");
    }

    #[test]
    fn scalar_descriptor() {
        let desc = TensorDescriptor::new("/id".into(), PType::I64, vec![], vec![], 64, "default", false);
        assert_eq!(desc.sample_bytes(), 8);
        assert_eq!(desc.ndim(), 0);
        assert!(!desc.is_dynamic());
    }
}
