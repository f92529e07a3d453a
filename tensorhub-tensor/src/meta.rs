use serde::{Deserialize, Serialize};
use tensorhub_dtype::{PType, TensorDescriptor};

/// Persistent metadata of one chunked tensor, mirrored into the dataset metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorMeta {
    /// Element type
    pub dtype: PType,
    /// Declared per-sample shape, `null` for variable axes
    pub shape: Vec<Option<usize>>,
    /// Per-sample upper bound
    pub max_shape: Vec<usize>,
    /// Uncompressed chunk size in bytes
    pub chunk_size: usize,
    /// Codec name
    pub compressor: String,
    /// Number of samples
    pub sample_count: usize,
    /// Whether the first per-sample axis is a ragged sequence axis
    #[serde(default)]
    pub ragged: bool,
}

impl TensorMeta {
    /// Metadata for a new tensor described by `descriptor`.
    pub fn new(descriptor: &TensorDescriptor, sample_count: usize) -> Self {
        Self {
            dtype: descriptor.dtype(),
            shape: descriptor.shape().to_vec(),
            max_shape: descriptor.max_shape().to_vec(),
            chunk_size: descriptor.chunk_size(),
            compressor: descriptor.compressor().to_string(),
            sample_count,
            ragged: descriptor.is_ragged(),
        }
    }

    /// The descriptor of the tensor stored at `path`.
    pub fn descriptor(&self, path: &str) -> TensorDescriptor {
        TensorDescriptor::new(
            path.to_string(),
            self.dtype,
            self.shape.clone(),
            self.max_shape.clone(),
            self.chunk_size,
            &self.compressor,
            self.ragged,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_form() {
        let descriptor = TensorDescriptor::new(
            "/image".into(),
            PType::U8,
            vec![None, None, Some(3)],
            vec![32, 32, 3],
            1 << 24,
            "png",
            false,
        );
        let meta = TensorMeta::new(&descriptor, 5);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "dtype": "u8",
                "shape": [null, null, 3],
                "max_shape": [32, 32, 3],
                "chunk_size": 16777216,
                "compressor": "png",
                "sample_count": 5,
                "ragged": false,
            })
        );
        let parsed: TensorMeta = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.descriptor("/image"), descriptor);
    }
}
