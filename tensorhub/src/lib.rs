//! Chunked, compressed tensor datasets.
//!
//! Re-exports the dataset API at the root and every layer beneath it as a module.

pub use tensorhub_dataset::*;
pub use {
    tensorhub_codec as codec, tensorhub_dtype as dtype, tensorhub_error as error,
    tensorhub_io as io, tensorhub_metrics as metrics, tensorhub_tensor as tensor,
};

#[cfg(test)]
mod tests {
    use crate::dtype::{CompositeSchema, PType, TensorSchema};
    use crate::tensor::{NdArray, Selector};
    use crate::DatasetOptions;

    #[test]
    fn reexports_compose() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().join("tiles").display());
        let schema = CompositeSchema::new()
            .with_field("tile", TensorSchema::fixed(PType::U8, vec![2, 2]).with_compressor("lz4"));
        let dataset = DatasetOptions::default().create_at(&url, schema, 1).unwrap();
        let tile = NdArray::try_new(PType::U8, vec![2, 2], vec![1, 2, 3, 4]).unwrap();
        dataset.write("tile", &[Selector::from(0)], tile.clone()).unwrap();
        dataset.close().unwrap();

        let dataset = DatasetOptions::default().open_at(&url).unwrap();
        let read = dataset.narrow("tile").unwrap().index(0).unwrap().compute().unwrap();
        assert_eq!(read.into_array().unwrap(), tile);
    }
}
