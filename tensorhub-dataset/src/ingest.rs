//! Bulk ingestion of many samples across several tensors.

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tensorhub_error::{HubResult, ResultExt, hub_bail};
use tensorhub_tensor::{ChunkedTensor, NdArray, Selector, TensorData};

use crate::Dataset;

/// Samples for one tensor, keyed by its schema path.
pub type Column = (String, Vec<NdArray>);

/// Number of consecutive samples that share a chunk.
fn samples_per_chunk(tensor: &ChunkedTensor) -> usize {
    let descriptor = tensor.descriptor();
    let sample_bytes = descriptor.sample_bytes().max(1);
    descriptor.chunk_size().div_ceil(sample_bytes).max(1)
}

/// Split `start..start + len` at chunk boundaries.
fn partitions(start: usize, len: usize, per_chunk: usize) -> Vec<(usize, usize)> {
    let end = start + len;
    let mut out = Vec::new();
    let mut lo = start;
    while lo < end {
        let hi = ((lo / per_chunk + 1) * per_chunk).min(end);
        out.push((lo, hi));
        lo = hi;
    }
    out
}

/// Write `columns` into `dataset`, sample `i` of every column landing at `start + i`.
///
/// Work is split into chunk-aligned partitions and spread over the rayon pool. The dataset must
/// already be large enough; this never resizes.
pub fn write_parallel(dataset: &Dataset, start: usize, columns: Vec<Column>) -> HubResult<()> {
    let mut tasks = Vec::new();
    for (path, samples) in columns {
        let tensor = dataset.tensor(&path)?;
        let end = start + samples.len();
        if end > dataset.len() {
            hub_bail!(OutOfBounds: end, 0, dataset.len());
        }
        let mut samples = samples.into_iter();
        for (lo, hi) in partitions(start, end - start, samples_per_chunk(tensor)) {
            tasks.push((tensor, lo, samples.by_ref().take(hi - lo).collect::<Vec<_>>()));
        }
    }

    let count = tasks.len();
    tasks
        .into_par_iter()
        .try_for_each(|(tensor, lo, samples)| -> HubResult<()> {
            for (offset, sample) in samples.into_iter().enumerate() {
                let index = lo + offset;
                let selector = Selector::from(index);
                tensor
                    .write(&[selector], &TensorData::Dense(sample))
                    .context(|| format!("writing sample {index} of {}", tensor.path()))?;
            }
            Ok(())
        })
        .context(|| format!("ingesting into {}", dataset.location()))?;
    log::debug!("ingested {count} partitions into {}", dataset.location());
    Ok(())
}
