use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use itertools::Itertools;
use tensorhub_codec::{BUILTIN_CODECS, CodecRef, CodecRegistry, PngCodec};
use tensorhub_dtype::{PType, TensorDescriptor};
use tensorhub_error::{HubResult, ResultExt, hub_bail, hub_err};
use tensorhub_io::{ByteStoreRef, CacheConfig, PrefixedStore, TieredCache};
use tensorhub_metrics::HubMetrics;

use crate::keys::KeySpace;
use crate::layout::{chunk_spans, region_runs};
use crate::shape::ShapeRecord;
use crate::{AxisSelection, NdArray, Selector, TensorData, TensorMeta};

/// How chunked tensors reach their storage.
#[derive(Debug, Clone)]
pub struct TensorOptions {
    cache: CacheConfig,
    metrics: HubMetrics,
    codecs: CodecRegistry,
}

impl Default for TensorOptions {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            metrics: HubMetrics::default(),
            codecs: BUILTIN_CODECS.clone(),
        }
    }
}

impl TensorOptions {
    /// Set the cache configuration of every tensor opened with these options.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Share `metrics` between every tensor opened with these options.
    pub fn with_metrics(mut self, metrics: HubMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Resolve compressor names against `codecs` instead of the built-in registry.
    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// The cache configuration
    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    /// The shared metrics registry
    pub fn metrics(&self) -> &HubMetrics {
        &self.metrics
    }

    fn codec_for(&self, meta: &TensorMeta) -> HubResult<CodecRef> {
        let codec = self.codecs.get(&meta.compressor)?;
        // png packs the innermost axis as colour channels when it can
        if codec.name() == "png" {
            if let Some(channels) = meta
                .max_shape
                .last()
                .and_then(|&c| u8::try_from(c).ok())
                .filter(|c| (1..=4).contains(c))
            {
                return Ok(Arc::new(PngCodec::new(channels)?));
            }
        }
        Ok(codec)
    }
}

/// One flattened leaf tensor, stored as fixed-size compressed chunks.
///
/// Every sample occupies `max_shape` worth of bytes in the tensor's logical byte stream, and
/// chunk `i` holds bytes `i * chunk_size..(i + 1) * chunk_size` of that stream under the key
/// `<path>/<i>`. Chunks are written lazily and stored without their zero tail; bytes that were
/// never written read as zero. Tensors with variable axes keep a per-sample shape record next
/// to their chunks.
pub struct ChunkedTensor {
    path: String,
    meta: TensorMeta,
    sample_count: AtomicUsize,
    codec: CodecRef,
    keys: KeySpace,
    shapes: Option<ShapeRecord>,
}

type ChunkMap = HashMap<usize, Option<Arc<Vec<u8>>>>;

impl ChunkedTensor {
    /// Allocate a new tensor for `descriptor` holding `sample_count` unwritten samples.
    pub fn create(
        descriptor: &TensorDescriptor,
        durable: ByteStoreRef,
        sample_count: usize,
        options: &TensorOptions,
    ) -> HubResult<Self> {
        if descriptor.chunk_size() == 0 {
            hub_bail!("chunk size of {} must be positive", descriptor.path());
        }
        let tensor = Self::open(
            descriptor.path(),
            TensorMeta::new(descriptor, sample_count),
            durable,
            options,
        )?;
        log::debug!("created tensor {descriptor} with {sample_count} samples");
        Ok(tensor)
    }

    /// Open the tensor at `path` from its persisted metadata.
    pub fn open(path: &str, meta: TensorMeta, durable: ByteStoreRef, options: &TensorOptions) -> HubResult<Self> {
        let codec = options
            .codec_for(&meta)
            .context(|| format!("opening tensor {path}"))?;
        let store = Arc::new(PrefixedStore::new(durable, path));
        let cache = TieredCache::try_new(store, options.cache.clone(), &options.metrics)?;
        let shapes = meta
            .shape
            .iter()
            .any(Option::is_none)
            .then(|| ShapeRecord::new(meta.max_shape.len()));
        Ok(Self {
            path: path.to_string(),
            sample_count: AtomicUsize::new(meta.sample_count),
            meta,
            codec,
            keys: KeySpace::new(Arc::new(cache)),
            shapes,
        })
    }

    /// The `/`-prefixed leaf path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.sample_count.load(Ordering::Acquire)
    }

    /// Whether the tensor holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type
    pub fn dtype(&self) -> PType {
        self.meta.dtype
    }

    /// Per-sample upper bound
    pub fn max_shape(&self) -> &[usize] {
        &self.meta.max_shape
    }

    /// Whether the first per-sample axis is a ragged sequence axis
    pub fn is_ragged(&self) -> bool {
        self.meta.ragged
    }

    /// Whether samples record their own shape
    pub fn is_dynamic(&self) -> bool {
        self.shapes.is_some()
    }

    /// Current metadata, including the sample count
    pub fn meta(&self) -> TensorMeta {
        TensorMeta {
            sample_count: self.len(),
            ..self.meta.clone()
        }
    }

    /// The flattened descriptor
    pub fn descriptor(&self) -> TensorDescriptor {
        self.meta.descriptor(&self.path)
    }

    /// The cache in front of this tensor's storage subtree
    pub fn cache(&self) -> &TieredCache {
        self.keys.cache()
    }

    fn sample_bytes(&self) -> usize {
        self.meta.max_shape.iter().product::<usize>() * self.meta.dtype.byte_width()
    }

    /// Shape of a sample that never recorded one.
    fn default_shape(&self) -> Vec<usize> {
        self.meta
            .shape
            .iter()
            .zip(&self.meta.max_shape)
            .map(|(declared, max)| declared.unwrap_or(*max))
            .collect()
    }

    fn recorded_shape(&self, sample: usize) -> HubResult<Option<Vec<usize>>> {
        match &self.shapes {
            Some(shapes) => shapes.get(&self.keys, sample),
            None => Ok(None),
        }
    }

    /// Shape of `sample`: its recorded shape, or the declared shape with `max_shape` standing in
    /// for variable axes.
    pub fn sample_shape(&self, sample: usize) -> HubResult<Vec<usize>> {
        let len = self.len();
        if sample >= len {
            hub_bail!(OutOfBounds: sample, 0, len);
        }
        Ok(self
            .recorded_shape(sample)?
            .unwrap_or_else(|| self.default_shape()))
    }

    /// Grow or shrink the sample axis. Chunk bytes are never touched: shrinking hides samples,
    /// and growing back exposes them again.
    pub fn resize_shape(&self, sample_count: usize) {
        let previous = self.sample_count.swap(sample_count, Ordering::AcqRel);
        if previous != sample_count {
            log::debug!("resized {} from {previous} to {sample_count} samples", self.path);
        }
    }

    /// Write every dirty cached chunk to durable storage.
    pub fn flush(&self) -> HubResult<()> {
        self.keys
            .cache()
            .flush()
            .context(|| format!("flushing tensor {}", self.path))
    }

    /// Flush and release the tensor.
    pub fn close(self) -> HubResult<()> {
        self.flush()
    }

    /// Drop cached chunks without writing them back.
    pub fn discard(&self) -> HubResult<()> {
        self.keys.cache().discard()
    }

    fn check_arity(&self, selectors: &[Selector]) -> HubResult<()> {
        if selectors.len() > self.meta.max_shape.len() + 1 {
            hub_bail!(
                "too many indices for {}: {} given, tensor has {} axes",
                self.path,
                selectors.len(),
                self.meta.max_shape.len() + 1
            );
        }
        Ok(())
    }

    /// Read the selected samples and inner region.
    ///
    /// The first selector addresses samples and must lie within the sample count. The rest
    /// address per-sample axes: ranges are clamped to each sample's shape, indices must fall
    /// inside it. A range of samples whose selected regions differ in shape reads as
    /// [`TensorData::Ragged`].
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(path = %self.path)))]
    pub fn read(&self, selectors: &[Selector]) -> HubResult<TensorData> {
        self.check_arity(selectors)?;
        let samples = selectors
            .first()
            .unwrap_or(&Selector::FULL)
            .resolve_strict(self.len())?;
        let inner = selectors.get(1..).unwrap_or_default();

        let mut chunks = ChunkMap::new();
        let mut arrays = samples
            .range()
            .map(|sample| self.read_sample(sample, inner, &mut chunks))
            .collect::<HubResult<Vec<_>>>()
            .context(|| format!("reading {}", self.path))?;

        match samples {
            AxisSelection::Index(_) => arrays
                .pop()
                .map(TensorData::Dense)
                .ok_or_else(|| hub_err!(AssertionFailed: "no sample read")),
            AxisSelection::Range(_) => {
                if arrays.iter().map(NdArray::shape).all_equal() {
                    let item_shape = if arrays.is_empty() {
                        select_region(&self.default_shape(), inner)?.1
                    } else {
                        Vec::new()
                    };
                    Ok(TensorData::Dense(NdArray::stack(
                        self.meta.dtype,
                        &item_shape,
                        arrays,
                    )?))
                } else {
                    Ok(TensorData::Ragged(arrays))
                }
            }
        }
    }

    fn read_sample(&self, sample: usize, inner: &[Selector], chunks: &mut ChunkMap) -> HubResult<NdArray> {
        let extent = self
            .recorded_shape(sample)?
            .unwrap_or_else(|| self.default_shape());
        let (region, shape) = select_region(&extent, inner)?;
        let width = self.meta.dtype.byte_width();
        let base = sample * self.sample_bytes();

        let mut out = Vec::with_capacity(shape.iter().product::<usize>() * width);
        for (offset, len) in region_runs(&self.meta.max_shape, &region) {
            self.read_span(base + offset * width, len * width, chunks, &mut out)?;
        }
        NdArray::try_new(self.meta.dtype, shape, out)
    }

    fn read_span(&self, start: usize, len: usize, chunks: &mut ChunkMap, out: &mut Vec<u8>) -> HubResult<()> {
        for span in chunk_spans(start, len, self.meta.chunk_size) {
            let chunk = match chunks.get(&span.chunk) {
                Some(chunk) => chunk.clone(),
                None => {
                    let chunk = self.load_chunk(span.chunk)?.map(Arc::new);
                    chunks.insert(span.chunk, chunk.clone());
                    chunk
                }
            };
            let available = chunk
                .as_ref()
                .map_or(0, |c| c.len().saturating_sub(span.offset))
                .min(span.len);
            if let Some(chunk) = &chunk {
                out.extend_from_slice(&chunk[span.offset..span.offset + available]);
            }
            out.resize(out.len() + span.len - available, 0);
        }
        Ok(())
    }

    fn decode_chunk(&self, key: &str, encoded: &[u8]) -> HubResult<Vec<u8>> {
        self.codec
            .decode_bounded(encoded, self.meta.chunk_size)
            .context(|| format!("decoding chunk {key} of {}", self.path))
    }

    fn load_chunk(&self, index: usize) -> HubResult<Option<Vec<u8>>> {
        let key = index.to_string();
        self.keys
            .get(&key)?
            .map(|encoded| self.decode_chunk(&key, &encoded))
            .transpose()
    }

    /// Write `value` into the selected samples and inner region.
    ///
    /// For a single sample `value` is that sample's region; for a range it carries a leading
    /// sample axis (dense) or one array per sample (ragged). Partial chunk writes preserve every
    /// byte outside the written region. Fails with `OutOfBounds` for samples beyond the sample
    /// count and `ShapeMismatch` when a region does not fit `max_shape`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(path = %self.path)))]
    pub fn write(&self, selectors: &[Selector], value: &TensorData) -> HubResult<()> {
        self.check_arity(selectors)?;
        if let Some(ptype) = value.ptype() {
            if ptype != self.meta.dtype {
                hub_bail!("cannot write {ptype} values into {} of {}", self.path, self.meta.dtype);
            }
        }

        let samples = selectors
            .first()
            .unwrap_or(&Selector::FULL)
            .resolve_strict(self.len())?;
        let inner = selectors.get(1..).unwrap_or_default();
        let items = split_samples(&samples, value)?;

        // gather every byte span first so each chunk is rewritten once
        let width = self.meta.dtype.byte_width();
        let mut pieces: BTreeMap<usize, Vec<(usize, &[u8])>> = BTreeMap::new();
        let mut records = Vec::new();
        for (sample, shape, bytes) in items {
            let (region, record) = self.plan_write(sample, shape, inner)?;
            let base = sample * self.sample_bytes();
            let mut consumed = 0;
            for (offset, len) in region_runs(&self.meta.max_shape, &region) {
                let run = &bytes[consumed..consumed + len * width];
                for span in chunk_spans(base + offset * width, run.len(), self.meta.chunk_size) {
                    pieces
                        .entry(span.chunk)
                        .or_default()
                        .push((span.offset, &run[span.source..span.source + span.len]));
                }
                consumed += len * width;
            }
            if consumed != bytes.len() {
                hub_bail!(
                    AssertionFailed: "wrote {consumed} of {} value bytes into sample {sample}",
                    bytes.len()
                );
            }
            if let Some(record) = record {
                records.push((sample, record));
            }
        }

        for (chunk, pieces) in pieces {
            self.write_chunk(chunk, &pieces)?;
        }
        if let Some(shapes) = &self.shapes {
            for (sample, record) in records {
                shapes.set(&self.keys, sample, &record)?;
            }
        }
        Ok(())
    }

    fn write_chunk(&self, index: usize, pieces: &[(usize, &[u8])]) -> HubResult<()> {
        let key = index.to_string();
        self.keys
            .modify(&key, |current| {
                let mut chunk = match current {
                    Some(encoded) => self.decode_chunk(&key, &encoded)?,
                    None => Vec::new(),
                };
                let end = pieces
                    .iter()
                    .map(|(offset, bytes)| offset + bytes.len())
                    .max()
                    .unwrap_or(0);
                if chunk.len() < end {
                    chunk.resize(end, 0);
                }
                for (offset, bytes) in pieces {
                    chunk[*offset..*offset + bytes.len()].copy_from_slice(bytes);
                }
                Ok(Bytes::from(self.codec.encode(&chunk)?))
            })
            .context(|| format!("writing chunk {key} of {}", self.path))
    }

    /// Region of `sample` covered by a value of `value_shape`, and the shape to record for it.
    #[allow(clippy::type_complexity)]
    fn plan_write(
        &self,
        sample: usize,
        value_shape: &[usize],
        inner: &[Selector],
    ) -> HubResult<(Vec<Range<usize>>, Option<Vec<usize>>)> {
        let recorded = self.recorded_shape(sample)?;
        let current = recorded.clone().unwrap_or_else(|| self.default_shape());
        let mut value_axes = value_shape.iter().copied();
        let mut region = Vec::with_capacity(self.meta.max_shape.len());
        let mut record = Vec::with_capacity(self.meta.max_shape.len());

        for (axis, (&max, declared)) in self.meta.max_shape.iter().zip(&self.meta.shape).enumerate() {
            let selector = inner.get(axis).copied().unwrap_or(Selector::FULL);
            let previous = recorded.as_ref().map_or(0, |r| r[axis]);
            let (range, extent) = match selector {
                Selector::Index(index) => {
                    let index = if index < 0 {
                        match Selector::Index(index).resolve_strict(current[axis])? {
                            AxisSelection::Index(i) => i,
                            AxisSelection::Range(r) => r.start,
                        }
                    } else {
                        usize::try_from(index)?
                    };
                    if index >= max {
                        hub_bail!(OutOfBounds: index, 0, max);
                    }
                    (index..index + 1, previous.max(index + 1))
                }
                Selector::Range(start, stop) => {
                    let Some(len) = value_axes.next() else {
                        hub_bail!(
                            ShapeMismatch: "value of shape ({}) has too few axes for {}",
                            value_shape.iter().join(", "),
                            self.path
                        );
                    };
                    if selector.is_full() {
                        (0..len, len)
                    } else {
                        let start = start.map_or(Ok(0), |s| write_bound(s, current[axis]))?;
                        let stop = stop.map_or(Ok(start + len), |s| write_bound(s, current[axis]))?;
                        if stop < start || stop - start != len {
                            hub_bail!(
                                ShapeMismatch: "axis {axis} of {}: {len} values do not fill {start}..{stop}",
                                self.path
                            );
                        }
                        (start..stop, previous.max(stop))
                    }
                }
            };

            if range.end > max {
                hub_bail!(
                    ShapeMismatch: "axis {axis} of {}: extent {} exceeds max shape ({})",
                    self.path,
                    range.end,
                    self.meta.max_shape.iter().join(", ")
                );
            }
            if let Some(declared) = declared {
                if range.end > *declared || (selector.is_full() && range.len() != *declared) {
                    hub_bail!(
                        ShapeMismatch: "axis {axis} of {} is fixed at {declared}, got {}..{}",
                        self.path,
                        range.start,
                        range.end
                    );
                }
            }
            record.push(declared.unwrap_or(extent));
            region.push(range);
        }

        if value_axes.next().is_some() {
            hub_bail!(
                ShapeMismatch: "value of shape ({}) has too many axes for {}",
                value_shape.iter().join(", "),
                self.path
            );
        }
        Ok((region, self.shapes.as_ref().map(|_| record)))
    }
}

/// Normalize a write bound: negative bounds count from the sample's current extent.
fn write_bound(bound: i64, extent: usize) -> HubResult<usize> {
    if bound >= 0 {
        return Ok(usize::try_from(bound)?);
    }
    match Selector::Range(Some(bound), None).resolve_strict(extent)? {
        AxisSelection::Range(r) => Ok(r.start),
        AxisSelection::Index(i) => Ok(i),
    }
}

/// Clamp `selectors` to a sample of shape `extent`, returning the covered region and the shape
/// of the result.
fn select_region(extent: &[usize], selectors: &[Selector]) -> HubResult<(Vec<Range<usize>>, Vec<usize>)> {
    let mut region = Vec::with_capacity(extent.len());
    let mut shape = Vec::with_capacity(extent.len());
    for (axis, &len) in extent.iter().enumerate() {
        let selection = selectors
            .get(axis)
            .unwrap_or(&Selector::FULL)
            .resolve_clamped(len)?;
        if selection.keeps_axis() {
            shape.push(selection.range().len());
        }
        region.push(selection.range());
    }
    Ok((region, shape))
}

/// Pair every selected sample with its part of `value`.
fn split_samples<'a>(
    samples: &AxisSelection,
    value: &'a TensorData,
) -> HubResult<Vec<(usize, &'a [usize], &'a [u8])>> {
    match (samples, value) {
        (AxisSelection::Index(sample), TensorData::Dense(array)) => {
            Ok(vec![(*sample, array.shape(), array.as_bytes())])
        }
        (AxisSelection::Index(sample), TensorData::Ragged(_)) => {
            hub_bail!(ShapeMismatch: "a list of arrays cannot be written into the single sample {sample}")
        }
        (AxisSelection::Range(range), TensorData::Dense(array)) => {
            if array.shape().first() != Some(&range.len()) {
                hub_bail!(
                    ShapeMismatch: "value {array} does not hold {} samples",
                    range.len()
                );
            }
            range
                .clone()
                .enumerate()
                .map(|(i, sample)| Ok((sample, &array.shape()[1..], array.outer_bytes(i)?)))
                .collect()
        }
        (AxisSelection::Range(range), TensorData::Ragged(arrays)) => {
            if arrays.len() != range.len() {
                hub_bail!(
                    ShapeMismatch: "{} arrays given for {} samples",
                    arrays.len(),
                    range.len()
                );
            }
            Ok(range
                .clone()
                .zip(arrays)
                .map(|(sample, array)| (sample, array.shape(), array.as_bytes()))
                .collect())
        }
    }
}

impl Debug for ChunkedTensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedTensor")
            .field("path", &self.path)
            .field("meta", &self.meta())
            .field("codec", &self.codec.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rand::RngCore;
    use rstest::rstest;
    use tensorhub_error::HubError;
    use tensorhub_io::{ByteStore, InMemoryStore};

    use super::*;

    fn descriptor(shape: Vec<Option<usize>>, max_shape: Vec<usize>, chunk_size: usize, codec: &str) -> TensorDescriptor {
        TensorDescriptor::new("/image".into(), PType::U8, shape, max_shape, chunk_size, codec, false)
    }

    fn options() -> TensorOptions {
        TensorOptions::default().with_cache(
            CacheConfig::default()
                .with_memory_capacity(1 << 16)
                .with_local_capacity(0)
                .with_lock(false),
        )
    }

    fn random(shape: Vec<usize>) -> NdArray {
        let mut bytes = vec![0u8; shape.iter().product()];
        rand::rng().fill_bytes(&mut bytes);
        NdArray::try_new(PType::U8, shape, bytes).unwrap()
    }

    fn dense(data: TensorData) -> NdArray {
        data.into_dense().unwrap()
    }

    fn image_tensor(chunk_size: usize, codec: &str, samples: usize) -> (Arc<InMemoryStore>, ChunkedTensor) {
        let durable = Arc::new(InMemoryStore::default());
        let desc = descriptor(vec![None, None, Some(3)], vec![32, 32, 3], chunk_size, codec);
        let tensor = ChunkedTensor::create(&desc, durable.clone(), samples, &options()).unwrap();
        (durable, tensor)
    }

    #[rstest]
    fn write_then_read(
        #[values("default", "lz4", "zstd", "png")] codec: &str,
        #[values(100, 3072, 1 << 20)] chunk_size: usize,
    ) {
        let (_, tensor) = image_tensor(chunk_size, codec, 4);
        let value = random(vec![2, 32, 32, 3]);
        tensor.write(&[Selector::from(1..3)], &value.clone().into()).unwrap();

        assert_eq!(dense(tensor.read(&[Selector::from(1..3)]).unwrap()), value);
        assert_eq!(dense(tensor.read(&[Selector::from(2)]).unwrap()), value.outer(1).unwrap());
        tensor.flush().unwrap();
        assert_eq!(dense(tensor.read(&[Selector::from(-2)]).unwrap()), value.outer(1).unwrap());
    }

    #[test]
    fn smaller_sample_reads_at_recorded_shape() {
        let (_, tensor) = image_tensor(1 << 20, "lz4", 1);
        let value = random(vec![16, 16, 3]);
        tensor.write(&[Selector::from(0)], &value.clone().into()).unwrap();

        let read = dense(tensor.read(&[Selector::from(0)]).unwrap());
        assert_eq!(read.shape(), [16, 16, 3]);
        assert_eq!(read, value);
        assert_eq!(tensor.sample_shape(0).unwrap(), [16, 16, 3]);
    }

    #[test]
    fn unwritten_samples_are_zero_at_max_shape() {
        let (_, tensor) = image_tensor(1000, "zstd", 0);
        tensor.resize_shape(0);
        tensor.resize_shape(10);
        for sample in [0, 5, 9] {
            let read = dense(tensor.read(&[Selector::from(sample)]).unwrap());
            assert_eq!(read, NdArray::zeros(PType::U8, vec![32, 32, 3]));
        }
    }

    #[test]
    fn resize_round_trip_keeps_data() {
        let (_, tensor) = image_tensor(4096, "lz4", 3);
        let value = random(vec![3, 32, 32, 3]);
        tensor.write(&[], &value.clone().into()).unwrap();

        tensor.resize_shape(8);
        tensor.resize_shape(3);
        assert_eq!(dense(tensor.read(&[]).unwrap()), value);
        assert!(matches!(
            tensor.read(&[Selector::from(3)]).unwrap_err(),
            HubError::OutOfBounds(3, 0, 3, _)
        ));
    }

    #[test]
    fn disjoint_writes_compose() {
        let durable = Arc::new(InMemoryStore::default());
        let desc = descriptor(vec![Some(8), Some(4)], vec![8, 4], 10, "lz4");
        let tensor = ChunkedTensor::create(&desc, durable, 2, &options()).unwrap();

        let top = random(vec![3, 4]);
        let bottom = random(vec![5, 4]);
        tensor.write(&[0.into(), (0..3).into()], &top.clone().into()).unwrap();
        tensor.write(&[0.into(), (3..8).into()], &bottom.clone().into()).unwrap();

        let all = dense(tensor.read(&[0.into()]).unwrap());
        let mut expected = top.into_bytes();
        expected.extend_from_slice(bottom.as_bytes());
        assert_eq!(all.as_bytes(), expected.as_slice());
        // the neighbouring sample shares chunks and is untouched
        assert_eq!(
            dense(tensor.read(&[1.into()]).unwrap()),
            NdArray::zeros(PType::U8, vec![8, 4])
        );
    }

    #[test]
    fn inner_column_write() {
        let durable = Arc::new(InMemoryStore::default());
        let desc = descriptor(vec![Some(3), Some(3)], vec![3, 3], 4, "default");
        let tensor = ChunkedTensor::create(&desc, durable, 1, &options()).unwrap();

        let column = NdArray::from_vec(vec![3], vec![1u8, 2, 3]).unwrap();
        tensor.write(&[0.into(), Selector::FULL, 1.into()], &column.clone().into()).unwrap();
        assert_eq!(
            dense(tensor.read(&[0.into()]).unwrap()).to_vec::<u8>().unwrap(),
            [0, 1, 0, 0, 2, 0, 0, 3, 0]
        );
        assert_eq!(dense(tensor.read(&[0.into(), (..).into(), (-2).into()]).unwrap()), column);
    }

    #[test]
    fn mixed_shapes_read_ragged() {
        let (_, tensor) = image_tensor(1 << 12, "lz4", 2);
        tensor.write(&[0.into()], &random(vec![4, 4, 3]).into()).unwrap();
        tensor.write(&[1.into()], &random(vec![8, 2, 3]).into()).unwrap();

        let TensorData::Ragged(samples) = tensor.read(&[(0..2).into()]).unwrap() else {
            panic!("expected ragged samples");
        };
        assert_eq!(samples[0].shape(), [4, 4, 3]);
        assert_eq!(samples[1].shape(), [8, 2, 3]);

        // the same rows of both samples line up again
        let rows = dense(tensor.read(&[(0..2).into(), (0..2).into(), (0..2).into()]).unwrap());
        assert_eq!(rows.shape(), [2, 2, 2, 3]);
    }

    #[test]
    fn inner_ranges_clamp_to_recorded_shape() {
        let (_, tensor) = image_tensor(1 << 12, "default", 1);
        tensor.write(&[0.into()], &random(vec![10, 10, 3]).into()).unwrap();
        let read = dense(tensor.read(&[0.into(), (5..32).into()]).unwrap());
        assert_eq!(read.shape(), [5, 10, 3]);
        assert!(tensor.read(&[0.into(), 12.into()]).is_err());
    }

    #[test]
    fn shape_violations() {
        let (_, tensor) = image_tensor(1 << 12, "lz4", 2);
        let too_big = random(vec![33, 32, 3]);
        let err = tensor.write(&[0.into()], &too_big.into()).unwrap_err();
        assert!(matches!(err, HubError::ShapeMismatch(..)), "{err}");

        let wrong_channels = random(vec![4, 4, 4]);
        assert!(matches!(
            tensor.write(&[0.into()], &wrong_channels.into()).unwrap_err(),
            HubError::ShapeMismatch(..)
        ));

        let err = tensor.write(&[2.into()], &random(vec![4, 4, 3]).into()).unwrap_err();
        assert!(matches!(err, HubError::OutOfBounds(..)), "{err}");

        let wrong_count = random(vec![3, 4, 4, 3]);
        assert!(tensor.write(&[(0..2).into()], &wrong_count.into()).is_err());

        let floats = NdArray::from_vec(vec![1, 1, 3], vec![0f32; 3]).unwrap();
        assert!(tensor.write(&[0.into()], &floats.into()).is_err());
    }

    #[test]
    fn corrupt_chunks_fail_reads() {
        let (durable, tensor) = image_tensor(1 << 12, "lz4", 1);
        durable.put("image/0", Bytes::from_static(&[8, 0, 0, 0, 1, 2])).unwrap();
        let err = tensor.read(&[0.into()]).unwrap_err();
        assert!(matches!(err.root(), HubError::CorruptChunk(..)), "{err}");
    }

    #[rstest]
    fn chunks_larger_than_the_chunk_size_are_corrupt(#[values("default", "lz4", "zstd")] codec: &str) {
        let (durable, tensor) = image_tensor(1 << 12, codec, 1);
        let oversized = BUILTIN_CODECS.get(codec).unwrap().encode(&[1u8; 1 << 13]).unwrap();
        durable.put("image/0", Bytes::from(oversized)).unwrap();
        let err = tensor.read(&[0.into()]).unwrap_err();
        assert!(matches!(err.root(), HubError::CorruptChunk(..)), "{err}");
    }

    #[test]
    fn unknown_compressor() {
        let desc = descriptor(vec![Some(4)], vec![4], 64, "snappy");
        let err = ChunkedTensor::create(&desc, Arc::new(InMemoryStore::default()), 1, &options()).unwrap_err();
        assert!(matches!(err.root(), HubError::UnsupportedCompressor(..)));
    }

    #[test]
    fn reopen_after_flush() {
        let (durable, tensor) = image_tensor(5000, "zstd", 5);
        let value = random(vec![12, 7, 3]);
        tensor.write(&[3.into()], &value.clone().into()).unwrap();
        let meta = tensor.meta();
        tensor.close().unwrap();

        assert!(durable.get("image/--dynamic--/0").unwrap().is_some());
        let reopened = ChunkedTensor::open("/image", meta, durable, &options()).unwrap();
        assert_eq!(dense(reopened.read(&[3.into()]).unwrap()), value);
        assert_eq!(reopened.len(), 5);
    }

    #[rstest]
    fn writes_are_written_back_on_flush(#[values(true, false)] lock: bool) {
        let durable = Arc::new(InMemoryStore::default());
        let desc = descriptor(vec![Some(4)], vec![4], 64, "default");
        let opts = TensorOptions::default().with_cache(CacheConfig::default().with_lock(lock));
        let tensor = ChunkedTensor::create(&desc, durable.clone(), 2, &opts).unwrap();
        tensor.flush().unwrap();

        let value = NdArray::from_vec(vec![4], vec![1u8, 2, 3, 4]).unwrap();
        tensor.write(&[1.into()], &value.clone().into()).unwrap();
        assert!(!durable.exists("image/0").unwrap());
        assert!(!durable.exists("image/0.lock").unwrap());
        assert_eq!(dense(tensor.read(&[1.into()]).unwrap()), value);

        tensor.flush().unwrap();
        assert_eq!(
            durable.get("image/0").unwrap().unwrap(),
            Bytes::from_static(&[0, 0, 0, 0, 1, 2, 3, 4])
        );
    }

    #[test]
    fn scalar_tensor() {
        let desc = TensorDescriptor::new("/label".into(), PType::I64, vec![], vec![], 16, "default", false);
        let tensor = ChunkedTensor::create(&desc, Arc::new(InMemoryStore::default()), 4, &options()).unwrap();
        let labels = NdArray::from_vec(vec![4], vec![3i64, -1, 7, 0]).unwrap();
        tensor.write(&[], &labels.clone().into()).unwrap();
        assert_eq!(dense(tensor.read(&[]).unwrap()), labels);
        assert_eq!(dense(tensor.read(&[2.into()]).unwrap()).to_scalar::<i64>().unwrap(), 7);
    }
}
