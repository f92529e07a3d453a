use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tensorhub_dtype::{SchemaNode, TensorDescriptor};
use tensorhub_error::{HubResult, ResultExt, hub_bail, hub_err};
use tensorhub_io::{ByteStore, ByteStoreRef, open_store};
use tensorhub_metrics::HubMetrics;
use tensorhub_tensor::{ChunkedTensor, Selector, TensorData, TensorMeta};

use crate::metadata::{FORMAT_VERSION, META_KEY, MetaDocument, MetadataStore};
use crate::{DatasetOptions, DatasetState, Indexed, View};

struct State {
    len: usize,
    name: Option<String>,
    meta_info: serde_json::Map<String, serde_json::Value>,
}

/// A collection of samples described by a schema, stored as one chunked tensor per leaf.
///
/// Indexing builds [`View`]s, which read or write only when resolved. Mutating methods take
/// `&self`; concurrent writers must address disjoint samples.
pub struct Dataset {
    location: String,
    durable: ByteStoreRef,
    schema: SchemaNode,
    tensors: Vec<ChunkedTensor>,
    index: HashMap<String, usize>,
    metadata: MetadataStore,
    state: RwLock<State>,
    lazy: AtomicBool,
    options: DatasetOptions,
}

fn location_of(url: Option<&str>, name: Option<&str>) -> String {
    url.or(name).unwrap_or("<unnamed>").to_string()
}

impl Dataset {
    pub(crate) fn create(
        store: ByteStoreRef,
        url: Option<&str>,
        schema: SchemaNode,
        sample_count: usize,
        options: DatasetOptions,
    ) -> HubResult<Self> {
        let location = location_of(url, options.name.as_deref());
        let descriptors = schema.flatten()?;
        if descriptors.is_empty() {
            hub_bail!(SchemaMismatch: "schema of {location} has no tensors");
        }
        if store.exists(META_KEY)? {
            hub_bail!("a dataset already exists at {location}");
        }
        let foreign = store.list("")?;
        if !foreign.is_empty() {
            hub_bail!(
                NotADataset: "{location} holds {} keys but no {META_KEY}, first {}",
                foreign.len(),
                foreign[0]
            );
        }

        let result = Self::build(location.clone(), store.clone(), schema, &descriptors, sample_count, options);

        match result {
            Ok(dataset) => {
                log::info!("created dataset {location} with {sample_count} samples");
                Ok(dataset)
            }
            Err(err) => {
                log::error!("creating dataset {location} failed, removing partial data: {err}");
                if let Err(cleanup) = Self::remove_partial(store.as_ref(), &descriptors) {
                    log::warn!("failed to remove partial dataset {location}: {cleanup}");
                }
                Err(err)
            }
        }
    }

    /// Delete the metadata and tensor subtrees a failed create may have written.
    fn remove_partial(store: &dyn ByteStore, descriptors: &[TensorDescriptor]) -> HubResult<()> {
        store.delete(META_KEY)?;
        descriptors
            .iter()
            .try_for_each(|descriptor| store.delete_prefix(descriptor.path().trim_matches('/')))
    }

    fn build(
        location: String,
        store: ByteStoreRef,
        schema: SchemaNode,
        descriptors: &[TensorDescriptor],
        sample_count: usize,
        options: DatasetOptions,
    ) -> HubResult<Self> {
        let metadata = MetadataStore::try_new(store.clone(), &options.cache, &options.metrics)?;
        let tensor_options = options.tensor_options();
        let tensors = descriptors
            .iter()
            .map(|descriptor| ChunkedTensor::create(descriptor, store.clone(), sample_count, &tensor_options))
            .collect::<HubResult<Vec<_>>>()?;
        let state = State {
            len: sample_count,
            name: options.name.clone(),
            meta_info: options.meta_info.clone(),
        };
        let dataset = Self::assemble(location, store, schema, tensors, metadata, state, options);
        dataset.save_meta()?;
        dataset
            .options
            .registry
            .created(&dataset.location, dataset.state.read().name.as_deref())?;
        Ok(dataset)
    }

    pub(crate) fn open(store: ByteStoreRef, url: Option<&str>, options: DatasetOptions) -> HubResult<Self> {
        let metadata = MetadataStore::try_new(store.clone(), &options.cache, &options.metrics)?;
        let Some(document) = metadata.load()? else {
            hub_bail!(NotFound: "no dataset at {}", location_of(url, options.name.as_deref()));
        };
        if document.version > FORMAT_VERSION {
            hub_bail!(
                "dataset format version {} is newer than the supported version {FORMAT_VERSION}",
                document.version
            );
        }
        let location = location_of(url, document.name.as_deref().or(options.name.as_deref()));
        let schema = document.schema()?;
        let sample_count = document.sample_count()?;

        let tensor_options = options.tensor_options();
        let tensors = schema
            .flatten()?
            .iter()
            .map(|descriptor| {
                let meta = document
                    .tensors
                    .get(descriptor.path())
                    .cloned()
                    .unwrap_or_else(|| TensorMeta::new(descriptor, sample_count));
                let tensor = ChunkedTensor::open(descriptor.path(), meta, store.clone(), &tensor_options)?;
                if tensor.len() != sample_count {
                    log::warn!(
                        "tensor {} of {location} has {} samples, dataset has {sample_count}",
                        descriptor.path(),
                        tensor.len()
                    );
                    tensor.resize_shape(sample_count);
                }
                Ok(tensor)
            })
            .collect::<HubResult<Vec<_>>>()
            .context(|| format!("opening dataset {location}"))?;

        let state = State {
            len: sample_count,
            name: document.name,
            meta_info: document.meta_info,
        };
        log::debug!("opened dataset {location} with {sample_count} samples");
        Ok(Self::assemble(location, store, schema, tensors, metadata, state, options))
    }

    pub(crate) fn open_with(
        store: ByteStoreRef,
        url: Option<&str>,
        schema: SchemaNode,
        sample_count: usize,
        options: DatasetOptions,
    ) -> HubResult<Self> {
        if !store.exists(META_KEY)? {
            return Self::create(store, url, schema, sample_count, options);
        }
        let dataset = Self::open(store, url, options)?;
        dataset.schema.check_compatible(&schema)?;
        if dataset.len() != sample_count {
            hub_bail!(
                ShapeMismatch: "dataset {} has {} samples, expected {sample_count}",
                dataset.location,
                dataset.len()
            );
        }
        Ok(dataset)
    }

    fn assemble(
        location: String,
        durable: ByteStoreRef,
        schema: SchemaNode,
        tensors: Vec<ChunkedTensor>,
        metadata: MetadataStore,
        state: State,
        options: DatasetOptions,
    ) -> Self {
        let index = tensors
            .iter()
            .enumerate()
            .map(|(i, tensor)| (tensor.path().to_string(), i))
            .collect();
        Self {
            location,
            durable,
            schema,
            tensors,
            index,
            metadata,
            state: RwLock::new(state),
            lazy: AtomicBool::new(options.lazy),
            options,
        }
    }

    fn document(&self) -> HubResult<MetaDocument> {
        let state = self.state.read();
        Ok(MetaDocument {
            shape: vec![state.len],
            schema: self.schema.to_document()?,
            version: FORMAT_VERSION,
            meta_info: state.meta_info.clone(),
            name: state.name.clone(),
            tensors: self
                .tensors
                .iter()
                .map(|tensor| (tensor.path().to_string(), tensor.meta()))
                .collect(),
        })
    }

    fn save_meta(&self) -> HubResult<()> {
        self.metadata
            .save(&self.document()?)
            .context(|| format!("saving metadata of {}", self.location))
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.state.read().len
    }

    /// Whether the dataset holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The URL or name identifying the dataset
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The schema tree
    pub fn schema(&self) -> &SchemaNode {
        &self.schema
    }

    /// Leaf tensor paths, in schema order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tensors.iter().map(ChunkedTensor::path)
    }

    /// The leaf tensors, in schema order
    pub fn tensors(&self) -> impl Iterator<Item = &ChunkedTensor> {
        self.tensors.iter()
    }

    /// The leaf tensor at `path`.
    pub fn tensor(&self, path: &str) -> HubResult<&ChunkedTensor> {
        let path = normalize_path(path);
        self.index
            .get(&path)
            .map(|&i| &self.tensors[i])
            .ok_or_else(|| hub_err!(NotFound: "key {path} not found in dataset {}", self.location))
    }

    /// Display name
    pub fn name(&self) -> Option<String> {
        self.state.read().name.clone()
    }

    /// Rename the dataset. The new name is persisted immediately.
    pub fn rename(&self, name: impl Into<String>) -> HubResult<()> {
        self.state.write().name = Some(name.into());
        self.save_meta()
    }

    /// Free-form user metadata
    pub fn meta_info(&self) -> serde_json::Map<String, serde_json::Value> {
        self.state.read().meta_info.clone()
    }

    /// Replace the free-form user metadata. Persisted by the next flush.
    pub fn set_meta_info(&self, meta_info: serde_json::Map<String, serde_json::Value>) {
        self.state.write().meta_info = meta_info;
    }

    /// The metrics registry shared by every tensor
    pub fn metrics(&self) -> &HubMetrics {
        &self.options.metrics
    }

    /// Whether indexing builds views instead of reading immediately
    pub fn is_lazy(&self) -> bool {
        self.lazy.load(Ordering::Relaxed)
    }

    /// Make indexing build views.
    pub fn enable_lazy(&self) {
        self.lazy.store(true, Ordering::Relaxed);
    }

    /// Make indexing read immediately.
    pub fn disable_lazy(&self) {
        self.lazy.store(false, Ordering::Relaxed);
    }

    /// Grow or shrink every tensor to `sample_count` samples. No chunk data is rewritten.
    ///
    /// Not transactional across tensors: an error partway leaves earlier tensors resized.
    pub fn resize_shape(&self, sample_count: usize) -> HubResult<()> {
        {
            let mut state = self.state.write();
            if state.len == sample_count {
                return Ok(());
            }
            for tensor in &self.tensors {
                tensor.resize_shape(sample_count);
            }
            log::debug!("resized {} from {} to {sample_count} samples", self.location, state.len);
            state.len = sample_count;
        }
        self.save_meta()
    }

    /// Add `count` empty samples at the end.
    pub fn append_shape(&self, count: usize) -> HubResult<()> {
        self.resize_shape(self.len() + count)
    }

    /// Write every cached change to durable storage. The dataset stays usable.
    pub fn flush(&self) -> HubResult<()> {
        for tensor in &self.tensors {
            tensor.flush()?;
        }
        self.save_meta()?;
        self.options
            .registry
            .update_state(&self.location, DatasetState::Uploaded)?;
        log::debug!("flushed dataset {}", self.location);
        Ok(())
    }

    /// Flush and release the dataset.
    pub fn close(self) -> HubResult<()> {
        self.flush()?;
        log::info!("closed dataset {}", self.location);
        Ok(())
    }

    /// Remove the dataset's storage root. Returns whether a dataset was stored there.
    pub fn delete(self) -> HubResult<bool> {
        let existed = self.durable.exists(META_KEY)?;
        for tensor in &self.tensors {
            tensor.discard()?;
        }
        self.metadata.discard()?;
        self.durable.delete_prefix("")?;
        self.options.registry.deleted(&self.location)?;
        log::info!("deleted dataset {}", self.location);
        Ok(existed)
    }

    /// Flush, copy every stored key into `destination`, and open the copy.
    pub fn copy(&self, destination: ByteStoreRef) -> HubResult<Dataset> {
        self.flush()?;
        if destination.exists(META_KEY)? {
            hub_bail!("cannot copy {} over an existing dataset", self.location);
        }
        let keys = self.durable.list("")?;
        for key in &keys {
            if let Some(bytes) = self.durable.get(key)? {
                destination.put(key, bytes)?;
            }
        }
        log::debug!("copied {} keys of {}", keys.len(), self.location);
        Self::open(destination, None, self.options.clone())
    }

    /// Like [`Dataset::copy`], into the store `url` points at.
    pub fn copy_to(&self, url: &str) -> HubResult<Dataset> {
        let copy = self.copy(open_store(url)?)?;
        Ok(Dataset {
            location: url.to_string(),
            ..copy
        })
    }

    /// A view over the whole dataset.
    pub fn view(&self) -> View<'_> {
        View::root(self)
    }

    /// A view over the region at `path`.
    pub fn narrow(&self, path: &str) -> HubResult<View<'_>> {
        self.view().narrow(path)
    }

    /// A view over the selected samples, whatever the dataset's laziness.
    pub fn index(&self, selector: impl Into<Selector>) -> HubResult<View<'_>> {
        self.view().index(selector)
    }

    /// The selected samples: a view when lazy, their data otherwise.
    pub fn get_index(&self, selector: impl Into<Selector>) -> HubResult<Indexed<'_>> {
        self.view().get(selector)
    }

    /// The region at `path`: a view when lazy, its data otherwise.
    pub fn get(&self, path: &str) -> HubResult<Indexed<'_>> {
        self.view().get_path(path)
    }

    /// Write `value` into the leaf at `path` at `selectors`.
    pub fn write(&self, path: &str, selectors: &[Selector], value: impl Into<TensorData>) -> HubResult<()> {
        self.narrow(path)?.at(selectors)?.assign(value)
    }

    /// One view per sample.
    pub fn samples(&self) -> impl Iterator<Item = View<'_>> {
        (0..self.len()).map(move |sample| View::sample(self, sample))
    }

    /// Number of ragged sequence nodes on the way to the node at `path`, including the node.
    pub(crate) fn sequence_depth(&self, path: &str) -> usize {
        let mut depth = 0;
        let mut node = Some(&self.schema);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.and_then(|n| {
                let n = match n {
                    SchemaNode::RaggedSequence(seq) => {
                        depth += 1;
                        seq.inner()
                    }
                    other => other,
                };
                match n {
                    SchemaNode::Composite(composite) => composite.field(segment),
                    _ => None,
                }
            });
        }
        if let Some(SchemaNode::RaggedSequence(_)) = node {
            depth += 1;
        }
        depth
    }
}

/// Collapse a path into `/a/b` form; the root is `/`.
pub(crate) fn normalize_path(path: &str) -> String {
    let segments = path.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>();
    format!("/{}", segments.join("/"))
}

impl Debug for Dataset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("location", &self.location)
            .field("len", &self.len())
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
