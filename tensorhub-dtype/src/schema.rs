//! The hierarchical schema of a dataset sample.
//!
//! A schema is a tree of [`SchemaNode`]s. Composite nodes name their children; every other node
//! kind is a leaf (or, for ragged sequences, wraps a subtree whose leaves gain an extra variable
//! length outer axis). [`SchemaNode::flatten`] turns the tree into one [`TensorDescriptor`] per
//! leaf, which is what the storage engine actually allocates.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tensorhub_error::{HubError, HubResult, hub_bail, hub_err};

use crate::{PType, TensorDescriptor};

/// Default size, in bytes, of an uncompressed chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 24;

/// Name of the codec used when a schema does not name one.
pub const DEFAULT_COMPRESSOR: &str = "default";

/// A name of a field in a composite node
pub type FieldName = Arc<str>;

/// A node of a dataset schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaNode {
    /// A single scalar value per sample.
    Primitive(PType),
    /// A dense array per sample whose extent may vary below `max_shape`.
    FixedArray(TensorSchema),
    /// A variable length sequence of the inner node per sample.
    RaggedSequence(SequenceSchema),
    /// A class label, stored as an `i64` index into `names`.
    Label(LabelSchema),
    /// A named group of child nodes.
    Composite(CompositeSchema),
}

/// A dense array node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TensorSchemaDocument")]
pub struct TensorSchema {
    dtype: PType,
    shape: Vec<Option<usize>>,
    max_shape: Vec<usize>,
    chunk_size: usize,
    compressor: String,
}

/// The stored form of a [`TensorSchema`], validated on the way in.
#[derive(Deserialize)]
struct TensorSchemaDocument {
    dtype: PType,
    shape: Vec<Option<usize>>,
    max_shape: Vec<usize>,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_compressor")]
    compressor: String,
}

impl TryFrom<TensorSchemaDocument> for TensorSchema {
    type Error = HubError;

    fn try_from(document: TensorSchemaDocument) -> HubResult<Self> {
        let schema = Self::new(document.dtype, document.shape, document.max_shape)?
            .with_chunk_size(document.chunk_size)
            .with_compressor(document.compressor);
        schema.validate()?;
        Ok(schema)
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_compressor() -> String {
    DEFAULT_COMPRESSOR.to_string()
}

impl TensorSchema {
    /// Create an array node with `None` placeholders for axes whose extent varies per sample.
    ///
    /// Fails with `ShapeMismatch` if the ranks differ or a declared extent exceeds `max_shape`.
    pub fn new(dtype: PType, shape: Vec<Option<usize>>, max_shape: Vec<usize>) -> HubResult<Self> {
        let schema = Self {
            dtype,
            shape,
            max_shape,
            chunk_size: DEFAULT_CHUNK_SIZE,
            compressor: DEFAULT_COMPRESSOR.to_string(),
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Create an array node whose every sample has exactly `shape`.
    pub fn fixed(dtype: PType, shape: Vec<usize>) -> Self {
        Self {
            dtype,
            shape: shape.iter().copied().map(Some).collect(),
            max_shape: shape,
            chunk_size: DEFAULT_CHUNK_SIZE,
            compressor: DEFAULT_COMPRESSOR.to_string(),
        }
    }

    /// Set the uncompressed chunk size in bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the name of the codec used to compress chunks.
    pub fn with_compressor(mut self, compressor: impl Into<String>) -> Self {
        self.compressor = compressor.into();
        self
    }

    /// The element type
    pub fn dtype(&self) -> PType {
        self.dtype
    }

    /// The declared per-sample shape
    pub fn shape(&self) -> &[Option<usize>] {
        &self.shape
    }

    /// The per-sample upper bound
    pub fn max_shape(&self) -> &[usize] {
        &self.max_shape
    }

    /// The uncompressed chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// The codec name
    pub fn compressor(&self) -> &str {
        &self.compressor
    }

    fn validate(&self) -> HubResult<()> {
        if self.shape.len() != self.max_shape.len() {
            hub_bail!(
                ShapeMismatch: "shape {} and max_shape {:?} have different ranks",
                format_shape(&self.shape),
                self.max_shape
            );
        }
        for (declared, max) in self.shape.iter().zip(&self.max_shape) {
            if let Some(declared) = declared {
                if declared > max {
                    hub_bail!(
                        ShapeMismatch: "shape {} exceeds max_shape {:?}",
                        format_shape(&self.shape),
                        self.max_shape
                    );
                }
            }
        }
        if self.chunk_size == 0 {
            hub_bail!("chunk size must be positive");
        }
        Ok(())
    }
}

/// A variable length sequence node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSchema {
    inner: Box<SchemaNode>,
    max_length: usize,
}

impl SequenceSchema {
    /// Create a sequence of at most `max_length` items of `inner`.
    pub fn new(inner: SchemaNode, max_length: usize) -> Self {
        Self {
            inner: Box::new(inner),
            max_length,
        }
    }

    /// The node describing each item
    pub fn inner(&self) -> &SchemaNode {
        &self.inner
    }

    /// The longest allowed sequence
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

/// A class label node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSchema {
    names: Vec<String>,
}

impl LabelSchema {
    /// Create a label over the given class names.
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of classes
    pub fn num_classes(&self) -> usize {
        self.names.len()
    }

    /// The class names in index order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The name of the class at `index`.
    pub fn name_of(&self, index: i64) -> HubResult<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
            .ok_or_else(|| hub_err!(NotFound: "label index {index} of {} classes", self.names.len()))
    }

    /// The index of the class called `name`.
    pub fn index_of(&self, name: &str) -> HubResult<i64> {
        let idx = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| hub_err!(NotFound: "label {name}"))?;
        Ok(i64::try_from(idx)?)
    }
}

/// A named group of child nodes, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeSchema {
    fields: Vec<(FieldName, SchemaNode)>,
}

impl CompositeSchema {
    /// Create an empty composite node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named child.
    pub fn with_field(mut self, name: impl Into<FieldName>, node: impl Into<SchemaNode>) -> Self {
        self.fields.push((name.into(), node.into()));
        self
    }

    /// The children in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&FieldName, &SchemaNode)> {
        self.fields.iter().map(|(n, s)| (n, s))
    }

    /// The child called `name`, if any
    pub fn field(&self, name: &str) -> Option<&SchemaNode> {
        self.fields
            .iter()
            .find_map(|(n, s)| (n.as_ref() == name).then_some(s))
    }
}

impl From<PType> for SchemaNode {
    fn from(value: PType) -> Self {
        SchemaNode::Primitive(value)
    }
}

impl From<TensorSchema> for SchemaNode {
    fn from(value: TensorSchema) -> Self {
        SchemaNode::FixedArray(value)
    }
}

impl From<SequenceSchema> for SchemaNode {
    fn from(value: SequenceSchema) -> Self {
        SchemaNode::RaggedSequence(value)
    }
}

impl From<LabelSchema> for SchemaNode {
    fn from(value: LabelSchema) -> Self {
        SchemaNode::Label(value)
    }
}

impl From<CompositeSchema> for SchemaNode {
    fn from(value: CompositeSchema) -> Self {
        SchemaNode::Composite(value)
    }
}

/// Axes accumulated from enclosing ragged sequences during flattening.
#[derive(Default, Clone)]
struct OuterAxes {
    shape: Vec<Option<usize>>,
    max_shape: Vec<usize>,
}

impl SchemaNode {
    /// Flatten the tree into one descriptor per leaf, depth first, in declaration order.
    ///
    /// Leaf paths are `/`-prefixed and mirror the nesting of composite nodes. Fails with
    /// `SchemaMismatch` if a field name is empty, contains `/`, or is repeated within a composite.
    pub fn flatten(&self) -> HubResult<Vec<TensorDescriptor>> {
        let mut out = Vec::new();
        self.flatten_into("", &OuterAxes::default(), false, &mut out)?;
        Ok(out)
    }

    fn flatten_into(
        &self,
        path: &str,
        outer: &OuterAxes,
        ragged: bool,
        out: &mut Vec<TensorDescriptor>,
    ) -> HubResult<()> {
        let leaf_path = || {
            if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            }
        };
        match self {
            SchemaNode::Primitive(ptype) => out.push(TensorDescriptor::new(
                leaf_path(),
                *ptype,
                outer.shape.clone(),
                outer.max_shape.clone(),
                DEFAULT_CHUNK_SIZE,
                DEFAULT_COMPRESSOR,
                ragged,
            )),
            SchemaNode::Label(_) => out.push(TensorDescriptor::new(
                leaf_path(),
                PType::I64,
                outer.shape.clone(),
                outer.max_shape.clone(),
                DEFAULT_CHUNK_SIZE,
                DEFAULT_COMPRESSOR,
                ragged,
            )),
            SchemaNode::FixedArray(tensor) => {
                tensor.validate()?;
                out.push(TensorDescriptor::new(
                    leaf_path(),
                    tensor.dtype,
                    outer.shape.iter().chain(&tensor.shape).copied().collect(),
                    outer
                        .max_shape
                        .iter()
                        .chain(&tensor.max_shape)
                        .copied()
                        .collect(),
                    tensor.chunk_size,
                    &tensor.compressor,
                    ragged,
                ))
            }
            SchemaNode::RaggedSequence(seq) => {
                let mut outer = outer.clone();
                outer.shape.push(None);
                outer.max_shape.push(seq.max_length);
                seq.inner.flatten_into(path, &outer, true, out)?;
            }
            SchemaNode::Composite(composite) => {
                let mut seen = BTreeSet::new();
                for (name, node) in &composite.fields {
                    if name.is_empty() || name.contains('/') {
                        hub_bail!(SchemaMismatch: "invalid field name {:?} under {}", name, leaf_path());
                    }
                    if !seen.insert(name.as_ref()) {
                        hub_bail!(SchemaMismatch: "duplicate field {} under {}", name, leaf_path());
                    }
                    node.flatten_into(&format!("{path}/{name}"), outer, ragged, out)?;
                }
            }
        }
        Ok(())
    }

    /// The set of flattened leaf paths.
    pub fn leaf_paths(&self) -> HubResult<BTreeSet<String>> {
        Ok(self.flatten()?.into_iter().map(|t| t.path().to_string()).collect())
    }

    /// Whether `other` flattens to the same set of leaf paths, regardless of order.
    pub fn is_compatible(&self, other: &SchemaNode) -> HubResult<bool> {
        Ok(self.leaf_paths()? == other.leaf_paths()?)
    }

    /// Fails with `SchemaMismatch` unless `other` is compatible with `self`.
    pub fn check_compatible(&self, other: &SchemaNode) -> HubResult<()> {
        let ours = self.leaf_paths()?;
        let theirs = other.leaf_paths()?;
        if ours != theirs {
            hub_bail!(
                SchemaMismatch: "stored leaves [{}] differ from requested leaves [{}]",
                ours.iter().join(", "),
                theirs.iter().join(", ")
            );
        }
        Ok(())
    }

    /// Look up the node at a `/`-separated path. The empty path and `/` name `self`.
    pub fn node_at(&self, path: &str) -> Option<&SchemaNode> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| match node {
                SchemaNode::Composite(composite) => composite.field(segment),
                SchemaNode::RaggedSequence(seq) => match seq.inner.as_ref() {
                    SchemaNode::Composite(composite) => composite.field(segment),
                    _ => None,
                },
                _ => None,
            })
    }

    /// Serialize into the document form stored in dataset metadata.
    pub fn to_document(&self) -> HubResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize from the document form stored in dataset metadata.
    pub fn from_document(document: serde_json::Value) -> HubResult<Self> {
        let node: SchemaNode = serde_json::from_value(document)
            .map_err(|e| hub_err!(CorruptChunk: "malformed schema document: {e}"))?;
        // Reject documents that could never have been produced by a valid schema.
        node.flatten()?;
        Ok(node)
    }
}

impl Display for SchemaNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaNode::Primitive(p) => write!(f, "{p}"),
            SchemaNode::FixedArray(t) => write!(
                f,
                "tensor({}, shape={}, max_shape=({}))",
                t.dtype,
                format_shape(&t.shape),
                t.max_shape.iter().join(", ")
            ),
            SchemaNode::RaggedSequence(s) => write!(f, "sequence({}, max_length={})", s.inner, s.max_length),
            SchemaNode::Label(l) => write!(f, "label({})", l.names.iter().join(", ")),
            SchemaNode::Composite(c) => write!(
                f,
                "{{{}}}",
                c.fields.iter().map(|(n, s)| format!("{n}={s}")).join(", ")
            ),
        }
    }
}

pub(crate) fn format_shape(shape: &[Option<usize>]) -> String {
    format!(
        "({})",
        shape
            .iter()
            .map(|d| d.map_or_else(|| "None".to_string(), |d| d.to_string()))
            .join(", ")
    )
}
