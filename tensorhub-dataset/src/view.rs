use std::fmt::{Display, Formatter};

use itertools::Itertools;
use tensorhub_dtype::SchemaNode;
use tensorhub_error::{HubResult, ResultExt, hub_bail, hub_err};
use tensorhub_tensor::{ChunkedTensor, Selector, TensorData};

use crate::dataset::normalize_path;
use crate::{Dataset, Resolved};

/// A lazily evaluated region of a [`Dataset`]: a subpath into the schema plus selectors.
///
/// The first selector addresses samples, later ones address the axes below. Views over a
/// composite region fan out to every leaf underneath when resolved.
#[derive(Debug, Clone)]
pub struct View<'a> {
    dataset: &'a Dataset,
    subpath: String,
    selectors: Vec<Selector>,
}

/// The result of indexing, depending on whether the dataset is lazy.
#[derive(Debug)]
pub enum Indexed<'a> {
    /// A view to be resolved later
    View(View<'a>),
    /// Data read at indexing time
    Data(Resolved),
}

impl<'a> Indexed<'a> {
    /// The data, reading it now if it has not been read yet.
    pub fn into_data(self) -> HubResult<Resolved> {
        match self {
            Indexed::View(view) => view.compute(),
            Indexed::Data(data) => Ok(data),
        }
    }

    /// The view, if indexing was lazy
    pub fn into_view(self) -> Option<View<'a>> {
        match self {
            Indexed::View(view) => Some(view),
            Indexed::Data(_) => None,
        }
    }
}

enum Region<'a> {
    Leaf(&'a ChunkedTensor),
    Composite(&'a SchemaNode),
}

impl<'a> View<'a> {
    pub(crate) fn root(dataset: &'a Dataset) -> Self {
        Self {
            dataset,
            subpath: "/".to_string(),
            selectors: Vec::new(),
        }
    }

    pub(crate) fn sample(dataset: &'a Dataset, sample: usize) -> Self {
        Self {
            dataset,
            subpath: "/".to_string(),
            selectors: vec![Selector::from(sample)],
        }
    }

    /// The dataset this view reads from
    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    /// The schema path of the region
    pub fn subpath(&self) -> &str {
        &self.subpath
    }

    /// The accumulated selectors
    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    fn region(&self) -> HubResult<Region<'a>> {
        if let Ok(tensor) = self.dataset.tensor(&self.subpath) {
            return Ok(Region::Leaf(tensor));
        }
        match self.dataset.schema().node_at(&self.subpath) {
            Some(node) => Ok(Region::Composite(node)),
            None => hub_bail!(
                NotFound: "key {} not found in dataset {}",
                self.subpath,
                self.dataset.location()
            ),
        }
    }

    /// Narrow to the child region at `path`, relative to this view. Selectors are kept.
    ///
    /// Always lazy; [`View::get_path`] reads at once when the dataset is not.
    pub fn narrow(&self, path: &str) -> HubResult<View<'a>> {
        let view = View {
            dataset: self.dataset,
            subpath: normalize_path(&format!("{}/{path}", self.subpath)),
            selectors: self.selectors.clone(),
        };
        view.region()?;
        view.check_selectors()?;
        Ok(view)
    }

    /// Apply one more selector. Always lazy; [`View::get`] reads at once when the dataset is not.
    pub fn index(&self, selector: impl Into<Selector>) -> HubResult<View<'a>> {
        self.at(&[selector.into()])
    }

    /// Apply several more selectors, outermost first. Always lazy.
    pub fn at(&self, selectors: &[Selector]) -> HubResult<View<'a>> {
        let view = View {
            dataset: self.dataset,
            subpath: self.subpath.clone(),
            selectors: self.selectors.iter().chain(selectors).copied().collect(),
        };
        view.check_selectors()?;
        Ok(view)
    }

    fn check_selectors(&self) -> HubResult<()> {
        match self.region()? {
            Region::Leaf(tensor) => {
                let allowed = tensor.max_shape().len() + 1;
                if self.selectors.len() > allowed {
                    hub_bail!(
                        "{} selectors for tensor {} with {allowed} axes",
                        self.selectors.len(),
                        self.subpath
                    );
                }
            }
            Region::Composite(_) => {
                let allowed = 1 + self.dataset.sequence_depth(&self.subpath);
                if self.selectors.len() > allowed {
                    hub_bail!(
                        "cannot slice dictionary region {} with {} selectors without a key",
                        self.subpath,
                        self.selectors.len()
                    );
                }
            }
        }
        Ok(())
    }

    /// The region at `path`: a view when the dataset is lazy, its data otherwise.
    pub fn get_path(&self, path: &str) -> HubResult<Indexed<'a>> {
        self.narrow(path)?.settle()
    }

    /// The region with one more selector: a view when the dataset is lazy, its data otherwise.
    pub fn get(&self, selector: impl Into<Selector>) -> HubResult<Indexed<'a>> {
        self.index(selector)?.settle()
    }

    fn settle(self) -> HubResult<Indexed<'a>> {
        if self.dataset.is_lazy() {
            Ok(Indexed::View(self))
        } else {
            self.compute().map(Indexed::Data)
        }
    }

    /// Read the region. Leaves resolve to their data; composites to a mapping mirroring the schema.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(subpath = %self.subpath)))]
    pub fn compute(&self) -> HubResult<Resolved> {
        match self.region()? {
            Region::Leaf(tensor) => Ok(Resolved::Tensor(tensor.read(&self.selectors)?)),
            Region::Composite(node) => self
                .compute_node(node, &self.subpath)
                .context(|| format!("reading {self}")),
        }
    }

    fn compute_node(&self, node: &SchemaNode, path: &str) -> HubResult<Resolved> {
        match node {
            SchemaNode::Composite(composite) => composite
                .fields()
                .map(|(name, child)| {
                    let child_path = normalize_path(&format!("{path}/{name}"));
                    Ok((name.clone(), self.compute_node(child, &child_path)?))
                })
                .collect::<HubResult<Vec<_>>>()
                .map(Resolved::Dict),
            SchemaNode::RaggedSequence(seq) if matches!(seq.inner(), SchemaNode::Composite(_)) => {
                self.compute_node(seq.inner(), path)
            }
            _ => {
                let tensor = self.dataset.tensor(path)?;
                Ok(Resolved::Tensor(tensor.read(&self.selectors)?))
            }
        }
    }

    /// Write `value` into the region. Only leaf regions can be assigned.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(subpath = %self.subpath)))]
    pub fn assign(&self, value: impl Into<TensorData>) -> HubResult<()> {
        match self.region()? {
            Region::Leaf(tensor) => tensor.write(&self.selectors, &value.into()),
            Region::Composite(_) if self.subpath == "/" => {
                hub_bail!("cannot assign to a dataset region without a key")
            }
            Region::Composite(_) => Err(hub_err!(
                "cannot assign to dictionary region {}, narrow to a tensor first",
                self.subpath
            )),
        }
    }
}

impl Display for View<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}[{}]",
            self.dataset.location(),
            self.subpath,
            self.selectors.iter().join(", ")
        )
    }
}
