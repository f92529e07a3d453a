use tensorhub_dtype::FieldName;
use tensorhub_error::{HubResult, hub_bail, hub_err};
use tensorhub_tensor::{NdArray, TensorData};

/// Data produced by resolving a view.
///
/// A view over one leaf resolves to that tensor's data; a view over a composite region resolves
/// to a mapping that mirrors the schema subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// The data of a single leaf tensor
    Tensor(TensorData),
    /// Field name to resolved child, in schema order
    Dict(Vec<(FieldName, Resolved)>),
}

impl Resolved {
    /// The child named `name` of a resolved composite.
    pub fn get(&self, name: &str) -> Option<&Resolved> {
        match self {
            Resolved::Dict(fields) => fields
                .iter()
                .find_map(|(field, value)| (field.as_ref() == name).then_some(value)),
            Resolved::Tensor(_) => None,
        }
    }

    /// Follow a `/`-separated path through nested composites.
    pub fn at(&self, path: &str) -> Option<&Resolved> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.get(segment))
    }

    /// The leaf data, failing for composites.
    pub fn into_tensor(self) -> HubResult<TensorData> {
        match self {
            Resolved::Tensor(data) => Ok(data),
            Resolved::Dict(fields) => hub_bail!(
                "expected a tensor, found a dictionary of {} fields",
                fields.len()
            ),
        }
    }

    /// The leaf data as a dense array.
    pub fn into_array(self) -> HubResult<NdArray> {
        self.into_tensor()?.into_dense()
    }

    /// Borrow the leaf data, if this is a leaf
    pub fn as_tensor(&self) -> Option<&TensorData> {
        match self {
            Resolved::Tensor(data) => Some(data),
            Resolved::Dict(_) => None,
        }
    }

    /// Borrow the leaf at `path` as a dense array.
    pub fn array_at(&self, path: &str) -> HubResult<&NdArray> {
        self.at(path)
            .and_then(Resolved::as_tensor)
            .and_then(TensorData::as_dense)
            .ok_or_else(|| hub_err!(NotFound: "no dense tensor at {path}"))
    }
}

impl From<TensorData> for Resolved {
    fn from(data: TensorData) -> Self {
        Resolved::Tensor(data)
    }
}
