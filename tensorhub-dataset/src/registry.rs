use std::fmt::{Debug, Display, Formatter};

use tensorhub_error::HubResult;

/// Lifecycle state reported to a [`DatasetRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetState {
    /// Created, possibly with unflushed samples
    Created,
    /// Every sample has been flushed to durable storage
    Uploaded,
}

impl Display for DatasetState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetState::Created => write!(f, "CREATED"),
            DatasetState::Uploaded => write!(f, "UPLOADED"),
        }
    }
}

/// An external catalogue notified at dataset lifecycle points.
///
/// `location` identifies the dataset: its URL when opened from one, otherwise its name.
pub trait DatasetRegistry: Debug + Send + Sync {
    /// A dataset was created.
    fn created(&self, location: &str, name: Option<&str>) -> HubResult<()>;

    /// A dataset was flushed or closed.
    fn update_state(&self, location: &str, state: DatasetState) -> HubResult<()>;

    /// A dataset was deleted.
    fn deleted(&self, location: &str) -> HubResult<()>;
}

/// A registry that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistry;

impl DatasetRegistry for NoopRegistry {
    fn created(&self, _location: &str, _name: Option<&str>) -> HubResult<()> {
        Ok(())
    }

    fn update_state(&self, _location: &str, _state: DatasetState) -> HubResult<()> {
        Ok(())
    }

    fn deleted(&self, _location: &str) -> HubResult<()> {
        Ok(())
    }
}
