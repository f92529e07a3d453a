use std::path::PathBuf;
use std::sync::Arc;

use tensorhub_error::{HubResult, hub_bail};
use url::Url;

use crate::{ByteStoreRef, InMemoryStore, LocalStore};

/// Open the durable store a dataset URL points at.
///
/// * a plain path or `file://` URL opens a [`LocalStore`]
/// * `memory://` opens a fresh [`InMemoryStore`]
/// * any other scheme is handed to `object_store` when the `object_store` feature is enabled
pub fn open_store(url: &str) -> HubResult<ByteStoreRef> {
    if url.is_empty() {
        hub_bail!("empty dataset url");
    }
    if !url.contains("://") {
        return Ok(Arc::new(LocalStore::new(PathBuf::from(url))?));
    }

    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "file" => {
            let path = parsed
                .to_file_path()
                .map_err(|_| tensorhub_error::hub_err!("invalid file url {url}"))?;
            Ok(Arc::new(LocalStore::new(path)?))
        }
        "memory" => Ok(Arc::new(InMemoryStore::default())),
        #[cfg(feature = "object_store")]
        _ => {
            let (object_store, path) = object_store::parse_url(&parsed)?;
            log::debug!("opening {} backed dataset at {path}", parsed.scheme());
            Ok(Arc::new(crate::ObjectStoreBackend::new(
                Arc::from(object_store),
                path.as_ref(),
            )?))
        }
        #[cfg(not(feature = "object_store"))]
        scheme => hub_bail!(
            "url scheme {scheme} requires the object_store feature of tensorhub-io"
        ),
    }
}
