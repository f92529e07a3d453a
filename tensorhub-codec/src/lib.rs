#![deny(missing_docs)]

//! Per-chunk compression codecs.
//!
//! Each tensor names one codec at creation time. Chunks are encoded independently, so any
//! chunk can be decoded without touching its neighbours. Codecs are looked up by name in a
//! [`CodecRegistry`]; the built-in names are `default` (identity), `lz4`, `zstd` and `png`.

use std::fmt::Debug;
use std::sync::Arc;

use tensorhub_error::{HubResult, hub_bail};

pub use self::lz4::*;
pub use self::passthrough::*;
pub use self::png::*;
pub use self::registry::*;
pub use self::zstd::*;

mod lz4;
mod passthrough;
mod png;
mod registry;
mod zstd;

/// A named, lossless byte-to-byte transformation applied to every chunk.
pub trait Codec: Debug + Send + Sync {
    /// The name under which the codec is registered.
    fn name(&self) -> &str;

    /// Compress `input`.
    fn encode(&self, input: &[u8]) -> HubResult<Vec<u8>>;

    /// Decompress `input`. Fails with `CorruptChunk` if `input` was not produced by
    /// [`Codec::encode`].
    fn decode(&self, input: &[u8]) -> HubResult<Vec<u8>>;

    /// Decompress `input`, failing with `CorruptChunk` if it decodes to more than `max_len`
    /// bytes. Codecs that know the decoded size up front reject it before allocating.
    fn decode_bounded(&self, input: &[u8], max_len: usize) -> HubResult<Vec<u8>> {
        let decoded = self.decode(input)?;
        if decoded.len() > max_len {
            hub_bail!(
                CorruptChunk: "{} decoded {} bytes, more than {max_len}",
                self.name(),
                decoded.len()
            );
        }
        Ok(decoded)
    }
}

/// A shared reference to a codec
pub type CodecRef = Arc<dyn Codec>;
