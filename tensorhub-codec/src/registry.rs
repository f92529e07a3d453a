use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use tensorhub_error::{HubResult, hub_err};

use crate::{Codec, CodecRef, Lz4Codec, PassthroughCodec, PngCodec, ZstdCodec};

/// The registry holding every built-in codec.
pub static BUILTIN_CODECS: LazyLock<CodecRegistry> = LazyLock::new(CodecRegistry::builtin);

/// Codecs keyed by lowercase name.
#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, CodecRef>,
}

impl CodecRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding `default`, `lz4`, `zstd` and `png`.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(PassthroughCodec);
        registry.register(Lz4Codec);
        registry.register(ZstdCodec::default());
        registry.register(PngCodec::default());
        registry
    }

    /// Register `codec` under its own name, replacing any codec of the same name.
    pub fn register<C: Codec + 'static>(&mut self, codec: C) {
        let name = codec.name().to_lowercase();
        if self.codecs.insert(name.clone(), Arc::new(codec)).is_some() {
            log::debug!("Replaced codec {name}");
        }
    }

    /// Look up a codec by name, ignoring case.
    ///
    /// Fails with `UnsupportedCompressor` if no codec is registered under `name`.
    pub fn get(&self, name: &str) -> HubResult<CodecRef> {
        self.codecs
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| {
                let mut known = self.codecs.keys().map(String::as_str).collect::<Vec<_>>();
                known.sort_unstable();
                hub_err!(UnsupportedCompressor: "{name}, known codecs are {}", known.join(", "))
            })
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.codecs.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use rand::RngCore;
    use rstest::rstest;
    use tensorhub_error::HubError;

    use super::*;

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rand::rng().fill_bytes(&mut bytes);
        bytes
    }

    #[rstest]
    fn roundtrip(
        #[values("default", "lz4", "zstd", "png")] name: &str,
        #[values(0, 1, 7, 4096, 100_003)] len: usize,
    ) {
        let codec = BUILTIN_CODECS.get(name).unwrap();
        let input = random_bytes(len);
        let encoded = codec.encode(&input).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), input);
    }

    #[rstest]
    #[case("lz4")]
    #[case("zstd")]
    fn zero_runs_compress(#[case] name: &str) {
        let codec = BUILTIN_CODECS.get(name).unwrap();
        let encoded = codec.encode(&[0u8; 1 << 16]).unwrap();
        assert!(encoded.len() < 1 << 12);
    }

    #[test]
    fn case_insensitive_lookup() {
        assert_eq!(BUILTIN_CODECS.get("LZ4").unwrap().name(), "lz4");
        assert_eq!(BUILTIN_CODECS.names(), ["default", "lz4", "png", "zstd"]);
    }

    #[test]
    fn unknown_codec() {
        let err = BUILTIN_CODECS.get("snappy").unwrap_err();
        assert!(matches!(err, HubError::UnsupportedCompressor(..)));
    }

    #[rstest]
    #[case("lz4")]
    #[case("zstd")]
    fn garbage_is_corrupt(#[case] name: &str) {
        let codec = BUILTIN_CODECS.get(name).unwrap();
        // A small length prefix followed by bytes no encoder produces.
        let mut garbage = vec![8u8, 0, 0, 0];
        garbage.extend_from_slice(&[0xff; 28]);
        let err = codec.decode(&garbage).unwrap_err();
        assert!(matches!(err, HubError::CorruptChunk(..)));
    }
}
