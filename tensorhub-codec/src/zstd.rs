use tensorhub_error::{HubResult, hub_bail, hub_err};

use crate::Codec;

/// Zstandard frame compression.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    /// The level used by the registered `zstd` codec.
    pub const DEFAULT_LEVEL: i32 = 1;

    /// Create a codec compressing at `level` (1-22).
    pub fn new(level: i32) -> HubResult<Self> {
        if !(1..=22).contains(&level) {
            hub_bail!("zstd level {level} outside 1..=22");
        }
        Ok(Self { level })
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self {
            level: Self::DEFAULT_LEVEL,
        }
    }
}

impl Codec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn encode(&self, input: &[u8]) -> HubResult<Vec<u8>> {
        Ok(::zstd::encode_all(input, self.level)?)
    }

    fn decode(&self, input: &[u8]) -> HubResult<Vec<u8>> {
        ::zstd::decode_all(input).map_err(|e| hub_err!(CorruptChunk: "zstd: {e}"))
    }

    fn decode_bounded(&self, input: &[u8], max_len: usize) -> HubResult<Vec<u8>> {
        ::zstd::bulk::decompress(input, max_len).map_err(|e| hub_err!(CorruptChunk: "zstd: {e}"))
    }
}
