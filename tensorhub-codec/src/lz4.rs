use tensorhub_error::{HubResult, hub_bail, hub_err};

use crate::Codec;

/// LZ4 block compression with the uncompressed length prepended.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &str {
        "lz4"
    }

    fn encode(&self, input: &[u8]) -> HubResult<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(input))
    }

    fn decode(&self, input: &[u8]) -> HubResult<Vec<u8>> {
        lz4_flex::decompress_size_prepended(input)
            .map_err(|e| hub_err!(CorruptChunk: "lz4: {e}"))
    }

    fn decode_bounded(&self, input: &[u8], max_len: usize) -> HubResult<Vec<u8>> {
        let Some((header, block)) = input.split_first_chunk::<4>() else {
            hub_bail!(CorruptChunk: "lz4: missing length header");
        };
        let len = usize::try_from(u32::from_le_bytes(*header))?;
        if len > max_len {
            hub_bail!(CorruptChunk: "lz4: header claims {len} bytes, more than {max_len}");
        }
        lz4_flex::decompress(block, len).map_err(|e| hub_err!(CorruptChunk: "lz4: {e}"))
    }
}
