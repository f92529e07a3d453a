use tensorhub_error::HubResult;

use crate::Codec;

/// The `default` codec: chunks are stored exactly as written.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCodec;

impl Codec for PassthroughCodec {
    fn name(&self) -> &str {
        "default"
    }

    fn encode(&self, input: &[u8]) -> HubResult<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decode(&self, input: &[u8]) -> HubResult<Vec<u8>> {
        Ok(input.to_vec())
    }
}
