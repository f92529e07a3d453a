use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use tensorhub_error::{HubResult, hub_bail, hub_err};

use crate::Codec;

/// Pixels per row of the encoded image.
const ROW_PIXELS: usize = 1024;

/// Length of the little-endian `u64` header holding the unpadded input length.
const HEADER_LEN: usize = size_of::<u64>();

/// Lossless PNG compression for image-like byte layouts.
///
/// Input bytes are interpreted as interleaved 8-bit pixels with `channels` channels, laid out
/// in rows of at most 1024 pixels and zero-padded to a full rectangle. The unpadded length is
/// stored in front of the PNG stream.
#[derive(Debug, Clone, Copy)]
pub struct PngCodec {
    channels: u8,
}

impl PngCodec {
    /// Create a codec for `channels` interleaved channels (1-4).
    pub fn new(channels: u8) -> HubResult<Self> {
        if !(1..=4).contains(&channels) {
            hub_bail!("png supports 1 to 4 channels, got {channels}");
        }
        Ok(Self { channels })
    }

    fn color_type(&self) -> ExtendedColorType {
        match self.channels {
            1 => ExtendedColorType::L8,
            2 => ExtendedColorType::La8,
            3 => ExtendedColorType::Rgb8,
            _ => ExtendedColorType::Rgba8,
        }
    }
}

impl Default for PngCodec {
    fn default() -> Self {
        Self { channels: 1 }
    }
}

impl Codec for PngCodec {
    fn name(&self) -> &str {
        "png"
    }

    fn encode(&self, input: &[u8]) -> HubResult<Vec<u8>> {
        let len = u64::try_from(input.len())?;
        let mut out = len.to_le_bytes().to_vec();
        if input.is_empty() {
            return Ok(out);
        }

        let channels = usize::from(self.channels);
        let width = input.len().div_ceil(channels).min(ROW_PIXELS);
        let row_bytes = width * channels;
        let height = input.len().div_ceil(row_bytes);

        let mut pixels = Vec::with_capacity(row_bytes * height);
        pixels.extend_from_slice(input);
        pixels.resize(row_bytes * height, 0);

        PngEncoder::new(&mut out)
            .write_image(
                &pixels,
                u32::try_from(width)?,
                u32::try_from(height)?,
                self.color_type(),
            )
            .map_err(|e| hub_err!("png encode: {e}"))?;
        Ok(out)
    }

    fn decode(&self, input: &[u8]) -> HubResult<Vec<u8>> {
        if input.len() < HEADER_LEN {
            hub_bail!(CorruptChunk: "png: missing length header");
        }
        let (header, stream) = input.split_at(HEADER_LEN);
        let mut len_bytes = [0u8; HEADER_LEN];
        len_bytes.copy_from_slice(header);
        let len = usize::try_from(u64::from_le_bytes(len_bytes))?;
        if len == 0 {
            return Ok(Vec::new());
        }

        let image = image::load_from_memory_with_format(stream, ImageFormat::Png)
            .map_err(|e| hub_err!(CorruptChunk: "png: {e}"))?;
        let mut pixels = image.into_bytes();
        if pixels.len() < len {
            hub_bail!(
                CorruptChunk: "png: decoded {} bytes, expected at least {len}",
                pixels.len()
            );
        }
        pixels.truncate(len);
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_validated() {
        assert!(PngCodec::new(0).is_err());
        assert!(PngCodec::new(5).is_err());
        assert!(PngCodec::new(4).is_ok());
    }

    #[test]
    fn multi_row_rgb() {
        let codec = PngCodec::new(3).unwrap();
        // Not a multiple of the row width nor of the channel count.
        let input = (0..10_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let encoded = codec.encode(&input).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), input);
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let codec = PngCodec::default();
        let encoded = codec.encode(&[7u8; 300]).unwrap();
        let err = codec.decode(&encoded[..encoded.len() / 2]).unwrap_err();
        assert!(matches!(err, tensorhub_error::HubError::CorruptChunk(..)));
    }
}
