//! Byte addressing of samples and chunks.
//!
//! Every sample occupies `product(max_shape) * byte_width` bytes of a tensor's logical byte
//! stream, whatever its recorded shape, so the position of any element is a pure function of
//! its sample and inner indices. The stream is cut into fixed-size chunks.

use std::ops::Range;

/// Row-major element strides of a sample laid out at `max_shape`.
pub fn strides(max_shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; max_shape.len()];
    for axis in (0..max_shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * max_shape[axis + 1];
    }
    strides
}

/// Contiguous element runs `(offset, len)` covering `region` within one sample.
///
/// Runs are emitted in row-major order of the region, so concatenating them yields the region
/// as a dense array. Trailing axes selected in full are merged into longer runs.
pub fn region_runs(max_shape: &[usize], region: &[Range<usize>]) -> Vec<(usize, usize)> {
    debug_assert_eq!(max_shape.len(), region.len());
    if region.iter().any(|r| r.is_empty()) {
        return Vec::new();
    }
    let strides = strides(max_shape);

    // the innermost axes that are fully covered collapse into one run together with the
    // first partially covered axis above them
    let mut split = region.len();
    let mut run_len = 1;
    while split > 0 {
        let axis = split - 1;
        run_len *= region[axis].len();
        split = axis;
        if region[axis].len() != max_shape[axis] {
            break;
        }
    }

    let outer = &region[..split];
    let base = region[split..]
        .iter()
        .zip(&strides[split..])
        .map(|(r, s)| r.start * s)
        .sum::<usize>();

    let mut runs = Vec::with_capacity(outer.iter().map(|r| r.len()).product());
    let mut index = outer.iter().map(|r| r.start).collect::<Vec<_>>();
    loop {
        let offset = base
            + index
                .iter()
                .zip(&strides[..split])
                .map(|(i, s)| i * s)
                .sum::<usize>();
        runs.push((offset, run_len));

        // odometer increment over the outer axes
        let mut axis = split;
        loop {
            if axis == 0 {
                return runs;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < outer[axis].end {
                break;
            }
            index[axis] = outer[axis].start;
        }
    }
}

/// A piece of a byte span that falls within a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Index of the chunk
    pub chunk: usize,
    /// Offset of the piece within the chunk
    pub offset: usize,
    /// Length of the piece
    pub len: usize,
    /// Offset of the piece within the original span
    pub source: usize,
}

/// Split the byte span `start..start + len` of the logical stream at chunk boundaries.
pub fn chunk_spans(start: usize, len: usize, chunk_size: usize) -> impl Iterator<Item = ChunkSpan> {
    let mut source = 0;
    std::iter::from_fn(move || {
        if source >= len {
            return None;
        }
        let position = start + source;
        let chunk = position / chunk_size;
        let offset = position % chunk_size;
        let piece = (chunk_size - offset).min(len - source);
        let span = ChunkSpan {
            chunk,
            offset,
            len: piece,
            source,
        };
        source += piece;
        Some(span)
    })
}
