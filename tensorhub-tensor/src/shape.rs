use bytes::Bytes;
use tensorhub_error::{HubResult, ResultExt, hub_bail};

use crate::keys::KeySpace;

/// Prefix of the per-sample shape record within a tensor's key space.
pub const SHAPE_PREFIX: &str = "--dynamic--";

const BLOCK_SAMPLES: usize = 1024;

/// Per-sample shapes of a tensor whose samples may be smaller than its max shape.
///
/// Shapes are kept in blocks of 1024 samples at `--dynamic--/<block>`. Each sample holds one
/// little-endian `u32` per axis: `0` for a sample that was never written, otherwise its extent
/// plus one.
#[derive(Debug, Clone)]
pub(crate) struct ShapeRecord {
    ndim: usize,
}

impl ShapeRecord {
    pub fn new(ndim: usize) -> Self {
        Self { ndim }
    }

    fn block_key(sample: usize) -> String {
        format!("{SHAPE_PREFIX}/{}", sample / BLOCK_SAMPLES)
    }

    fn slot(&self, sample: usize) -> std::ops::Range<usize> {
        let width = self.ndim * size_of::<u32>();
        let start = (sample % BLOCK_SAMPLES) * width;
        start..start + width
    }

    /// The recorded shape of `sample`, or `None` if it was never written.
    pub fn get(&self, keys: &KeySpace, sample: usize) -> HubResult<Option<Vec<usize>>> {
        if self.ndim == 0 {
            return Ok(None);
        }
        let key = Self::block_key(sample);
        let Some(block) = keys.get(&key)? else {
            return Ok(None);
        };
        let slot = self.slot(sample);
        if block.len() % (self.ndim * size_of::<u32>()) != 0 {
            hub_bail!(CorruptChunk: "shape block {key} has {} bytes", block.len());
        }
        if slot.end > block.len() {
            return Ok(None);
        }

        let encoded = block[slot]
            .chunks_exact(size_of::<u32>())
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect::<Vec<_>>();
        if encoded.iter().all(|&v| v == 0) {
            return Ok(None);
        }
        if encoded.contains(&0) {
            hub_bail!(CorruptChunk: "partially recorded shape for sample {sample} in {key}");
        }
        encoded
            .into_iter()
            .map(|v| Ok(usize::try_from(v - 1)?))
            .collect::<HubResult<Vec<_>>>()
            .map(Some)
    }

    /// Record `shape` for `sample`.
    pub fn set(&self, keys: &KeySpace, sample: usize, shape: &[usize]) -> HubResult<()> {
        if self.ndim == 0 {
            return Ok(());
        }
        if shape.len() != self.ndim {
            hub_bail!(
                ShapeMismatch: "shape of {} axes recorded for a {}-axis tensor",
                shape.len(),
                self.ndim
            );
        }
        let mut encoded = Vec::with_capacity(self.ndim * size_of::<u32>());
        for &extent in shape {
            let value = u32::try_from(extent)?
                .checked_add(1)
                .ok_or_else(|| tensorhub_error::hub_err!("extent {extent} too large to record"))?;
            encoded.extend_from_slice(&value.to_le_bytes());
        }

        let key = Self::block_key(sample);
        let slot = self.slot(sample);
        keys.modify(&key, |current| {
            let mut block = current.map(|b| b.to_vec()).unwrap_or_default();
            if block.len() < slot.end {
                block.resize(slot.end, 0);
            }
            block[slot].copy_from_slice(&encoded);
            Ok(Bytes::from(block))
        })
        .context(|| format!("recording the shape of sample {sample}"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tensorhub_io::{ByteStore, InMemoryStore, TieredCache};

    use super::*;

    fn keys() -> KeySpace {
        KeySpace::new(Arc::new(TieredCache::uncached(Arc::new(InMemoryStore::default()))))
    }

    #[test]
    fn unset_until_written() {
        let keys = keys();
        let record = ShapeRecord::new(3);
        assert_eq!(record.get(&keys, 5).unwrap(), None);
        record.set(&keys, 5, &[16, 16, 3]).unwrap();
        assert_eq!(record.get(&keys, 5).unwrap(), Some(vec![16, 16, 3]));
        assert_eq!(record.get(&keys, 4).unwrap(), None);
        assert_eq!(record.get(&keys, 6).unwrap(), None);
    }

    #[test]
    fn zero_extents_are_distinct_from_unset() {
        let keys = keys();
        let record = ShapeRecord::new(1);
        record.set(&keys, 0, &[0]).unwrap();
        assert_eq!(record.get(&keys, 0).unwrap(), Some(vec![0]));
    }

    #[test]
    fn blocks_are_independent() {
        let keys = keys();
        let record = ShapeRecord::new(2);
        record.set(&keys, 1, &[1, 2]).unwrap();
        record.set(&keys, BLOCK_SAMPLES + 1, &[3, 4]).unwrap();
        assert_eq!(record.get(&keys, 1).unwrap(), Some(vec![1, 2]));
        assert_eq!(record.get(&keys, BLOCK_SAMPLES + 1).unwrap(), Some(vec![3, 4]));
        assert_eq!(
            keys.cache().list(SHAPE_PREFIX).unwrap(),
            ["--dynamic--/0", "--dynamic--/1"]
        );
    }

    #[test]
    fn arity_checked() {
        let keys = keys();
        assert!(ShapeRecord::new(2).set(&keys, 0, &[1]).is_err());
    }
}
