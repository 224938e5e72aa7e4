// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COSIG - PARTICIPATION BITMAPS
//
// Position i is set iff committee member i's contribution is included.
// Length is fixed to the committee size at construction and never changes.
//
// `QuorumBitmap` is the only input the aggregation functions accept, and it
// can only be obtained from a bitmap whose population count has reached the
// quorum threshold. Aggregating below quorum does not type-check.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationBitmap {
    bits: Box<[bool]>,
}

impl ParticipationBitmap {
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![false; len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Mark `index` present. Returns false if it already was.
    ///
    /// # Panics
    /// If `index` is outside the committee.
    pub fn set(&mut self, index: usize) -> bool {
        assert!(
            index < self.bits.len(),
            "bitmap index {} out of range {}",
            index,
            self.bits.len()
        );
        !std::mem::replace(&mut self.bits[index], true)
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i))
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    /// Promote to a `QuorumBitmap` if at least `threshold` bits are set.
    pub fn into_quorum(self, threshold: usize) -> Result<QuorumBitmap, ParticipationBitmap> {
        if threshold > 0 && self.count() >= threshold {
            Ok(QuorumBitmap {
                bitmap: self,
                threshold,
            })
        } else {
            Err(self)
        }
    }

    /// Compact encoding: u16 BE bit length, then bits packed MSB first.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.bits.len().div_ceil(8));
        out.extend_from_slice(&(self.bits.len() as u16).to_be_bytes());
        for chunk in self.bits.chunks(8) {
            let mut byte = 0u8;
            for (i, bit) in chunk.iter().enumerate() {
                if *bit {
                    byte |= 0x80 >> i;
                }
            }
            out.push(byte);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let len = u16::from_be_bytes(bytes.get(..2)?.try_into().ok()?) as usize;
        let packed = bytes.get(2..)?;
        if packed.len() != len.div_ceil(8) {
            return None;
        }
        let bits = (0..len)
            .map(|i| packed[i / 8] & (0x80 >> (i % 8)) != 0)
            .collect::<Vec<bool>>()
            .into_boxed_slice();
        Some(Self { bits })
    }
}

impl std::fmt::Debug for ParticipationBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let rendered: String = self.bits.iter().map(|b| if *b { '1' } else { '0' }).collect();
        write!(f, "Bitmap[{}]", rendered)
    }
}

/// A participation bitmap proven to have reached quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumBitmap {
    bitmap: ParticipationBitmap,
    threshold: usize,
}

impl QuorumBitmap {
    pub fn bitmap(&self) -> &ParticipationBitmap {
        &self.bitmap
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn into_inner(self) -> ParticipationBitmap {
        self.bitmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_count() {
        let mut bm = ParticipationBitmap::new(5);
        assert!(bm.set(1));
        assert!(bm.set(4));
        assert!(!bm.set(1), "second set of same bit reports no change");
        assert_eq!(bm.count(), 2);
        assert_eq!(bm.iter_set().collect::<Vec<_>>(), vec![1, 4]);
        assert!(!bm.is_set(7));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_set_out_of_range_panics() {
        ParticipationBitmap::new(3).set(3);
    }

    #[test]
    fn test_quorum_gate() {
        let mut bm = ParticipationBitmap::new(4);
        bm.set(0);
        bm.set(2);
        let bm = bm.into_quorum(3).unwrap_err();
        let mut bm = bm;
        bm.set(3);
        let quorum = bm.into_quorum(3).unwrap();
        assert_eq!(quorum.bitmap().count(), 3);
        assert_eq!(quorum.threshold(), 3);
    }

    #[test]
    fn test_zero_threshold_never_forms_quorum() {
        assert!(ParticipationBitmap::new(2).into_quorum(0).is_err());
    }

    #[test]
    fn test_packed_encoding() {
        let mut bm = ParticipationBitmap::new(10);
        bm.set(0);
        bm.set(9);
        let bytes = bm.to_bytes();
        assert_eq!(bytes, vec![0x00, 0x0a, 0x80, 0x40]);
        assert_eq!(ParticipationBitmap::from_bytes(&bytes), Some(bm));
    }

    #[test]
    fn test_packed_encoding_rejects_truncation() {
        assert_eq!(ParticipationBitmap::from_bytes(&[0x00, 0x0a, 0x80]), None);
        assert_eq!(ParticipationBitmap::from_bytes(&[0x00]), None);
    }
}
