//! Skip-segment records for erasure-coded bulk transfers
//!
//! A per-target bulk transfer is described to the receiver as a sequence of
//! `(length, is_skip)` records: data ranges interleaved with padding the
//! receiver must skip. On the wire each record occupies one 64-bit word with
//! the flag in the top bit, leaving 63 bits of length.

use stripeio_common::{Error, Result};

const SKIP_FLAG: u64 = 1 << 63;

/// Maximum representable segment length (63 bits).
pub const MAX_SEG_LEN: u64 = SKIP_FLAG - 1;

/// One record of a bulk-transfer skip map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegSpec {
    len: u64,
    is_skip: bool,
}

impl SegSpec {
    /// Create a record; the length must fit in 63 bits.
    pub fn new(len: u64, is_skip: bool) -> Result<Self> {
        if len > MAX_SEG_LEN {
            return Err(Error::invalid_argument(format!(
                "segment length {len} exceeds 63 bits"
            )));
        }
        Ok(Self { len, is_skip })
    }

    /// A data record.
    pub fn data(len: u64) -> Result<Self> {
        Self::new(len, false)
    }

    /// A padding record the receiver skips.
    pub fn skip(len: u64) -> Result<Self> {
        Self::new(len, true)
    }

    /// Segment length in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Whether the record is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the receiver skips this range.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        self.is_skip
    }

    /// Pack into the one-word wire form.
    #[must_use]
    pub const fn pack(self) -> PackedSeg {
        PackedSeg(self.len | if self.is_skip { SKIP_FLAG } else { 0 })
    }
}

/// Wire form of a [`SegSpec`]: exactly one 64-bit word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct PackedSeg(u64);

// The packed form must stay exactly one word.
const _: () = assert!(std::mem::size_of::<PackedSeg>() == std::mem::size_of::<u64>());

impl PackedSeg {
    /// Raw word value.
    #[must_use]
    pub const fn into_word(self) -> u64 {
        self.0
    }

    /// Rebuild from a raw word.
    #[must_use]
    pub const fn from_word(word: u64) -> Self {
        Self(word)
    }

    /// Unpack into the two-field record.
    #[must_use]
    pub const fn unpack(self) -> SegSpec {
        SegSpec {
            len: self.0 & MAX_SEG_LEN,
            is_skip: self.0 & SKIP_FLAG != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let spec = SegSpec::data(4096).unwrap();
        assert_eq!(spec.pack().unpack(), spec);

        let spec = SegSpec::skip(MAX_SEG_LEN).unwrap();
        let packed = spec.pack();
        assert_eq!(packed.into_word() & SKIP_FLAG, SKIP_FLAG);
        assert_eq!(packed.unpack().len(), MAX_SEG_LEN);
        assert!(packed.unpack().is_skip());
    }

    #[test]
    fn test_length_limit() {
        assert!(SegSpec::data(MAX_SEG_LEN).is_ok());
        assert!(SegSpec::data(MAX_SEG_LEN + 1).is_err());
    }

    #[test]
    fn test_word_round_trip() {
        let word = SegSpec::skip(777).unwrap().pack().into_word();
        let spec = PackedSeg::from_word(word).unpack();
        assert_eq!(spec.len(), 777);
        assert!(spec.is_skip());
    }
}
