//! Byte extents and parity addressing
//!
//! Parity is stored in a private address range selected by setting the
//! most-significant bit of the 64-bit offset. User-visible extents are
//! therefore limited to the low 63 bits of the address space; the client
//! stack enforces this before an extent reaches reassembly.

use stripeio_common::{Error, Result};

/// Most-significant offset bit marking the parity address range.
pub const PARITY_INDICATOR: u64 = 1 << 63;

/// A contiguous byte range in an object's logical or target address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Extent {
    /// Start offset in bytes
    pub offset: u64,
    /// Length in bytes
    pub len: u64,
}

impl Extent {
    /// Create a new extent
    #[must_use]
    pub const fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// One-past-the-end offset
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.len
    }

    /// Whether the offset addresses the parity range
    #[must_use]
    pub const fn is_parity(&self) -> bool {
        self.offset & PARITY_INDICATOR != 0
    }

    /// Reject user extents that would intrude on the parity address range.
    /// Zero-length extents are also invalid.
    pub fn validate_user(&self) -> Result<()> {
        if self.len == 0 {
            return Err(Error::invalid_argument("zero-length extent"));
        }
        let end = self
            .offset
            .checked_add(self.len)
            .ok_or(Error::InvalidExtent {
                offset: self.offset,
            })?;
        if self.offset & PARITY_INDICATOR != 0 || end > PARITY_INDICATOR {
            return Err(Error::InvalidExtent {
                offset: self.offset,
            });
        }
        Ok(())
    }
}

/// Sort an extent/payload run list by offset and merge adjacent runs.
///
/// The payload attached to each extent travels with it; merged runs get
/// their payloads concatenated in address order. Overlapping extents are
/// rejected: an update carrying two values for one byte is a caller bug.
pub fn normalize<T, M>(mut runs: Vec<(Extent, T)>, mut merge: M) -> Result<Vec<(Extent, T)>>
where
    M: FnMut(T, T) -> T,
{
    if runs.len() < 2 {
        return Ok(runs);
    }
    runs.sort_by_key(|(ext, _)| ext.offset);

    let mut out: Vec<(Extent, T)> = Vec::with_capacity(runs.len());
    for (ext, payload) in runs {
        match out.pop() {
            None => out.push((ext, payload)),
            Some((last_ext, last_payload)) => {
                if ext.offset < last_ext.end() {
                    return Err(Error::invalid_argument(format!(
                        "overlapping extents at offset {}",
                        ext.offset
                    )));
                }
                if ext.offset == last_ext.end() {
                    let merged = Extent::new(last_ext.offset, last_ext.len + ext.len);
                    out.push((merged, merge(last_payload, payload)));
                } else {
                    out.push((last_ext, last_payload));
                    out.push((ext, payload));
                }
            }
        }
    }
    Ok(out)
}
