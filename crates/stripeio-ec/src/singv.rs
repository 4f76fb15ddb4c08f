//! Single-value layouts
//!
//! An atomic single value under an erasure-coded class is not worth
//! striping when it fits in one cell; it is instead replicated on enough
//! targets to survive the same number of failures as the stripe (one data
//! cell plus every parity cell). Larger values are chunked across the data
//! cells like array data.

use stripeio_common::RedundancyClass;

/// How one single value is laid out across the redundancy group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SingleValueLayout {
    /// Chunked across data cells rather than replicated whole
    pub striped: bool,
    /// Bytes per target: the full value when replicated, the per-cell
    /// chunk when striped
    pub chunk: u64,
    /// Cells receiving the full value when replicated; the data cells
    /// when striped
    pub targets: Vec<u32>,
}

impl SingleValueLayout {
    /// Compute the layout for a value of `size` bytes under `class`.
    #[must_use]
    pub fn for_size(class: &RedundancyClass, size: u64) -> Self {
        match *class {
            RedundancyClass::Replicated { replicas } => Self {
                striped: false,
                chunk: size,
                targets: (0..u32::from(replicas)).collect(),
            },
            RedundancyClass::ErasureCoded {
                data_cells,
                parity_cells,
                cell_size,
            } => {
                if size <= cell_size {
                    // Cell 0 plus every parity cell: parity-count + 1 copies.
                    let mut targets = vec![0u32];
                    targets
                        .extend(u32::from(data_cells)..u32::from(data_cells) + u32::from(parity_cells));
                    Self {
                        striped: false,
                        chunk: size,
                        targets,
                    }
                } else {
                    Self {
                        striped: true,
                        chunk: size.div_ceil(u64::from(data_cells)),
                        targets: (0..u32::from(data_cells)).collect(),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicated_class() {
        let layout = SingleValueLayout::for_size(&RedundancyClass::REPL_3, 100);
        assert!(!layout.striped);
        assert_eq!(layout.chunk, 100);
        assert_eq!(layout.targets, vec![0, 1, 2]);
    }

    #[test]
    fn test_small_value_replicates_on_parity() {
        let layout = SingleValueLayout::for_size(&RedundancyClass::EC_4_2, 512);
        assert!(!layout.striped);
        // Cell 0 and the two parity cells of 4+2.
        assert_eq!(layout.targets, vec![0, 4, 5]);
    }

    #[test]
    fn test_large_value_stripes() {
        let big: u64 = 4 * 64 * 1024 + 1;
        let layout = SingleValueLayout::for_size(&RedundancyClass::EC_4_2, big);
        assert!(layout.striped);
        assert_eq!(layout.chunk, big.div_ceil(4));
        assert_eq!(layout.targets, vec![0, 1, 2, 3]);
    }
}
